//! Polling through a station session against the simulator

#![allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable

mod common;

use wallboxsrv::error::{RegisterSpace, StationError};
use wallboxsrv::protocol::{PhaseMode, RegisterMap, StatusCode};

use common::{simulated_session, simulated_session_with, station_config};

#[tokio::test]
async fn test_single_point_station() {
    let (_station, mut session) = simulated_session(1);
    let snapshot = session.run_cycle().await.unwrap();

    assert_eq!(snapshot.station, "test");
    assert_eq!(snapshot.unit_id, 1);
    assert_eq!(snapshot.system.num_points, 1);
    assert_eq!(snapshot.points.len(), 1);

    let point = snapshot.point(1).unwrap();
    assert_eq!(point.current_power_w, 7_400);
    assert_eq!(point.status_code, Some(StatusCode::Charging));
    assert_eq!(point.rfid_tag.as_deref(), Some("04A2B3C4D5"));
    assert_eq!(point.meter_reading_kwh, Some(1_234.5));
    assert_eq!(point.max_power_limit_w, Some(11_000));
    assert_eq!(point.phase_mode, Some(PhaseMode::Automatic));
}

#[tokio::test]
async fn test_two_point_station_sums_points() {
    let (station, mut session) = simulated_session(2);
    station.set_input(0x0202, &[37]);
    station.set_input(0x0208, &[18]);

    let snapshot = session.run_cycle().await.unwrap();
    assert_eq!(snapshot.points.len(), 2);
    assert_eq!(snapshot.point(2).unwrap().base_address, 0x0200);
    assert_eq!(snapshot.system.points_power_w, 11_100);
    assert_eq!(snapshot.system.total_session_energy_kwh, 7.0);
    assert_eq!(snapshot.point(2).unwrap().rfid_tag, None);
}

#[tokio::test]
async fn test_missing_second_point_is_omitted() {
    // Station claims two points but only the first exists
    let (station, mut session) = simulated_session(1);
    station.set_input(0x0008, &[2]);

    let snapshot = session.run_cycle().await.unwrap();
    assert_eq!(snapshot.system.num_points, 2);
    assert_eq!(snapshot.points.len(), 1);
    assert!(snapshot.point(2).is_none());
}

#[tokio::test]
async fn test_missing_first_point_fails_cycle() {
    let (station, mut session) = simulated_session(1);
    station.clear_input(0x0101, 8);

    let err = session.run_cycle().await.unwrap_err();
    assert!(matches!(err, StationError::CycleFailed(_)));
    assert!(err.is_fatal());
}

#[tokio::test]
async fn test_optional_reads_degrade_to_absent_fields() {
    let (station, mut session) = simulated_session(1);
    station.fail_reads(RegisterSpace::Input, 0x0030);
    station.fail_reads(RegisterSpace::Input, 0x010C);
    station.fail_reads(RegisterSpace::Input, 0x011A);

    let snapshot = session.run_cycle().await.unwrap();
    assert_eq!(snapshot.system.serial_number, None);
    assert_eq!(snapshot.system.article_number.as_deref(), Some("1234567"));

    let point = snapshot.point(1).unwrap();
    assert_eq!(point.status_code, None);
    assert_eq!(point.voltage_l1_v, None);
    assert_eq!(point.derating_status, None);
    assert_eq!(point.current_power_w, 7_400);
    assert_eq!(point.meter_reading_kwh, Some(1_234.5));
}

#[tokio::test]
async fn test_connection_loss_and_recovery() {
    let (station, mut session) = simulated_session(1);
    session.run_cycle().await.unwrap();

    station.set_offline(true);
    let err = session.run_cycle().await.unwrap_err();
    assert!(err.is_fatal());

    station.heal();
    let snapshot = session.run_cycle().await.unwrap();
    assert_eq!(snapshot.points.len(), 1);
}

#[tokio::test]
async fn test_alternate_layout_station() {
    let mut config = station_config("alt");
    config.register_map = RegisterMap::alternate();
    let (_station, mut session) = simulated_session_with(config, 2);

    let snapshot = session.run_cycle().await.unwrap();
    assert_eq!(snapshot.point(1).unwrap().base_address, 0x1000);
    assert_eq!(snapshot.point(2).unwrap().base_address, 0x2000);
}

#[tokio::test]
async fn test_unit_id_probe_before_polling() {
    let (station, mut session) = simulated_session(1);
    station.answer_units(&[255]);

    assert!(session.run_cycle().await.is_err());
    assert_eq!(session.probe_unit_id().await.unwrap(), 255);

    let snapshot = session.run_cycle().await.unwrap();
    assert_eq!(snapshot.unit_id, 255);
}

#[tokio::test]
async fn test_lifetime_energy_survives_session_reset() {
    let (station, mut session) = simulated_session(1);
    session.run_cycle().await.unwrap();

    station.set_input(0x0108, &[80]);
    session.run_cycle().await.unwrap();

    // New session on the car: counter restarts
    station.set_input(0x0108, &[5]);
    let snapshot = session.run_cycle().await.unwrap();
    assert_eq!(snapshot.point(1).unwrap().accumulated_energy_kwh, Some(8.5));
    assert_eq!(snapshot.point(1).unwrap().energy_session_kwh, 0.5);
}
