//! Configuration files driving simulated stations end to end

#![allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable

mod common;

use wallboxsrv::core::bootstrap::{build_transport, load_config, ServiceArgs};
use wallboxsrv::protocol::{BaseScheme, ChargingMode};
use wallboxsrv::session::StationSession;

use common::write_config;

const TWO_STATIONS: &str = r#"
service:
  shutdown_grace_ms: 2000
stations:
  - name: garage
    host: simulated
    scan_interval_secs: 15
    points:
      - index: 1
        mode: limited
        manual_limit_w: 3000
  - name: carport
    host: simulated
    register_map:
      bases:
        kind: explicit
        bases: [4096, 8192]
"#;

fn args_for(path: &std::path::Path) -> ServiceArgs {
    ServiceArgs {
        config: Some(path.to_path_buf()),
        ..Default::default()
    }
}

#[test]
fn test_load_two_stations() {
    let file = write_config(".yaml", TWO_STATIONS);
    let config = load_config(&args_for(file.path()), false).unwrap();

    assert_eq!(config.stations.len(), 2);
    assert_eq!(config.shutdown_grace().as_millis(), 2_000);
    assert_eq!(config.stations[0].scan_interval_secs, 15);
    assert_eq!(
        config.stations[1].register_map.bases,
        BaseScheme::Explicit {
            bases: vec![0x1000, 0x2000]
        }
    );
}

#[tokio::test]
async fn test_configured_stations_poll() {
    let file = write_config(".yaml", TWO_STATIONS);
    let config = load_config(&args_for(file.path()), false).unwrap();

    let garage = &config.stations[0];
    let mut session = StationSession::new(garage, build_transport(garage, false, 1));
    assert_eq!(session.inputs().get(1).mode, ChargingMode::Limited);
    let snapshot = session.run_cycle().await.unwrap();
    assert_eq!(snapshot.station, "garage");
    assert_eq!(snapshot.point(1).unwrap().base_address, 0x0100);

    let carport = &config.stations[1];
    let mut session = StationSession::new(carport, build_transport(carport, false, 2));
    let snapshot = session.run_cycle().await.unwrap();
    assert_eq!(snapshot.points.len(), 2);
    assert_eq!(snapshot.point(2).unwrap().base_address, 0x2000);
}

#[test]
fn test_duplicate_station_names_rejected() {
    let file = write_config(
        ".yaml",
        r#"
stations:
  - name: garage
    host: 10.0.0.2
  - name: garage
    host: 10.0.0.3
"#,
    );
    let err = load_config(&args_for(file.path()), false).unwrap_err();
    assert_eq!(err.exit_code(), 2);
    assert!(err.to_string().contains("Duplicate"));
}

#[test]
fn test_json_config() {
    let file = write_config(
        ".json",
        r#"{"stations": [{"name": "hall", "host": "10.0.0.9", "port": 1502, "unit_id": 3}]}"#,
    );
    let config = load_config(&args_for(file.path()), false).unwrap();
    let station = &config.stations[0];
    assert_eq!(station.port, 1502);
    assert_eq!(station.unit_id, 3);
    assert_eq!(build_transport(station, false, 1).endpoint(), "10.0.0.9:1502");
}

#[test]
fn test_empty_config_needs_stations() {
    let file = write_config(".yaml", "service:\n  name: wallboxsrv\n");
    assert!(load_config(&args_for(file.path()), false).is_err());
    let config = load_config(&args_for(file.path()), true).unwrap();
    assert_eq!(config.stations.len(), 1);
}
