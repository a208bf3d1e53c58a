//! Shared helpers for wallboxsrv integration tests
#![allow(dead_code)]
#![allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable

use std::io::Write;
use std::time::Duration;

use tempfile::NamedTempFile;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use wallboxsrv::core::config::StationConfig;
use wallboxsrv::runtime::{spawn_station, StationHandle, StationTiming};
use wallboxsrv::session::StationSession;
use wallboxsrv::transport::SimulatedStation;

/// Station configuration pointing at the in-memory simulator
pub fn station_config(name: &str) -> StationConfig {
    StationConfig {
        name: name.to_string(),
        host: "simulated".to_string(),
        ..Default::default()
    }
}

/// Simulated station with `points` charge points and a session driving it
///
/// The returned station shares its registers with the session's transport.
pub fn simulated_session(points: u8) -> (SimulatedStation, StationSession) {
    simulated_session_with(station_config("test"), points)
}

pub fn simulated_session_with(
    config: StationConfig,
    points: u8,
) -> (SimulatedStation, StationSession) {
    let station = SimulatedStation::compleo(&config.register_map, points);
    let session = StationSession::new(&config, Box::new(station.clone()));
    (station, session)
}

/// Running station task around a simulated station
pub struct RunningStation {
    pub station: SimulatedStation,
    pub handle: StationHandle,
    pub task: JoinHandle<()>,
    pub token: CancellationToken,
}

impl RunningStation {
    pub fn start(config: StationConfig, points: u8) -> Self {
        let (station, session) = simulated_session_with(config.clone(), points);
        let token = CancellationToken::new();
        let (handle, task) = spawn_station(session, StationTiming::from(&config), token.clone());
        Self {
            station,
            handle,
            task,
            token,
        }
    }

    pub async fn stop(self) {
        self.token.cancel();
        tokio::time::timeout(Duration::from_secs(5), self.task)
            .await
            .expect("station task did not stop")
            .expect("station task panicked");
    }
}

/// Temporary config file with the given extension
pub fn write_config(suffix: &str, content: &str) -> NamedTempFile {
    let mut file = tempfile::Builder::new()
        .suffix(suffix)
        .tempfile()
        .expect("Failed to create temp file");
    file.write_all(content.as_bytes())
        .expect("Failed to write config");
    file
}
