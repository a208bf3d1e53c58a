//! Station task
//!
//! One task per station runs poll -> control -> write on a fixed interval.
//! Manual commands arrive over a channel and are executed between cycles,
//! followed by an immediate refresh. Every cycle result is published on a
//! watch channel.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn, Level};

use errors::WallboxErrorTrait;

use crate::core::config::StationConfig;
use crate::error::{Result, StationError};
use crate::inputs::ControlInputs;
use crate::protocol::PhaseMode;
use crate::session::StationSession;
use crate::snapshot::StationSnapshot;

const COMMAND_QUEUE: usize = 16;

/// Consecutive failures after which a still-unavailable station logs at error
const ESCALATE_AFTER: u32 = 10;

/// Latest cycle result of a station
#[derive(Debug, Clone, Serialize)]
pub struct StationStatus {
    pub name: String,
    pub available: bool,
    pub snapshot: Option<StationSnapshot>,
    pub last_error: Option<String>,
    pub updated_at: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
}

impl StationStatus {
    fn pending(name: &str) -> Self {
        Self {
            name: name.to_string(),
            available: false,
            snapshot: None,
            last_error: None,
            updated_at: None,
            consecutive_failures: 0,
        }
    }
}

/// Commands executed by the station task
#[derive(Debug)]
pub enum StationCommand {
    SetPowerLimit {
        watts: u32,
        reply: oneshot::Sender<Result<()>>,
    },
    SetPhaseMode {
        point: u8,
        mode: PhaseMode,
        reply: oneshot::Sender<Result<()>>,
    },
    Refresh {
        reply: oneshot::Sender<Result<()>>,
    },
}

/// Timing of the station loop
#[derive(Debug, Clone, Copy)]
pub struct StationTiming {
    pub scan_interval: Duration,
    pub cycle_timeout: Duration,
    pub probe_unit_ids: bool,
}

impl From<&StationConfig> for StationTiming {
    fn from(config: &StationConfig) -> Self {
        Self {
            scan_interval: config.scan_interval(),
            cycle_timeout: config.cycle_timeout(),
            probe_unit_ids: config.probe_unit_ids,
        }
    }
}

/// Cloneable handle to a running station task
#[derive(Debug, Clone)]
pub struct StationHandle {
    name: String,
    commands: mpsc::Sender<StationCommand>,
    status: watch::Receiver<StationStatus>,
    inputs: ControlInputs,
}

impl StationHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Controller inputs of this station
    pub fn inputs(&self) -> &ControlInputs {
        &self.inputs
    }

    /// Latest published status
    pub fn status(&self) -> StationStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<StationStatus> {
        self.status.clone()
    }

    /// Station-wide absolute power limit, W (100 W resolution, truncating)
    pub async fn set_power_limit(&self, watts: u32) -> Result<()> {
        self.request(|reply| StationCommand::SetPowerLimit { watts, reply }).await
    }

    pub async fn set_phase_mode(&self, point: u8, mode: PhaseMode) -> Result<()> {
        self.request(|reply| StationCommand::SetPhaseMode { point, mode, reply }).await
    }

    /// Run a cycle now instead of waiting for the next tick
    pub async fn refresh(&self) -> Result<()> {
        self.request(|reply| StationCommand::Refresh { reply }).await
    }

    async fn request(
        &self,
        build: impl FnOnce(oneshot::Sender<Result<()>>) -> StationCommand,
    ) -> Result<()> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(build(reply))
            .await
            .map_err(|_| stopped(&self.name))?;
        response.await.map_err(|_| stopped(&self.name))?
    }
}

fn stopped(name: &str) -> StationError {
    StationError::cycle(format!("station {} task stopped", name))
}

/// Start the task driving `session`
pub fn spawn_station(
    session: StationSession,
    timing: StationTiming,
    token: CancellationToken,
) -> (StationHandle, JoinHandle<()>) {
    let name = session.name().to_string();
    let inputs = session.inputs();
    let (command_tx, command_rx) = mpsc::channel(COMMAND_QUEUE);
    let (status_tx, status_rx) = watch::channel(StationStatus::pending(&name));

    let task = StationTask {
        session,
        timing,
        status: status_tx,
        consecutive_failures: 0,
    };
    let join = tokio::spawn(task.run(command_rx, token));

    let handle = StationHandle {
        name,
        commands: command_tx,
        status: status_rx,
        inputs,
    };
    (handle, join)
}

struct StationTask {
    session: StationSession,
    timing: StationTiming,
    status: watch::Sender<StationStatus>,
    consecutive_failures: u32,
}

impl StationTask {
    async fn run(mut self, mut commands: mpsc::Receiver<StationCommand>, token: CancellationToken) {
        info!(
            "Station {} task started for {}, interval {:?}",
            self.session.name(),
            self.session.endpoint(),
            self.timing.scan_interval
        );

        if self.timing.probe_unit_ids {
            tokio::select! {
                _ = token.cancelled() => {
                    self.session.close().await;
                    return;
                }
                result = self.session.probe_unit_id() => {
                    if let Err(e) = result {
                        warn!(
                            "Station {}: unit id probe failed, keeping {}: {}",
                            self.session.name(),
                            self.session.unit_id(),
                            e
                        );
                    }
                }
            }
        }

        let mut ticker = interval(self.timing.scan_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                Some(command) = commands.recv() => {
                    let (reply, result) = self.execute(command).await;
                    let refreshed = match self.cycle(&token).await {
                        Some(outcome) => outcome,
                        None => {
                            let _ = reply.send(Err(stopped(self.session.name())));
                            break;
                        }
                    };
                    let _ = reply.send(result.and(refreshed));
                    ticker.reset();
                }
                _ = ticker.tick() => {
                    if self.cycle(&token).await.is_none() {
                        break;
                    }
                }
            }
        }

        self.session.close().await;
        info!("Station {} task stopped", self.session.name());
    }

    /// Execute a command; returns the reply channel and the write result
    async fn execute(
        &mut self,
        command: StationCommand,
    ) -> (oneshot::Sender<Result<()>>, Result<()>) {
        match command {
            StationCommand::SetPowerLimit { watts, reply } => {
                (reply, self.session.set_power_limit(watts).await)
            },
            StationCommand::SetPhaseMode { point, mode, reply } => {
                (reply, self.session.set_phase_mode(point, mode).await)
            },
            StationCommand::Refresh { reply } => (reply, Ok(())),
        }
    }

    /// One cycle bounded by the cycle timeout; `None` when shutdown interrupted it
    async fn cycle(&mut self, token: &CancellationToken) -> Option<Result<()>> {
        let deadline = self.timing.cycle_timeout;
        let outcome = tokio::select! {
            _ = token.cancelled() => {
                debug!("Station {} cycle aborted by shutdown", self.session.name());
                return None;
            }
            outcome = tokio::time::timeout(deadline, self.session.run_cycle()) => outcome,
        };

        let result = match outcome {
            Ok(result) => result,
            Err(_) => {
                // A request may still be in flight; drop the connection
                self.session.disconnect().await;
                Err(StationError::timeout(format!("update cycle exceeded {:?}", deadline)))
            },
        };

        Some(self.publish(result))
    }

    fn publish(&mut self, result: Result<StationSnapshot>) -> Result<()> {
        let name = self.session.name().to_string();
        match result {
            Ok(snapshot) => {
                if self.consecutive_failures > 0 {
                    info!(
                        "Station {} available again after {} failed cycles",
                        name, self.consecutive_failures
                    );
                }
                self.consecutive_failures = 0;
                debug!(
                    "Station {} cycle ok, {} charge point(s)",
                    name,
                    snapshot.points.len()
                );
                self.status.send_replace(StationStatus {
                    name,
                    available: true,
                    updated_at: Some(snapshot.polled_at),
                    snapshot: Some(snapshot),
                    last_error: None,
                    consecutive_failures: 0,
                });
                Ok(())
            },
            Err(e) => {
                self.consecutive_failures += 1;
                if self.consecutive_failures == ESCALATE_AFTER {
                    error!(
                        "Station {} unavailable for {} cycles: {}",
                        name, self.consecutive_failures, e
                    );
                } else if self.consecutive_failures == 1 {
                    match e.log_level() {
                        Level::ERROR => {
                            error!("Station {} unavailable [{}]: {}", name, e.error_code(), e)
                        },
                        _ => warn!("Station {} unavailable [{}]: {}", name, e.error_code(), e),
                    }
                } else {
                    debug!(
                        "Station {} still unavailable ({}): {}",
                        name, self.consecutive_failures, e
                    );
                }
                self.status.send_replace(StationStatus {
                    name,
                    available: false,
                    snapshot: None,
                    last_error: Some(e.to_string()),
                    updated_at: Some(Utc::now()),
                    consecutive_failures: self.consecutive_failures,
                });
                Err(e)
            },
        }
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use crate::protocol::RegisterMap;
    use crate::transport::SimulatedStation;

    fn start(station: &SimulatedStation) -> (StationHandle, JoinHandle<()>, CancellationToken) {
        let config = StationConfig {
            name: "unit".to_string(),
            host: "simulated".to_string(),
            ..Default::default()
        };
        let session = StationSession::new(&config, Box::new(station.clone()));
        let token = CancellationToken::new();
        let (handle, join) = spawn_station(session, StationTiming::from(&config), token.clone());
        (handle, join, token)
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_tick_publishes_snapshot() {
        let station = SimulatedStation::compleo(&RegisterMap::default(), 1);
        let (handle, join, token) = start(&station);
        let mut status = handle.subscribe();

        status.changed().await.unwrap();
        let current = handle.status();
        assert!(current.available);
        assert_eq!(current.snapshot.map(|s| s.points.len()), Some(1));

        token.cancel();
        join.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_marks_unavailable() {
        let station = SimulatedStation::compleo(&RegisterMap::default(), 1);
        station.set_offline(true);
        let (handle, join, token) = start(&station);

        let err = handle.refresh().await.unwrap_err();
        assert!(err.is_fatal());
        let current = handle.status();
        assert!(!current.available);
        assert!(current.snapshot.is_none());
        assert!(current.consecutive_failures >= 1);

        station.heal();
        handle.refresh().await.unwrap();
        assert_eq!(handle.status().consecutive_failures, 0);

        token.cancel();
        join.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_commands_write_and_refresh() {
        let station = SimulatedStation::compleo(&RegisterMap::default(), 1);
        let (handle, join, token) = start(&station);

        handle.set_power_limit(4_250).await.unwrap();
        assert_eq!(station.holding(0x0000), Some(42));
        let snapshot = handle.status().snapshot.unwrap();
        assert_eq!(snapshot.system.power_setpoint_abs_w, Some(4_200));

        handle.set_phase_mode(1, PhaseMode::ThreePhase).await.unwrap();
        assert_eq!(station.holding(0x0109), Some(3));

        token.cancel();
        join.await.unwrap();
        assert!(handle.refresh().await.is_err());
    }
}
