//! Line-based control input
//!
//! Feeds the external inputs (mode, solar excess, manual limit, alt-mode) and
//! the manual commands into running stations. One command per line, the
//! station addressed by name or by 1-based position in the config:
//!
//! ```text
//! mode    <station> <point> fast|limited|solar
//! excess  <station> <point> <watts>
//! limit   <station> <point> <watts>
//! alt     <station> <point> on|off [min_current_a]
//! power   <station> <watts>
//! phase   <station> <point> auto|1|3
//! refresh <station>
//! ```
//!
//! Input changes apply from the next cycle; `refresh` runs one at once.

use std::io::BufRead;
use std::str::FromStr;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{Result, StationError};
use crate::protocol::register_map::MAX_POINTS;
use crate::protocol::{ChargingMode, PhaseMode};
use crate::runtime::StationHandle;

const LINE_QUEUE: usize = 16;

/// One parsed control line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlCommand {
    Mode {
        station: String,
        point: u8,
        mode: ChargingMode,
    },
    SolarExcess {
        station: String,
        point: u8,
        watts: i32,
    },
    ManualLimit {
        station: String,
        point: u8,
        watts: u32,
    },
    AltMode {
        station: String,
        point: u8,
        enabled: bool,
        min_current_a: Option<u16>,
    },
    PowerLimit {
        station: String,
        watts: u32,
    },
    PhaseMode {
        station: String,
        point: u8,
        mode: PhaseMode,
    },
    Refresh {
        station: String,
    },
}

impl ControlCommand {
    pub fn station(&self) -> &str {
        match self {
            Self::Mode { station, .. }
            | Self::SolarExcess { station, .. }
            | Self::ManualLimit { station, .. }
            | Self::AltMode { station, .. }
            | Self::PowerLimit { station, .. }
            | Self::PhaseMode { station, .. }
            | Self::Refresh { station } => station.as_str(),
        }
    }
}

fn invalid(line: &str, reason: impl std::fmt::Display) -> StationError {
    StationError::config(format!("Invalid control line '{}': {}", line, reason))
}

fn arg<'a>(parts: &[&'a str], at: usize, what: &str, line: &str) -> Result<&'a str> {
    parts
        .get(at)
        .copied()
        .ok_or_else(|| invalid(line, format!("missing {}", what)))
}

fn number<T: FromStr>(parts: &[&str], at: usize, what: &str, line: &str) -> Result<T> {
    let raw = arg(parts, at, what, line)?;
    raw.parse()
        .map_err(|_| invalid(line, format!("{} '{}' is not a number", what, raw)))
}

fn point(parts: &[&str], line: &str) -> Result<u8> {
    let point: u8 = number(parts, 2, "point", line)?;
    if point == 0 || point > MAX_POINTS {
        return Err(invalid(line, format!("point {} out of range 1..={}", point, MAX_POINTS)));
    }
    Ok(point)
}

fn phase_mode(raw: &str, line: &str) -> Result<PhaseMode> {
    match raw.to_lowercase().as_str() {
        "auto" | "automatic" => Ok(PhaseMode::Automatic),
        "1" | "one" => Ok(PhaseMode::OnePhase),
        "3" | "three" => Ok(PhaseMode::ThreePhase),
        other => Err(invalid(line, format!("unknown phase mode '{}'", other))),
    }
}

impl FromStr for ControlCommand {
    type Err = StationError;

    fn from_str(line: &str) -> Result<Self> {
        let parts: Vec<&str> = line.split_whitespace().collect();
        let verb = arg(&parts, 0, "command", line)?;
        let station = arg(&parts, 1, "station", line)?.to_string();

        let command = match verb.to_lowercase().as_str() {
            "mode" => Self::Mode {
                point: point(&parts, line)?,
                mode: arg(&parts, 3, "mode", line)?
                    .parse()
                    .map_err(|e: String| invalid(line, e))?,
                station,
            },
            "excess" => Self::SolarExcess {
                point: point(&parts, line)?,
                watts: number(&parts, 3, "watts", line)?,
                station,
            },
            "limit" => Self::ManualLimit {
                point: point(&parts, line)?,
                watts: number(&parts, 3, "watts", line)?,
                station,
            },
            "alt" => Self::AltMode {
                point: point(&parts, line)?,
                enabled: match arg(&parts, 3, "on|off", line)? {
                    "on" | "true" => true,
                    "off" | "false" => false,
                    other => return Err(invalid(line, format!("expected on|off, got '{}'", other))),
                },
                min_current_a: match parts.get(4) {
                    Some(_) => Some(number(&parts, 4, "min current", line)?),
                    None => None,
                },
                station,
            },
            "power" => Self::PowerLimit {
                watts: number(&parts, 2, "watts", line)?,
                station,
            },
            "phase" => Self::PhaseMode {
                point: point(&parts, line)?,
                mode: phase_mode(arg(&parts, 3, "phase mode", line)?, line)?,
                station,
            },
            "refresh" => Self::Refresh { station },
            other => return Err(invalid(line, format!("unknown command '{}'", other))),
        };
        Ok(command)
    }
}

/// Station named `station`, else the one at that 1-based position
fn find_station<'a>(handles: &'a [StationHandle], station: &str) -> Result<&'a StationHandle> {
    handles
        .iter()
        .find(|h| h.name() == station)
        .or_else(|| {
            station
                .parse::<usize>()
                .ok()
                .and_then(|n| n.checked_sub(1))
                .and_then(|i| handles.get(i))
        })
        .ok_or_else(|| StationError::config(format!("No station '{}'", station)))
}

/// Apply one command to its station
pub async fn dispatch(handles: &[StationHandle], command: ControlCommand) -> Result<()> {
    let handle = find_station(handles, command.station())?;
    let inputs = handle.inputs();
    match command {
        ControlCommand::Mode { point, mode, .. } => inputs.set_mode(point, mode),
        ControlCommand::SolarExcess { point, watts, .. } => inputs.set_solar_excess(point, watts),
        ControlCommand::ManualLimit { point, watts, .. } => inputs.set_manual_limit(point, watts),
        ControlCommand::AltMode {
            point,
            enabled,
            min_current_a,
            ..
        } => inputs.set_alt_mode(point, enabled, min_current_a),
        ControlCommand::PowerLimit { watts, .. } => return handle.set_power_limit(watts).await,
        ControlCommand::PhaseMode { point, mode, .. } => {
            return handle.set_phase_mode(point, mode).await
        },
        ControlCommand::Refresh { .. } => return handle.refresh().await,
    }
    Ok(())
}

/// Forward stdin lines from a dedicated thread
///
/// Blocking stdin stays off the runtime so shutdown never waits on it.
pub fn spawn_stdin_reader() -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel(LINE_QUEUE);
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            match line {
                Ok(line) => {
                    if tx.blocking_send(line).is_err() {
                        break;
                    }
                },
                Err(e) => {
                    warn!("Control input read failed: {}", e);
                    break;
                },
            }
        }
    });
    rx
}

/// Execute control lines until the source closes or shutdown
///
/// Bad lines and failed commands are logged and skipped.
pub async fn run_control(
    mut lines: mpsc::Receiver<String>,
    handles: Vec<StationHandle>,
    token: CancellationToken,
) {
    loop {
        let line = tokio::select! {
            _ = token.cancelled() => break,
            line = lines.recv() => match line {
                Some(line) => line,
                None => {
                    debug!("Control input closed");
                    break;
                }
            },
        };

        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let command = match line.parse::<ControlCommand>() {
            Ok(command) => command,
            Err(e) => {
                warn!("Ignoring control line: {}", e);
                continue;
            },
        };
        match dispatch(&handles, command).await {
            Ok(()) => info!("Control: {}", line),
            Err(e) => warn!("Control '{}' failed: {}", line, e),
        }
    }
}
