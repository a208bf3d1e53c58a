//! Service configuration
//!
//! Layering, later wins:
//! 1. built-in defaults
//! 2. config file (YAML, TOML or JSON by extension)
//! 3. `WALLBOXSRV_` environment variables, nested keys split on `__`

use figment::{
    providers::{Env, Format, Json, Serialized, Toml, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::time::Duration;
use tracing::debug;

use crate::controller::ControllerSettings;
use crate::error::{ErrorExt, Result, StationError};
use crate::inputs::PointInputs;
use crate::protocol::register_map::MAX_POINTS;
use crate::protocol::{ChargingMode, RegisterMap};
use crate::transport::ReconnectPolicy;

/// Default Modbus TCP port
pub const DEFAULT_PORT: u16 = 502;

/// Environment variable prefix
pub const ENV_PREFIX: &str = "WALLBOXSRV_";

/// Requests a cycle may still issue after the read budget is spent
///
/// One optional read in flight, then per point the first input block, the
/// holding block and two setpoint writes.
pub const RESERVED_REQUESTS: u32 = 1 + 4 * MAX_POINTS as u32;

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WallboxConfig {
    pub service: ServiceConfig,
    pub stations: Vec<StationConfig>,
}

/// Process-wide settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub name: String,
    /// Time station tasks get to finish after shutdown is requested
    pub shutdown_grace_ms: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: "wallboxsrv".to_string(),
            shutdown_grace_ms: 5_000,
        }
    }
}

/// One wallbox behind one Modbus TCP endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StationConfig {
    pub name: String,
    pub host: String,
    pub port: u16,
    pub unit_id: u8,
    /// Try the configured id, then 1 and 255 at setup
    pub probe_unit_ids: bool,
    pub scan_interval_secs: u64,
    /// Deadline for a whole poll/control/write cycle
    pub cycle_timeout_ms: u64,
    /// Deadline for a single Modbus request
    pub request_timeout_ms: u64,
    pub connect_timeout_ms: u64,
    /// Optional reads are skipped once a cycle has spent this long.
    /// Unset means the cycle timeout minus [`StationConfig::request_reserve`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub read_budget_ms: Option<u64>,
    pub register_map: RegisterMap,
    pub controller: ControllerSettings,
    pub reconnect: ReconnectPolicy,
    /// Initial controller inputs per charge point
    pub points: Vec<PointConfig>,
}

impl Default for StationConfig {
    fn default() -> Self {
        Self {
            name: "Compleo Wallbox".to_string(),
            host: String::new(),
            port: DEFAULT_PORT,
            unit_id: 1,
            probe_unit_ids: false,
            scan_interval_secs: 30,
            cycle_timeout_ms: 60_000,
            request_timeout_ms: 5_000,
            connect_timeout_ms: 10_000,
            read_budget_ms: None,
            register_map: RegisterMap::default(),
            controller: ControllerSettings::default(),
            reconnect: ReconnectPolicy::default(),
            points: Vec::new(),
        }
    }
}

impl StationConfig {
    pub fn scan_interval(&self) -> Duration {
        Duration::from_secs(self.scan_interval_secs)
    }

    pub fn cycle_timeout(&self) -> Duration {
        Duration::from_millis(self.cycle_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Worst-case time for the requests a cycle issues after its read budget
    ///
    /// Covers one reconnect plus [`RESERVED_REQUESTS`] request timeouts.
    pub fn request_reserve(&self) -> Duration {
        self.connect_timeout()
            .saturating_add(self.request_timeout().saturating_mul(RESERVED_REQUESTS))
    }

    pub fn read_budget(&self) -> Duration {
        match self.read_budget_ms {
            Some(ms) => Duration::from_millis(ms),
            None => self.cycle_timeout().saturating_sub(self.request_reserve()),
        }
    }

    /// Configured initial inputs keyed by point index
    pub fn initial_inputs(&self) -> HashMap<u8, PointInputs> {
        self.points.iter().map(|p| (p.index, p.inputs())).collect()
    }

    pub fn validate(&self) -> Result<()> {
        let name = &self.name;
        if name.trim().is_empty() {
            return Err(StationError::config("Station name must not be empty"));
        }
        if self.host.trim().is_empty() {
            return Err(StationError::config(format!("Station '{}': host is required", name)));
        }
        if self.port == 0 {
            return Err(StationError::config(format!("Station '{}': port must not be 0", name)));
        }
        if self.unit_id == 0 {
            return Err(StationError::config(format!(
                "Station '{}': unit id 0 is the broadcast address",
                name
            )));
        }
        for (field, value) in [
            ("scan_interval_secs", self.scan_interval_secs),
            ("cycle_timeout_ms", self.cycle_timeout_ms),
            ("request_timeout_ms", self.request_timeout_ms),
            ("connect_timeout_ms", self.connect_timeout_ms),
        ] {
            if value == 0 {
                return Err(StationError::config(format!(
                    "Station '{}': {} must be greater than 0",
                    name, field
                )));
            }
        }
        let reserve = self.request_reserve();
        if self.cycle_timeout() <= reserve {
            return Err(StationError::config(format!(
                "Station '{}': cycle_timeout_ms ({}) must exceed the {} ms reserved for \
                 connecting plus {} requests of request_timeout_ms",
                name,
                self.cycle_timeout_ms,
                reserve.as_millis(),
                RESERVED_REQUESTS
            )));
        }
        if let Some(budget) = self.read_budget_ms {
            if budget == 0 {
                return Err(StationError::config(format!(
                    "Station '{}': read_budget_ms must be greater than 0",
                    name
                )));
            }
            if Duration::from_millis(budget).saturating_add(reserve) > self.cycle_timeout() {
                return Err(StationError::config(format!(
                    "Station '{}': read_budget_ms ({}) leaves less than {} ms of \
                     cycle_timeout_ms ({}) for mandatory requests",
                    name,
                    budget,
                    reserve.as_millis(),
                    self.cycle_timeout_ms
                )));
            }
        }

        let mut seen = HashSet::new();
        for point in &self.points {
            if point.index == 0 || point.index > MAX_POINTS {
                return Err(StationError::config(format!(
                    "Station '{}': charge point index {} out of range 1..={}",
                    name, point.index, MAX_POINTS
                )));
            }
            if !seen.insert(point.index) {
                return Err(StationError::config(format!(
                    "Station '{}': charge point {} configured twice",
                    name, point.index
                )));
            }
        }

        self.register_map
            .validate()
            .config_error(&format!("Station '{}' register map", name))
    }
}

/// Initial inputs of one charge point
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PointConfig {
    pub index: u8,
    pub mode: ChargingMode,
    pub solar_excess_w: i32,
    pub manual_limit_w: u32,
    pub alt_mode: bool,
    pub alt_min_current_a: u16,
}

impl Default for PointConfig {
    fn default() -> Self {
        let inputs = PointInputs::default();
        Self {
            index: 1,
            mode: inputs.mode,
            solar_excess_w: inputs.solar_excess_w,
            manual_limit_w: inputs.manual_limit_w,
            alt_mode: inputs.alt_mode,
            alt_min_current_a: inputs.alt_min_current_a,
        }
    }
}

impl PointConfig {
    pub fn inputs(&self) -> PointInputs {
        PointInputs {
            mode: self.mode,
            solar_excess_w: self.solar_excess_w,
            manual_limit_w: self.manual_limit_w,
            alt_mode: self.alt_mode,
            alt_min_current_a: self.alt_min_current_a,
        }
    }
}

impl WallboxConfig {
    /// Load defaults, the optional file, then the environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::from(Serialized::defaults(WallboxConfig::default()));

        if let Some(path) = path {
            if !path.exists() {
                return Err(StationError::config(format!(
                    "Config file not found: {}",
                    path.display()
                )));
            }
            let extension = path
                .extension()
                .and_then(|s| s.to_str())
                .ok_or_else(|| StationError::config("Invalid file extension"))?;

            figment = match extension {
                "json" => figment.merge(Json::file(path)),
                "toml" => figment.merge(Toml::file(path)),
                "yaml" | "yml" => figment.merge(Yaml::file(path)),
                _ => {
                    return Err(StationError::config(format!(
                        "Unsupported config format: {}",
                        extension
                    )))
                },
            };
            debug!("Loading configuration from {}", path.display());
        }

        figment = figment.merge(Env::prefixed(ENV_PREFIX).ignore(&["config"]).split("__"));

        figment.extract().config_error("Failed to parse config")
    }

    /// Configuration with a single station
    pub fn from_station(station: StationConfig) -> Self {
        Self {
            service: ServiceConfig::default(),
            stations: vec![station],
        }
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.service.shutdown_grace_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.stations.is_empty() {
            return Err(StationError::config("No stations configured"));
        }
        let mut names = HashSet::new();
        for station in &self.stations {
            station.validate()?;
            if !names.insert(station.name.as_str()) {
                return Err(StationError::config(format!(
                    "Duplicate station name '{}'",
                    station.name
                )));
            }
        }
        Ok(())
    }
}
