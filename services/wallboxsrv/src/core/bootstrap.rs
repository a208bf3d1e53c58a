//! Service bootstrap
//!
//! Command-line arguments, logging setup, configuration loading and
//! transport construction for the binary.

use clap::Parser;
use std::path::PathBuf;
use tracing::{debug, info};

use crate::core::config::{StationConfig, WallboxConfig};
use crate::protocol::register_map::MAX_POINTS;
use crate::transport::{ModbusTransport, SimulatedStation, TcpModbusTransport};
use errors::{WallboxError, WallboxResult};

pub use common::bootstrap_args::ServiceArgs;

/// Host name that selects the in-memory station
pub const SIMULATED_HOST: &str = "simulated";

/// Command-line arguments for wallboxsrv
#[derive(Parser, Clone, Debug)]
#[command(
    name = "wallboxsrv",
    version = env!("CARGO_PKG_VERSION"),
    about = "Compleo Wallbox Modbus Service",
    long_about = None
)]
pub struct Args {
    /// Configuration file (YAML, TOML or JSON)
    #[arg(short = 'c', long, env = "WALLBOXSRV_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, env = "RUST_LOG", default_value = "info")]
    pub log_level: String,

    /// Directory for daily rotated log files
    #[arg(long)]
    pub log_dir: Option<PathBuf>,

    /// Disable colored output
    #[arg(long)]
    pub no_color: bool,

    /// Validation mode - only validate configuration without starting service
    #[arg(long)]
    pub validate: bool,

    /// Run one update cycle per station, print the snapshots as JSON and exit
    #[arg(long)]
    pub once: bool,

    /// Use in-memory simulated stations instead of Modbus TCP
    #[arg(long)]
    pub simulate: bool,

    /// Read runtime control commands from stdin, one per line
    #[arg(long)]
    pub control_stdin: bool,

    /// Charge points of each simulated station
    #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u8).range(1..=2))]
    pub simulate_points: u8,
}

impl From<Args> for ServiceArgs {
    fn from(args: Args) -> Self {
        ServiceArgs {
            config: args.config,
            log_level: args.log_level,
            log_dir: args.log_dir,
            no_color: args.no_color,
            validate: args.validate,
        }
    }
}

/// Initialize logging from command-line arguments
pub fn initialize_logging(args: &ServiceArgs) -> WallboxResult<()> {
    let log_config = common::logging::LogConfig {
        service_name: "wallboxsrv".to_string(),
        log_dir: args.log_dir.clone(),
        console_level: args.parse_log_level(),
        file_level: tracing::Level::DEBUG,
        enable_json: false,
        no_color: args.no_color,
    };

    common::logging::init_with_config(log_config)
        .map_err(|e| WallboxError::config(format!("Failed to init logging: {}", e)))
}

/// Load and validate the configuration
///
/// With `simulate` and no stations configured, a single simulated station is
/// added so the service can run without any file.
pub fn load_config(args: &ServiceArgs, simulate: bool) -> WallboxResult<WallboxConfig> {
    let mut config = WallboxConfig::load(args.config.as_deref())?;

    if simulate && config.stations.is_empty() {
        debug!("No stations configured, adding a simulated one");
        config.stations.push(StationConfig {
            host: SIMULATED_HOST.to_string(),
            ..Default::default()
        });
    }

    config.validate()?;
    info!("Configuration loaded: {} station(s)", config.stations.len());
    for station in &config.stations {
        info!(
            "  Station {}: {}:{} unit {} every {}s",
            station.name, station.host, station.port, station.unit_id, station.scan_interval_secs
        );
    }
    Ok(config)
}

/// Transport for one station
///
/// `simulate` or the host `simulated` select an in-memory station laid out by
/// the station's register map.
pub fn build_transport(
    station: &StationConfig,
    simulate: bool,
    simulated_points: u8,
) -> Box<dyn ModbusTransport> {
    if simulate || station.host == SIMULATED_HOST {
        let points = simulated_points.clamp(1, MAX_POINTS);
        return Box::new(SimulatedStation::compleo(&station.register_map, points));
    }
    Box::new(TcpModbusTransport::new(
        station.host.clone(),
        station.port,
        station.connect_timeout(),
        station.request_timeout(),
        station.reconnect.clone(),
    ))
}
