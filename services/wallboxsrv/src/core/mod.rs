//! Service core: configuration and process bootstrap

pub mod bootstrap;
pub mod config;

pub use config::{PointConfig, ServiceConfig, StationConfig, WallboxConfig};
