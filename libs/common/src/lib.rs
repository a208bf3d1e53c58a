//! Shared building blocks for wallbox services
//!
//! - logging setup
//! - shutdown signal handling
//! - common command-line arguments

pub mod bootstrap_args;
pub mod logging;
pub mod shutdown;

pub use bootstrap_args::ServiceArgs;
pub use errors::{WallboxError, WallboxResult};
