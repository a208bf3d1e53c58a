//! Error handling for the wallbox service
//!
//! Field-level failures (a single read or write) are recoverable and end up as
//! absent snapshot fields or log lines. Cycle-level failures abort one update
//! cycle and mark the station unavailable until the next successful cycle.

use errors::{ErrorCategory, WallboxError, WallboxErrorTrait};
use std::fmt;
use thiserror::Error;

/// Modbus register address space
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegisterSpace {
    Holding,
    Input,
}

impl fmt::Display for RegisterSpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Holding => write!(f, "holding"),
            Self::Input => write!(f, "input"),
        }
    }
}

/// Station service error type
#[derive(Error, Debug, Clone)]
pub enum StationError {
    /// TCP endpoint unreachable, reset, or not connected
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// Device answered with a Modbus exception or did not answer
    #[error("Read failed at {space} 0x{address:04X}: {reason}")]
    RegisterRead {
        space: RegisterSpace,
        address: u16,
        reason: String,
    },

    /// Register count or content does not match the expected format
    #[error("Decode error: {0}")]
    DecodeError(String),

    /// Setpoint write rejected or unacknowledged
    #[error("Write failed at holding 0x{address:04X}: {reason}")]
    WriteFailed { address: u16, reason: String },

    /// A single request or the whole cycle exceeded its deadline
    #[error("Timeout error: {0}")]
    TimeoutError(String),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Mandatory data missing; the whole update cycle failed
    #[error("Update failed: {0}")]
    CycleFailed(String),
}

/// Result type alias for the station service
pub type Result<T> = std::result::Result<T, StationError>;

impl StationError {
    pub fn connection(msg: impl Into<String>) -> Self {
        StationError::ConnectionError(msg.into())
    }

    pub fn read(space: RegisterSpace, address: u16, reason: impl Into<String>) -> Self {
        StationError::RegisterRead {
            space,
            address,
            reason: reason.into(),
        }
    }

    pub fn decode(msg: impl Into<String>) -> Self {
        StationError::DecodeError(msg.into())
    }

    pub fn write(address: u16, reason: impl Into<String>) -> Self {
        StationError::WriteFailed {
            address,
            reason: reason.into(),
        }
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        StationError::TimeoutError(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        StationError::ConfigError(msg.into())
    }

    pub fn cycle(msg: impl Into<String>) -> Self {
        StationError::CycleFailed(msg.into())
    }

    pub fn not_connected() -> Self {
        StationError::ConnectionError("Not connected".to_string())
    }

    /// Whether this error ends the current update cycle
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::CycleFailed(_) | Self::ConfigError(_))
    }

    /// Whether the transport should be considered broken after this error
    pub fn breaks_connection(&self) -> bool {
        matches!(self, Self::ConnectionError(_) | Self::TimeoutError(_))
    }
}

// ============================================================================
// Extension trait for adding context to errors
// ============================================================================

/// Extension trait for adding context to errors
pub trait ErrorExt<T> {
    fn config_error(self, msg: &str) -> Result<T>;
    fn connection_error(self, msg: &str) -> Result<T>;
    fn decode_error(self, msg: &str) -> Result<T>;
    fn context(self, msg: &str) -> Result<T>;
}

impl<T, E> ErrorExt<T> for std::result::Result<T, E>
where
    E: fmt::Display,
{
    fn config_error(self, msg: &str) -> Result<T> {
        self.map_err(|e| StationError::ConfigError(format!("{msg}: {e}")))
    }

    fn connection_error(self, msg: &str) -> Result<T> {
        self.map_err(|e| StationError::ConnectionError(format!("{msg}: {e}")))
    }

    fn decode_error(self, msg: &str) -> Result<T> {
        self.map_err(|e| StationError::DecodeError(format!("{msg}: {e}")))
    }

    fn context(self, msg: &str) -> Result<T> {
        self.map_err(|e| StationError::CycleFailed(format!("{msg}: {e}")))
    }
}

impl From<figment::Error> for StationError {
    fn from(err: figment::Error) -> Self {
        StationError::ConfigError(err.to_string())
    }
}

impl From<std::io::Error> for StationError {
    fn from(err: std::io::Error) -> Self {
        StationError::ConnectionError(err.to_string())
    }
}

// ============================================================================
// Conversion to WallboxError for process boundaries
// ============================================================================

impl From<StationError> for WallboxError {
    fn from(err: StationError) -> Self {
        match err {
            StationError::ConnectionError(msg) => WallboxError::Communication(msg),
            e @ StationError::RegisterRead { .. } => WallboxError::modbus(e.to_string()),
            StationError::DecodeError(msg) => WallboxError::Data(msg),
            e @ StationError::WriteFailed { .. } => WallboxError::modbus(e.to_string()),
            StationError::TimeoutError(msg) => WallboxError::Timeout(msg),
            StationError::ConfigError(msg) => WallboxError::Configuration(msg),
            StationError::CycleFailed(msg) => WallboxError::Runtime(msg),
        }
    }
}

impl WallboxErrorTrait for StationError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::ConnectionError(_) => "WALLBOX_CONNECTION_FAILURE",
            Self::RegisterRead { .. } => "WALLBOX_REGISTER_READ_FAILURE",
            Self::DecodeError(_) => "WALLBOX_DECODE_FAILURE",
            Self::WriteFailed { .. } => "WALLBOX_WRITE_FAILURE",
            Self::TimeoutError(_) => "WALLBOX_TIMEOUT",
            Self::ConfigError(_) => "WALLBOX_CONFIG_ERROR",
            Self::CycleFailed(_) => "WALLBOX_UPDATE_FAILED",
        }
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::ConnectionError(_) => ErrorCategory::Connection,
            Self::RegisterRead { .. } | Self::WriteFailed { .. } => ErrorCategory::Protocol,
            Self::DecodeError(_) => ErrorCategory::DataCorruption,
            Self::TimeoutError(_) => ErrorCategory::Timeout,
            Self::ConfigError(_) => ErrorCategory::Configuration,
            Self::CycleFailed(_) => ErrorCategory::Network,
        }
    }
}
