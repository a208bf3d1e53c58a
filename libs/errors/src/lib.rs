//! Unified error handling for wallbox services
//!
//! Service crates keep their own domain error types and convert into
//! [`WallboxError`] at process boundaries (startup, CLI, task supervision).
//! The [`WallboxErrorTrait`] gives every error type a common classification.

use thiserror::Error;

// ============================================================================
// WallboxError - Boundary error type
// ============================================================================

/// Main error type shared by all wallbox services
#[derive(Debug, Error)]
pub enum WallboxError {
    // ======================================
    // Configuration Errors
    // ======================================
    #[error("Configuration error: {0}")]
    Configuration(String),

    // ======================================
    // Protocol & Communication Errors
    // ======================================
    #[error("Protocol error: {protocol}: {message}")]
    Protocol { protocol: String, message: String },

    #[error("Communication error: {0}")]
    Communication(String),

    #[error("Connection failed: {target}: {reason}")]
    ConnectionFailed { target: String, reason: String },

    #[error("Operation timeout: {0}")]
    Timeout(String),

    // ======================================
    // Data Errors
    // ======================================
    #[error("Data error: {0}")]
    Data(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    // ======================================
    // Service & Runtime
    // ======================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Runtime error: {0}")]
    Runtime(String),

    #[error("Shutdown error: {0}")]
    ShutdownError(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias using WallboxError
pub type WallboxResult<T> = std::result::Result<T, WallboxError>;

impl WallboxError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn modbus(msg: impl Into<String>) -> Self {
        Self::Protocol {
            protocol: "modbus".to_string(),
            message: msg.into(),
        }
    }

    pub fn runtime(msg: impl Into<String>) -> Self {
        Self::Runtime(msg.into())
    }

    pub fn shutdown(msg: impl Into<String>) -> Self {
        Self::ShutdownError(msg.into())
    }

    /// Process exit code for the service binary
    pub fn exit_code(&self) -> i32 {
        match self.category() {
            ErrorCategory::Configuration => 2,
            ErrorCategory::Connection | ErrorCategory::Network | ErrorCategory::Timeout => 3,
            _ => 1,
        }
    }
}

impl From<serde_json::Error> for WallboxError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for WallboxError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

// ============================================================================
// WallboxError implements WallboxErrorTrait
// ============================================================================

impl WallboxErrorTrait for WallboxError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "CONFIGURATION_ERROR",
            Self::Protocol { .. } => "PROTOCOL_ERROR",
            Self::Communication(_) => "COMMUNICATION_ERROR",
            Self::ConnectionFailed { .. } => "CONNECTION_FAILED",
            Self::Timeout(_) => "TIMEOUT",
            Self::Data(_) => "DATA_ERROR",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
            Self::Io(_) => "IO_ERROR",
            Self::Runtime(_) => "RUNTIME_ERROR",
            Self::ShutdownError(_) => "SHUTDOWN_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
            Self::Other(_) => "OTHER_ERROR",
        }
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::Configuration(_) => ErrorCategory::Configuration,
            Self::Protocol { .. } => ErrorCategory::Protocol,
            Self::Communication(_) => ErrorCategory::Network,
            Self::ConnectionFailed { .. } => ErrorCategory::Connection,
            Self::Timeout(_) => ErrorCategory::Timeout,
            Self::Data(_) => ErrorCategory::DataCorruption,
            Self::Serialization(_)
            | Self::Io(_)
            | Self::Runtime(_)
            | Self::ShutdownError(_)
            | Self::Internal(_) => ErrorCategory::Internal,
            Self::Other(_) => ErrorCategory::Unknown,
        }
    }
}

// ============================================================================
// Error classification
// ============================================================================

/// Error category enum - used for classification and log levels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    // Infrastructure layer
    Configuration,
    Network,
    Timeout,

    // Protocol/communication layer
    Protocol,
    Connection,

    // System level
    Internal,
    DataCorruption,

    // Others
    Unknown,
}

/// Error capability trait
///
/// Each service keeps its own domain-specific error type and gains a common
/// interface by implementing this trait.
pub trait WallboxErrorTrait: std::error::Error + Send + Sync + 'static {
    /// Get error code (for logs and exit status)
    fn error_code(&self) -> &'static str;

    /// Get error category
    fn category(&self) -> ErrorCategory;

    /// Whether the error is retryable (default implementation is category-based)
    fn is_retryable(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::Network
                | ErrorCategory::Timeout
                | ErrorCategory::Connection
                | ErrorCategory::Protocol
        )
    }

    /// Get log level
    fn log_level(&self) -> tracing::Level {
        use tracing::Level;
        match self.category() {
            ErrorCategory::Internal | ErrorCategory::DataCorruption => Level::ERROR,
            ErrorCategory::Network
            | ErrorCategory::Timeout
            | ErrorCategory::Connection
            | ErrorCategory::Protocol => Level::WARN,
            ErrorCategory::Configuration => Level::ERROR,
            ErrorCategory::Unknown => Level::WARN,
        }
    }
}
