//! Common command-line arguments for wallbox services
//!
//! Services parse their own `clap` arguments and convert them into this struct

use std::path::PathBuf;

/// Common service startup arguments
#[derive(Debug, Clone)]
pub struct ServiceArgs {
    /// Configuration file (YAML, TOML or JSON)
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,

    /// Directory for log files (console only when omitted)
    pub log_dir: Option<PathBuf>,

    /// Disable colored output (useful for log files)
    pub no_color: bool,

    /// Only validate configuration without starting service
    pub validate: bool,
}

impl Default for ServiceArgs {
    fn default() -> Self {
        Self {
            config: None,
            log_level: "info".to_string(),
            log_dir: None,
            no_color: false,
            validate: false,
        }
    }
}

impl ServiceArgs {
    /// Parse log level string to tracing::Level
    pub fn parse_log_level(&self) -> tracing::Level {
        match self.log_level.to_lowercase().as_str() {
            "trace" => tracing::Level::TRACE,
            "debug" => tracing::Level::DEBUG,
            "warn" | "warning" => tracing::Level::WARN,
            "error" => tracing::Level::ERROR,
            _ => tracing::Level::INFO,
        }
    }

    /// Check if running with verbose output
    pub fn is_development(&self) -> bool {
        self.log_level == "debug" || self.log_level == "trace"
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_default_args() {
        let args = ServiceArgs::default();
        assert_eq!(args.log_level, "info");
        assert!(args.config.is_none());
        assert!(!args.validate);
    }

    #[test]
    fn test_parse_log_level() {
        let args = ServiceArgs {
            log_level: "debug".to_string(),
            ..Default::default()
        };
        assert_eq!(args.parse_log_level(), tracing::Level::DEBUG);

        let args = ServiceArgs {
            log_level: "WARN".to_string(),
            ..Default::default()
        };
        assert_eq!(args.parse_log_level(), tracing::Level::WARN);

        let args = ServiceArgs {
            log_level: "invalid".to_string(),
            ..Default::default()
        };
        assert_eq!(args.parse_log_level(), tracing::Level::INFO);
    }

    #[test]
    fn test_is_development() {
        assert!(!ServiceArgs::default().is_development());
        let args = ServiceArgs {
            log_level: "trace".to_string(),
            ..Default::default()
        };
        assert!(args.is_development());
    }
}
