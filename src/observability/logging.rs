//! Structured logging.
//!
//! # Responsibilities
//! - Initialize the tracing subscriber
//! - Map the server's named log levels onto tracing filters
//! - Pick the level a response status line is logged at
//!
//! # Design Decisions
//! - `RUST_LOG` wins over the configured level when set
//! - Initialization is idempotent: a second call is a no-op

use serde::{Deserialize, Serialize};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Named verbosity levels accepted in configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum LogLevel {
    Off,
    Errors,
    ErrorsAndWarnings,
    #[default]
    ErrorsWarningsAndLogs,
    Maximum,
}

impl LogLevel {
    /// Filter directive for this crate.
    pub fn directive(self) -> &'static str {
        match self {
            LogLevel::Off => "off",
            LogLevel::Errors => "serve_core=error",
            LogLevel::ErrorsAndWarnings => "serve_core=warn",
            LogLevel::ErrorsWarningsAndLogs => "serve_core=info",
            LogLevel::Maximum => "serve_core=trace",
        }
    }
}

/// Install the global subscriber.
pub fn init_logging(level: LogLevel) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| level.directive().into());

    // Fails only when a subscriber is already installed.
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}

/// Severity a response with `status` is reported at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusSeverity {
    Info,
    Warn,
    Error,
}

pub fn status_severity(status: u16) -> StatusSeverity {
    match status {
        500..=599 => StatusSeverity::Error,
        400..=499 => StatusSeverity::Warn,
        _ => StatusSeverity::Info,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn levels_parse_from_config_names() {
        #[derive(Deserialize)]
        struct Wrapper {
            level: LogLevel,
        }
        let parsed: Wrapper = toml::from_str("level = \"errors-and-warnings\"").unwrap();
        assert_eq!(parsed.level, LogLevel::ErrorsAndWarnings);
        assert_eq!(parsed.level.directive(), "serve_core=warn");
    }

    #[test]
    fn status_classes_map_to_severity() {
        assert_eq!(status_severity(200), StatusSeverity::Info);
        assert_eq!(status_severity(304), StatusSeverity::Info);
        assert_eq!(status_severity(404), StatusSeverity::Warn);
        assert_eq!(status_severity(503), StatusSeverity::Error);
    }

    #[test]
    fn init_twice_is_harmless() {
        init_logging(LogLevel::Off);
        init_logging(LogLevel::Maximum);
    }
}
