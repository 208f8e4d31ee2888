//! Configuration loading from disk.

use std::fs;
use std::path::Path;

use thiserror::Error;

use crate::config::schema::ServerConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation failed: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ")
}

/// Parse and validate configuration from TOML text.
pub fn parse_config(content: &str) -> Result<ServerConfig, ConfigError> {
    let config: ServerConfig = toml::from_str(content)?;
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

/// Load and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<ServerConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    parse_config(&content)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::InternalErrorFormat;
    use std::io::Write;

    #[test]
    fn loads_full_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
[listener]
protocol = "http"
ip = "127.0.0.1"
port = 8998

[lifecycle]
stop_on_sigint = false
stop_on_internal_error = true

[access_control]
allow_request_origin = true
allowed_methods = ["GET"]
max_age_seconds = 60

[errors]
format = "text"

[observability]
log_level = "off"
"#
        )
        .unwrap();

        let config = load_config(file.path()).unwrap();
        assert_eq!(config.listener.port, 8998);
        assert!(!config.lifecycle.stop_on_sigint);
        assert!(config.lifecycle.stop_on_exit);
        assert!(config.lifecycle.stop_on_internal_error);
        assert!(config.access_control.allow_request_origin);
        assert_eq!(config.access_control.allowed_methods, vec!["GET".to_string()]);
        assert_eq!(config.access_control.allowed_headers, vec!["x-requested-with".to_string()]);
        assert_eq!(config.access_control.max_age_seconds, 60);
        assert_eq!(config.errors.format, InternalErrorFormat::Text);
    }

    #[test]
    fn empty_file_uses_defaults() {
        let config = parse_config("").unwrap();
        assert_eq!(config.listener.protocol, "http");
        assert_eq!(config.listener.port, 0);
        assert!(config.listener.keep_process_alive);
        assert_eq!(config.errors.format, InternalErrorFormat::Json);
        assert!(!config.errors.send_internal_error_stack);
    }

    #[test]
    fn semantic_errors_are_reported() {
        let err = parse_config("[listener]\nprotocol = \"gopher\"").unwrap_err();
        assert!(matches!(err, ConfigError::Validation(ref errors) if errors.len() == 1));
        assert!(err.to_string().contains("gopher"));
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = load_config(Path::new("/definitely/not/here.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
