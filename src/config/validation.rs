//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Reject unsupported protocols and contradictory port options
//! - Require TLS material for https
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ServerConfig → Result<(), Vec<ValidationError>>
//! - Runs before any listener is created

use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use thiserror::Error;

use crate::config::schema::ServerConfig;

/// Transport protocol of the listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Http,
    Https,
}

impl FromStr for Protocol {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "http" => Ok(Protocol::Http),
            "https" => Ok(Protocol::Https),
            other => Err(ValidationError::UnsupportedProtocol(other.to_string())),
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Protocol::Http => "http",
            Protocol::Https => "https",
        })
    }
}

/// A single semantic problem with a configuration.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("protocol must be http or https, got {0}")]
    UnsupportedProtocol(String),

    #[error("no need to pass force_port when port is 0")]
    ForcePortWithoutPort,

    #[error("invalid ip address: {0}")]
    InvalidIp(String),

    #[error("listening {0} not available on this platform")]
    UnspecifiedAddressUnavailable(String),

    #[error("missing {0} for https server")]
    MissingTlsMaterial(&'static str),
}

/// Parse the listener ip. An empty string means every interface.
pub fn parse_ip(ip: &str) -> Result<IpAddr, ValidationError> {
    if ip.is_empty() {
        return Ok(IpAddr::from([0, 0, 0, 0]));
    }
    ip.parse().map_err(|_| ValidationError::InvalidIp(ip.to_string()))
}

/// Check a configuration, collecting every violation.
pub fn validate_config(config: &ServerConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();
    let listener = &config.listener;

    let protocol = match listener.protocol.parse::<Protocol>() {
        Ok(protocol) => Some(protocol),
        Err(e) => {
            errors.push(e);
            None
        }
    };

    if listener.port == 0 && listener.force_port {
        errors.push(ValidationError::ForcePortWithoutPort);
    }

    if let Err(e) = parse_ip(&listener.ip) {
        errors.push(e);
    }

    if cfg!(windows) && listener.ip == "0.0.0.0" {
        errors.push(ValidationError::UnspecifiedAddressUnavailable(listener.ip.clone()));
    }

    if protocol == Some(Protocol::Https) {
        match &listener.tls {
            None => errors.push(ValidationError::MissingTlsMaterial("private key and certificate")),
            Some(tls) => {
                if !tls.has_private_key() {
                    errors.push(ValidationError::MissingTlsMaterial("private key"));
                }
                if !tls.has_certificate() {
                    errors.push(ValidationError::MissingTlsMaterial("certificate"));
                }
            }
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
