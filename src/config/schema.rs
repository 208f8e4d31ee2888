//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the server.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

use crate::http::cors::AccessControlPolicy;
use crate::observability::LogLevel;

/// Root configuration for a server instance.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind target, protocol and TLS material.
    pub listener: ListenerConfig,

    /// Which external events stop the server, and how shutdown drains.
    pub lifecycle: LifecycleConfig,

    /// Cross-origin policy. Disabled unless an origin can be allowed.
    pub access_control: AccessControlPolicy,

    /// Rendering of handler failures.
    pub errors: ErrorConfig,

    /// Logging settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// "http" or "https".
    pub protocol: String,

    /// Address to bind. Empty binds every interface.
    pub ip: String,

    /// Port to bind; 0 picks a free port.
    pub port: u16,

    /// Evict whatever process holds `port` before binding.
    pub force_port: bool,

    /// Keep serving after the last `ServerHandle` is dropped.
    pub keep_process_alive: bool,

    /// Key and certificate, required for https.
    pub tls: Option<TlsConfig>,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            protocol: "http".to_string(),
            ip: "127.0.0.1".to_string(),
            port: 0,
            force_port: false,
            keep_process_alive: true,
            tls: None,
        }
    }
}

/// TLS key/certificate pair, inline PEM or file paths.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct TlsConfig {
    /// Certificate chain (PEM).
    pub certificate: Option<String>,

    /// Private key (PEM).
    pub private_key: Option<String>,

    /// Path to certificate file (PEM).
    pub cert_path: Option<String>,

    /// Path to private key file (PEM).
    pub key_path: Option<String>,
}

impl TlsConfig {
    pub fn has_certificate(&self) -> bool {
        self.certificate.is_some() || self.cert_path.is_some()
    }

    pub fn has_private_key(&self) -> bool {
        self.private_key.is_some() || self.key_path.is_some()
    }
}

/// Shutdown triggers and drain behavior.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LifecycleConfig {
    /// Stop on SIGINT.
    pub stop_on_sigint: bool,

    /// Stop when the process is torn down (SIGTERM, SIGHUP, announced exit).
    pub stop_on_exit: bool,

    /// Stop after answering a request with an internal error.
    pub stop_on_internal_error: bool,

    /// Stop when a handler panics.
    pub stop_on_crash: bool,

    /// Cancel running handlers on stop instead of letting them finish.
    pub abandon_in_flight_handlers: bool,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            stop_on_sigint: true,
            stop_on_exit: true,
            stop_on_internal_error: false,
            stop_on_crash: false,
            abandon_in_flight_handlers: false,
        }
    }
}

/// How a handler failure is rendered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InternalErrorFormat {
    /// Plain-text error message. Exposes the error text to clients.
    Text,
    /// `{"code": ...}` JSON document; the error chain only on request.
    #[default]
    Json,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct ErrorConfig {
    pub format: InternalErrorFormat,

    /// Include the error chain in JSON error bodies.
    pub send_internal_error_stack: bool,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    pub log_level: LogLevel,
}
