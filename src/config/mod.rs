//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML) or ServerConfig built in code
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → ServerConfig (validated, immutable for the server's lifetime)
//! ```
//!
//! # Design Decisions
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks
//! - The lifecycle controller validates again at start, so configs built in
//!   code get the same checks as loaded ones

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, ConfigError};
pub use schema::{
    ErrorConfig, InternalErrorFormat, LifecycleConfig, ListenerConfig, ObservabilityConfig, ServerConfig,
    TlsConfig,
};
pub use validation::{validate_config, Protocol, ValidationError};
