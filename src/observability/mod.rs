//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! lifecycle (start, stop reason), dispatch (request line, status),
//! trackers (drain counts), transport (connection errors)
//!     → tracing events with structured fields
//!     → logging.rs subscriber (fmt layer, env filter)
//! ```

pub mod logging;

pub use logging::{init_logging, LogLevel};
