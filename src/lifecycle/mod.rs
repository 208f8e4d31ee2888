//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Validate config → Free port → TLS → Trackers + cleanup hooks
//!     → Bind → opened → startedCallback
//!
//! Shutdown (controller.rs, shutdown.rs):
//!     Trigger (explicit stop, process event, cancellation, internal error,
//!     crash) → closing → cleanup callbacks → stop accepting → stopped
//!     → stoppedCallback
//!
//! Signals (signals.rs):
//!     SIGINT → interrupt, SIGHUP → hangup-or-death, SIGTERM → death
//! ```
//!
//! # Design Decisions
//! - Ordered startup: config first, then trackers, then listeners
//! - One shutdown mechanism, memoized, whatever the trigger
//! - Status (status.rs) only moves forward

mod controller;
pub mod shutdown;
pub mod signals;
pub mod startup;
pub mod status;

pub use shutdown::StopReason;
pub use signals::{ManualEvents, OsSignals, ProcessEvent, ProcessEvents};
pub use startup::{Server, ServerHandle, StartError};
pub use status::Status;
