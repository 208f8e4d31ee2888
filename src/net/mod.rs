//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! port.rs (optional: evict the process holding the port)
//!     → listener.rs (bind, origin string)
//!     → accept loop (lifecycle controller)
//!     → tls.rs (optional TLS handshake)
//!     → connection.rs (hyper HTTP/1.1, graceful close)
//!     → Hand off to HTTP layer
//! ```
//!
//! # Design Decisions
//! - Each connection tracked for graceful shutdown
//! - TLS is optional and handled transparently

pub mod connection;
pub mod listener;
pub mod port;
pub mod tls;

pub use connection::serve_connection;
pub use listener::{bind, origin_as_string, ListenerError};
pub use port::{KillPort, PortEvictor};
pub use tls::{build_acceptor, TlsError};
