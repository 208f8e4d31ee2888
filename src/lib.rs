//! HTTP serving core.
//!
//! Sits between an HTTP/HTTPS listener and an application-supplied request
//! handler: controlled startup and shutdown, tracking of in-flight
//! connections, clients and handler invocations, CORS negotiation, and
//! composition of the outgoing response.
//!
//! ```no_run
//! use serve_core::config::ServerConfig;
//! use serve_core::http::{BoxError, Request, ResponseProperties};
//! use serve_core::lifecycle::Server;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let server = Server::new(ServerConfig::default())
//!     .request_to_response(|request: Request| async move {
//!         Ok::<_, BoxError>(ResponseProperties::new().status(200).body(request.pathname().to_string()))
//!     })
//!     .start()
//!     .await?;
//!
//! println!("listening on {}", server.origin());
//! server.stopped().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod tracker;

pub use config::ServerConfig;
pub use lifecycle::{Server, ServerHandle, StopReason};
