//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! hyper request (from net::connection)
//!     → request.rs (adapt: origin, resource, method, headers, lazy body)
//!     → dispatch.rs
//!         → cors.rs (negotiate; preflight answered here)
//!         → application handler (RequestToResponse)
//!         → compose.rs (handler + CORS + error-path properties)
//!     → response.rs (freeze, write to hyper, HEAD drops the body)
//! ```

pub mod compose;
pub mod cors;
pub mod dispatch;
pub mod headers;
pub mod request;
pub mod response;

pub use compose::compose;
pub use cors::{negotiate, AccessControlPolicy};
pub use dispatch::{BoxError, CodedError, HandlerResult, InternalError, RequestToResponse};
pub use headers::Headers;
pub use request::{Request, RequestBody};
pub use response::{Body, BodyEncoding, Response, ResponseProperties};
