//! Per-request dispatch.
//!
//! # Responsibilities
//! - Refuse requests once the server is no longer `opened`
//! - Answer CORS preflights without calling the application handler
//! - Run the handler as a tracked task, catching errors and panics
//! - Compose handler, CORS and error-path properties into the final response
//!
//! # Design Decisions
//! - The handler runs in its own task so a panic becomes a 500, not a dead
//!   connection
//! - A client cut off by shutdown gets the tracker's synthetic response even if
//!   its handler is still running
//! - The outcome is reported back to the caller so the lifecycle controller can
//!   decide whether it is a shutdown trigger

use std::any::Any;
use std::error::Error as StdError;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use hyper::Method;
use serde_json::json;
use thiserror::Error;

use crate::config::{ErrorConfig, InternalErrorFormat};
use crate::http::compose::compose;
use crate::http::cors::{negotiate, AccessControlPolicy};
use crate::http::request::Request;
use crate::http::response::{empty_body, Response, ResponseProperties, TransportBody};
use crate::lifecycle::status::ServingState;
use crate::observability::logging::{status_severity, StatusSeverity};
use crate::tracker::clients::shutdown_response;
use crate::tracker::{ClientTracker, RequestHandlerTracker};

pub type BoxError = Box<dyn StdError + Send + Sync>;

/// Status text of the response produced for a failed handler.
pub const STATUS_TEXT_INTERNAL_ERROR: &str = "internal error";

/// What an application handler produces.
pub type HandlerResult = Result<ResponseProperties, BoxError>;

/// The application handler: `Request → partial response`.
pub trait RequestToResponse: Send + Sync + 'static {
    fn respond(&self, request: Request) -> BoxFuture<'static, HandlerResult>;
}

impl<F, Fut> RequestToResponse for F
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    fn respond(&self, request: Request) -> BoxFuture<'static, HandlerResult> {
        Box::pin(self(request))
    }
}

/// Handler used when none is configured: every request gets the default 501.
pub fn not_implemented(_request: Request) -> futures_util::future::Ready<HandlerResult> {
    futures_util::future::ready(Ok(ResponseProperties::new()))
}

/// Handler error carrying a machine-readable code.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct CodedError {
    pub code: String,
    pub message: String,
}

impl CodedError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

/// A handler failure caught by the dispatch path.
#[derive(Debug)]
pub enum InternalError {
    /// The handler returned an error.
    Failed(BoxError),
    /// The handler panicked; carries the panic message.
    Panicked(String),
}

impl InternalError {
    /// Code attached through `CodedError`, anywhere in the error chain.
    pub fn code(&self) -> Option<&str> {
        let InternalError::Failed(error) = self else {
            return None;
        };
        let mut current: Option<&(dyn StdError + 'static)> = Some(error.as_ref());
        while let Some(error) = current {
            if let Some(coded) = error.downcast_ref::<CodedError>() {
                return Some(&coded.code);
            }
            current = error.source();
        }
        None
    }

    /// The error followed by each of its sources.
    pub fn chain(&self) -> Vec<String> {
        match self {
            InternalError::Failed(error) => {
                let mut chain = vec![error.to_string()];
                let mut source = error.source();
                while let Some(error) = source {
                    chain.push(error.to_string());
                    source = error.source();
                }
                chain
            }
            InternalError::Panicked(message) => vec![message.clone()],
        }
    }

    pub fn is_panic(&self) -> bool {
        matches!(self, InternalError::Panicked(_))
    }
}

impl fmt::Display for InternalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InternalError::Failed(error) => write!(f, "{error}"),
            InternalError::Panicked(message) => write!(f, "{message}"),
        }
    }
}

/// Renders a caught handler failure; layered over the 500 base response.
pub type ErrorRenderer = Arc<dyn Fn(&InternalError) -> ResponseProperties + Send + Sync>;

/// JSON rendering: `{"code": ...}`, plus `"stack"` when requested.
pub fn render_json(error: &InternalError, send_stack: bool) -> ResponseProperties {
    let document = match error {
        InternalError::Panicked(message) => json!({ "code": "VALUE_THROWED", "value": message }),
        InternalError::Failed(_) => {
            let mut document = json!({ "code": error.code().unwrap_or("UNKNOWN_ERROR") });
            if send_stack {
                document["stack"] = json!(error.chain().join("\n"));
            }
            document
        }
    };
    let body = document.to_string();
    ResponseProperties::new()
        .header("content-type", "application/json")
        .header("content-length", body.len())
        .body(body)
}

/// Renderer selected by the `errors` configuration section.
pub fn error_renderer_for(config: &ErrorConfig) -> Option<ErrorRenderer> {
    match config.format {
        InternalErrorFormat::Text => None,
        InternalErrorFormat::Json => {
            let send_stack = config.send_internal_error_stack;
            Some(Arc::new(move |error: &InternalError| render_json(error, send_stack)))
        }
    }
}

/// Properties every handler failure starts from.
fn internal_error_base(error: &InternalError) -> ResponseProperties {
    ResponseProperties::new()
        .status(500)
        .status_text(STATUS_TEXT_INTERNAL_ERROR)
        .header("cache-control", "no-store")
        .header("content-type", "text/plain")
        .body(error.to_string())
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "handler panicked".to_string()
    }
}

/// How a request was answered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Handled,
    Preflight,
    /// Arrived after shutdown began; the handler was not called.
    Refused,
    /// Cut off by shutdown while the handler was running.
    Interrupted,
    /// The handler failed; carries the panic message when it panicked.
    Failed { panic: Option<String> },
}

/// A dispatched request: its frozen response and how it came about.
#[derive(Debug)]
pub struct Dispatched {
    pub response: Response,
    pub method: Method,
    pub outcome: Outcome,
}

impl Dispatched {
    /// The response is the one produced for a failed handler.
    pub fn is_internal_error(&self) -> bool {
        self.response.status() == 500 && self.response.status_text() == STATUS_TEXT_INTERNAL_ERROR
    }

    /// Convert for the transport, dropping the body for HEAD requests.
    pub fn into_transport(self) -> hyper::Response<TransportBody> {
        let status = self.response.status();
        match self.response.into_transport(self.method == Method::HEAD) {
            Ok(response) => response,
            Err(e) => {
                tracing::error!(status, error = %e, "Response could not be written");
                let mut response = hyper::Response::new(empty_body());
                *response.status_mut() = hyper::StatusCode::INTERNAL_SERVER_ERROR;
                response
            }
        }
    }
}

/// Runs requests through CORS, the handler and the composer.
pub struct Dispatcher {
    handler: Arc<dyn RequestToResponse>,
    policy: AccessControlPolicy,
    error_renderer: Option<ErrorRenderer>,
    clients: ClientTracker,
    handlers: RequestHandlerTracker,
    serving: ServingState,
}

impl Dispatcher {
    pub fn new(handler: Arc<dyn RequestToResponse>, serving: ServingState) -> Self {
        Self {
            handler,
            policy: AccessControlPolicy::default(),
            error_renderer: None,
            clients: ClientTracker::new(),
            handlers: RequestHandlerTracker::new(),
            serving,
        }
    }

    pub fn with_policy(mut self, policy: AccessControlPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_error_renderer(mut self, renderer: Option<ErrorRenderer>) -> Self {
        self.error_renderer = renderer;
        self
    }

    pub fn with_trackers(mut self, clients: ClientTracker, handlers: RequestHandlerTracker) -> Self {
        self.clients = clients;
        self.handlers = handlers;
        self
    }

    pub fn clients(&self) -> &ClientTracker {
        &self.clients
    }

    pub fn handlers(&self) -> &RequestHandlerTracker {
        &self.handlers
    }

    /// Produce the response for one request.
    pub async fn dispatch(&self, request: Request) -> Dispatched {
        let method = request.method().clone();
        let resource = request.resource().to_string();

        let (properties, outcome) = self.respond(request).await;
        let response = Response::from(properties);

        if method != Method::HEAD && response.has_content_length_mismatch() {
            tracing::error!(
                code = "CONTENT_LENGTH_MISMATCH",
                method = %method,
                resource = %resource,
                content_length = ?response.headers().content_length(),
                "Declared content-length but the body is empty"
            );
        }

        let status = response.status();
        match status_severity(status) {
            StatusSeverity::Error => tracing::error!(method = %method, resource = %resource, status, "Request answered"),
            StatusSeverity::Warn => tracing::warn!(method = %method, resource = %resource, status, "Request answered"),
            StatusSeverity::Info => tracing::info!(method = %method, resource = %resource, status, "Request answered"),
        }

        Dispatched {
            response,
            method,
            outcome,
        }
    }

    async fn respond(&self, request: Request) -> (ResponseProperties, Outcome) {
        if let Some(reason) = self.serving.refusal() {
            return (shutdown_response(&reason), Outcome::Refused);
        }

        let mut client = match self.clients.track() {
            Ok(client) => client,
            Err(closed) => return (shutdown_response(&closed.reason), Outcome::Refused),
        };

        let access_control = if self.policy.is_enabled() {
            let negotiation = negotiate(&request, &self.policy);
            let cors = ResponseProperties::new().headers(negotiation.headers);
            if negotiation.preflight {
                let base = ResponseProperties::new().status(200).header("content-length", 0);
                return (compose(base, cors), Outcome::Preflight);
            }
            cors
        } else {
            ResponseProperties::new()
        };

        let invocation = match self.handlers.spawn(self.handler.respond(request)) {
            Ok(invocation) => invocation,
            Err(closed) => return (shutdown_response(&closed.reason), Outcome::Refused),
        };

        let result = tokio::select! {
            biased;
            Ok(properties) = &mut client.interrupted => {
                return (properties, Outcome::Interrupted);
            }
            joined = invocation => joined,
        };

        let error = match result {
            Ok(Some(Ok(properties))) => return (compose(properties, access_control), Outcome::Handled),
            Ok(Some(Err(error))) => InternalError::Failed(error),
            Err(join_error) if join_error.is_panic() => InternalError::Panicked(panic_message(join_error.into_panic())),
            Ok(None) | Err(_) => {
                let reason = self.handlers.stop_reason().unwrap_or_default();
                return (shutdown_response(&reason), Outcome::Interrupted);
            }
        };

        tracing::error!(error = %error, panicked = error.is_panic(), "Request handler failed");

        let mut properties = compose(internal_error_base(&error), access_control);
        if let Some(renderer) = &self.error_renderer {
            properties = compose(properties, renderer(&error));
        }
        let panic = match error {
            InternalError::Panicked(message) => Some(message),
            InternalError::Failed(_) => None,
        };
        (properties, Outcome::Failed { panic })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::shutdown::StopReason;
    use crate::http::headers::Headers;
    use crate::http::response::Body;
    use crate::lifecycle::status::{Status, StatusCell};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::OnceLock;

    fn opened() -> (StatusCell, Arc<OnceLock<StopReason>>, ServingState) {
        let status = StatusCell::new();
        status.advance(Status::Opened);
        let reason = Arc::new(OnceLock::new());
        let serving = ServingState::new(status.subscribe(), reason.clone());
        (status, reason, serving)
    }

    fn request(method: Method, headers: Headers) -> Request {
        Request::new("http://127.0.0.1:8080", method, "/path?x=1", headers)
    }

    fn text(response: &Response) -> &str {
        match response.body() {
            Body::Text(text) => text,
            other => panic!("expected text body, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn handler_response_is_frozen_with_defaults() {
        let (_status, _reason, serving) = opened();
        let handler = |request: Request| async move {
            Ok::<_, BoxError>(ResponseProperties::new().status(200).body(request.pathname().to_string()))
        };
        let dispatcher = Dispatcher::new(Arc::new(handler), serving);

        let dispatched = dispatcher.dispatch(request(Method::GET, Headers::new())).await;
        assert_eq!(dispatched.outcome, Outcome::Handled);
        assert_eq!(dispatched.response.status(), 200);
        assert_eq!(dispatched.response.status_text(), "OK");
        assert_eq!(text(&dispatched.response), "/path");
    }

    #[tokio::test]
    async fn default_handler_answers_501() {
        let (_status, _reason, serving) = opened();
        let dispatcher = Dispatcher::new(Arc::new(not_implemented), serving);
        let dispatched = dispatcher.dispatch(request(Method::GET, Headers::new())).await;
        assert_eq!(dispatched.response.status(), 501);
    }

    #[tokio::test]
    async fn after_stop_the_handler_is_not_called() {
        let (status, reason, serving) = opened();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let handler = move |_request: Request| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Ok::<_, BoxError>(ResponseProperties::new().status(200)) }
        };
        let dispatcher = Dispatcher::new(Arc::new(handler), serving);

        reason.set(StopReason::ProcessInterrupt).unwrap();
        status.advance(Status::Closing);

        let dispatched = dispatcher.dispatch(request(Method::GET, Headers::new())).await;
        assert_eq!(dispatched.outcome, Outcome::Refused);
        assert_eq!(dispatched.response.status(), 503);
        assert_eq!(dispatched.response.status_text(), "process-interrupt");
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn refusal_after_internal_error_is_500() {
        let (status, reason, serving) = opened();
        let dispatcher = Dispatcher::new(Arc::new(not_implemented), serving);
        reason.set(StopReason::InternalError).unwrap();
        status.advance(Status::Closing);

        let dispatched = dispatcher.dispatch(request(Method::GET, Headers::new())).await;
        assert_eq!(dispatched.response.status(), 500);
    }

    #[tokio::test]
    async fn handler_error_becomes_500_no_store() {
        let (_status, _reason, serving) = opened();
        let handler = |_request: Request| async { Err::<ResponseProperties, BoxError>("database is gone".into()) };
        let dispatcher = Dispatcher::new(Arc::new(handler), serving);

        let dispatched = dispatcher.dispatch(request(Method::GET, Headers::new())).await;
        assert_eq!(dispatched.outcome, Outcome::Failed { panic: None });
        let response = &dispatched.response;
        assert_eq!(response.status(), 500);
        assert_eq!(response.status_text(), "internal error");
        assert_eq!(response.headers().get("cache-control"), Some("no-store"));
        assert_eq!(response.headers().get("content-type"), Some("text/plain"));
        assert_eq!(text(response), "database is gone");
    }

    #[tokio::test]
    async fn handler_panic_is_contained() {
        let (_status, _reason, serving) = opened();
        let handler = |_request: Request| async {
            let missing: Option<ResponseProperties> = None;
            Ok::<_, BoxError>(missing.expect("no fixture"))
        };
        let dispatcher = Dispatcher::new(Arc::new(handler), serving);

        let dispatched = dispatcher.dispatch(request(Method::GET, Headers::new())).await;
        assert_eq!(dispatched.response.status(), 500);
        assert_eq!(
            dispatched.outcome,
            Outcome::Failed {
                panic: Some("no fixture".to_string())
            }
        );
    }

    #[tokio::test]
    async fn json_renderer_reports_code_and_stack() {
        let (_status, _reason, serving) = opened();
        let handler =
            |_request: Request| async { Err::<ResponseProperties, BoxError>(Box::new(CodedError::new("E_DB", "down"))) };
        let config = ErrorConfig {
            format: InternalErrorFormat::Json,
            send_internal_error_stack: true,
        };
        let dispatcher = Dispatcher::new(Arc::new(handler), serving).with_error_renderer(error_renderer_for(&config));

        let dispatched = dispatcher.dispatch(request(Method::GET, Headers::new())).await;
        let response = &dispatched.response;
        assert_eq!(response.status(), 500);
        assert_eq!(response.headers().get("content-type"), Some("application/json"));
        assert_eq!(response.headers().get("cache-control"), Some("no-store"));
        let document: serde_json::Value = serde_json::from_str(text(response)).unwrap();
        assert_eq!(document, json!({ "code": "E_DB", "stack": "down" }));
        assert!(!response.has_content_length_mismatch());
    }

    #[test]
    fn json_rendering_of_panics_and_uncoded_errors() {
        let panicked = render_json(&InternalError::Panicked("boom".into()), true);
        assert!(matches!(panicked.body, Some(Body::Text(ref t)) if t == r#"{"code":"VALUE_THROWED","value":"boom"}"#));

        let uncoded = render_json(&InternalError::Failed("plain".into()), false);
        assert!(matches!(uncoded.body, Some(Body::Text(ref t)) if t == r#"{"code":"UNKNOWN_ERROR"}"#));
    }

    #[tokio::test]
    async fn preflight_skips_the_handler() {
        let (_status, _reason, serving) = opened();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let handler = move |_request: Request| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Ok::<_, BoxError>(ResponseProperties::new().status(200)) }
        };
        let policy = AccessControlPolicy {
            allow_request_origin: true,
            allow_request_method: true,
            ..AccessControlPolicy::default()
        };
        let dispatcher = Dispatcher::new(Arc::new(handler), serving).with_policy(policy);

        let headers = Headers::new()
            .with("origin", "http://example.com")
            .with("access-control-request-method", "PATCH");
        let dispatched = dispatcher.dispatch(request(Method::OPTIONS, headers)).await;

        assert_eq!(dispatched.outcome, Outcome::Preflight);
        let response = &dispatched.response;
        assert_eq!(response.status(), 200);
        assert_eq!(response.headers().get("content-length"), Some("0"));
        assert_eq!(response.headers().get("access-control-allow-origin"), Some("http://example.com"));
        assert_eq!(
            response.headers().get("access-control-allow-methods"),
            Some("GET, POST, PUT, DELETE, OPTIONS, PATCH")
        );
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn cors_headers_are_layered_over_the_handler() {
        let (_status, _reason, serving) = opened();
        let handler = |_request: Request| async { Ok::<_, BoxError>(ResponseProperties::new().status(200).header("vary", "accept")) };
        let policy = AccessControlPolicy {
            allow_request_origin: true,
            ..AccessControlPolicy::default()
        };
        let dispatcher = Dispatcher::new(Arc::new(handler), serving).with_policy(policy);

        let headers = Headers::new().with("origin", "http://example.com");
        let dispatched = dispatcher.dispatch(request(Method::GET, headers)).await;
        assert_eq!(dispatched.response.headers().get("vary"), Some("accept, origin"));
        assert_eq!(
            dispatched.response.headers().get("access-control-allow-origin"),
            Some("http://example.com")
        );
    }

    #[tokio::test]
    async fn stopping_clients_interrupts_waiting_request() {
        let (_status, _reason, serving) = opened();
        let handler = |_request: Request| async {
            tokio::time::sleep(std::time::Duration::from_secs(30)).await;
            Ok::<_, BoxError>(ResponseProperties::new().status(200))
        };
        let dispatcher = Arc::new(Dispatcher::new(Arc::new(handler), serving));

        let task = {
            let dispatcher = dispatcher.clone();
            tokio::spawn(async move { dispatcher.dispatch(request(Method::GET, Headers::new())).await })
        };
        while dispatcher.clients().active_count() == 0 {
            tokio::task::yield_now().await;
        }
        dispatcher.clients().stop(&StopReason::ProcessDeath);

        let dispatched = task.await.unwrap();
        assert_eq!(dispatched.outcome, Outcome::Interrupted);
        assert_eq!(dispatched.response.status(), 503);
        assert_eq!(dispatched.response.status_text(), "process-death");
        dispatcher.handlers().stop(&StopReason::ProcessDeath, true).await;
    }

    #[tokio::test]
    async fn head_drops_body_on_write() {
        let (_status, _reason, serving) = opened();
        let handler = |_request: Request| async {
            Ok::<_, BoxError>(ResponseProperties::new().status(200).header("content-length", 5).body("hello"))
        };
        let dispatcher = Dispatcher::new(Arc::new(handler), serving);

        let dispatched = dispatcher.dispatch(request(Method::HEAD, Headers::new())).await;
        let response = dispatched.into_transport();
        assert_eq!(response.status(), 200);
        assert_eq!(response.headers()["content-length"], "5");
    }

    #[test]
    fn coded_error_found_through_sources() {
        #[derive(Debug, Error)]
        #[error("wrapped")]
        struct Wrapper(#[source] CodedError);

        let error = InternalError::Failed(Box::new(Wrapper(CodedError::new("E_INNER", "inner"))));
        assert_eq!(error.code(), Some("E_INNER"));
        assert_eq!(error.chain(), vec!["wrapped".to_string(), "inner".to_string()]);
    }
}
