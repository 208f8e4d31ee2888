//! Inbound request model and transport adapter.
//!
//! # Responsibilities
//! - Convert a transport request into an immutable `Request`
//! - Normalize headers (lower-cased names, trimmed values)
//! - Expose the body lazily, only for payload-bearing methods
//! - Offer path/query helpers for routing decisions made downstream

use bytes::Bytes;
use http_body_util::BodyExt;
use hyper::body::Incoming;
use hyper::Method;

use crate::http::headers::Headers;

/// Whether requests with this method carry a payload.
fn carries_payload(method: &Method) -> bool {
    *method == Method::POST || *method == Method::PUT || *method == Method::PATCH
}

/// An inbound request, constructed once and never mutated.
#[derive(Debug)]
pub struct Request {
    origin: String,
    resource: String,
    method: Method,
    headers: Headers,
    body: Option<RequestBody>,
}

impl Request {
    /// Build a request directly, mainly for tests and embedding.
    pub fn new(
        origin: impl Into<String>,
        method: Method,
        resource: impl Into<String>,
        headers: Headers,
    ) -> Self {
        Self {
            origin: origin.into(),
            resource: resource.into(),
            method,
            headers,
            body: None,
        }
    }

    /// Attach a body. Ignored for methods that do not carry a payload.
    pub fn with_body(mut self, body: RequestBody) -> Self {
        if carries_payload(&self.method) {
            self.body = Some(body);
        }
        self
    }

    /// Server origin (scheme, host and port) the request arrived on.
    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// Path plus query string, as sent on the request line.
    pub fn resource(&self) -> &str {
        &self.resource
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn has_body(&self) -> bool {
        self.body.is_some()
    }

    /// Consume the request and take its body.
    pub fn into_body(self) -> Option<RequestBody> {
        self.body
    }

    /// The resource without query string or fragment.
    pub fn pathname(&self) -> &str {
        let end = self
            .resource
            .find(|c: char| c == '?' || c == '#')
            .unwrap_or(self.resource.len());
        &self.resource[..end]
    }

    /// The query string including its leading `?`, or an empty string.
    pub fn search(&self) -> &str {
        let without_fragment = match self.resource.find('#') {
            Some(index) => &self.resource[..index],
            None => &self.resource,
        };
        match without_fragment.find('?') {
            Some(index) => &without_fragment[index..],
            None => "",
        }
    }

    /// First decoded value of query parameter `name`.
    pub fn search_param(&self, name: &str) -> Option<String> {
        let query = self.search().trim_start_matches('?');
        url::form_urlencoded::parse(query.as_bytes())
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.into_owned())
    }

    /// Extension of the last path segment, without the dot.
    pub fn extension(&self) -> Option<&str> {
        let segment = self.pathname().rsplit('/').next()?;
        let index = segment.rfind('.')?;
        let extension = &segment[index + 1..];
        (!extension.is_empty()).then_some(extension)
    }
}

/// Lazily read request payload.
#[derive(Debug)]
pub enum RequestBody {
    /// Still on the wire; `resource` identifies the request in read errors.
    Incoming { body: Incoming, resource: String },
    Buffered(Bytes),
}

impl RequestBody {
    /// Read the whole payload.
    pub async fn bytes(self) -> Result<Bytes, hyper::Error> {
        match self {
            RequestBody::Incoming { body, resource } => match body.collect().await {
                Ok(collected) => Ok(collected.to_bytes()),
                Err(e) => {
                    tracing::warn!(resource = %resource, error = %e, "Failed to read request body");
                    Err(e)
                }
            },
            RequestBody::Buffered(bytes) => Ok(bytes),
        }
    }

    /// Read the payload as (lossy) UTF-8 text.
    pub async fn text(self) -> Result<String, hyper::Error> {
        let bytes = self.bytes().await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

impl From<Bytes> for RequestBody {
    fn from(bytes: Bytes) -> Self {
        RequestBody::Buffered(bytes)
    }
}

/// Convert a transport request into a `Request` for the given server origin.
pub fn adapt(request: hyper::Request<Incoming>, origin: &str) -> Request {
    let (parts, body) = request.into_parts();
    let resource = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| "/".to_string());

    let headers = Headers::from_transport(&parts.headers);
    let body = RequestBody::Incoming {
        body,
        resource: resource.clone(),
    };
    Request::new(origin, parts.method, resource, headers).with_body(body)
}
