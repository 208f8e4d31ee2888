//! Response properties and the frozen outgoing response.
//!
//! # Responsibilities
//! - `ResponseProperties`: a partial response produced by one source
//!   (handler, CORS negotiator, error path, tracker shutdown)
//! - `Response`: the composed, frozen value handed to the transport
//! - Conversion to a hyper response (status text, body encoding, HEAD)
//!
//! # Design Decisions
//! - Unset fields stay `None` so composition can tell "absent" from "empty"
//! - Defaults (501, canonical status text, empty body) are applied only once,
//!   when the final response is frozen

use std::fmt;
use std::io;
use std::pin::Pin;

use base64::Engine;
use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use http_body_util::{combinators::UnsyncBoxBody, BodyExt, Empty, Full, StreamBody};
use hyper::body::Frame;
use hyper::header::{HeaderName, HeaderValue};
use hyper::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::http::headers::Headers;

/// Status used when no source sets one.
pub const DEFAULT_STATUS: u16 = 501;

/// Body type written to the transport.
pub type TransportBody = UnsyncBoxBody<Bytes, io::Error>;

/// A streaming body source.
pub type BodyStream = Pin<Box<dyn Stream<Item = Result<Bytes, io::Error>> + Send>>;

/// Response payload.
#[derive(Default)]
pub enum Body {
    #[default]
    Empty,
    Text(String),
    Bytes(Bytes),
    Stream(BodyStream),
}

impl Body {
    /// Whether the body is known to be empty. Streams are never considered empty.
    pub fn is_empty(&self) -> bool {
        match self {
            Body::Empty => true,
            Body::Text(text) => text.is_empty(),
            Body::Bytes(bytes) => bytes.is_empty(),
            Body::Stream(_) => false,
        }
    }

    pub fn stream<S>(stream: S) -> Self
    where
        S: Stream<Item = Result<Bytes, io::Error>> + Send + 'static,
    {
        Body::Stream(Box::pin(stream))
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Body::Empty => f.write_str("Empty"),
            Body::Text(text) => f.debug_tuple("Text").field(text).finish(),
            Body::Bytes(bytes) => f.debug_tuple("Bytes").field(bytes).finish(),
            Body::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

impl From<&str> for Body {
    fn from(text: &str) -> Self {
        Body::Text(text.to_string())
    }
}

impl From<String> for Body {
    fn from(text: String) -> Self {
        Body::Text(text)
    }
}

impl From<Bytes> for Body {
    fn from(bytes: Bytes) -> Self {
        Body::Bytes(bytes)
    }
}

impl From<Vec<u8>> for Body {
    fn from(bytes: Vec<u8>) -> Self {
        Body::Bytes(Bytes::from(bytes))
    }
}

/// How a text body is turned into bytes on write.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BodyEncoding {
    #[default]
    Utf8,
    Latin1,
    Base64,
}

impl BodyEncoding {
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "utf8" | "utf-8" => Some(BodyEncoding::Utf8),
            "latin1" | "binary" => Some(BodyEncoding::Latin1),
            "base64" => Some(BodyEncoding::Base64),
            _ => None,
        }
    }

    fn encode(self, text: String) -> Result<Bytes, WriteError> {
        match self {
            BodyEncoding::Utf8 => Ok(Bytes::from(text)),
            // Code points above 0xFF are truncated, as a binary string write would.
            BodyEncoding::Latin1 => Ok(text.chars().map(|c| c as u32 as u8).collect::<Vec<_>>().into()),
            BodyEncoding::Base64 => base64::engine::general_purpose::STANDARD
                .decode(text.trim())
                .map(Bytes::from)
                .map_err(WriteError::Base64),
        }
    }
}

/// A partial response. Every field is optional; see `compose`.
#[derive(Debug, Default)]
pub struct ResponseProperties {
    pub status: Option<u16>,
    pub status_text: Option<String>,
    pub headers: Headers,
    pub body: Option<Body>,
    pub body_encoding: Option<BodyEncoding>,
}

impl ResponseProperties {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn status_text(mut self, text: impl Into<String>) -> Self {
        self.status_text = Some(text.into());
        self
    }

    pub fn header(mut self, name: impl AsRef<str>, value: impl ToString) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Add a value without replacing earlier ones (e.g. another `set-cookie`).
    pub fn append_header(mut self, name: impl AsRef<str>, value: impl ToString) -> Self {
        self.headers.append(name, value);
        self
    }

    pub fn headers(mut self, headers: Headers) -> Self {
        self.headers = headers;
        self
    }

    pub fn body(mut self, body: impl Into<Body>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn body_encoding(mut self, encoding: BodyEncoding) -> Self {
        self.body_encoding = Some(encoding);
        self
    }

    /// Parse a partial response from a JSON object.
    ///
    /// Only `status`, `statusText`, `headers`, `body` and `bodyEncoding` are
    /// accepted; any other key is rejected.
    pub fn from_json(value: serde_json::Value) -> Result<Self, PropertiesError> {
        let serde_json::Value::Object(object) = value else {
            return Err(PropertiesError::NotAnObject);
        };

        let mut properties = Self::new();
        for (key, value) in object {
            match key.as_str() {
                "status" => {
                    let status = value
                        .as_u64()
                        .and_then(|s| u16::try_from(s).ok())
                        .ok_or(PropertiesError::InvalidField { field: "status", expected: "an integer status" })?;
                    properties.status = Some(status);
                }
                "statusText" => {
                    let text = value
                        .as_str()
                        .ok_or(PropertiesError::InvalidField { field: "statusText", expected: "a string" })?;
                    properties.status_text = Some(text.to_string());
                }
                "headers" => {
                    let serde_json::Value::Object(map) = value else {
                        return Err(PropertiesError::InvalidField { field: "headers", expected: "an object" });
                    };
                    for (name, value) in map {
                        let values = match value {
                            serde_json::Value::Array(items) => items,
                            scalar => vec![scalar],
                        };
                        properties.headers.remove(&name);
                        for value in values {
                            let value = match value {
                                serde_json::Value::String(s) => s,
                                serde_json::Value::Number(n) => n.to_string(),
                                serde_json::Value::Bool(b) => b.to_string(),
                                _ => {
                                    return Err(PropertiesError::InvalidField {
                                        field: "headers",
                                        expected: "string, number or boolean values",
                                    })
                                }
                            };
                            properties.headers.append(&name, value);
                        }
                    }
                }
                "body" => {
                    let body = value
                        .as_str()
                        .ok_or(PropertiesError::InvalidField { field: "body", expected: "a string" })?;
                    properties.body = Some(Body::Text(body.to_string()));
                }
                "bodyEncoding" => {
                    let encoding = value
                        .as_str()
                        .and_then(BodyEncoding::parse)
                        .ok_or(PropertiesError::InvalidField { field: "bodyEncoding", expected: "utf8, latin1 or base64" })?;
                    properties.body_encoding = Some(encoding);
                }
                _ => return Err(PropertiesError::UnknownField(key)),
            }
        }
        Ok(properties)
    }
}

/// Errors raised when parsing dynamic response properties.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PropertiesError {
    #[error("response properties must be an object")]
    NotAnObject,

    #[error("unknown response property: {0}")]
    UnknownField(String),

    #[error("response property {field} must be {expected}")]
    InvalidField { field: &'static str, expected: &'static str },
}

/// Errors raised while converting a response for the transport.
#[derive(Debug, Error)]
pub enum WriteError {
    #[error("invalid status code {0}")]
    InvalidStatus(u16),

    #[error("invalid header {name}")]
    InvalidHeader { name: String },

    #[error("body is not valid base64: {0}")]
    Base64(#[source] base64::DecodeError),
}

pub fn empty_body() -> TransportBody {
    Empty::<Bytes>::new().map_err(|never| match never {}).boxed_unsync()
}

/// Canonical status text, or "not specified" for unknown codes.
pub fn status_text_for(status: u16) -> String {
    StatusCode::from_u16(status)
        .ok()
        .and_then(|s| s.canonical_reason())
        .unwrap_or("not specified")
        .to_string()
}

/// The composed, frozen response.
#[derive(Debug)]
pub struct Response {
    status: u16,
    status_text: String,
    headers: Headers,
    body: Body,
    body_encoding: BodyEncoding,
}

impl From<ResponseProperties> for Response {
    fn from(properties: ResponseProperties) -> Self {
        let status = properties.status.unwrap_or(DEFAULT_STATUS);
        let mut headers = properties.headers;
        headers.dedupe_lists();
        Self {
            status,
            status_text: properties.status_text.unwrap_or_else(|| status_text_for(status)),
            headers,
            body: properties.body.unwrap_or_default(),
            body_encoding: properties.body_encoding.unwrap_or_default(),
        }
    }
}

impl Response {
    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn status_text(&self) -> &str {
        &self.status_text
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn body(&self) -> &Body {
        &self.body
    }

    pub fn body_encoding(&self) -> BodyEncoding {
        self.body_encoding
    }

    /// Declared positive content-length paired with an empty body.
    pub fn has_content_length_mismatch(&self) -> bool {
        matches!(self.headers.content_length(), Some(length) if length > 0) && self.body.is_empty()
    }

    /// Convert into a hyper response; the body is dropped when `ignore_body`.
    pub fn into_transport(self, ignore_body: bool) -> Result<hyper::Response<TransportBody>, WriteError> {
        let status = StatusCode::from_u16(self.status).map_err(|_| WriteError::InvalidStatus(self.status))?;

        let body: TransportBody = if ignore_body {
            empty_body()
        } else {
            match self.body {
                Body::Empty => empty_body(),
                Body::Text(text) => Full::new(self.body_encoding.encode(text)?)
                    .map_err(|never| match never {})
                    .boxed_unsync(),
                Body::Bytes(bytes) => Full::new(bytes).map_err(|never| match never {}).boxed_unsync(),
                Body::Stream(stream) => StreamBody::new(stream.map(|chunk| chunk.map(Frame::data))).boxed_unsync(),
            }
        };

        let mut response = hyper::Response::new(body);
        *response.status_mut() = status;

        for (name, value) in self.headers.iter() {
            let header_name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| WriteError::InvalidHeader { name: name.to_string() })?;
            let header_value = HeaderValue::from_str(value)
                .map_err(|_| WriteError::InvalidHeader { name: name.to_string() })?;
            response.headers_mut().append(header_name, header_value);
        }

        if status.canonical_reason() != Some(self.status_text.as_str()) {
            if let Ok(reason) = hyper::ext::ReasonPhrase::try_from(self.status_text.into_bytes()) {
                response.extensions_mut().insert(reason);
            }
        }

        Ok(response)
    }
}
