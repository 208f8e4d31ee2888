//! Cross-origin access negotiation.
//!
//! # Responsibilities
//! - Compute `access-control-*` response headers from the request headers and
//!   the server's `AccessControlPolicy`
//! - Track which request headers influenced the result (`vary`)
//! - Decide whether the request is a preflight to answer without the handler
//!
//! # Design Decisions
//! - Pure function: no state, no I/O
//! - Static allow-lists always come first, reflected values are appended
//! - See <https://www.w3.org/TR/cors/>

use hyper::Method;
use serde::{Deserialize, Serialize};

use crate::http::headers::{join_unique, split_list, Headers};
use crate::http::request::Request;

pub const DEFAULT_ALLOWED_METHODS: &[&str] = &["GET", "POST", "PUT", "DELETE", "OPTIONS"];
pub const DEFAULT_ALLOWED_HEADERS: &[&str] = &["x-requested-with"];
pub const DEFAULT_MAX_AGE_SECONDS: u64 = 600;

/// Access-control policy, fixed for a server's lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct AccessControlPolicy {
    pub allowed_origins: Vec<String>,
    pub allow_request_origin: bool,
    pub allowed_methods: Vec<String>,
    pub allow_request_method: bool,
    pub allowed_headers: Vec<String>,
    pub allow_request_headers: bool,
    pub allow_credentials: bool,
    pub max_age_seconds: u64,
}

impl Default for AccessControlPolicy {
    fn default() -> Self {
        Self {
            allowed_origins: Vec::new(),
            allow_request_origin: false,
            allowed_methods: DEFAULT_ALLOWED_METHODS.iter().map(|m| m.to_string()).collect(),
            allow_request_method: false,
            allowed_headers: DEFAULT_ALLOWED_HEADERS.iter().map(|h| h.to_string()).collect(),
            allow_request_headers: false,
            allow_credentials: false,
            max_age_seconds: DEFAULT_MAX_AGE_SECONDS,
        }
    }
}

impl AccessControlPolicy {
    /// Negotiation runs only when some origin can be allowed.
    pub fn is_enabled(&self) -> bool {
        self.allow_request_origin || !self.allowed_origins.is_empty()
    }
}

/// Outcome of negotiating one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Negotiation {
    pub headers: Headers,
    /// The request is a preflight that must be answered without the handler.
    pub preflight: bool,
}

/// Negotiate access-control headers for `request` under `policy`.
pub fn negotiate(request: &Request, policy: &AccessControlPolicy) -> Negotiation {
    Negotiation {
        headers: access_control_headers(request.headers(), policy),
        preflight: policy.is_enabled() && *request.method() == Method::OPTIONS,
    }
}

/// The `access-control-*` and `vary` headers for the given request headers.
pub fn access_control_headers(request_headers: &Headers, policy: &AccessControlPolicy) -> Headers {
    let mut vary: Vec<&str> = Vec::new();

    let mut origins: Vec<String> = policy.allowed_origins.clone();
    if policy.allow_request_origin {
        let referer_origin = request_headers.get("referer").and_then(href_to_origin);
        match request_headers.get("origin") {
            Some(origin) if origin != "null" => {
                origins.push(origin.to_string());
                vary.push("origin");
            }
            _ => match referer_origin {
                Some(origin) => {
                    origins.push(origin);
                    vary.push("referer");
                }
                None => origins.push("*".to_string()),
            },
        }
    }

    let mut methods: Vec<String> = policy.allowed_methods.clone();
    if policy.allow_request_method {
        if let Some(requested) = request_headers.get("access-control-request-method") {
            if !methods.iter().any(|m| m == requested) {
                methods.push(requested.to_string());
                vary.push("access-control-request-method");
            }
        }
    }

    let mut allowed_headers: Vec<String> = policy.allowed_headers.clone();
    if policy.allow_request_headers {
        if let Some(requested) = request_headers.get("access-control-request-headers") {
            for name in split_list(requested) {
                let name = name.to_ascii_lowercase();
                if !allowed_headers.contains(&name) {
                    allowed_headers.push(name);
                    if !vary.contains(&"access-control-request-headers") {
                        vary.push("access-control-request-headers");
                    }
                }
            }
        }
    }

    let mut headers = Headers::new()
        .with("access-control-allow-origin", join_unique(origins.iter().map(String::as_str)))
        .with("access-control-allow-methods", join_unique(methods.iter().map(String::as_str)))
        .with("access-control-allow-headers", join_unique(allowed_headers.iter().map(String::as_str)))
        .with("access-control-max-age", policy.max_age_seconds);

    if policy.allow_credentials {
        headers.insert("access-control-allow-credentials", true);
    }
    if !vary.is_empty() {
        headers.insert("vary", vary.join(", "));
    }
    headers
}

/// Always-reflect variant of [`access_control_headers`].
///
/// Reflects the request origin unconditionally and appends requested methods
/// and headers to `access-control-allow-methods`. Dispatch uses [`negotiate`].
pub fn request_to_access_control_headers(
    request_headers: &Headers,
    allow_credentials: bool,
    max_age_seconds: u64,
) -> Headers {
    let mut vary: Vec<&str> = Vec::new();

    let origin = match request_headers.get("origin") {
        Some(origin) if origin != "null" => {
            vary.push("origin");
            origin.to_string()
        }
        _ => match request_headers.get("referer").and_then(href_to_origin) {
            Some(origin) => {
                vary.push("referer");
                origin
            }
            None => "*".to_string(),
        },
    };

    let mut methods: Vec<String> = DEFAULT_ALLOWED_METHODS.iter().map(|m| m.to_string()).collect();
    if let Some(requested) = request_headers.get("access-control-request-method") {
        for method in requested.split(", ") {
            if !methods.iter().any(|m| m == method) {
                methods.push(method.to_string());
            }
        }
        vary.push("access-control-request-method");
    }

    if let Some(requested) = request_headers.get("access-control-request-headers") {
        for name in requested.split(", ") {
            let name = name.to_ascii_lowercase();
            if !methods.contains(&name) {
                methods.push(name);
            }
        }
        vary.push("access-control-request-headers");
    }

    let mut headers = Headers::new()
        .with("access-control-allow-origin", origin)
        .with("access-control-allow-methods", methods.join(", "))
        .with("access-control-allow-headers", "x-requested-with, content-type, accept")
        .with("access-control-allow-credentials", allow_credentials)
        .with("access-control-max-age", max_age_seconds);
    if !vary.is_empty() {
        headers.insert("vary", vary.join(", "));
    }
    headers
}

fn href_to_origin(href: &str) -> Option<String> {
    let url = url::Url::parse(href).ok()?;
    let origin = url.origin();
    origin.is_tuple().then(|| origin.ascii_serialization())
}
