//! Response composition.
//!
//! Several independent sources contribute to one outgoing response: the
//! application handler, the CORS negotiator and the error path. Each produces
//! a `ResponseProperties`; `compose` layers them with a fixed per-field table.
//!
//! # Merge Table
//! ```text
//! status, statusText, body, bodyEncoding  → override wins when set
//! headers                                 → merged name by name:
//!     list headers (accept*, access-control-allow-*, vary)
//!         → concatenate, dedupe, keep first occurrence
//!     repeated headers (set-cookie) → every line from both sides
//!     any other header → override wins
//! ```

use crate::http::headers::{is_list_header, is_repeated_header, join_unique, split_list, Headers};
use crate::http::response::ResponseProperties;

/// How two values of the same header combine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderStrategy {
    /// Concatenate both comma-separated lists and drop repeats.
    Concat,
    /// Keep the lines of both sides, base first.
    Accumulate,
    /// The later value replaces the earlier one.
    Replace,
}

/// Strategy registered for a header name.
pub fn header_strategy(name: &str) -> HeaderStrategy {
    if is_list_header(name) {
        HeaderStrategy::Concat
    } else if is_repeated_header(name) {
        HeaderStrategy::Accumulate
    } else {
        HeaderStrategy::Replace
    }
}

/// Merge `next` into `base` header by header.
pub fn compose_headers(base: Headers, next: &Headers) -> Headers {
    let mut merged = base;
    for (name, value) in next.iter() {
        match (header_strategy(name), merged.get(name)) {
            (HeaderStrategy::Accumulate, _) => merged.append(name, value),
            (HeaderStrategy::Concat, Some(previous)) => {
                let joined = join_unique(split_list(previous).into_iter().chain(split_list(value)));
                merged.insert(name, joined);
            }
            _ => merged.insert(name, value),
        }
    }
    merged
}

/// Layer `next` on top of `base`.
pub fn compose(base: ResponseProperties, next: ResponseProperties) -> ResponseProperties {
    ResponseProperties {
        status: next.status.or(base.status),
        status_text: next.status_text.or(base.status_text),
        headers: compose_headers(base.headers, &next.headers),
        body: next.body.or(base.body),
        body_encoding: next.body_encoding.or(base.body_encoding),
    }
}
