//! Header map shared by requests and responses.
//!
//! # Responsibilities
//! - Case-insensitive storage (names are lower-cased on insert)
//! - Value normalization (trimmed, repeated transport headers joined)
//! - Comma-separated list access for multi-value headers
//! - Repeated header lines (`set-cookie`) kept as separate values
//!
//! # Design Decisions
//! - Ordered by name so serialized output is deterministic
//! - Values are kept as strings; list semantics live in `compose.rs`

use std::collections::BTreeMap;
use std::fmt;

/// Headers whose value is a comma-separated list rather than a scalar.
pub const LIST_HEADERS: &[&str] = &[
    "accept",
    "accept-charset",
    "accept-language",
    "access-control-allow-headers",
    "access-control-allow-methods",
    "access-control-allow-origin",
    "vary",
];

/// Headers sent as one line per value; their values cannot be comma-joined.
pub const REPEATED_HEADERS: &[&str] = &["set-cookie"];

/// Returns true when `name` carries list semantics.
pub fn is_list_header(name: &str) -> bool {
    LIST_HEADERS.contains(&name)
}

/// Returns true when `name` is written as separate header lines.
pub fn is_repeated_header(name: &str) -> bool {
    REPEATED_HEADERS.contains(&name)
}

/// A lower-cased, ordered header mapping.
///
/// Every name holds at least one value. Only repeated headers hold more than
/// one; everything else is joined into a single value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: BTreeMap<String, Vec<String>>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a header, dropping every previous value.
    pub fn insert(&mut self, name: impl AsRef<str>, value: impl ToString) {
        self.entries
            .insert(normalize_name(name.as_ref()), vec![normalize_value(&value.to_string())]);
    }

    /// Builder-style insert.
    pub fn with(mut self, name: impl AsRef<str>, value: impl ToString) -> Self {
        self.insert(name, value);
        self
    }

    /// Append a value. Repeated headers gain another line; any other header
    /// is joined with `", "`.
    pub fn append(&mut self, name: impl AsRef<str>, value: impl ToString) {
        let name = normalize_name(name.as_ref());
        let value = normalize_value(&value.to_string());
        let repeated = is_repeated_header(&name);
        match self.entries.get_mut(&name) {
            Some(values) if repeated => values.push(value),
            Some(values) => match values.first_mut() {
                Some(existing) => {
                    existing.push_str(", ");
                    existing.push_str(&value);
                }
                None => values.push(value),
            },
            None => {
                self.entries.insert(name, vec![value]);
            }
        }
    }

    /// First value of `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .get(&normalize_name(name))
            .and_then(|values| values.first())
            .map(String::as_str)
    }

    /// Every value of `name`, one per header line.
    pub fn get_all(&self, name: &str) -> Vec<&str> {
        self.entries
            .get(&normalize_name(name))
            .map(|values| values.iter().map(String::as_str).collect())
            .unwrap_or_default()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(&normalize_name(name))
    }

    /// Remove `name`, returning its values.
    pub fn remove(&mut self, name: &str) -> Option<Vec<String>> {
        self.entries.remove(&normalize_name(name))
    }

    /// Split a header into its comma-separated items, skipping empty ones.
    pub fn get_list(&self, name: &str) -> Vec<&str> {
        self.get(name).map(split_list).unwrap_or_default()
    }

    /// Declared `content-length`, if present and numeric.
    pub fn content_length(&self) -> Option<u64> {
        self.get("content-length").and_then(|v| v.parse().ok())
    }

    /// Number of distinct header names.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Every header line, in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .flat_map(|(name, values)| values.iter().map(move |value| (name.as_str(), value.as_str())))
    }

    /// Deduplicate every list header, keeping first occurrences in order.
    pub fn dedupe_lists(&mut self) {
        for (name, values) in self.entries.iter_mut() {
            if is_list_header(name) {
                for value in values.iter_mut() {
                    *value = join_unique(split_list(value));
                }
            }
        }
    }

    /// Build from a transport header map; repeated names are joined unless
    /// they are repeated headers.
    pub fn from_transport(map: &hyper::HeaderMap) -> Self {
        let mut headers = Self::new();
        for (name, value) in map.iter() {
            let value = String::from_utf8_lossy(value.as_bytes());
            headers.append(name.as_str(), value);
        }
        headers
    }
}

impl<K: AsRef<str>, V: ToString> FromIterator<(K, V)> for Headers {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut headers = Self::new();
        for (k, v) in iter {
            headers.insert(k, v);
        }
        headers
    }
}

impl fmt::Display for Headers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (name, value)) in self.iter().enumerate() {
            if i > 0 {
                f.write_str("\r\n")?;
            }
            write!(f, "{}: {}", name, value)?;
        }
        Ok(())
    }
}

fn normalize_name(name: &str) -> String {
    name.trim().to_ascii_lowercase()
}

fn normalize_value(value: &str) -> String {
    value.trim().to_string()
}

/// Split a comma-separated header value into trimmed, non-empty items.
pub fn split_list(value: &str) -> Vec<&str> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .collect()
}

/// Join items with `", "`, dropping repeats after their first occurrence.
pub fn join_unique<'a, I>(items: I) -> String
where
    I: IntoIterator<Item = &'a str>,
{
    let mut seen: Vec<&str> = Vec::new();
    for item in items {
        if !seen.contains(&item) {
            seen.push(item);
        }
    }
    seen.join(", ")
}

/// Parse a raw header block (`name: value` lines separated by CRLF).
pub fn headers_from_string(raw: &str) -> Headers {
    let mut headers = Headers::new();
    for line in raw.split("\r\n") {
        if let Some(index) = line.find(": ") {
            if index > 0 {
                headers.insert(&line[..index], &line[index + 2..]);
            }
        }
    }
    headers
}

/// Whether an `accept` header lists `content_type` exactly.
pub fn accepts_content_type(accept: Option<&str>, content_type: &str) -> bool {
    match accept {
        Some(accept) => accept.split(',').any(|accepted| accepted.trim() == content_type),
        None => false,
    }
}
