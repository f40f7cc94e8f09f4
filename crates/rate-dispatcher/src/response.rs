//! Response descriptor produced by a caller-supplied operation.
//!
//! The dispatcher never inspects URLs, authentication, or payloads — only
//! `status` and a handful of recognized headers (see [`crate::classify`]).
//! `payload` is opaque and simply handed back to the submitter untouched.

use std::collections::HashMap;

/// A case-insensitive header map.
///
/// Keys are normalized to lowercase at insertion so lookups never need to
/// re-derive the normalization at read time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderMap {
    entries: HashMap<String, String>,
}

impl HeaderMap {
    /// Creates an empty header map.
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Inserts a header, normalizing the name to lowercase.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries.insert(name.into().to_ascii_lowercase(), value.into());
    }

    /// Looks up a header by name, case-insensitively.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    /// Returns true if the header is present, regardless of value.
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(&name.to_ascii_lowercase())
    }

    /// Iterates over `(name, value)` pairs. Names are already lowercased.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<K, V> FromIterator<(K, V)> for HeaderMap
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut map = HeaderMap::new();
        for (k, v) in iter {
            map.insert(k, v);
        }
        map
    }
}

/// An immutable value produced by an operation and consumed by the
/// dispatcher, then handed to the submitter untouched on success.
#[derive(Debug, Clone)]
pub struct Response<P = ()> {
    pub status: u16,
    pub headers: HeaderMap,
    pub payload: P,
}

impl<P> Response<P> {
    /// Creates a response with no headers.
    pub fn new(status: u16, payload: P) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            payload,
        }
    }

    /// Creates a response with the given headers.
    pub fn with_headers(status: u16, headers: HeaderMap, payload: P) -> Self {
        Self {
            status,
            headers,
            payload,
        }
    }
}
