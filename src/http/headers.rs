//! HTTP header bag with case-insensitive name lookup.
//!
//! Both the request and the response carry a [`Headers`] value. The ESI layer
//! only ever touches headers through this narrow surface: read, replace,
//! remove.

/// Header names the pipeline and the ESI layer read or rewrite.
pub mod names {
    pub const ACCEPT_ENCODING: &str = "Accept-Encoding";
    pub const CACHE_CONTROL: &str = "Cache-Control";
    pub const CONNECTION: &str = "Connection";
    pub const CONTENT_LENGTH: &str = "Content-Length";
    pub const CONTENT_TYPE: &str = "Content-Type";
    pub const HOST: &str = "Host";
    pub const TRANSFER_ENCODING: &str = "Transfer-Encoding";
}

/// A case-insensitive, multi-value HTTP header map.
///
/// Preserves insertion order and allows multiple values per header name,
/// matching the semantics of HTTP/1.1 header fields (RFC 9110 §5.3).
///
/// # Examples
///
/// ```
/// use rttp_esi::http::Headers;
///
/// let mut headers = Headers::new();
/// headers.insert("Cache-Control", "public");
/// headers.insert("Cache-Control", "max-age=60");
/// assert_eq!(headers.get_joined("cache-control").as_deref(), Some("public, max-age=60"));
///
/// headers.set("Cache-Control", "no-store");
/// assert_eq!(headers.get("cache-control"), Some("no-store"));
/// ```
#[derive(Debug, Clone, Default)]
pub struct Headers {
    inner: Vec<(String, String)>,
}

impl Headers {
    /// Creates an empty header map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a header map with pre-allocated capacity for `capacity` entries.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Vec::with_capacity(capacity),
        }
    }

    /// Appends a header entry. Multiple values for the same name are preserved.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.inner.push((name.into(), value.into()));
    }

    /// Replaces every entry named `name` with a single `name: value` entry.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        self.remove(&name);
        self.inner.push((name, value.into()));
    }

    /// Returns the first value for the given header name (case-insensitive), or `None`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.inner
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Returns an iterator over all values for the given header name (case-insensitive).
    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.inner
            .iter()
            .filter(move |(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Returns all values for `name` folded into one comma-separated field
    /// value (RFC 9110 §5.3), or `None` when the header is absent.
    pub fn get_joined(&self, name: &str) -> Option<String> {
        let values: Vec<&str> = self.get_all(name).collect();
        if values.is_empty() {
            None
        } else {
            Some(values.join(", "))
        }
    }

    /// Removes all entries with the given header name (case-insensitive).
    ///
    /// Returns `true` if any entries were removed.
    pub fn remove(&mut self, name: &str) -> bool {
        let before = self.inner.len();
        self.inner.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
        self.inner.len() < before
    }

    /// Returns `true` if the map contains at least one entry with the given name.
    pub fn contains(&self, name: &str) -> bool {
        self.inner.iter().any(|(k, _)| k.eq_ignore_ascii_case(name))
    }

    /// Returns the total number of header entries (not unique names).
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Returns `true` if there are no header entries.
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Returns an iterator over all `(name, value)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.inner.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn case_insensitive_get() {
        let mut h = Headers::new();
        h.insert("Content-Type", "text/html");
        assert_eq!(h.get("content-type"), Some("text/html"));
        assert_eq!(h.get("CONTENT-TYPE"), Some("text/html"));
    }

    #[test]
    fn set_replaces_every_casing() {
        let mut h = Headers::new();
        h.insert("accept-encoding", "gzip");
        h.insert("Accept-Encoding", "br");
        h.set("ACCEPT-ENCODING", "identity");
        let vals: Vec<_> = h.get_all("accept-encoding").collect();
        assert_eq!(vals, vec!["identity"]);
        assert_eq!(h.len(), 1);
    }

    #[test]
    fn joined_values() {
        let mut h = Headers::new();
        assert_eq!(h.get_joined("cache-control"), None);
        h.insert("Cache-Control", "public");
        h.insert("X-Other", "1");
        h.insert("cache-control", "max-age=60");
        assert_eq!(h.get_joined("Cache-Control").as_deref(), Some("public, max-age=60"));
    }

    #[test]
    fn remove() {
        let mut h = Headers::new();
        h.insert("X-Esi", "1");
        h.insert("x-esi", "2");
        assert!(h.remove("X-ESI"));
        assert!(h.is_empty());
        assert!(!h.remove("x-esi")); // already gone
    }

    #[test]
    fn contains() {
        let mut h = Headers::new();
        h.insert("X-Esi", "1");
        assert!(h.contains("x-esi"));
        assert!(!h.contains("x-missing"));
    }
}
