//! `Cache-Control` response header parsing (RFC 9111 §5.2).

use std::time::Duration;

/// The parsed form of a response's `Cache-Control` header.
///
/// Parsing is all-or-nothing: a header that does not follow the directive
/// syntax yields no directive at all, mirroring how a missing header is
/// treated.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use rttp_esi::http::CacheDirective;
///
/// let cc = CacheDirective::parse("public, max-age=60").unwrap();
/// assert!(cc.public);
/// assert_eq!(cc.max_age, Some(Duration::from_secs(60)));
///
/// assert!(CacheDirective::parse("max-age=soon").is_none());
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheDirective {
    pub max_age: Option<Duration>,
    /// Shared-cache lifetime; takes precedence over `max_age` for this layer.
    pub s_maxage: Option<Duration>,
    pub no_cache: bool,
    pub no_store: bool,
    pub private: bool,
    pub public: bool,
    pub must_revalidate: bool,
    /// Unrecognised directives, names lowercased, values unquoted.
    pub extensions: Vec<(String, Option<String>)>,
}

impl CacheDirective {
    /// Parses a header value. Returns `None` for an empty or malformed value.
    pub fn parse(value: &str) -> Option<Self> {
        let mut cc = Self::default();
        let mut seen_any = false;

        for part in value.split(',') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            seen_any = true;

            let (name, arg) = match part.split_once('=') {
                Some((name, arg)) => (name.trim(), Some(unquote(arg.trim())?)),
                None => (part, None),
            };
            if !is_token(name) {
                return None;
            }
            let name = name.to_ascii_lowercase();

            match (name.as_str(), arg) {
                ("max-age", Some(arg)) => cc.max_age = Some(seconds(&arg)?),
                ("s-maxage", Some(arg)) => cc.s_maxage = Some(seconds(&arg)?),
                ("max-age" | "s-maxage", None) => return None,
                ("no-cache", _) => cc.no_cache = true,
                ("no-store", _) => cc.no_store = true,
                ("private", _) => cc.private = true,
                ("public", None) => cc.public = true,
                ("must-revalidate", None) => cc.must_revalidate = true,
                (_, arg) => cc.extensions.push((name, arg)),
            }
        }

        seen_any.then_some(cc)
    }

    /// Returns `true` when a shared cache may store the response at all.
    pub fn is_storable(&self) -> bool {
        !(self.no_store || self.no_cache || self.private)
    }

    /// Returns the freshness lifetime for a shared cache: `s-maxage`, then
    /// `max-age`.
    pub fn shared_ttl(&self) -> Option<Duration> {
        self.s_maxage.or(self.max_age)
    }
}

fn seconds(arg: &str) -> Option<Duration> {
    arg.parse::<u64>().ok().map(Duration::from_secs)
}

fn unquote(arg: &str) -> Option<String> {
    match arg.strip_prefix('"') {
        Some(rest) => rest.strip_suffix('"').map(str::to_owned),
        None if is_token(arg) => Some(arg.to_owned()),
        None => None,
    }
}

fn is_token(s: &str) -> bool {
    !s.is_empty()
        && s.bytes()
            .all(|b| b.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&b))
}
