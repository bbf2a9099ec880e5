//! Fragment cache collaborators.

use std::collections::HashMap;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::debug;

use super::error::CacheError;
use super::fragment::CachedPage;
use crate::http::CacheDirective;

/// Storage for parsed pages, keyed by full request URL.
///
/// The ESI layer never coordinates writers: two requests that miss on the
/// same key at the same time both compute the page and both call
/// [`set`](Self::set), in no particular order. Implementations must tolerate
/// that; whichever write lands last wins.
pub trait FragmentCache: Send + Sync {
    /// Looks up `key`. A miss is `Ok(None)`.
    fn try_get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<CachedPage>, CacheError>>;

    /// Stores `page` under `key`. `directive` is the origin's
    /// `Cache-Control`, if it sent a well-formed one; interpreting it
    /// (lifetime, refusal to store) is up to the implementation.
    fn set<'a>(
        &'a self,
        key: &'a str,
        directive: Option<&'a CacheDirective>,
        page: CachedPage,
    ) -> BoxFuture<'a, Result<(), CacheError>>;
}

struct Entry {
    page: CachedPage,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_fresh(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| now < at)
    }
}

/// An in-process [`FragmentCache`] with per-entry expiry.
///
/// - `no-store`, `no-cache` and `private` responses are not stored.
/// - Lifetime is `s-maxage`, else `max-age`, else the default TTL; a zero
///   lifetime is not stored.
/// - Without a directive and without a default TTL, entries never expire.
///
/// Expired entries count as misses and are dropped on lookup. There is no
/// size bound.
#[derive(Default)]
pub struct MemoryCache {
    entries: RwLock<HashMap<String, Entry>>,
    default_ttl: Option<Duration>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lifetime for entries whose origin sent no usable freshness directive.
    #[must_use]
    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = Some(ttl);
        self
    }

    /// Number of stored entries, fresh or not.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Drops every entry.
    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }

    fn lifetime(&self, directive: Option<&CacheDirective>) -> Option<Option<Duration>> {
        match directive {
            Some(cc) if !cc.is_storable() => None,
            Some(cc) => match cc.shared_ttl().or(self.default_ttl) {
                Some(ttl) if ttl.is_zero() => None,
                ttl => Some(ttl),
            },
            None => Some(self.default_ttl),
        }
    }
}

impl FragmentCache for MemoryCache {
    fn try_get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<CachedPage>, CacheError>> {
        Box::pin(async move {
            let now = Instant::now();
            {
                let entries = self.entries.read().await;
                match entries.get(key) {
                    Some(entry) if entry.is_fresh(now) => return Ok(Some(entry.page.clone())),
                    Some(_) => {}
                    None => return Ok(None),
                }
            }

            let mut entries = self.entries.write().await;
            // Re-check: another request may have refreshed it in between.
            if entries.get(key).is_some_and(|entry| !entry.is_fresh(now)) {
                entries.remove(key);
                debug!(%key, "expired fragment cache entry dropped");
            }
            Ok(entries
                .get(key)
                .filter(|entry| entry.is_fresh(now))
                .map(|entry| entry.page.clone()))
        })
    }

    fn set<'a>(
        &'a self,
        key: &'a str,
        directive: Option<&'a CacheDirective>,
        page: CachedPage,
    ) -> BoxFuture<'a, Result<(), CacheError>> {
        Box::pin(async move {
            let Some(ttl) = self.lifetime(directive) else {
                debug!(%key, "origin forbids shared caching, not stored");
                return Ok(());
            };
            let expires_at = ttl.map(|ttl| Instant::now() + ttl);
            self.entries
                .write()
                .await
                .insert(key.to_owned(), Entry { page, expires_at });
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::esi::Fragment;

    fn page(text: &str) -> CachedPage {
        CachedPage::new(Fragment::Text(text.to_owned()), Some("text/html".to_owned()))
    }

    fn cc(value: &str) -> CacheDirective {
        CacheDirective::parse(value).unwrap()
    }

    async fn cached_text(cache: &MemoryCache, key: &str) -> Option<Fragment> {
        cache
            .try_get(key)
            .await
            .unwrap()
            .map(|p| p.fragment().as_ref().clone())
    }

    #[tokio::test]
    async fn miss_then_hit() {
        let cache = MemoryCache::new();
        assert!(cache.try_get("http://h/a").await.unwrap().is_none());
        cache.set("http://h/a", None, page("a")).await.unwrap();
        assert_eq!(cached_text(&cache, "http://h/a").await, Some(Fragment::Text("a".into())));
    }

    #[tokio::test]
    async fn keys_are_case_sensitive() {
        let cache = MemoryCache::new();
        cache.set("http://h/Page", None, page("a")).await.unwrap();
        assert!(cache.try_get("http://h/page").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn last_write_wins() {
        let cache = MemoryCache::new();
        cache.set("k", None, page("first")).await.unwrap();
        cache.set("k", None, page("second")).await.unwrap();
        assert_eq!(cached_text(&cache, "k").await, Some(Fragment::Text("second".into())));
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn max_age_expires() {
        let cache = MemoryCache::new();
        cache.set("k", Some(&cc("max-age=60")), page("a")).await.unwrap();

        tokio::time::advance(Duration::from_secs(59)).await;
        assert!(cache.try_get("k").await.unwrap().is_some());

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(cache.try_get("k").await.unwrap().is_none());
        assert!(cache.is_empty().await);
    }

    #[tokio::test(start_paused = true)]
    async fn s_maxage_beats_max_age() {
        let cache = MemoryCache::new();
        cache
            .set("k", Some(&cc("max-age=600, s-maxage=10")), page("a"))
            .await
            .unwrap();
        tokio::time::advance(Duration::from_secs(11)).await;
        assert!(cache.try_get("k").await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn default_ttl_applies_without_directive() {
        let cache = MemoryCache::new().with_default_ttl(Duration::from_secs(5));
        cache.set("k", None, page("a")).await.unwrap();
        tokio::time::advance(Duration::from_secs(6)).await;
        assert!(cache.try_get("k").await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn no_directive_and_no_default_never_expires() {
        let cache = MemoryCache::new();
        cache.set("k", None, page("a")).await.unwrap();
        tokio::time::advance(Duration::from_secs(86_400 * 365)).await;
        assert!(cache.try_get("k").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn uncacheable_directives_are_not_stored() {
        let cache = MemoryCache::new();
        for value in ["no-store", "no-cache", "private", "max-age=0"] {
            cache.set("k", Some(&cc(value)), page("a")).await.unwrap();
            assert!(cache.is_empty().await, "{value} should not be stored");
        }
    }

    #[tokio::test]
    async fn clear_drops_everything() {
        let cache = MemoryCache::new();
        cache.set("a", None, page("a")).await.unwrap();
        cache.set("b", None, page("b")).await.unwrap();
        cache.clear().await;
        assert!(cache.is_empty().await);
    }
}
