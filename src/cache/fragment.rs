//! In-memory fragment cache.
//!
//! Holds fragment bodies keyed by resolved URL (and optional fragment name),
//! either fetched by includes or registered by `<esi:inline>`.
//!
//! # Design Decisions
//! - Expiration is checked on read; an expired entry is removed by the read
//!   that finds it
//! - Non-fetchable entries are never displaced by a live fetch while they are
//!   unexpired
//! - Values are replaced whole inside the sharded map; readers never see a
//!   partial write

use std::sync::Arc;
use std::time::SystemTime;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Resolved include source plus optional fragment name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FragmentKey {
    pub url: String,
    pub fragment: Option<String>,
}

impl FragmentKey {
    /// Key for a whole document.
    pub fn document(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            fragment: None,
        }
    }

    /// Key for one named fragment of a document.
    pub fn fragment(url: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            fragment: Some(name.into()),
        }
    }
}

impl std::fmt::Display for FragmentKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.fragment {
            Some(name) => write!(f, "{}#{}", self.url, name),
            None => f.write_str(&self.url),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub content: Arc<str>,
    /// `None` never expires.
    pub expires_at: Option<SystemTime>,
    /// False for manual registrations.
    pub fetchable: bool,
}

impl CacheEntry {
    pub fn is_expired(&self, now: SystemTime) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// Held while a fetch for one key is in progress. Dropping releases it.
pub struct KeyLock<'a> {
    cache: &'a FragmentCache,
    key: FragmentKey,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for KeyLock<'_> {
    fn drop(&mut self) {
        self.guard.take();
        // Only the map holds the mutex once no one is waiting on it.
        self.cache
            .locks
            .remove_if(&self.key, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}

#[derive(Debug, Default)]
pub struct FragmentCache {
    entries: DashMap<FragmentKey, CacheEntry>,
    locks: DashMap<FragmentKey, Arc<Mutex<()>>>,
}

impl FragmentCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Unexpired content for `key`. An expired entry is removed and missed.
    pub fn get(&self, key: &FragmentKey) -> Option<Arc<str>> {
        let now = SystemTime::now();
        let (content, expired) = {
            let entry = self.entries.get(key)?;
            (entry.content.clone(), entry.is_expired(now))
        };
        if expired {
            self.entries.remove_if(key, |_, entry| entry.is_expired(now));
            tracing::debug!(key = %key, "Fragment cache entry expired");
            return None;
        }
        Some(content)
    }

    /// Insert or replace an entry unconditionally.
    pub fn put(
        &self,
        key: FragmentKey,
        content: impl Into<Arc<str>>,
        expires_at: Option<SystemTime>,
        fetchable: bool,
    ) {
        self.entries.insert(
            key,
            CacheEntry {
                content: content.into(),
                expires_at,
                fetchable,
            },
        );
    }

    /// Store a live fetch result. Returns false when an unexpired
    /// non-fetchable entry is kept instead.
    pub fn store_fetched(
        &self,
        key: FragmentKey,
        content: impl Into<Arc<str>>,
        expires_at: Option<SystemTime>,
    ) -> bool {
        let entry = CacheEntry {
            content: content.into(),
            expires_at,
            fetchable: true,
        };
        match self.entries.entry(key) {
            Entry::Occupied(mut occupied) => {
                let current = occupied.get();
                if !current.fetchable && !current.is_expired(SystemTime::now()) {
                    tracing::debug!(key = %occupied.key(), "Keeping manually registered fragment");
                    return false;
                }
                occupied.insert(entry);
                true
            }
            Entry::Vacant(vacant) => {
                vacant.insert(entry);
                true
            }
        }
    }

    /// Raw entry, expired or not. Does not evict.
    pub fn peek(&self, key: &FragmentKey) -> Option<CacheEntry> {
        self.entries.get(key).map(|entry| entry.clone())
    }

    pub fn invalidate(&self, key: &FragmentKey) -> bool {
        self.entries.remove(key).is_some()
    }

    /// Serialize fetches for `key` across concurrent renders.
    pub async fn lock(&self, key: &FragmentKey) -> KeyLock<'_> {
        let mutex = self
            .locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let guard = mutex.lock_owned().await;
        KeyLock {
            cache: self,
            key: key.clone(),
            guard: Some(guard),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn key(url: &str) -> FragmentKey {
        FragmentKey::document(url)
    }

    #[test]
    fn test_get_put_invalidate() {
        let cache = FragmentCache::new();
        assert!(cache.get(&key("http://a/x")).is_none());

        cache.put(key("http://a/x"), "body", None, true);
        assert_eq!(cache.get(&key("http://a/x")).as_deref(), Some("body"));

        assert!(cache.invalidate(&key("http://a/x")));
        assert!(cache.get(&key("http://a/x")).is_none());
        assert!(!cache.invalidate(&key("http://a/x")));
    }

    #[test]
    fn test_expired_entry_is_evicted_on_read() {
        let cache = FragmentCache::new();
        let past = SystemTime::now() - Duration::from_secs(10);
        cache.put(key("http://a/x"), "old", Some(past), true);
        assert_eq!(cache.len(), 1);

        assert!(cache.get(&key("http://a/x")).is_none());
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn test_future_expiration_is_served() {
        let cache = FragmentCache::new();
        let future = SystemTime::now() + Duration::from_secs(10);
        cache.put(key("http://a/x"), "fresh", Some(future), true);
        assert_eq!(cache.get(&key("http://a/x")).as_deref(), Some("fresh"));
    }

    #[test]
    fn test_fetch_does_not_displace_manual_entry() {
        let cache = FragmentCache::new();
        cache.put(key("http://a/x"), "manual", None, false);

        assert!(!cache.store_fetched(key("http://a/x"), "fetched", None));
        assert_eq!(cache.get(&key("http://a/x")).as_deref(), Some("manual"));
    }

    #[test]
    fn test_fetch_replaces_expired_manual_entry() {
        let cache = FragmentCache::new();
        let past = SystemTime::now() - Duration::from_secs(10);
        cache.put(key("http://a/x"), "manual", Some(past), false);

        assert!(cache.store_fetched(key("http://a/x"), "fetched", None));
        let entry = cache.peek(&key("http://a/x")).unwrap();
        assert_eq!(&*entry.content, "fetched");
        assert!(entry.fetchable);
    }

    #[test]
    fn test_fragment_keys_are_distinct() {
        let cache = FragmentCache::new();
        cache.put(key("http://a/x"), "doc", None, true);
        cache.put(FragmentKey::fragment("http://a/x", "nav"), "nav", None, true);
        cache.put(key("http://a/y"), "other", None, true);

        assert_eq!(cache.get(&FragmentKey::fragment("http://a/x", "nav")).as_deref(), Some("nav"));
        assert_eq!(cache.get(&key("http://a/x")).as_deref(), Some("doc"));
        assert!(cache.invalidate(&key("http://a/x")));
        assert_eq!(cache.len(), 2);
    }

    #[tokio::test]
    async fn test_lock_serializes_same_key() {
        let cache = Arc::new(FragmentCache::new());
        let first = cache.lock(&key("http://a/x")).await;

        let waiter = {
            let cache = cache.clone();
            tokio::spawn(async move {
                let _lock = cache.lock(&key("http://a/x")).await;
                cache.get(&key("http://a/x")).map(|c| c.to_string())
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());
        cache.store_fetched(key("http://a/x"), "filled", None);
        drop(first);

        assert_eq!(waiter.await.unwrap().as_deref(), Some("filled"));
        assert!(cache.locks.is_empty());
    }
}
