//! Authorization cache.
//!
//! # Purpose
//! Holds derived, disposable projections of the authoritative store that the
//! gateway consults before falling back to it:
//! - `thing key -> thing id` and the reverse `thing id -> thing key`;
//! - `channel id -> set of connected thing ids`.
//!
//! # Key invariants
//! - Only positive results are ever written.
//! - Every operation is individually atomic. The gateway's check-then-populate
//!   sequence is not, so every eviction from a channel set first advances
//!   [`AuthCache::connection_epoch`]; a population that sees the epoch move
//!   undoes itself.
//! - A [`CacheError`] means "treat as a miss"; callers never surface it.
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache unavailable: {0}")]
    Unavailable(String),
}

pub type CacheResult<T> = Result<T, CacheError>;

#[async_trait]
pub trait AuthCache: Send + Sync {
    async fn thing_id(&self, key: &str) -> CacheResult<Option<String>>;

    /// Stores both directions of the credential pair.
    async fn save_thing(&self, key: &str, id: &str) -> CacheResult<()>;

    /// Evicts the credential pair of `id` and its presence in every channel set.
    async fn remove_thing(&self, id: &str) -> CacheResult<()>;

    async fn is_connected(&self, channel_id: &str, thing_id: &str) -> CacheResult<bool>;

    async fn connect(&self, channel_id: &str, thing_id: &str) -> CacheResult<()>;

    async fn disconnect(&self, channel_id: &str, thing_id: &str) -> CacheResult<()>;

    async fn remove_channel(&self, channel_id: &str) -> CacheResult<()>;

    /// Advances before any channel-set entry is evicted.
    async fn connection_epoch(&self) -> CacheResult<u64>;

    fn backend_name(&self) -> &'static str;
}

/// Logs and counts a failed cache write. The authoritative change it follows
/// has already succeeded, so the error goes no further.
pub fn log_write_failure(operation: &'static str, result: CacheResult<()>) {
    if let Err(err) = result {
        metrics::counter!("arbiter_cache_errors_total", "op" => operation).increment(1);
        tracing::warn!(error = %err, operation, "cache write failed");
    }
}

struct IdentityEntry {
    id: String,
    expires_at: Option<Instant>,
}

/// Process-local cache backed by `DashMap`s.
#[derive(Default)]
pub struct InMemoryAuthCache {
    identity_ttl: Option<Duration>,
    keys: DashMap<String, IdentityEntry>,
    ids: DashMap<String, String>,
    channels: DashMap<String, HashSet<String>>,
    epoch: AtomicU64,
}

impl InMemoryAuthCache {
    /// `identity_ttl` bounds how long a key-to-id entry is trusted; `None`
    /// keeps it until eviction.
    pub fn new(identity_ttl: Option<Duration>) -> Self {
        Self {
            identity_ttl,
            ..Self::default()
        }
    }
}

#[async_trait]
impl AuthCache for InMemoryAuthCache {
    async fn thing_id(&self, key: &str) -> CacheResult<Option<String>> {
        let expired = match self.keys.get(key) {
            None => return Ok(None),
            Some(entry) => match entry.expires_at {
                Some(deadline) if Instant::now() >= deadline => true,
                _ => return Ok(Some(entry.id.clone())),
            },
        };
        if expired {
            if let Some((_, entry)) = self.keys.remove(key) {
                self.ids.remove(&entry.id);
            }
        }
        Ok(None)
    }

    async fn save_thing(&self, key: &str, id: &str) -> CacheResult<()> {
        let expires_at = self.identity_ttl.map(|ttl| Instant::now() + ttl);
        self.keys.insert(
            key.to_string(),
            IdentityEntry {
                id: id.to_string(),
                expires_at,
            },
        );
        if let Some(previous) = self.ids.insert(id.to_string(), key.to_string()) {
            if previous != key {
                self.keys.remove(&previous);
            }
        }
        Ok(())
    }

    async fn remove_thing(&self, id: &str) -> CacheResult<()> {
        if let Some((_, key)) = self.ids.remove(id) {
            self.keys.remove(&key);
        }
        self.epoch.fetch_add(1, Ordering::SeqCst);
        for mut members in self.channels.iter_mut() {
            members.remove(id);
        }
        Ok(())
    }

    async fn is_connected(&self, channel_id: &str, thing_id: &str) -> CacheResult<bool> {
        Ok(self
            .channels
            .get(channel_id)
            .is_some_and(|members| members.contains(thing_id)))
    }

    async fn connect(&self, channel_id: &str, thing_id: &str) -> CacheResult<()> {
        self.channels
            .entry(channel_id.to_string())
            .or_default()
            .insert(thing_id.to_string());
        Ok(())
    }

    async fn disconnect(&self, channel_id: &str, thing_id: &str) -> CacheResult<()> {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        if let Some(mut members) = self.channels.get_mut(channel_id) {
            members.remove(thing_id);
        }
        Ok(())
    }

    async fn remove_channel(&self, channel_id: &str) -> CacheResult<()> {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        self.channels.remove(channel_id);
        Ok(())
    }

    async fn connection_epoch(&self) -> CacheResult<u64> {
        Ok(self.epoch.load(Ordering::SeqCst))
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

/// Cache that never holds anything; every lookup misses.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopCache;

#[async_trait]
impl AuthCache for NoopCache {
    async fn thing_id(&self, _key: &str) -> CacheResult<Option<String>> {
        Ok(None)
    }

    async fn save_thing(&self, _key: &str, _id: &str) -> CacheResult<()> {
        Ok(())
    }

    async fn remove_thing(&self, _id: &str) -> CacheResult<()> {
        Ok(())
    }

    async fn is_connected(&self, _channel_id: &str, _thing_id: &str) -> CacheResult<bool> {
        Ok(false)
    }

    async fn connect(&self, _channel_id: &str, _thing_id: &str) -> CacheResult<()> {
        Ok(())
    }

    async fn disconnect(&self, _channel_id: &str, _thing_id: &str) -> CacheResult<()> {
        Ok(())
    }

    async fn remove_channel(&self, _channel_id: &str) -> CacheResult<()> {
        Ok(())
    }

    async fn connection_epoch(&self) -> CacheResult<u64> {
        Ok(0)
    }

    fn backend_name(&self) -> &'static str {
        "disabled"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn identity_pairs_are_stored_and_evicted_together() {
        let cache = InMemoryAuthCache::new(None);
        cache.save_thing("k1", "t1").await.expect("save");
        assert_eq!(cache.thing_id("k1").await.expect("get"), Some("t1".into()));

        cache.remove_thing("t1").await.expect("remove");
        assert_eq!(cache.thing_id("k1").await.expect("get"), None);
    }

    #[tokio::test]
    async fn rekeying_a_thing_drops_the_old_key() {
        let cache = InMemoryAuthCache::new(None);
        cache.save_thing("old", "t1").await.expect("save");
        cache.save_thing("new", "t1").await.expect("save");
        assert_eq!(cache.thing_id("old").await.expect("get"), None);
        assert_eq!(cache.thing_id("new").await.expect("get"), Some("t1".into()));
    }

    #[tokio::test]
    async fn identity_entries_expire_after_ttl() {
        let cache = InMemoryAuthCache::new(Some(Duration::from_millis(20)));
        cache.save_thing("k1", "t1").await.expect("save");
        assert!(cache.thing_id("k1").await.expect("get").is_some());
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(cache.thing_id("k1").await.expect("get"), None);
    }

    #[tokio::test]
    async fn channel_sets_track_connections() {
        let cache = InMemoryAuthCache::new(None);
        cache.connect("c1", "t1").await.expect("connect");
        cache.connect("c2", "t1").await.expect("connect");
        assert!(cache.is_connected("c1", "t1").await.expect("check"));

        cache.disconnect("c1", "t1").await.expect("disconnect");
        assert!(!cache.is_connected("c1", "t1").await.expect("check"));

        cache.remove_thing("t1").await.expect("remove");
        assert!(!cache.is_connected("c2", "t1").await.expect("check"));

        cache.connect("c3", "t2").await.expect("connect");
        cache.remove_channel("c3").await.expect("remove channel");
        assert!(!cache.is_connected("c3", "t2").await.expect("check"));
    }

    #[tokio::test]
    async fn evictions_advance_the_connection_epoch() {
        let cache = InMemoryAuthCache::new(None);
        cache.connect("c1", "t1").await.expect("connect");
        let start = cache.connection_epoch().await.expect("epoch");
        cache.connect("c1", "t2").await.expect("connect");
        assert_eq!(cache.connection_epoch().await.expect("epoch"), start);

        cache.disconnect("c1", "t1").await.expect("disconnect");
        let after_disconnect = cache.connection_epoch().await.expect("epoch");
        assert!(after_disconnect > start);
        cache.remove_thing("t2").await.expect("remove thing");
        let after_thing = cache.connection_epoch().await.expect("epoch");
        assert!(after_thing > after_disconnect);
        cache.remove_channel("c1").await.expect("remove channel");
        assert!(cache.connection_epoch().await.expect("epoch") > after_thing);
    }

    #[tokio::test]
    async fn noop_cache_always_misses() {
        let cache = NoopCache;
        cache.save_thing("k1", "t1").await.expect("save");
        cache.connect("c1", "t1").await.expect("connect");
        assert_eq!(cache.thing_id("k1").await.expect("get"), None);
        assert!(!cache.is_connected("c1", "t1").await.expect("check"));
        assert_eq!(cache.backend_name(), "disabled");
    }
}
