//! Process-wide result cache with per-entry expiry
//!
//! [`ResultCache`] is an explicitly constructed key/value store owned by the
//! server's composition root. Every `set` stamps the entry with a fresh
//! version and schedules a deferred removal after the TTL; the removal only
//! fires if the stored version still matches, so overwriting a key restarts
//! its lifetime instead of being cut short by the earlier timer.
//!
//! [`ResultCache::shutdown`] cancels all pending expiry tasks.
//!
//! Keys are built by callers with [`CacheKey`]; the cache performs no
//! normalization of its own.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{Datelike, NaiveDate};
use serde_json::Value;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Default entry lifetime.
pub const DEFAULT_TTL: Duration = Duration::from_secs(3600);

#[derive(Debug, Clone)]
struct CacheEntry {
    value: Arc<Value>,
    version: u64,
    expires_at: Instant,
}

type Entries = Arc<Mutex<HashMap<String, CacheEntry>>>;

fn lock(entries: &Entries) -> MutexGuard<'_, HashMap<String, CacheEntry>> {
    entries.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Key/value cache with TTL expiry.
///
/// Values are stored behind [`Arc`], so a hit hands back the same allocation
/// that was stored.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use serde_json::json;
/// use querywire::cache::ResultCache;
///
/// # #[tokio::main]
/// # async fn main() {
/// let cache = ResultCache::new(Duration::from_secs(3600));
/// cache.set("ventas_ultimo_mes_2025-9", json!([{"total": 10}]));
/// assert_eq!(*cache.get("ventas_ultimo_mes_2025-9").unwrap(), json!([{"total": 10}]));
/// cache.shutdown();
/// # }
/// ```
#[derive(Debug)]
pub struct ResultCache {
    entries: Entries,
    ttl: Duration,
    next_version: AtomicU64,
    shutdown: CancellationToken,
}

impl ResultCache {
    /// Create an empty cache whose entries live for `ttl`.
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            ttl,
            next_version: AtomicU64::new(1),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Look up `key`. Entries past their deadline are treated as absent.
    pub fn get(&self, key: &str) -> Option<Arc<Value>> {
        let hit = lock(&self.entries)
            .get(key)
            .filter(|entry| entry.expires_at > Instant::now())
            .map(|entry| Arc::clone(&entry.value));

        if hit.is_some() {
            metrics::increment_counter!("querywire_cache_hits_total");
            tracing::debug!(key, "cache hit");
        } else {
            metrics::increment_counter!("querywire_cache_misses_total");
            tracing::debug!(key, "cache miss");
        }
        hit
    }

    /// Store `value` under `key`, replacing any previous entry and its
    /// lifetime.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn set(&self, key: impl Into<String>, value: Value) -> Arc<Value> {
        let key = key.into();
        let value = Arc::new(value);
        let version = self.next_version.fetch_add(1, Ordering::Relaxed);
        let expires_at = Instant::now() + self.ttl;

        lock(&self.entries).insert(
            key.clone(),
            CacheEntry {
                value: Arc::clone(&value),
                version,
                expires_at,
            },
        );

        let entries = Arc::clone(&self.entries);
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = shutdown.cancelled() => {}
                _ = tokio::time::sleep_until(expires_at) => {
                    let mut map = lock(&entries);
                    if map.get(&key).is_some_and(|e| e.version == version) {
                        map.remove(&key);
                        tracing::debug!(key, "cache entry expired");
                    }
                }
            }
        });

        value
    }

    /// Remove `key`. Returns whether it was present.
    pub fn invalidate(&self, key: &str) -> bool {
        lock(&self.entries).remove(key).is_some()
    }

    pub fn clear(&self) {
        lock(&self.entries).clear();
    }

    /// Number of stored entries, including any not yet swept.
    pub fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.entries).is_empty()
    }

    /// Cancel every pending expiry task and drop all entries.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
        self.clear();
    }
}

impl Drop for ResultCache {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Composite cache key builder.
///
/// Parts are joined with `_` in the order they are added:
///
/// ```
/// use querywire::cache::CacheKey;
///
/// let key = CacheKey::new("ventas_ultimo_mes").period("2025-9").build();
/// assert_eq!(key, "ventas_ultimo_mes_2025-9");
///
/// let key = CacheKey::new("ventas").period("2025-9").dimension("retail").build();
/// assert_eq!(key, "ventas_2025-9_retail");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheKey {
    intent: String,
    period: Option<String>,
    dimension: Option<String>,
}

impl CacheKey {
    /// Start a key from the logical intent tag.
    pub fn new(intent: impl Into<String>) -> Self {
        Self {
            intent: intent.into(),
            period: None,
            dimension: None,
        }
    }

    /// Time-period discriminator, e.g. [`month_bucket`].
    pub fn period(mut self, period: impl Into<String>) -> Self {
        self.period = Some(period.into());
        self
    }

    /// Secondary filter dimension.
    pub fn dimension(mut self, dimension: impl Into<String>) -> Self {
        self.dimension = Some(dimension.into());
        self
    }

    pub fn build(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.intent)?;
        for part in [&self.period, &self.dimension].into_iter().flatten() {
            write!(f, "_{part}")?;
        }
        Ok(())
    }
}

/// `YYYY-M` bucket for `date`, with an unpadded month.
pub fn month_bucket(date: NaiveDate) -> String {
    format!("{}-{}", date.year(), date.month())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_get_returns_stored_allocation() {
        let cache = ResultCache::new(DEFAULT_TTL);
        let stored = cache.set("k", json!({"rows": [1, 2]}));
        let hit = cache.get("k").unwrap();
        assert!(Arc::ptr_eq(&stored, &hit));
    }

    #[tokio::test]
    async fn test_missing_key_is_absent() {
        let cache = ResultCache::new(DEFAULT_TTL);
        assert!(cache.get("nope").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_entry_expires_after_ttl() {
        let cache = ResultCache::new(Duration::from_secs(3600));
        cache.set("ventas_ultimo_mes_2025-9", json!([1]));

        tokio::time::sleep(Duration::from_secs(3599)).await;
        assert!(cache.get("ventas_ultimo_mes_2025-9").is_some());

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(cache.get("ventas_ultimo_mes_2025-9").is_none());
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_overwrite_is_not_evicted_by_earlier_timer() {
        let cache = ResultCache::new(Duration::from_secs(60));
        cache.set("k", json!("old"));
        tokio::time::sleep(Duration::from_secs(50)).await;
        cache.set("k", json!("new"));

        // The first timer fires at t=60 and must leave the newer entry alone.
        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(*cache.get("k").unwrap(), json!("new"));

        tokio::time::sleep(Duration::from_secs(41)).await;
        assert!(cache.get("k").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_cancels_expiry_tasks() {
        let cache = ResultCache::new(Duration::from_secs(1));
        cache.set("a", json!(1));
        cache.shutdown();
        assert!(cache.is_empty());

        // A cancelled timer must not remove a later entry with the same key.
        cache.entries.lock().unwrap().insert(
            "a".into(),
            CacheEntry {
                value: Arc::new(json!(2)),
                version: 1,
                expires_at: Instant::now() + Duration::from_secs(3600),
            },
        );
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_invalidate_and_clear() {
        let cache = ResultCache::new(DEFAULT_TTL);
        cache.set("a", json!(1));
        cache.set("b", json!(2));
        assert!(cache.invalidate("a"));
        assert!(!cache.invalidate("a"));
        assert_eq!(cache.len(), 1);
        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_key_parts_distinguish_dimensions() {
        let a = CacheKey::new("execute_query").period("2025-9").dimension("{\"q\":1}");
        let b = CacheKey::new("execute_query").period("2025-9").dimension("{\"q\":2}");
        assert_ne!(a.build(), b.build());
        assert_eq!(CacheKey::new("get_tables").build(), "get_tables");
    }

    #[test]
    fn test_month_bucket_is_unpadded() {
        let date = NaiveDate::from_ymd_opt(2025, 9, 14).unwrap();
        assert_eq!(month_bucket(date), "2025-9");
        let date = NaiveDate::from_ymd_opt(2025, 12, 1).unwrap();
        assert_eq!(month_bucket(date), "2025-12");
    }
}
