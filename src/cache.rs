//! Content cache with a durable (Redis) and an in-process backend.
//!
//! Values are JSON documents. The backend is chosen once at startup by
//! [`create_cache`]; callers only see the [`ContentCache`] trait.

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use utoipa::ToSchema;

use crate::cache_validator::CacheEnvelope;
use crate::clock::Clock;
use crate::errors::AppError;

pub const DEFAULT_TTL: Duration = Duration::from_secs(5 * 60);
pub const DEFAULT_MAX_ENTRIES: usize = 100;
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

const REDIS_KEY_PREFIX: &str = "cms:";
const REDIS_TIMEOUT: Duration = Duration::from_secs(5);

/// Occupancy of a bounded cache.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub size: usize,
    pub max_size: usize,
    /// Percentage of `max_size` in use.
    pub utilization: f64,
}

#[async_trait]
pub trait ContentCache: Send + Sync {
    /// Short backend name for logs and health reports.
    fn backend(&self) -> &'static str;

    /// Returns the value if present and not expired.
    async fn get(&self, key: &str) -> Option<Value>;

    async fn set(&self, key: &str, value: Value, ttl: Duration);

    async fn delete(&self, key: &str);

    async fn clear(&self);

    fn stats(&self) -> Option<CacheStats> {
        None
    }
}

fn ttl_millis(ttl: Duration) -> i64 {
    i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX)
}

// ============ In-process backend ============

#[derive(Debug, Clone)]
struct MemoryEntry {
    data: Value,
    timestamp: i64,
    ttl: i64,
}

impl MemoryEntry {
    fn is_expired(&self, now: i64) -> bool {
        now > self.timestamp.saturating_add(self.ttl)
    }
}

/// Bounded map with oldest-write eviction and a periodic expiry sweep.
pub struct MemoryCache {
    entries: Mutex<HashMap<String, MemoryEntry>>,
    max_size: usize,
    clock: Arc<dyn Clock>,
}

impl MemoryCache {
    pub fn new(max_size: usize, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            max_size: max_size.max(1),
            clock,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, MemoryEntry>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.lock().contains_key(key)
    }

    /// Removes every expired entry and returns how many were dropped.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now_millis();
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired(now));
        before - entries.len()
    }

    /// Spawns the periodic sweep. The task ends once the cache is dropped.
    pub fn start_sweeper(cache: &Arc<MemoryCache>, every: Duration) -> JoinHandle<()> {
        let weak: Weak<MemoryCache> = Arc::downgrade(cache);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(cache) = weak.upgrade() else {
                    break;
                };
                let purged = cache.purge_expired();
                if purged > 0 {
                    tracing::debug!("Memory cache sweep removed {} expired entries", purged);
                }
            }
        })
    }
}

#[async_trait]
impl ContentCache for MemoryCache {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, key: &str) -> Option<Value> {
        let now = self.clock.now_millis();
        let mut entries = self.lock();
        let expired = entries.get(key)?.is_expired(now);
        if expired {
            entries.remove(key);
            return None;
        }
        entries.get(key).map(|entry| entry.data.clone())
    }

    async fn set(&self, key: &str, value: Value, ttl: Duration) {
        let now = self.clock.now_millis();
        let mut entries = self.lock();

        if !entries.contains_key(key) && entries.len() >= self.max_size {
            let oldest = entries
                .iter()
                .min_by_key(|(_, entry)| entry.timestamp)
                .map(|(k, _)| k.clone());
            if let Some(oldest) = oldest {
                entries.remove(&oldest);
            }
        }

        entries.insert(
            key.to_string(),
            MemoryEntry {
                data: value,
                timestamp: now,
                ttl: ttl_millis(ttl),
            },
        );
    }

    async fn delete(&self, key: &str) {
        self.lock().remove(key);
    }

    async fn clear(&self) {
        self.lock().clear();
    }

    fn stats(&self) -> Option<CacheStats> {
        let size = self.len();
        Some(CacheStats {
            size,
            max_size: self.max_size,
            utilization: size as f64 / self.max_size as f64 * 100.0,
        })
    }
}

// ============ Durable backend ============

/// Redis-backed cache. Every operation is a no-op when no connection could be
/// established.
pub struct RedisCache {
    connection: Option<MultiplexedConnection>,
    clock: Arc<dyn Clock>,
}

impl RedisCache {
    pub async fn connect(redis_url: &str, clock: Arc<dyn Clock>) -> Self {
        let connection = match redis::Client::open(redis_url) {
            Ok(client) => {
                match tokio::time::timeout(
                    REDIS_TIMEOUT,
                    client.get_multiplexed_async_connection(),
                )
                .await
                {
                    Ok(Ok(conn)) => Some(conn),
                    Ok(Err(e)) => {
                        tracing::warn!("Redis connection failed, cache disabled: {}", e);
                        None
                    }
                    Err(_) => {
                        tracing::warn!("Redis connection timed out, cache disabled");
                        None
                    }
                }
            }
            Err(e) => {
                tracing::warn!("Invalid Redis URL, cache disabled: {}", e);
                None
            }
        };

        Self { connection, clock }
    }

    /// A backend with no connection, e.g. for tests.
    pub fn disconnected(clock: Arc<dyn Clock>) -> Self {
        Self {
            connection: None,
            clock,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    fn prefixed(key: &str) -> String {
        format!("{}{}", REDIS_KEY_PREFIX, key)
    }

    async fn query<T: redis::FromRedisValue>(
        conn: &mut MultiplexedConnection,
        cmd: &redis::Cmd,
    ) -> Result<T, String> {
        let result: redis::RedisResult<T> =
            match tokio::time::timeout(REDIS_TIMEOUT, cmd.query_async(conn)).await {
                Ok(result) => result,
                Err(_) => return Err("command timed out".to_string()),
            };
        result.map_err(|e| e.to_string())
    }
}

#[async_trait]
impl ContentCache for RedisCache {
    fn backend(&self) -> &'static str {
        "redis"
    }

    async fn get(&self, key: &str) -> Option<Value> {
        let mut conn = self.connection.clone()?;
        let full_key = Self::prefixed(key);

        let raw: Option<String> =
            match Self::query(&mut conn, redis::cmd("GET").arg(&full_key)).await {
                Ok(raw) => raw,
                Err(e) => {
                    tracing::error!("Redis cache get error for {}: {}", full_key, e);
                    return None;
                }
            };

        let envelope = CacheEnvelope::deserialize_and_validate(&raw?);
        match envelope {
            Some(entry) if !entry.is_expired(self.clock.now_millis()) => Some(entry.data),
            _ => {
                self.delete(key).await;
                None
            }
        }
    }

    async fn set(&self, key: &str, value: Value, ttl: Duration) {
        let Some(mut conn) = self.connection.clone() else {
            return;
        };
        let full_key = Self::prefixed(key);
        let envelope = CacheEnvelope::new(value, self.clock.now_millis(), ttl_millis(ttl));
        let seconds = ttl.as_millis().div_ceil(1000).max(1) as u64;

        let result: Result<(), String> = Self::query(
            &mut conn,
            redis::cmd("SETEX")
                .arg(&full_key)
                .arg(seconds)
                .arg(envelope.serialize()),
        )
        .await;
        if let Err(e) = result {
            tracing::error!("Redis cache set error for {}: {}", full_key, e);
        }
    }

    async fn delete(&self, key: &str) {
        let Some(mut conn) = self.connection.clone() else {
            return;
        };
        let full_key = Self::prefixed(key);
        let result: Result<(), String> =
            Self::query(&mut conn, redis::cmd("DEL").arg(&full_key)).await;
        if let Err(e) = result {
            tracing::error!("Redis cache delete error for {}: {}", full_key, e);
        }
    }

    async fn clear(&self) {
        let Some(mut conn) = self.connection.clone() else {
            return;
        };
        let pattern = format!("{}*", REDIS_KEY_PREFIX);
        let keys: Vec<String> = match Self::query(&mut conn, redis::cmd("KEYS").arg(&pattern)).await
        {
            Ok(keys) => keys,
            Err(e) => {
                tracing::error!("Redis cache clear error: {}", e);
                return;
            }
        };
        if keys.is_empty() {
            return;
        }
        let result: Result<(), String> = Self::query(&mut conn, redis::cmd("DEL").arg(&keys)).await;
        if let Err(e) = result {
            tracing::error!("Redis cache clear error: {}", e);
        }
    }
}

/// Picks the durable backend when a Redis URL is configured, otherwise a
/// bounded in-process cache with its sweeper running.
pub async fn create_cache(
    redis_url: Option<&str>,
    max_entries: usize,
    clock: Arc<dyn Clock>,
) -> Arc<dyn ContentCache> {
    if let Some(url) = redis_url {
        let cache = RedisCache::connect(url, clock).await;
        tracing::info!(
            "CMS: Using Redis cache (connected: {})",
            cache.is_connected()
        );
        return Arc::new(cache);
    }

    tracing::info!("CMS: Using memory cache (max {} entries)", max_entries);
    let cache = Arc::new(MemoryCache::new(max_entries, clock));
    MemoryCache::start_sweeper(&cache, SWEEP_INTERVAL);
    cache
}

// ============ Warm-up ============

/// Proactively fills a cache key off the request path.
pub struct CacheWarmer {
    cache: Arc<dyn ContentCache>,
    task: Mutex<Option<JoinHandle<()>>>,
}

async fn warm_key<F, Fut>(cache: &dyn ContentCache, fetch: F, key: &str, ttl: Duration) -> bool
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<Value, AppError>>,
{
    tracing::info!("CMS Cache: Warming up {}", key);
    match fetch().await {
        Ok(value) => {
            cache.set(key, value, ttl).await;
            tracing::info!("CMS Cache: Successfully warmed up {}", key);
            true
        }
        Err(e) => {
            tracing::error!("CMS Cache: Failed to warm up {}: {}", key, e);
            false
        }
    }
}

impl CacheWarmer {
    pub fn new(cache: Arc<dyn ContentCache>) -> Self {
        Self {
            cache,
            task: Mutex::new(None),
        }
    }

    /// Runs `fetch` once and stores its value. Failures are logged, not returned.
    pub async fn warm_up<F, Fut>(&self, fetch: F, key: &str, ttl: Duration) -> bool
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Value, AppError>>,
    {
        warm_key(self.cache.as_ref(), fetch, key, ttl).await
    }

    /// Re-warms `key` every `interval`, replacing any running schedule.
    pub fn start_auto_warmup<F, Fut>(&self, fetch: F, key: String, interval: Duration, ttl: Duration)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, AppError>> + Send + 'static,
    {
        self.stop_auto_warmup();

        let cache = self.cache.clone();
        let log_key = key.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                warm_key(cache.as_ref(), &fetch, &key, ttl).await;
            }
        });

        *self.task.lock().unwrap_or_else(|p| p.into_inner()) = Some(handle);
        tracing::info!(
            "CMS Cache: Started auto-warmup for {} every {}s",
            log_key,
            interval.as_secs()
        );
    }

    pub fn stop_auto_warmup(&self) {
        let handle = self.task.lock().unwrap_or_else(|p| p.into_inner()).take();
        if let Some(handle) = handle {
            handle.abort();
            tracing::info!("CMS Cache: Stopped auto-warmup");
        }
    }

    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }
}

impl Drop for CacheWarmer {
    fn drop(&mut self) {
        if let Some(handle) = self.task.get_mut().ok().and_then(Option::take) {
            handle.abort();
        }
    }
}
