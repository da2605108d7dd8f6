//! In-memory query cache
//!
//! Maps a query key (entity name plus parameter values) to the last result of
//! the loader registered for it. Concurrent queries for the same key share a
//! single in-flight load, and mutations call [`QueryCache::invalidate`] with a
//! key prefix so that the next read of every matching key refetches.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::{GatewayError, GatewayResult};

type AnyValue = Arc<dyn Any + Send + Sync>;
type LoadFuture = Shared<BoxFuture<'static, GatewayResult<AnyValue>>>;

/// Identity of a cached query: a family name followed by parameter values
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QueryKey(Vec<String>);

impl QueryKey {
    /// Start a key (or a key prefix) for the given family
    pub fn new(family: impl Into<String>) -> Self {
        Self(vec![family.into()])
    }

    /// Append a parameter value
    pub fn with(mut self, part: impl fmt::Display) -> Self {
        self.0.push(part.to_string());
        self
    }

    /// Append an optional parameter; absent values are recorded as empty
    pub fn with_opt<T: fmt::Display>(self, part: Option<T>) -> Self {
        match part {
            Some(part) => self.with(part),
            None => self.with(""),
        }
    }

    pub fn family(&self) -> &str {
        &self.0[0]
    }

    pub fn parts(&self) -> &[String] {
        &self.0
    }

    /// True if every part of `prefix` matches the leading parts of this key
    pub fn starts_with(&self, prefix: &QueryKey) -> bool {
        self.0.starts_with(&prefix.0)
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.0.join(", "))
    }
}

/// Lifecycle of a cache entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryStatus {
    Idle,
    Loading,
    Success,
    Error,
}

/// Freshness policy of a cache
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CachePolicy {
    /// Entries older than this are treated as stale; `None` keeps them fresh
    /// until invalidated
    pub stale_time: Option<Duration>,
    /// When an entry is stale by age, return it at once and refresh it in the
    /// background instead of waiting for the loader
    pub refetch_in_background: bool,
}

/// Read-only view of a cache entry
#[derive(Debug, Clone)]
pub struct QuerySnapshot {
    pub status: QueryStatus,
    pub error: Option<GatewayError>,
    pub updated_at: Option<DateTime<Utc>>,
    pub is_stale: bool,
    pub is_fetching: bool,
    pub has_data: bool,
}

struct Entry {
    status: QueryStatus,
    data: Option<AnyValue>,
    error: Option<GatewayError>,
    updated_at: Option<DateTime<Utc>>,
    stale: bool,
    /// Replaced by every load and invalidation; a load settles only while it
    /// still matches, including into an entry recreated after `clear`
    generation: u64,
    in_flight: Option<LoadFuture>,
}

impl Default for Entry {
    fn default() -> Self {
        Self {
            status: QueryStatus::Idle,
            data: None,
            error: None,
            updated_at: None,
            stale: false,
            generation: 0,
            in_flight: None,
        }
    }
}

enum Lookup {
    Fresh(AnyValue),
    Refresh(AnyValue),
    Load,
}

/// Keyed query cache shared by all data accessors
///
/// Cloning is cheap and every clone sees the same entries.
#[derive(Clone)]
pub struct QueryCache {
    entries: Arc<Mutex<HashMap<QueryKey, Entry>>>,
    generations: Arc<AtomicU64>,
    policy: CachePolicy,
}

impl QueryCache {
    /// Create an empty cache with the default policy
    pub fn new() -> Self {
        Self::with_policy(CachePolicy::default())
    }

    pub fn with_policy(policy: CachePolicy) -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            generations: Arc::new(AtomicU64::new(1)),
            policy,
        }
    }

    pub fn policy(&self) -> CachePolicy {
        self.policy
    }

    /// Return the cached value for `key`, or run `loader` and cache its result
    ///
    /// At most one load per key is in flight; callers arriving while it runs
    /// wait for it and receive the same value or the same error.
    pub async fn query<T, F, Fut>(&self, key: QueryKey, loader: F) -> GatewayResult<T>
    where
        T: Clone + Send + Sync + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = GatewayResult<T>> + Send + 'static,
    {
        let load = {
            let mut entries = self.entries.lock().await;
            let entry = entries.entry(key.clone()).or_default();

            match self.lookup(entry) {
                Lookup::Fresh(value) => return downcast(&key, value),
                Lookup::Refresh(value) => {
                    if entry.in_flight.is_none() {
                        debug!("Refreshing {} in the background", key);
                        let refresh = self.start_load(&key, entry, loader);
                        tokio::spawn(async move {
                            let _ = refresh.await;
                        });
                    }
                    return downcast(&key, value);
                }
                Lookup::Load => match &entry.in_flight {
                    Some(in_flight) => {
                        debug!("Joining in-flight load for {}", key);
                        in_flight.clone()
                    }
                    None => self.start_load(&key, entry, loader),
                },
            }
        };

        let value = load.await?;
        downcast(&key, value)
    }

    fn lookup(&self, entry: &Entry) -> Lookup {
        let data = match (&entry.data, entry.status) {
            (Some(data), QueryStatus::Success) if !entry.stale => data.clone(),
            _ => return Lookup::Load,
        };

        if !self.expired(entry) {
            Lookup::Fresh(data)
        } else if self.policy.refetch_in_background {
            Lookup::Refresh(data)
        } else {
            Lookup::Load
        }
    }

    fn expired(&self, entry: &Entry) -> bool {
        match (self.policy.stale_time, entry.updated_at) {
            (Some(stale_time), Some(updated_at)) => {
                let age = Utc::now().signed_duration_since(updated_at);
                age.to_std().map(|age| age > stale_time).unwrap_or(false)
            }
            _ => false,
        }
    }

    fn start_load<T, F, Fut>(&self, key: &QueryKey, entry: &mut Entry, loader: F) -> LoadFuture
    where
        T: Clone + Send + Sync + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = GatewayResult<T>> + Send + 'static,
    {
        let generation = self.next_generation();
        entry.generation = generation;
        let entries = Arc::clone(&self.entries);
        let settle_key = key.clone();
        let pending = loader();

        let load = async move {
            let result = pending.await.map(|value| Arc::new(value) as AnyValue);

            let mut entries = entries.lock().await;
            match entries.get_mut(&settle_key) {
                Some(entry) if entry.generation == generation => {
                    entry.in_flight = None;
                    match &result {
                        Ok(value) => {
                            entry.data = Some(value.clone());
                            entry.error = None;
                            entry.status = QueryStatus::Success;
                            entry.stale = false;
                            entry.updated_at = Some(Utc::now());
                        }
                        Err(err) => {
                            warn!("Query {} failed: {}", settle_key, err);
                            entry.error = Some(err.clone());
                            entry.status = QueryStatus::Error;
                        }
                    }
                }
                _ => debug!("Discarding superseded result for {}", settle_key),
            }

            result
        }
        .boxed()
        .shared();

        if entry.status != QueryStatus::Success || entry.stale {
            entry.status = QueryStatus::Loading;
        }
        entry.in_flight = Some(load.clone());
        load
    }

    fn next_generation(&self) -> u64 {
        self.generations.fetch_add(1, Ordering::Relaxed)
    }

    /// Mark every entry whose key starts with `prefix` as stale
    ///
    /// Returns the number of entries marked. Loads already in flight for those
    /// keys still resolve for their callers but no longer update the cache.
    pub async fn invalidate(&self, prefix: &QueryKey) -> usize {
        let mut entries = self.entries.lock().await;
        let mut marked = 0;

        for (_, entry) in entries.iter_mut().filter(|(key, _)| key.starts_with(prefix)) {
            entry.stale = true;
            entry.generation = self.next_generation();
            entry.in_flight = None;
            marked += 1;
        }

        debug!("Invalidated {} entries under {}", marked, prefix);
        marked
    }

    /// Last successfully loaded value for `key`, fresh or not
    pub async fn get_data<T: Clone + 'static>(&self, key: &QueryKey) -> Option<T> {
        let entries = self.entries.lock().await;
        let data = entries.get(key)?.data.clone()?;
        downcast(key, data).ok()
    }

    pub async fn snapshot(&self, key: &QueryKey) -> Option<QuerySnapshot> {
        let entries = self.entries.lock().await;
        entries.get(key).map(|entry| QuerySnapshot {
            status: entry.status,
            error: entry.error.clone(),
            updated_at: entry.updated_at,
            is_stale: entry.stale || self.expired(entry),
            is_fetching: entry.in_flight.is_some(),
            has_data: entry.data.is_some(),
        })
    }

    /// Drop every entry
    pub async fn clear(&self) {
        let mut entries = self.entries.lock().await;
        entries.clear();
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }
}

impl Default for QueryCache {
    fn default() -> Self {
        Self::new()
    }
}

fn downcast<T: Clone + 'static>(key: &QueryKey, value: AnyValue) -> GatewayResult<T> {
    (*value).downcast_ref::<T>().cloned().ok_or_else(|| {
        GatewayError::Unknown(format!("cached value for {} has an unexpected type", key))
    })
}
