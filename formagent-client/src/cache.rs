//! Process-wide query cache of server snapshots.
//!
//! Entries are keyed by [`QueryKey`] and hold the last JSON snapshot the
//! server returned. Mutations never write entries; they call
//! [`QueryCache::invalidate`] and the next read refetches the full resource.
//!
//! - Concurrent reads of one key share a single in-flight fetch.
//! - An entry is fresh for `stale_time` after it was fetched, until invalidated.
//! - Each invalidation bumps the entry epoch. A fetch that started under an
//!   older epoch still stores its value, but the entry stays stale; it never
//!   replaces a value fetched under a newer epoch.
//! - [`QueryCache::clear`] starts a new cache generation; fetches started
//!   before it resolve for their own callers but are never stored.

use crate::api_client::ApiClientError;
use dashmap::DashMap;
use futures_util::future::{BoxFuture, FutureExt, Shared};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;

const EVENT_CAPACITY: usize = 256;

// ============================================================================
// KEYS
// ============================================================================

/// Ordered key segments, e.g. `["agents", "<id>"]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QueryKey(Vec<String>);

impl QueryKey {
    pub fn new<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(segments.into_iter().map(Into::into).collect())
    }

    pub fn child(&self, segment: impl ToString) -> Self {
        let mut segments = self.0.clone();
        segments.push(segment.to_string());
        Self(segments)
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    /// Segment-wise prefix match; `["agents"]` matches `["agents", "42"]`
    /// but not `["agents-archive"]`.
    pub fn starts_with(&self, prefix: &QueryKey) -> bool {
        self.0.len() >= prefix.0.len() && self.0.iter().zip(&prefix.0).all(|(a, b)| a == b)
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join("/"))
    }
}

// ============================================================================
// ERRORS / EVENTS / SNAPSHOTS
// ============================================================================

pub type SharedError = Arc<ApiClientError>;

#[derive(Debug, Clone, thiserror::Error)]
pub enum CacheError {
    #[error("{0}")]
    Fetch(SharedError),
    #[error("cached value has unexpected shape: {0}")]
    Decode(Arc<serde_json::Error>),
}

impl CacheError {
    pub fn api_error(&self) -> Option<&ApiClientError> {
        match self {
            CacheError::Fetch(err) => Some(err.as_ref()),
            CacheError::Decode(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheEvent {
    /// Every entry under this prefix was marked stale.
    Invalidated(QueryKey),
    /// A fetch for this key stored a new snapshot.
    Updated(QueryKey),
    Cleared,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Snapshot<T> {
    Loading,
    Ready { value: T, stale: bool },
}

impl<T> Snapshot<T> {
    pub fn value(&self) -> Option<&T> {
        match self {
            Snapshot::Ready { value, .. } => Some(value),
            Snapshot::Loading => None,
        }
    }

    pub fn into_value(self) -> Option<T> {
        match self {
            Snapshot::Ready { value, .. } => Some(value),
            Snapshot::Loading => None,
        }
    }
}

// ============================================================================
// CACHE
// ============================================================================

type FetchFuture = Shared<BoxFuture<'static, Result<Arc<serde_json::Value>, SharedError>>>;

/// Identity of a fetch as captured when it started.
#[derive(Clone, Copy)]
struct InFlightTag {
    id: u64,
    epoch: u64,
    generation: u64,
}

struct InFlight {
    tag: InFlightTag,
    future: FetchFuture,
}

#[derive(Default)]
struct Entry {
    value: Option<Arc<serde_json::Value>>,
    value_epoch: u64,
    fetched_at: Option<Instant>,
    invalidated: bool,
    epoch: u64,
    inflight: Option<InFlight>,
}

impl Entry {
    fn is_fresh(&self, stale_time: Duration) -> bool {
        match (&self.value, self.fetched_at) {
            (Some(_), Some(at)) => !self.invalidated && at.elapsed() < stale_time,
            _ => false,
        }
    }
}

struct CacheInner {
    entries: DashMap<QueryKey, Entry>,
    stale_time: Duration,
    events: broadcast::Sender<CacheEvent>,
    next_fetch_id: AtomicU64,
    fetches: AtomicU64,
    /// Bumped by `clear`.
    generation: AtomicU64,
}

impl CacheInner {
    fn complete(&self, key: &QueryKey, started: &InFlightTag, value: Arc<serde_json::Value>) {
        let (fetch_id, started_epoch) = (started.id, started.epoch);
        let mut stored = false;
        if let Some(mut entry) = self.entries.get_mut(key) {
            let current = self.generation.load(Ordering::SeqCst) == started.generation;
            if !current {
                tracing::debug!(%key, fetch_id, "dropping fetch result from before clear");
            } else if entry.value.is_none() || entry.value_epoch <= started_epoch {
                entry.value = Some(value);
                entry.value_epoch = started_epoch;
                entry.fetched_at = Some(Instant::now());
                entry.invalidated = entry.epoch != started_epoch;
                stored = true;
            }
            if entry.inflight.as_ref().is_some_and(|f| f.tag.id == fetch_id) {
                entry.inflight = None;
            }
        }
        if stored {
            let _ = self.events.send(CacheEvent::Updated(key.clone()));
        }
    }

    fn fail(&self, key: &QueryKey, fetch_id: u64) {
        if let Some(mut entry) = self.entries.get_mut(key) {
            if entry.inflight.as_ref().is_some_and(|f| f.tag.id == fetch_id) {
                entry.inflight = None;
            }
        }
    }
}

enum Lookup {
    Fresh(Arc<serde_json::Value>),
    Fetching {
        cached: Option<Arc<serde_json::Value>>,
        future: FetchFuture,
    },
}

/// Cheap to clone; clones share the same entries.
#[derive(Clone)]
pub struct QueryCache {
    inner: Arc<CacheInner>,
}

impl QueryCache {
    pub fn new(stale_time: Duration) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(CacheInner {
                entries: DashMap::new(),
                stale_time,
                events,
                next_fetch_id: AtomicU64::new(1),
                fetches: AtomicU64::new(0),
                generation: AtomicU64::new(0),
            }),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
        self.inner.events.subscribe()
    }

    /// Number of fetches started since creation.
    pub fn fetch_count(&self) -> u64 {
        self.inner.fetches.load(Ordering::Relaxed)
    }

    /// Whether a read of `key` would hit the network.
    pub fn is_stale(&self, key: &QueryKey) -> bool {
        self.inner
            .entries
            .get(key)
            .map_or(true, |entry| !entry.is_fresh(self.inner.stale_time))
    }

    /// Cached snapshot without triggering any fetch.
    pub fn peek<T: DeserializeOwned>(&self, key: &QueryKey) -> Result<Snapshot<T>, CacheError> {
        let (value, stale) = match self.inner.entries.get(key) {
            Some(entry) => match &entry.value {
                Some(value) => (value.clone(), !entry.is_fresh(self.inner.stale_time)),
                None => return Ok(Snapshot::Loading),
            },
            None => return Ok(Snapshot::Loading),
        };
        Ok(Snapshot::Ready {
            value: decode(&value)?,
            stale,
        })
    }

    /// Fresh value from the cache, or the result of a (shared) fetch.
    pub async fn fetch<T, F, Fut>(&self, key: &QueryKey, fetcher: F) -> Result<T, CacheError>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, ApiClientError>> + Send + 'static,
    {
        match self.lookup(key, fetcher) {
            Lookup::Fresh(value) => decode(&value),
            Lookup::Fetching { future, .. } => {
                let value = future.await.map_err(CacheError::Fetch)?;
                decode(&value)
            }
        }
    }

    /// Stale-while-revalidate read: returns whatever is cached right away
    /// and refetches in the background when the entry is missing or stale.
    /// Must be called within a Tokio runtime.
    pub fn read<T, F, Fut>(&self, key: &QueryKey, fetcher: F) -> Result<Snapshot<T>, CacheError>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, ApiClientError>> + Send + 'static,
    {
        match self.lookup(key, fetcher) {
            Lookup::Fresh(value) => Ok(Snapshot::Ready {
                value: decode(&value)?,
                stale: false,
            }),
            Lookup::Fetching { cached, future } => {
                // Drive the shared fetch even if the caller that started it
                // has gone away.
                let key = key.clone();
                tokio::spawn(async move {
                    if let Err(err) = future.await {
                        tracing::debug!(%key, error = %err, "background refetch failed");
                    }
                });
                match cached {
                    Some(value) => Ok(Snapshot::Ready {
                        value: decode(&value)?,
                        stale: true,
                    }),
                    None => Ok(Snapshot::Loading),
                }
            }
        }
    }

    /// Mark every entry under `prefix` stale and tell subscribers.
    /// Returns how many cached entries were affected.
    pub fn invalidate(&self, prefix: &QueryKey) -> usize {
        let mut count = 0;
        for mut entry in self.inner.entries.iter_mut() {
            if entry.key().starts_with(prefix) {
                entry.epoch += 1;
                entry.invalidated = true;
                count += 1;
            }
        }
        tracing::debug!(%prefix, entries = count, "cache invalidated");
        let _ = self.inner.events.send(CacheEvent::Invalidated(prefix.clone()));
        count
    }

    /// Run a mutation and, only if it succeeds, invalidate `keys`.
    pub async fn mutate<T, Fut>(&self, keys: &[QueryKey], mutation: Fut) -> Result<T, ApiClientError>
    where
        Fut: Future<Output = Result<T, ApiClientError>>,
    {
        let value = mutation.await?;
        for key in keys {
            self.invalidate(key);
        }
        Ok(value)
    }

    /// Drop every entry, e.g. on sign-out.
    pub fn clear(&self) {
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
        self.inner.entries.clear();
        let _ = self.inner.events.send(CacheEvent::Cleared);
    }

    fn lookup<T, F, Fut>(&self, key: &QueryKey, fetcher: F) -> Lookup
    where
        T: Serialize + Send + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, ApiClientError>> + Send + 'static,
    {
        let mut entry = self.inner.entries.entry(key.clone()).or_default();
        if entry.is_fresh(self.inner.stale_time) {
            if let Some(value) = &entry.value {
                return Lookup::Fresh(value.clone());
            }
        }
        let cached = entry.value.clone();

        if let Some(inflight) = &entry.inflight {
            let generation = self.inner.generation.load(Ordering::SeqCst);
            if inflight.tag.epoch == entry.epoch && inflight.tag.generation == generation {
                return Lookup::Fetching {
                    cached,
                    future: inflight.future.clone(),
                };
            }
        }

        let fetch_id = self.inner.next_fetch_id.fetch_add(1, Ordering::Relaxed);
        let tag = InFlightTag {
            id: fetch_id,
            epoch: entry.epoch,
            generation: self.inner.generation.load(Ordering::SeqCst),
        };
        let inner = self.inner.clone();
        let owned_key = key.clone();
        let request = fetcher();
        let future = async move {
            let result = match request.await {
                Ok(value) => serde_json::to_value(&value)
                    .map(Arc::new)
                    .map_err(|e| Arc::new(ApiClientError::Serde(e))),
                Err(err) => Err(Arc::new(err)),
            };
            match &result {
                Ok(value) => inner.complete(&owned_key, &tag, value.clone()),
                Err(_) => inner.fail(&owned_key, fetch_id),
            }
            result
        }
        .boxed()
        .shared();

        entry.inflight = Some(InFlight {
            tag,
            future: future.clone(),
        });
        drop(entry);

        self.inner.fetches.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(%key, fetch_id, "cache fetch started");
        Lookup::Fetching { cached, future }
    }
}

fn decode<T: DeserializeOwned>(value: &serde_json::Value) -> Result<T, CacheError> {
    T::deserialize(value).map_err(|e| CacheError::Decode(Arc::new(e)))
}
