//! In-memory [`CacheStore`] backed by a concurrent map.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use color_eyre::eyre::eyre;
use dashmap::DashMap;
use futures::FutureExt;
use futures::future::{BoxFuture, ready};
use tokio::time::Instant;
use tracing::debug;

use super::{CacheStore, Decoder, RawDecoder};
use crate::artifact::Artifact;
use crate::error::{StoreError, StoreResult};
use crate::key::RequestKey;
use crate::observability::STORE_LOG_TARGET;

#[derive(Debug, Clone)]
struct Entry {
    artifact: Artifact,
    stored_at: Instant,
}

/// Process-local cache keyed by [`RequestKey`].
///
/// Raw bytes are decoded on write through the configured [`Decoder`], so
/// lookups always return an [`Artifact`]. Entries older than the optional
/// maximum age are treated as absent and pruned when next looked up.
///
/// # Examples
/// ```
/// use std::time::Duration;
/// use fetch_once::MemoryCacheStore;
///
/// let store = MemoryCacheStore::new().with_max_age(Duration::from_secs(7 * 24 * 60 * 60));
/// assert!(store.is_empty());
/// ```
#[derive(Clone)]
pub struct MemoryCacheStore {
    entries: Arc<DashMap<RequestKey, Entry>>,
    decoder: Arc<dyn Decoder>,
    max_age: Option<Duration>,
}

impl MemoryCacheStore {
    /// Creates an empty store that keeps raw bytes as they are.
    #[must_use]
    pub fn new() -> Self {
        Self::with_decoder(Arc::new(RawDecoder))
    }

    /// Creates an empty store that decodes raw bytes with `decoder`.
    #[must_use]
    pub fn with_decoder(decoder: Arc<dyn Decoder>) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            decoder,
            max_age: None,
        }
    }

    /// Expires entries once they are older than `max_age`.
    #[must_use]
    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = Some(max_age);
        self
    }

    /// Returns `true` when a live entry exists for `key`.
    #[must_use]
    pub fn contains(&self, key: &RequestKey) -> bool {
        self.lookup(key).is_some()
    }

    /// Removes the entry for `key`, returning its content.
    pub fn remove(&self, key: &RequestKey) -> Option<Artifact> {
        self.entries.remove(key).map(|(_, entry)| entry.artifact)
    }

    /// Drops every entry.
    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Number of stored entries, including expired ones not yet pruned.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` when nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn is_expired(&self, entry: &Entry) -> bool {
        self.max_age
            .is_some_and(|max_age| entry.stored_at.elapsed() > max_age)
    }

    /// Removes the entry for `key` if it is still expired.
    ///
    /// A write that refreshed the entry since it was read is left in place.
    fn prune(&self, key: &RequestKey) -> bool {
        let pruned = self
            .entries
            .remove_if(key, |_, entry| self.is_expired(entry))
            .is_some();
        if pruned {
            debug!(target: STORE_LOG_TARGET, key = %key, "expired cache entry pruned");
        }
        pruned
    }

    /// Stores `artifact` under `key` immediately, replacing any entry.
    pub fn insert(&self, key: &RequestKey, artifact: Artifact) {
        self.entries.insert(
            key.clone(),
            Entry {
                artifact,
                stored_at: Instant::now(),
            },
        );
    }
}

impl Default for MemoryCacheStore {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for MemoryCacheStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryCacheStore")
            .field("entries", &self.entries.len())
            .field("max_age", &self.max_age)
            .finish_non_exhaustive()
    }
}

impl CacheStore for MemoryCacheStore {
    fn lookup(&self, key: &RequestKey) -> Option<Artifact> {
        let (artifact, expired) = {
            let entry = self.entries.get(key)?;
            (entry.artifact.clone(), self.is_expired(&entry))
        };
        if !expired {
            return Some(artifact);
        }
        // The shard guard above is released before removal.
        self.prune(key);
        None
    }

    fn store_artifact(
        &self,
        artifact: Artifact,
        key: &RequestKey,
    ) -> BoxFuture<'static, StoreResult<()>> {
        self.insert(key, artifact);
        ready(Ok(())).boxed()
    }

    fn store_bytes(&self, bytes: Bytes, key: &RequestKey) -> BoxFuture<'static, StoreResult<()>> {
        let result = self
            .decoder
            .decode(&bytes)
            .map(|artifact| self.insert(key, artifact))
            .map_err(|err| StoreError::from(eyre!("failed to decode bytes for {key}: {err}")));
        ready(result).boxed()
    }
}
