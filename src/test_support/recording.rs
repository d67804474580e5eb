//! Recording cache store and post-processor.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use bytes::Bytes;
use color_eyre::eyre::eyre;
use futures::FutureExt;
use futures::future::{BoxFuture, ready};

use crate::artifact::{AdaptTarget, Artifact};
use crate::error::{AdaptError, AdaptResult, StoreError, StoreResult};
use crate::key::RequestKey;
use crate::post_process::PostProcessor;
use crate::store::{CacheStore, MemoryCacheStore};

/// Write observed by a [`RecordingStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    /// Adapted content written through `store_artifact`.
    Artifact(RequestKey),
    /// Raw bytes written through `store_bytes`.
    Bytes(RequestKey),
}

/// [`MemoryCacheStore`] wrapper recording writes and lookups.
///
/// Writes can be made to fail so tests can observe how the coordinator
/// handles an unavailable cache.
#[derive(Debug, Clone, Default)]
pub struct RecordingStore {
    inner: MemoryCacheStore,
    events: Arc<Mutex<Vec<StoreEvent>>>,
    lookups: Arc<AtomicUsize>,
    fail_writes: Arc<AtomicBool>,
}

impl RecordingStore {
    /// Empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds `key` with `artifact` without recording a write.
    pub fn seed(&self, key: &RequestKey, artifact: Artifact) {
        self.inner.insert(key, artifact);
    }

    /// Makes every following write fail when `fail` is `true`.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Writes observed so far, in order.
    #[must_use]
    pub fn events(&self) -> Vec<StoreEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of lookups served.
    #[must_use]
    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }

    /// Wrapped store.
    #[must_use]
    pub const fn memory(&self) -> &MemoryCacheStore {
        &self.inner
    }

    fn record(&self, event: StoreEvent) -> StoreResult<()> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::from(eyre!("cache is read-only")));
        }
        Ok(())
    }
}

impl CacheStore for RecordingStore {
    fn lookup(&self, key: &RequestKey) -> Option<Artifact> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        self.inner.lookup(key)
    }

    fn store_artifact(
        &self,
        artifact: Artifact,
        key: &RequestKey,
    ) -> BoxFuture<'static, StoreResult<()>> {
        match self.record(StoreEvent::Artifact(key.clone())) {
            Ok(()) => self.inner.store_artifact(artifact, key),
            Err(err) => ready(Err(err)).boxed(),
        }
    }

    fn store_bytes(&self, bytes: Bytes, key: &RequestKey) -> BoxFuture<'static, StoreResult<()>> {
        match self.record(StoreEvent::Bytes(key.clone())) {
            Ok(()) => self.inner.store_bytes(bytes, key),
            Err(err) => ready(Err(err)).boxed(),
        }
    }
}

/// [`PostProcessor`] that resizes the recorded dimensions of an artifact.
///
/// The content bytes are kept as they are; only the dimensions change to the
/// size the target's fit mode produces.
#[derive(Debug, Clone, Default)]
pub struct RecordingPostProcessor {
    targets: Arc<Mutex<Vec<AdaptTarget>>>,
    failing: bool,
}

impl RecordingPostProcessor {
    /// Post-processor that always succeeds.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Post-processor that always fails.
    #[must_use]
    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Self::default()
        }
    }

    /// Targets requested so far, in order.
    #[must_use]
    pub fn targets(&self) -> Vec<AdaptTarget> {
        self.targets
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl PostProcessor for RecordingPostProcessor {
    fn adapt(
        &self,
        artifact: Artifact,
        target: AdaptTarget,
    ) -> BoxFuture<'static, AdaptResult<Artifact>> {
        self.targets
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(target);
        if self.failing {
            return ready(Err(AdaptError::from(eyre!("adaptation unavailable")))).boxed();
        }
        let source = artifact.dimensions().unwrap_or(target.dimensions);
        let fitted = target.fit.fitted_size(source, target.dimensions);
        ready(Ok(artifact.with_dimensions(fitted))).boxed()
    }
}
