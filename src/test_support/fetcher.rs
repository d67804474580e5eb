//! Scripted [`Fetcher`] that records every call it receives.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use bytes::Bytes;
use color_eyre::eyre::eyre;
use futures::FutureExt;
use futures::future::BoxFuture;
use tokio::sync::{Semaphore, watch};

use crate::artifact::Artifact;
use crate::error::{FetcherError, FetcherResult};
use crate::fetcher::{FetchedResource, Fetcher, Priority};
use crate::key::RequestKey;

/// What a scripted fetch resolves to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scripted {
    /// Resolve with the given resource.
    Succeed(FetchedResource),
    /// Fail with a transport error carrying this message.
    Fail(String),
}

impl Scripted {
    /// Succeeds with `bytes` decoded as a single-frame artifact.
    #[must_use]
    pub fn content(bytes: Bytes) -> Self {
        Self::Succeed(FetchedResource::new(bytes.clone(), Some(Artifact::new(bytes))))
    }

    /// Succeeds with `bytes` that could not be decoded.
    #[must_use]
    pub const fn undecodable(bytes: Bytes) -> Self {
        Self::Succeed(FetchedResource::new(bytes, None))
    }

    /// Fails with `message`.
    #[must_use]
    pub fn failure(message: &str) -> Self {
        Self::Fail(message.to_owned())
    }
}

#[derive(Debug)]
struct Inner {
    default: Mutex<Scripted>,
    per_key: Mutex<HashMap<RequestKey, Scripted>>,
    calls: Mutex<Vec<(RequestKey, Priority)>>,
    call_count: watch::Sender<usize>,
    held: AtomicBool,
    gate: Semaphore,
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl Inner {
    fn response_for(&self, key: &RequestKey) -> Scripted {
        let overridden = self
            .per_key
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned();
        overridden.unwrap_or_else(|| {
            self.default
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone()
        })
    }
}

/// Decrements the active-fetch counter even when the fetch is dropped early.
struct ActiveGuard(Arc<Inner>);

impl ActiveGuard {
    fn enter(inner: Arc<Inner>) -> Self {
        let now = inner.active.fetch_add(1, Ordering::SeqCst) + 1;
        inner.peak.fetch_max(now, Ordering::SeqCst);
        Self(inner)
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.active.fetch_sub(1, Ordering::SeqCst);
    }
}

/// [`Fetcher`] whose responses are scripted by the test.
///
/// A gated fetcher holds every fetch until the test releases it, which makes
/// the window between "fetch started" and "fetch settled" observable.
///
/// # Examples
/// ```
/// use bytes::Bytes;
/// use fetch_once::test_support::ScriptedFetcher;
///
/// let fetcher = ScriptedFetcher::succeeding(Bytes::from_static(b"png")).gated();
/// assert_eq!(fetcher.calls(), 0);
/// fetcher.release(1);
/// ```
#[derive(Debug, Clone)]
pub struct ScriptedFetcher {
    inner: Arc<Inner>,
}

impl ScriptedFetcher {
    /// Fetcher answering every key with `response`.
    #[must_use]
    pub fn new(response: Scripted) -> Self {
        let (call_count, _) = watch::channel(0);
        Self {
            inner: Arc::new(Inner {
                default: Mutex::new(response),
                per_key: Mutex::new(HashMap::new()),
                calls: Mutex::new(Vec::new()),
                call_count,
                held: AtomicBool::new(false),
                gate: Semaphore::new(0),
                active: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            }),
        }
    }

    /// Fetcher answering every key with `bytes`.
    #[must_use]
    pub fn succeeding(bytes: Bytes) -> Self {
        Self::new(Scripted::content(bytes))
    }

    /// Fetcher failing every key with `message`.
    #[must_use]
    pub fn failing(message: &str) -> Self {
        Self::new(Scripted::failure(message))
    }

    /// Holds fetches until [`release`](Self::release) lets them through.
    ///
    /// Applies to every clone, including ones made before gating.
    #[must_use]
    pub fn gated(self) -> Self {
        self.inner.held.store(true, Ordering::SeqCst);
        self
    }

    /// Answers `key` with `response` instead of the default.
    #[must_use]
    pub fn with_response_for(self, key: &RequestKey, response: Scripted) -> Self {
        self.inner
            .per_key
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.clone(), response);
        self
    }

    /// Replaces the default response for fetches started from now on.
    pub fn set_response(&self, response: Scripted) {
        *self
            .inner
            .default
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = response;
    }

    /// Lets `count` held fetches proceed.
    pub fn release(&self, count: usize) {
        self.inner.gate.add_permits(count);
    }

    /// Number of fetches started.
    #[must_use]
    pub fn calls(&self) -> usize {
        *self.inner.call_count.borrow()
    }

    /// Number of fetches started for `key`.
    #[must_use]
    pub fn calls_for(&self, key: &RequestKey) -> usize {
        self.inner
            .calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|(called, _)| called == key)
            .count()
    }

    /// Priorities passed to each fetch, in call order.
    #[must_use]
    pub fn priorities(&self) -> Vec<Priority> {
        self.inner
            .calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, priority)| *priority)
            .collect()
    }

    /// Largest number of fetches observed running at once.
    #[must_use]
    pub fn peak_concurrency(&self) -> usize {
        self.inner.peak.load(Ordering::SeqCst)
    }

    /// Waits until at least `count` fetches have started.
    pub async fn wait_for_calls(&self, count: usize) {
        let mut receiver = self.inner.call_count.subscribe();
        drop(receiver.wait_for(|calls| *calls >= count).await);
    }
}

impl Fetcher for ScriptedFetcher {
    fn fetch(
        &self,
        key: &RequestKey,
        priority: Priority,
    ) -> BoxFuture<'static, FetcherResult<FetchedResource>> {
        self.inner
            .calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((key.clone(), priority));
        let response = self.inner.response_for(key);
        let inner = Arc::clone(&self.inner);
        let requested = key.clone();
        self.inner.call_count.send_modify(|calls| *calls += 1);

        async move {
            let _active = ActiveGuard::enter(Arc::clone(&inner));
            if inner.held.load(Ordering::SeqCst) {
                inner
                    .gate
                    .acquire()
                    .await
                    .map_err(|err| FetcherError::from(eyre!("gate closed for {requested}: {err}")))?
                    .forget();
            }
            match response {
                Scripted::Succeed(resource) => Ok(resource),
                Scripted::Fail(message) => Err(FetcherError::from(eyre!(message))),
            }
        }
        .boxed()
    }
}
