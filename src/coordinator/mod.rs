//! Request coordination: cache check, in-flight deduplication and fan-out.
//!
//! A request is resolved in three steps:
//!
//! 1. The cache is consulted synchronously. A hit completes the request
//!    immediately with [`ArtifactState::Cached`](crate::ArtifactState::Cached).
//! 2. If a fetch for the key is already in flight, the caller receives an
//!    [`ArtifactState::Downloading`](crate::ArtifactState::Downloading)
//!    placeholder and joins that fetch according to the configured
//!    [`JoinStrategy`].
//! 3. Otherwise the caller claims the key, a fetch task is spawned and a
//!    [`FetchHandle`] is returned.
//!
//! At most one fetch per key is ever in flight. The in-flight entry is
//! released on every terminal outcome, including cancellation, so a failed
//! key can always be requested again.

mod completion;
mod handle;
mod join;
mod table;

use std::fmt;
use std::sync::Arc;

use color_eyre::eyre::Context;
use tokio::runtime::Handle;
use tokio::sync::{Semaphore, oneshot, watch};
use tracing::{Instrument, debug, info, info_span};

use crate::artifact::{AdaptTarget, ArtifactInstance};
use crate::config::{CoordinatorConfig, JoinStrategy};
use crate::error::{ConfigResult, RequestError, Result};
use crate::fetcher::Fetcher;
use crate::key::RequestKey;
use crate::observability::LOG_TARGET;
use crate::post_process::PostProcessor;
use crate::store::CacheStore;

use self::completion::FetchTask;
use self::table::{Claim, InFlight, InFlightTable};

pub use handle::FetchHandle;

/// Callback receiving request results.
///
/// Invoked with a [`Downloading`](crate::ArtifactState::Downloading)
/// placeholder when the request joins a pending fetch, then exactly once
/// with the terminal result.
pub type Completion = Box<dyn FnMut(Result<ArtifactInstance>) + Send + 'static>;

/// What to fetch and whether a size-adapted variant should be cached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    key: RequestKey,
    adapt: Option<AdaptTarget>,
}

impl Request {
    /// Requests `key` as fetched.
    #[must_use]
    pub const fn new(key: RequestKey) -> Self {
        Self { key, adapt: None }
    }

    /// Caches a variant adapted to `target` instead of the raw bytes.
    ///
    /// Animated content is always cached as fetched.
    #[must_use]
    pub const fn adapt_to(mut self, target: AdaptTarget) -> Self {
        self.adapt = Some(target);
        self
    }

    /// Key being requested.
    #[must_use]
    pub const fn key(&self) -> &RequestKey {
        &self.key
    }

    /// Adaptation target, when one was requested.
    #[must_use]
    pub const fn adapt(&self) -> Option<AdaptTarget> {
        self.adapt
    }
}

impl From<RequestKey> for Request {
    fn from(key: RequestKey) -> Self {
        Self::new(key)
    }
}

/// State shared between the coordinator and the tasks it spawns.
struct Shared {
    table: InFlightTable,
    cache: Arc<dyn CacheStore>,
    fetcher: Arc<dyn Fetcher>,
    post_processor: Option<Arc<dyn PostProcessor>>,
    config: CoordinatorConfig,
    permits: Semaphore,
    runtime: Handle,
    shutdown: watch::Sender<bool>,
}

impl Shared {
    fn is_shut_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    fn dispatch(
        self: &Arc<Self>,
        request: Request,
        mut completion: Completion,
    ) -> Option<FetchHandle> {
        let key = request.key().clone();

        if let Some(artifact) = self.cache.lookup(&key) {
            debug!(target: LOG_TARGET, key = %key, "cache hit");
            completion(Ok(ArtifactInstance::cached(key, artifact)));
            return None;
        }

        if self.is_shut_down() {
            completion(Err(RequestError::Cancelled { key }));
            return None;
        }

        match self.table.claim(&key) {
            Claim::Joined(flight) => {
                debug!(
                    target: LOG_TARGET,
                    key = %key,
                    strategy = ?self.config.join_strategy,
                    "fetch in flight; joining"
                );
                completion(Ok(ArtifactInstance::downloading(key.clone())));
                match self.config.join_strategy {
                    JoinStrategy::Notify => {
                        join::notify_when_settled(self, key, flight.subscribe(), completion);
                    }
                    JoinStrategy::Poll { interval } => {
                        join::retry_after(self, request, interval, completion);
                    }
                }
                None
            }
            Claim::Owner(flight) => Some(self.start_fetch(flight, request.adapt(), completion)),
        }
    }

    fn start_fetch(
        self: &Arc<Self>,
        flight: Arc<InFlight>,
        adapt: Option<AdaptTarget>,
        completion: Completion,
    ) -> FetchHandle {
        let key = flight.key().clone();
        debug!(target: LOG_TARGET, key = %key, "cache miss; starting fetch");

        let span = info_span!(target: LOG_TARGET, "fetch", key = %key);
        let task = FetchTask::new(Arc::clone(self), Arc::clone(&flight), adapt);
        let abort = self
            .runtime
            .spawn(task.run(completion).instrument(span))
            .abort_handle();
        flight.attach(abort.clone());
        // A shutdown racing with the claim above may have missed this entry.
        if self.is_shut_down() {
            abort.abort();
        }
        FetchHandle::new(key, abort)
    }

    fn shutdown(&self) {
        if self.shutdown.send_replace(true) {
            return;
        }
        self.permits.close();
        let cancelled = self.table.abort_all();
        info!(target: LOG_TARGET, cancelled, "coordinator shut down");
    }
}

/// Fetches resources through a cache, starting at most one fetch per key.
///
/// Dropping the coordinator cancels every fetch still in flight.
///
/// # Examples
/// ```
/// use std::sync::Arc;
/// use bytes::Bytes;
/// use fetch_once::{Coordinator, MemoryCacheStore, Request, RequestKey};
/// use fetch_once::test_support::ScriptedFetcher;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let fetcher = Arc::new(ScriptedFetcher::succeeding(Bytes::from_static(b"png")));
/// let coordinator = Coordinator::builder(fetcher, Arc::new(MemoryCacheStore::new())).build()?;
///
/// let key = RequestKey::parse("https://example.com/img.png")?;
/// let fresh = coordinator.fetch(Request::new(key.clone())).await?;
/// let cached = coordinator.fetch(Request::new(key)).await?;
/// assert_eq!(fresh.artifact, cached.artifact);
/// # Ok(())
/// # }
/// ```
pub struct Coordinator {
    shared: Arc<Shared>,
}

impl Coordinator {
    /// Starts building a coordinator around the required collaborators.
    #[must_use]
    pub fn builder(fetcher: Arc<dyn Fetcher>, cache: Arc<dyn CacheStore>) -> CoordinatorBuilder {
        CoordinatorBuilder {
            fetcher,
            cache,
            post_processor: None,
            config: CoordinatorConfig::default(),
            runtime: None,
        }
    }

    /// Resolves `request`, reporting results through `completion`.
    ///
    /// Cache hits complete synchronously before this method returns. Requests
    /// that join a pending fetch receive a
    /// [`Downloading`](crate::ArtifactState::Downloading) placeholder
    /// immediately and their terminal result later. A [`FetchHandle`] is
    /// returned only when this call started a fetch.
    ///
    /// # Examples
    /// ```
    /// use std::sync::Arc;
    /// use bytes::Bytes;
    /// use fetch_once::{Coordinator, MemoryCacheStore, Request, RequestKey};
    /// use fetch_once::test_support::ScriptedFetcher;
    ///
    /// # #[tokio::main(flavor = "current_thread")]
    /// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
    /// let fetcher = Arc::new(ScriptedFetcher::succeeding(Bytes::from_static(b"png")));
    /// let coordinator = Coordinator::builder(fetcher, Arc::new(MemoryCacheStore::new())).build()?;
    /// let key = RequestKey::parse("https://example.com/img.png")?;
    ///
    /// let first = coordinator.request(Request::new(key.clone()), |_| {});
    /// assert!(first.is_some(), "the first request starts the fetch");
    ///
    /// let mut states = Vec::new();
    /// let second = coordinator.request(Request::new(key), move |result| {
    ///     if let Ok(instance) = result {
    ///         states.push(instance.state);
    ///     }
    /// });
    /// assert!(second.is_none(), "the second request joins it");
    /// # Ok(())
    /// # }
    /// ```
    pub fn request<F>(&self, request: Request, completion: F) -> Option<FetchHandle>
    where
        F: FnMut(Result<ArtifactInstance>) + Send + 'static,
    {
        self.shared.dispatch(request, Box::new(completion))
    }

    /// Resolves `request` and waits for its terminal result.
    ///
    /// [`Downloading`](crate::ArtifactState::Downloading) placeholders are
    /// skipped.
    ///
    /// # Errors
    ///
    /// Returns [`RequestError::Fetch`] or [`RequestError::Decode`] when the
    /// fetch fails, and [`RequestError::Cancelled`] when it is aborted or the
    /// coordinator shuts down first.
    pub async fn fetch(&self, request: Request) -> Result<ArtifactInstance> {
        let key = request.key().clone();
        let (sender, receiver) = oneshot::channel();
        let mut reply = Some(sender);
        self.request(request, move |result| {
            if matches!(&result, Ok(instance) if instance.is_placeholder()) {
                return;
            }
            if let Some(tx) = reply.take() {
                drop(tx.send(result));
            }
        });
        receiver
            .await
            .unwrap_or(Err(RequestError::Cancelled { key }))
    }

    /// Returns `true` while any fetch is in flight.
    #[must_use]
    pub fn has_active_requests(&self) -> bool {
        !self.shared.table.is_empty()
    }

    /// Number of fetches currently in flight.
    #[must_use]
    pub fn in_flight_count(&self) -> usize {
        self.shared.table.len()
    }

    /// Returns `true` while a fetch for `key` is in flight.
    #[must_use]
    pub fn is_in_flight(&self, key: &RequestKey) -> bool {
        self.shared.table.contains(key)
    }

    /// Configuration the coordinator was built with.
    #[must_use]
    pub fn config(&self) -> &CoordinatorConfig {
        &self.shared.config
    }

    /// Cancels every fetch in flight and refuses new ones.
    ///
    /// Cache hits are still served. Idempotent; also performed on drop.
    pub fn shutdown(&self) {
        self.shared.shutdown();
    }
}

impl Drop for Coordinator {
    fn drop(&mut self) {
        self.shared.shutdown();
    }
}

impl fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Coordinator")
            .field("config", &self.shared.config)
            .field("in_flight", &self.shared.table.len())
            .field("post_processor", &self.shared.post_processor.is_some())
            .finish_non_exhaustive()
    }
}

/// Assembles a [`Coordinator`].
#[must_use = "call build() to obtain a Coordinator"]
pub struct CoordinatorBuilder {
    fetcher: Arc<dyn Fetcher>,
    cache: Arc<dyn CacheStore>,
    post_processor: Option<Arc<dyn PostProcessor>>,
    config: CoordinatorConfig,
    runtime: Option<Handle>,
}

impl CoordinatorBuilder {
    /// Enables size adaptation for requests that ask for it.
    ///
    /// Without a post-processor such requests cache the raw bytes.
    pub fn post_processor(mut self, post_processor: Arc<dyn PostProcessor>) -> Self {
        self.post_processor = Some(post_processor);
        self
    }

    /// Replaces the default configuration.
    pub const fn config(mut self, config: CoordinatorConfig) -> Self {
        self.config = config;
        self
    }

    /// Runs fetch tasks on `runtime` instead of the ambient one.
    pub fn runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// Builds the coordinator.
    ///
    /// # Errors
    ///
    /// Returns an error when the configuration is invalid, or when no runtime
    /// handle was supplied and the builder is not running inside a Tokio
    /// runtime.
    pub fn build(self) -> ConfigResult<Coordinator> {
        self.config.validate()?;
        let runtime = match self.runtime {
            Some(runtime) => runtime,
            None => Handle::try_current()
                .context("Coordinator must be built inside a Tokio runtime or given a handle")?,
        };
        let (shutdown, _) = watch::channel(false);

        Ok(Coordinator {
            shared: Arc::new(Shared {
                table: InFlightTable::default(),
                cache: self.cache,
                fetcher: self.fetcher,
                post_processor: self.post_processor,
                permits: Semaphore::new(self.config.max_concurrent_fetches.get()),
                config: self.config,
                runtime,
                shutdown,
            }),
        })
    }
}
