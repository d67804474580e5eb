//! Runs a started fetch through to its terminal outcome.
//!
//! The task resolves the fetch, writes the cache, releases the in-flight
//! entry, publishes the outcome to joiners and finally hands a `Fresh`
//! instance (or the error) to the caller that started the fetch. If the task
//! is aborted part way, its drop releases the entry and reports cancellation
//! instead; the store path is never reached.

use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, info, warn};

use super::table::{InFlight, Outcome, Settled};
use super::{Completion, Shared};
use crate::artifact::{AdaptTarget, Artifact, ArtifactInstance};
use crate::error::RequestError;
use crate::fetcher::FetchedResource;
use crate::key::RequestKey;
use crate::observability::LOG_TARGET;
use crate::post_process::PostProcessor;

pub(super) struct FetchTask {
    shared: Arc<Shared>,
    flight: Arc<InFlight>,
    adapt: Option<AdaptTarget>,
}

impl FetchTask {
    pub(super) const fn new(
        shared: Arc<Shared>,
        flight: Arc<InFlight>,
        adapt: Option<AdaptTarget>,
    ) -> Self {
        Self {
            shared,
            flight,
            adapt,
        }
    }

    /// Builds the task future.
    ///
    /// The reply guard is created before the future is first polled, so a
    /// task aborted before it ever runs still releases its entry.
    pub(super) fn run(self, completion: Completion) -> impl Future<Output = ()> + Send + 'static {
        let reply = Reply {
            shared: Arc::clone(&self.shared),
            flight: Arc::clone(&self.flight),
            completion: Some(completion),
        };
        async move {
            let key = self.flight.key().clone();
            let outcome = self.resolve(&key).await;
            log_outcome(&key, &outcome);
            reply.deliver(outcome);
        }
    }

    async fn resolve(&self, key: &RequestKey) -> Outcome {
        let _permit = self
            .shared
            .permits
            .acquire()
            .await
            .map_err(|_| RequestError::Cancelled { key: key.clone() })?;

        debug!(
            target: LOG_TARGET,
            key = %key,
            priority = %self.shared.config.fetch_priority,
            "fetch started"
        );
        let FetchedResource { bytes, artifact } = self
            .shared
            .fetcher
            .fetch(key, self.shared.config.fetch_priority)
            .await
            .map_err(|source| RequestError::Fetch {
                key: key.clone(),
                source: Arc::new(source),
            })?;
        let Some(artifact) = artifact else {
            return Err(RequestError::Decode { key: key.clone() });
        };

        self.store(key, &artifact, &bytes).await;
        Ok(Settled { artifact, bytes })
    }

    /// Writes exactly one representation of the fetched content.
    ///
    /// Failures are logged and swallowed: the caller still receives the
    /// fetched content.
    async fn store(&self, key: &RequestKey, artifact: &Artifact, bytes: &Bytes) {
        let cache = &self.shared.cache;
        let result = match self.adaptation(key, artifact) {
            Some((post_processor, target)) => {
                match post_processor.adapt(artifact.clone(), target).await {
                    Ok(adapted) => cache.store_artifact(adapted, key).await,
                    Err(err) => {
                        warn!(
                            target: LOG_TARGET,
                            key = %key,
                            error = %err,
                            "failed to adapt fetched content; nothing cached"
                        );
                        return;
                    }
                }
            }
            None => cache.store_bytes(bytes.clone(), key).await,
        };
        if let Err(err) = result {
            warn!(
                target: LOG_TARGET,
                key = %key,
                error = %err,
                "failed to cache fetched content"
            );
        }
    }

    fn adaptation(
        &self,
        key: &RequestKey,
        artifact: &Artifact,
    ) -> Option<(&Arc<dyn PostProcessor>, AdaptTarget)> {
        let target = self.adapt?;
        if artifact.is_animated() {
            debug!(target: LOG_TARGET, key = %key, "animated content is cached unadapted");
            return None;
        }
        let Some(post_processor) = self.shared.post_processor.as_ref() else {
            debug!(target: LOG_TARGET, key = %key, "no post-processor configured; caching raw bytes");
            return None;
        };
        Some((post_processor, target))
    }
}

/// Delivers the terminal outcome exactly once.
///
/// Dropping an undelivered reply means the task was aborted: the entry is
/// released, joiners see the outcome slot close, and the originating caller
/// is told the fetch was cancelled.
struct Reply {
    shared: Arc<Shared>,
    flight: Arc<InFlight>,
    completion: Option<Completion>,
}

impl Reply {
    fn deliver(mut self, outcome: Outcome) {
        self.shared.table.release(&self.flight);
        self.flight.publish(outcome.clone());

        if let Some(mut completion) = self.completion.take() {
            let key = self.flight.key().clone();
            completion(
                outcome.map(|settled| ArtifactInstance::fresh(key, settled.artifact, settled.bytes)),
            );
        }
    }
}

impl Drop for Reply {
    fn drop(&mut self) {
        self.shared.table.release(&self.flight);
        if let Some(mut completion) = self.completion.take() {
            let key = self.flight.key().clone();
            info!(target: LOG_TARGET, key = %key, "fetch cancelled");
            completion(Err(RequestError::Cancelled { key }));
        }
    }
}

fn log_outcome(key: &RequestKey, outcome: &Outcome) {
    match outcome {
        Ok(settled) => info!(
            target: LOG_TARGET,
            key = %key,
            bytes = settled.bytes.len(),
            "fetch settled"
        ),
        Err(err) => warn!(target: LOG_TARGET, key = %key, error = %err, "fetch failed"),
    }
}
