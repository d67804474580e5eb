//! Convergence of requests that found a fetch already in flight.
//!
//! Both strategies run as detached tasks so the joining caller is never
//! blocked. Neither one starts a second fetch while the first is in flight.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::debug;

use super::table::Outcome;
use super::{Completion, Request, Shared};
use crate::artifact::ArtifactInstance;
use crate::error::RequestError;
use crate::key::RequestKey;
use crate::observability::LOG_TARGET;

/// Waits for the in-flight fetch to publish its outcome.
///
/// On success the joiner is served from the cache like any later request
/// would be, falling back to the shared content when the store did not take.
/// Failures are forwarded as is; a closed slot means the fetch was aborted.
pub(super) fn notify_when_settled(
    shared: &Arc<Shared>,
    key: RequestKey,
    mut outcome: watch::Receiver<Option<Outcome>>,
    mut completion: Completion,
) {
    let task_shared = Arc::clone(shared);
    shared.runtime.spawn(async move {
        let published = match outcome.wait_for(Option::is_some).await {
            Ok(slot) => slot.clone(),
            Err(_) => None,
        };
        let result = match published {
            Some(Ok(settled)) => Ok(task_shared.cache.lookup(&key).map_or_else(
                || ArtifactInstance::fresh(key.clone(), settled.artifact, settled.bytes),
                |artifact| ArtifactInstance::cached(key.clone(), artifact),
            )),
            Some(Err(err)) => Err(err),
            None => Err(RequestError::Cancelled { key: key.clone() }),
        };
        debug!(
            target: LOG_TARGET,
            key = %key,
            succeeded = result.is_ok(),
            "joined fetch settled"
        );
        completion(result);
    });
}

/// Re-dispatches the whole request after `interval`.
///
/// The retry repeats the cache check, so it either hits the stored content,
/// joins again, or starts its own fetch once the previous one has failed.
pub(super) fn retry_after(
    shared: &Arc<Shared>,
    request: Request,
    interval: Duration,
    mut completion: Completion,
) {
    let task_shared = Arc::clone(shared);
    let mut shutdown = shared.shutdown.subscribe();
    shared.runtime.spawn(async move {
        tokio::select! {
            () = tokio::time::sleep(interval) => {
                drop(task_shared.dispatch(request, completion));
            }
            stopped = shutdown.wait_for(|flag| *flag) => {
                drop(stopped);
                let key = request.key().clone();
                completion(Err(RequestError::Cancelled { key }));
            }
        }
    });
}
