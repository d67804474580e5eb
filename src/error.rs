//! Domain error types for the fetch coordinator and its collaborators.

use std::sync::Arc;

use color_eyre::Report;
use thiserror::Error;

use crate::key::RequestKey;

/// Result alias for request outcomes delivered to callers.
pub type Result<T> = std::result::Result<T, RequestError>;

/// Result alias for [`Fetcher`](crate::Fetcher) implementations.
pub type FetcherResult<T> = std::result::Result<T, FetcherError>;

/// Result alias for [`CacheStore`](crate::CacheStore) writes.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Result alias for [`PostProcessor`](crate::PostProcessor) adaptations.
pub type AdaptResult<T> = std::result::Result<T, AdaptError>;

/// Result alias for [`Decoder`](crate::Decoder) implementations.
pub type DecodeResult<T> = std::result::Result<T, DecodeError>;

/// Result alias for configuration and builder failures.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Terminal failure of a request.
///
/// The type is cheap to clone so a single fetch outcome can be handed to
/// every caller that joined it.
#[derive(Debug, Clone, Error)]
pub enum RequestError {
    /// The fetcher reported a transport failure, including timeouts.
    #[error("failed to fetch {key}")]
    Fetch {
        /// Resource whose fetch failed.
        key: RequestKey,
        /// Failure reported by the fetcher.
        #[source]
        source: Arc<FetcherError>,
    },
    /// Bytes were retrieved but carried no usable content.
    #[error("fetched {key} but its content could not be decoded")]
    Decode {
        /// Resource whose content was unusable.
        key: RequestKey,
    },
    /// The fetch was aborted before it reached a terminal outcome.
    #[error("fetch for {key} was cancelled before it completed")]
    Cancelled {
        /// Resource whose fetch was aborted.
        key: RequestKey,
    },
    /// The supplied string is not an absolute URL.
    #[error("'{input}' is not a valid resource URL")]
    InvalidKey {
        /// Rejected input.
        input: String,
        /// Parser diagnostic.
        #[source]
        source: url::ParseError,
    },
}

impl RequestError {
    /// Returns the key the failure relates to, when there is one.
    #[must_use]
    pub const fn key(&self) -> Option<&RequestKey> {
        match self {
            Self::Fetch { key, .. } | Self::Decode { key } | Self::Cancelled { key } => Some(key),
            Self::InvalidKey { .. } => None,
        }
    }

    /// Returns `true` when the failure was caused by cancellation rather than
    /// by the resource itself.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}

/// Captures transport failures reported by a [`Fetcher`](crate::Fetcher).
#[derive(Debug, Error)]
#[error(transparent)]
pub struct FetcherError(#[from] Report);

/// Captures cache write failures. Logged, never surfaced to callers.
#[derive(Debug, Error)]
#[error(transparent)]
pub struct StoreError(#[from] Report);

/// Captures post-processing failures. Logged, never surfaced to callers.
#[derive(Debug, Error)]
#[error(transparent)]
pub struct AdaptError(#[from] Report);

/// Captures failures turning raw bytes into an artifact.
#[derive(Debug, Error)]
#[error(transparent)]
pub struct DecodeError(#[from] Report);

/// Captures configuration failures.
#[derive(Debug, Error)]
#[error(transparent)]
pub struct ConfigError(#[from] Report);

#[cfg(test)]
mod tests {
    use super::*;
    use color_eyre::eyre::eyre;
    use std::error::Error as _;

    #[test]
    fn fetch_error_exposes_fetcher_source() {
        let key = RequestKey::parse("https://x/img.png").expect("valid key");
        let err = RequestError::Fetch {
            key: key.clone(),
            source: Arc::new(FetcherError::from(eyre!("connection reset"))),
        };

        assert_eq!(err.key(), Some(&key));
        let source = err.source().expect("fetch errors carry a source");
        assert_eq!(source.to_string(), "connection reset");
    }

    #[test]
    fn cloned_errors_share_the_fetcher_report() {
        let key = RequestKey::parse("https://x/img.png").expect("valid key");
        let err = RequestError::Fetch {
            key,
            source: Arc::new(FetcherError::from(eyre!("timed out"))),
        };
        let copy = err.clone();

        match (err, copy) {
            (
                RequestError::Fetch { source: left, .. },
                RequestError::Fetch { source: right, .. },
            ) => assert!(Arc::ptr_eq(&left, &right)),
            other => panic!("unexpected variants: {other:?}"),
        }
    }

    #[test]
    fn only_cancellation_reports_cancelled() {
        let key = RequestKey::parse("https://x/img.png").expect("valid key");
        assert!(RequestError::Cancelled { key: key.clone() }.is_cancelled());
        assert!(!RequestError::Decode { key }.is_cancelled());
    }
}
