//! Network retrieval capability used by the coordinator.
//!
//! The crate never speaks a transport protocol itself. Implementations own
//! headers, redirects, authentication and timeouts; a timeout is reported
//! like any other failure.

use std::fmt;
use std::str::FromStr;

use bytes::Bytes;
use futures::future::BoxFuture;

use crate::artifact::Artifact;
use crate::error::FetcherResult;
use crate::key::RequestKey;

/// Scheduling hint passed to [`Fetcher::fetch`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Priority {
    /// Prefetching and other work nobody is waiting on.
    Background,
    /// Ordinary requests.
    Normal,
    /// A caller is waiting on the result.
    #[default]
    UserInitiated,
}

impl Priority {
    /// Returns the configuration spelling of the priority.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Background => "background",
            Self::Normal => "normal",
            Self::UserInitiated => "user-initiated",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raised when a priority name is not recognised.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown priority '{0}', expected background, normal or user-initiated")]
pub struct UnknownPriority(String);

impl FromStr for Priority {
    type Err = UnknownPriority;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "background" => Ok(Self::Background),
            "normal" => Ok(Self::Normal),
            "user-initiated" | "user_initiated" => Ok(Self::UserInitiated),
            _ => Err(UnknownPriority(s.to_owned())),
        }
    }
}

/// Bytes retrieved for a key, with the decoded form when decoding succeeded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedResource {
    /// Raw bytes as received.
    pub bytes: Bytes,
    /// Decoded content; `None` when the bytes were unusable.
    pub artifact: Option<Artifact>,
}

impl FetchedResource {
    /// Bundles raw bytes with their decoded form.
    #[must_use]
    pub const fn new(bytes: Bytes, artifact: Option<Artifact>) -> Self {
        Self { bytes, artifact }
    }
}

/// Retrieves resources over the network.
///
/// Dropping the returned future must cancel the retrieval; the coordinator
/// relies on this when a fetch is aborted.
#[cfg_attr(test, mockall::automock)]
pub trait Fetcher: Send + Sync {
    /// Fetches the resource identified by `key`.
    fn fetch(
        &self,
        key: &RequestKey,
        priority: Priority,
    ) -> BoxFuture<'static, FetcherResult<FetchedResource>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::background("background", Priority::Background)]
    #[case::normal(" Normal ", Priority::Normal)]
    #[case::hyphenated("user-initiated", Priority::UserInitiated)]
    #[case::underscored("USER_INITIATED", Priority::UserInitiated)]
    fn priority_parses_configuration_spellings(#[case] raw: &str, #[case] expected: Priority) {
        assert_eq!(raw.parse::<Priority>(), Ok(expected));
    }

    #[test]
    fn priority_rejects_unknown_names() {
        let err = "urgent".parse::<Priority>().expect_err("unknown priority");
        assert!(err.to_string().contains("urgent"));
    }

    #[test]
    fn priority_round_trips_through_display() {
        for priority in [Priority::Background, Priority::Normal, Priority::UserInitiated] {
            assert_eq!(priority.to_string().parse::<Priority>(), Ok(priority));
        }
    }
}
