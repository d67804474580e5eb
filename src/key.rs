//! Canonical identity for requested resources.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use url::Url;

use crate::error::RequestError;

/// Canonical string identity of a resource: its absolute URL.
///
/// Keys built from equivalent spellings of a URL compare equal because the
/// URL is normalised by [`url::Url`] before it is stored.
///
/// # Examples
/// ```
/// use fetch_once::RequestKey;
///
/// let key = RequestKey::parse("HTTPS://Example.com/a/../img.png")?;
/// assert_eq!(key.as_str(), "https://example.com/img.png");
/// # Ok::<(), fetch_once::RequestError>(())
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestKey(Arc<str>);

impl RequestKey {
    /// Parses and normalises an absolute URL.
    ///
    /// # Errors
    ///
    /// Returns [`RequestError::InvalidKey`] when `input` is not an absolute
    /// URL.
    pub fn parse(input: &str) -> Result<Self, RequestError> {
        Url::parse(input)
            .map(|url| Self::from_url(&url))
            .map_err(|source| RequestError::InvalidKey {
                input: input.to_owned(),
                source,
            })
    }

    /// Builds the key for an already parsed URL.
    #[must_use]
    pub fn from_url(url: &Url) -> Self {
        Self(Arc::from(url.as_str()))
    }

    /// Returns the key as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for RequestKey {
    type Err = RequestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl From<&Url> for RequestKey {
    fn from(url: &Url) -> Self {
        Self::from_url(url)
    }
}

impl From<Url> for RequestKey {
    fn from(url: Url) -> Self {
        Self::from_url(&url)
    }
}

impl AsRef<str> for RequestKey {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl fmt::Display for RequestKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
