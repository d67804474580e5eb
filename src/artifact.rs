//! Decoded content and the instances handed to request completions.

use bytes::Bytes;

use crate::key::RequestKey;

/// Pixel dimensions of decoded content or of an adaptation target.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Dimensions {
    /// Horizontal extent.
    pub width: u32,
    /// Vertical extent.
    pub height: u32,
}

impl Dimensions {
    /// Creates dimensions from a width and height.
    #[must_use]
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Returns `true` when either extent is zero.
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// How adapted content is fitted into its target bounds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum FitMode {
    /// Stretch to the bounds, ignoring aspect ratio.
    Fill,
    /// Scale to fit entirely inside the bounds, preserving aspect ratio.
    #[default]
    AspectFit,
    /// Scale to cover the bounds, preserving aspect ratio.
    AspectFill,
}

impl FitMode {
    /// Computes the size content of `source` dimensions should be scaled to
    /// for the given `bounds`.
    ///
    /// Empty sources and empty bounds yield `bounds` unchanged.
    ///
    /// # Examples
    /// ```
    /// use fetch_once::{Dimensions, FitMode};
    ///
    /// let source = Dimensions::new(200, 100);
    /// let bounds = Dimensions::new(100, 100);
    /// assert_eq!(FitMode::AspectFit.fitted_size(source, bounds), Dimensions::new(100, 50));
    /// assert_eq!(FitMode::AspectFill.fitted_size(source, bounds), Dimensions::new(200, 100));
    /// ```
    #[must_use]
    pub fn fitted_size(self, source: Dimensions, bounds: Dimensions) -> Dimensions {
        if source.is_empty() || bounds.is_empty() {
            return bounds;
        }
        let (sw, sh) = (u64::from(source.width), u64::from(source.height));
        let (bw, bh) = (u64::from(bounds.width), u64::from(bounds.height));
        // Cross-multiplied aspect comparison: true when the source is wider
        // than the bounds relative to their heights.
        let source_is_wider = sw * bh > bw * sh;
        let match_width = match self {
            Self::Fill => return bounds,
            Self::AspectFit => source_is_wider,
            Self::AspectFill => !source_is_wider,
        };
        if match_width {
            Dimensions::new(bounds.width, scale(sh, bw, sw))
        } else {
            Dimensions::new(scale(sw, bh, sh), bounds.height)
        }
    }
}

fn scale(value: u64, numerator: u64, denominator: u64) -> u32 {
    (value * numerator)
        .checked_div(denominator)
        .and_then(|scaled| u32::try_from(scaled).ok())
        .unwrap_or(u32::MAX)
}

/// Target for a size-adapted variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AdaptTarget {
    /// Bounds the variant is produced for.
    pub dimensions: Dimensions,
    /// How content is fitted into the bounds.
    pub fit: FitMode,
}

impl AdaptTarget {
    /// Creates an adaptation target.
    #[must_use]
    pub const fn new(dimensions: Dimensions, fit: FitMode) -> Self {
        Self { dimensions, fit }
    }
}

/// Decoded, usable form of a fetched resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    data: Bytes,
    dimensions: Option<Dimensions>,
    frame_count: u32,
}

impl Artifact {
    /// Wraps decoded data as a single-frame artifact of unknown size.
    #[must_use]
    pub const fn new(data: Bytes) -> Self {
        Self {
            data,
            dimensions: None,
            frame_count: 1,
        }
    }

    /// Records the pixel dimensions of the artifact.
    #[must_use]
    pub fn with_dimensions(mut self, dimensions: Dimensions) -> Self {
        self.dimensions = Some(dimensions);
        self
    }

    /// Records the number of frames. Zero is treated as one.
    #[must_use]
    pub fn with_frame_count(mut self, frame_count: u32) -> Self {
        self.frame_count = frame_count.max(1);
        self
    }

    /// Decoded data.
    #[must_use]
    pub const fn data(&self) -> &Bytes {
        &self.data
    }

    /// Pixel dimensions, when known.
    #[must_use]
    pub const fn dimensions(&self) -> Option<Dimensions> {
        self.dimensions
    }

    /// Number of frames.
    #[must_use]
    pub const fn frame_count(&self) -> u32 {
        self.frame_count
    }

    /// Multi-frame artifacts are never size-adapted.
    #[must_use]
    pub const fn is_animated(&self) -> bool {
        self.frame_count > 1
    }
}

/// Where the content handed to a completion came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactState {
    /// Served from the cache without network access.
    Cached,
    /// Placeholder: a fetch for the key is already under way.
    Downloading,
    /// Newly fetched and decoded.
    Fresh,
}

/// Value delivered to a request completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactInstance {
    /// Origin of the content.
    pub state: ArtifactState,
    /// Key of the originating request.
    pub key: RequestKey,
    /// Decoded content. Absent for [`ArtifactState::Downloading`].
    pub artifact: Option<Artifact>,
    /// Raw bytes as fetched. Only present for [`ArtifactState::Fresh`].
    pub bytes: Option<Bytes>,
}

impl ArtifactInstance {
    /// Builds a cache hit.
    #[must_use]
    pub const fn cached(key: RequestKey, artifact: Artifact) -> Self {
        Self {
            state: ArtifactState::Cached,
            key,
            artifact: Some(artifact),
            bytes: None,
        }
    }

    /// Builds the placeholder handed to callers that joined a pending fetch.
    #[must_use]
    pub const fn downloading(key: RequestKey) -> Self {
        Self {
            state: ArtifactState::Downloading,
            key,
            artifact: None,
            bytes: None,
        }
    }

    /// Builds a freshly fetched result.
    #[must_use]
    pub const fn fresh(key: RequestKey, artifact: Artifact, bytes: Bytes) -> Self {
        Self {
            state: ArtifactState::Fresh,
            key,
            artifact: Some(artifact),
            bytes: Some(bytes),
        }
    }

    /// Returns `true` for the [`ArtifactState::Downloading`] placeholder.
    #[must_use]
    pub fn is_placeholder(&self) -> bool {
        self.state == ArtifactState::Downloading
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::fill_wide(FitMode::Fill, (200, 100), (50, 50), (50, 50))]
    #[case::fit_wide(FitMode::AspectFit, (200, 100), (100, 100), (100, 50))]
    #[case::fit_tall(FitMode::AspectFit, (100, 400), (100, 100), (25, 100))]
    #[case::fill_aspect_wide(FitMode::AspectFill, (200, 100), (100, 100), (200, 100))]
    #[case::fill_aspect_tall(FitMode::AspectFill, (100, 400), (100, 100), (100, 400))]
    #[case::same_ratio(FitMode::AspectFit, (640, 480), (320, 240), (320, 240))]
    #[case::empty_source(FitMode::AspectFit, (0, 480), (320, 240), (320, 240))]
    fn fitted_size_matches_mode(
        #[case] mode: FitMode,
        #[case] source: (u32, u32),
        #[case] bounds: (u32, u32),
        #[case] expected: (u32, u32),
    ) {
        let fitted = mode.fitted_size(
            Dimensions::new(source.0, source.1),
            Dimensions::new(bounds.0, bounds.1),
        );
        assert_eq!(fitted, Dimensions::new(expected.0, expected.1));
    }

    #[test]
    fn zero_frame_count_is_clamped_to_one() {
        let artifact = Artifact::new(Bytes::from_static(b"px")).with_frame_count(0);
        assert_eq!(artifact.frame_count(), 1);
        assert!(!artifact.is_animated());
    }

    #[test]
    fn multi_frame_artifacts_are_animated() {
        let artifact = Artifact::new(Bytes::from_static(b"gif")).with_frame_count(12);
        assert!(artifact.is_animated());
    }

    #[test]
    fn downloading_placeholder_carries_no_content() {
        let key = RequestKey::parse("https://x/img.png").expect("valid key");
        let instance = ArtifactInstance::downloading(key);
        assert!(instance.is_placeholder());
        assert!(instance.artifact.is_none());
        assert!(instance.bytes.is_none());
    }
}
