//! Resource limits for image loads.
//!
//! [`ResourceLimits`] caps what a single load may allocate. Decoders check
//! dimensions as soon as a header carrying them is parsed, so oversized
//! images are rejected before any raster is allocated.

/// Caps on resource usage for one image load.
///
/// All fields are optional; `None` means no limit for that resource.
///
/// # Example
///
/// ```
/// use mozimage::ResourceLimits;
///
/// let limits = ResourceLimits::none()
///     .with_max_pixels(16_000_000)
///     .with_max_frames(500);
/// assert!(limits.check_dimensions(4000, 4000).is_ok());
/// ```
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[non_exhaustive]
pub struct ResourceLimits {
    /// Maximum pixels (width × height) of the logical screen or any frame.
    pub max_pixels: Option<u64>,
    /// Maximum image width in pixels.
    pub max_width: Option<u32>,
    /// Maximum image height in pixels.
    pub max_height: Option<u32>,
    /// Maximum number of animation frames.
    pub max_frames: Option<u32>,
    /// Maximum number of input bytes accepted by one loader.
    pub max_input_bytes: Option<u64>,
}

impl ResourceLimits {
    /// No limits (all fields `None`).
    pub fn none() -> Self {
        Self::default()
    }

    /// Limits suited to an in-application help viewer: 64 megapixels,
    /// 16384 pixels per side, 4096 frames, 256 MiB of input.
    pub fn viewer() -> Self {
        Self::none()
            .with_max_pixels(64 * 1024 * 1024)
            .with_max_width(16384)
            .with_max_height(16384)
            .with_max_frames(4096)
            .with_max_input_bytes(256 * 1024 * 1024)
    }

    /// Set maximum total pixels.
    pub fn with_max_pixels(mut self, max: u64) -> Self {
        self.max_pixels = Some(max);
        self
    }

    /// Set maximum image width in pixels.
    pub fn with_max_width(mut self, width: u32) -> Self {
        self.max_width = Some(width);
        self
    }

    /// Set maximum image height in pixels.
    pub fn with_max_height(mut self, height: u32) -> Self {
        self.max_height = Some(height);
        self
    }

    /// Set maximum number of frames.
    pub fn with_max_frames(mut self, frames: u32) -> Self {
        self.max_frames = Some(frames);
        self
    }

    /// Set maximum number of input bytes.
    pub fn with_max_input_bytes(mut self, bytes: u64) -> Self {
        self.max_input_bytes = Some(bytes);
        self
    }

    /// Whether any limits are set.
    pub fn has_any(&self) -> bool {
        self.max_pixels.is_some()
            || self.max_width.is_some()
            || self.max_height.is_some()
            || self.max_frames.is_some()
            || self.max_input_bytes.is_some()
    }

    /// Check dimensions against `max_width`, `max_height`, and `max_pixels`.
    pub fn check_dimensions(&self, width: u32, height: u32) -> Result<(), LimitExceeded> {
        if let Some(max) = self.max_width
            && width > max
        {
            return Err(LimitExceeded::Width { actual: width, max });
        }
        if let Some(max) = self.max_height
            && height > max
        {
            return Err(LimitExceeded::Height {
                actual: height,
                max,
            });
        }
        if let Some(max) = self.max_pixels {
            let pixels = width as u64 * height as u64;
            if pixels > max {
                return Err(LimitExceeded::Pixels {
                    actual: pixels,
                    max,
                });
            }
        }
        Ok(())
    }

    /// Check a frame count against `max_frames`.
    pub fn check_frames(&self, count: u32) -> Result<(), LimitExceeded> {
        if let Some(max) = self.max_frames
            && count > max
        {
            return Err(LimitExceeded::Frames { actual: count, max });
        }
        Ok(())
    }

    /// Check a cumulative input byte count against `max_input_bytes`.
    pub fn check_input_bytes(&self, bytes: u64) -> Result<(), LimitExceeded> {
        if let Some(max) = self.max_input_bytes
            && bytes > max
        {
            return Err(LimitExceeded::InputBytes { actual: bytes, max });
        }
        Ok(())
    }
}

/// A resource limit was exceeded.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LimitExceeded {
    /// Image width exceeded `max_width`.
    Width {
        /// Actual width.
        actual: u32,
        /// Maximum allowed.
        max: u32,
    },
    /// Image height exceeded `max_height`.
    Height {
        /// Actual height.
        actual: u32,
        /// Maximum allowed.
        max: u32,
    },
    /// Pixel count exceeded `max_pixels`.
    Pixels {
        /// Actual pixel count.
        actual: u64,
        /// Maximum allowed.
        max: u64,
    },
    /// Frame count exceeded `max_frames`.
    Frames {
        /// Actual frame count.
        actual: u32,
        /// Maximum allowed.
        max: u32,
    },
    /// Input size exceeded `max_input_bytes`.
    InputBytes {
        /// Bytes received so far.
        actual: u64,
        /// Maximum allowed.
        max: u64,
    },
}

impl core::fmt::Display for LimitExceeded {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Width { actual, max } => write!(f, "width {actual} exceeds limit {max}"),
            Self::Height { actual, max } => write!(f, "height {actual} exceeds limit {max}"),
            Self::Pixels { actual, max } => {
                write!(f, "pixel count {actual} exceeds limit {max}")
            }
            Self::Frames { actual, max } => {
                write!(f, "frame count {actual} exceeds limit {max}")
            }
            Self::InputBytes { actual, max } => {
                write!(f, "input of {actual} bytes exceeds limit {max}")
            }
        }
    }
}

impl std::error::Error for LimitExceeded {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_has_no_limits() {
        assert!(!ResourceLimits::none().has_any());
        assert!(ResourceLimits::viewer().has_any());
    }

    #[test]
    fn check_dimensions_each_axis() {
        let limits = ResourceLimits::none()
            .with_max_width(640)
            .with_max_height(480)
            .with_max_pixels(200_000);
        assert!(limits.check_dimensions(400, 400).is_ok());
        assert_eq!(
            limits.check_dimensions(641, 10).unwrap_err(),
            LimitExceeded::Width {
                actual: 641,
                max: 640
            }
        );
        assert_eq!(
            limits.check_dimensions(10, 481).unwrap_err(),
            LimitExceeded::Height {
                actual: 481,
                max: 480
            }
        );
        assert_eq!(
            limits.check_dimensions(640, 480).unwrap_err(),
            LimitExceeded::Pixels {
                actual: 307_200,
                max: 200_000
            }
        );
    }

    #[test]
    fn unlimited_always_passes() {
        let limits = ResourceLimits::none();
        assert!(limits.check_dimensions(u32::MAX, u32::MAX).is_ok());
        assert!(limits.check_frames(u32::MAX).is_ok());
        assert!(limits.check_input_bytes(u64::MAX).is_ok());
    }

    #[test]
    fn frames_and_input() {
        let limits = ResourceLimits::none()
            .with_max_frames(2)
            .with_max_input_bytes(1024);
        assert!(limits.check_frames(2).is_ok());
        assert!(matches!(
            limits.check_frames(3),
            Err(LimitExceeded::Frames { actual: 3, max: 2 })
        ));
        assert!(matches!(
            limits.check_input_bytes(2048),
            Err(LimitExceeded::InputBytes { .. })
        ));
    }

    #[test]
    fn display() {
        let err = LimitExceeded::InputBytes {
            actual: 2048,
            max: 1024,
        };
        assert_eq!(format!("{err}"), "input of 2048 bytes exceeds limit 1024");
    }
}
