//! Loader and quantizer configuration.

use rgb::RGB8;

use crate::composite::Background;
use crate::limits::ResourceLimits;
use crate::raw::MAX_PALETTE;

/// Display gamma assumed when none is configured.
pub const DEFAULT_DISPLAY_GAMMA: f64 = 2.2;

/// Bytes a loader consumes per step by default.
pub const DEFAULT_CHUNK_SIZE: usize = 4096;

/// Color reduction algorithm for full-color rasters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum QuantizeMethod {
    /// Histogram median cut with nearest-color mapping.
    #[default]
    MedianCut,
    /// Fixed 3/3/2 color cube with error diffusion.
    ColorCube,
}

/// Settings for [`quantize`](crate::quantize::quantize).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub struct QuantizeConfig {
    /// Target palette size, 1..=256.
    pub max_colors: usize,
    /// Reduction algorithm.
    pub method: QuantizeMethod,
    /// Distinct colors the median-cut histogram may hold before color
    /// precision is halved.
    pub histogram_limit: usize,
}

impl Default for QuantizeConfig {
    fn default() -> Self {
        Self {
            max_colors: MAX_PALETTE,
            method: QuantizeMethod::MedianCut,
            histogram_limit: 32768,
        }
    }
}

impl QuantizeConfig {
    /// Set the target palette size. Values outside 1..=256 are clamped.
    pub fn with_max_colors(mut self, colors: usize) -> Self {
        self.max_colors = colors.clamp(1, MAX_PALETTE);
        self
    }

    /// Set the reduction algorithm.
    pub fn with_method(mut self, method: QuantizeMethod) -> Self {
        self.method = method;
        self
    }

    /// Set the histogram ceiling (at least 1).
    pub fn with_histogram_limit(mut self, limit: usize) -> Self {
        self.histogram_limit = limit.max(1);
        self
    }

    /// Palette size actually targeted.
    pub fn target_colors(&self) -> usize {
        self.max_colors.clamp(1, MAX_PALETTE)
    }
}

/// Per-load settings for [`ProgressiveLoader`](crate::ProgressiveLoader).
///
/// Defaults to [`ResourceLimits::viewer`]; pass [`ResourceLimits::none`]
/// to lift every cap.
///
/// ```
/// use mozimage::{LoaderConfig, ResourceLimits};
///
/// let config = LoaderConfig::default()
///     .with_chunk_size(1024)
///     .with_limits(ResourceLimits::viewer().with_max_frames(1));
/// assert_eq!(config.chunk_size, 1024);
/// ```
#[derive(Clone, Debug, PartialEq)]
#[non_exhaustive]
pub struct LoaderConfig {
    /// Maximum input bytes consumed by one step.
    pub chunk_size: usize,
    /// Resource caps checked while decoding.
    pub limits: ResourceLimits,
    /// Palette reduction for full-color rasters.
    pub quantize: QuantizeConfig,
    /// Gamma of the target display.
    pub display_gamma: f64,
    /// What alpha rasters are composited over.
    pub background: Background,
    /// Smear interlaced rows downward until later passes arrive.
    pub progressive_fill: bool,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            limits: ResourceLimits::viewer(),
            quantize: QuantizeConfig::default(),
            display_gamma: DEFAULT_DISPLAY_GAMMA,
            background: Background::Solid(RGB8::new(0xc0, 0xc0, 0xc0)),
            progressive_fill: true,
        }
    }
}

impl LoaderConfig {
    /// Set the per-step byte budget (at least 1).
    pub fn with_chunk_size(mut self, bytes: usize) -> Self {
        self.chunk_size = bytes.max(1);
        self
    }

    /// Set resource limits.
    pub fn with_limits(mut self, limits: ResourceLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Set quantizer settings.
    pub fn with_quantize(mut self, quantize: QuantizeConfig) -> Self {
        self.quantize = quantize;
        self
    }

    /// Set the display gamma. Non-positive or non-finite values reset it to
    /// the default.
    pub fn with_display_gamma(mut self, gamma: f64) -> Self {
        self.display_gamma = if gamma.is_finite() && gamma > 0.0 {
            gamma
        } else {
            DEFAULT_DISPLAY_GAMMA
        };
        self
    }

    /// Set the compositing background.
    pub fn with_background(mut self, background: Background) -> Self {
        self.background = background;
        self
    }

    /// Enable or disable progressive row fill for interlaced frames.
    pub fn with_progressive_fill(mut self, fill: bool) -> Self {
        self.progressive_fill = fill;
        self
    }
}
