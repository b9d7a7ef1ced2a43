//! Decoded raster types handed to the image consumer.
//!
//! A decoder produces one [`DecodedImage`] per load: the logical screen,
//! animation metadata, and a [`Frame`] per image descriptor. Each frame
//! owns its [`Raster`], either palette indices or RGB with an optional
//! alpha plane.

use std::sync::Arc;

use imgref::{ImgRef, ImgVec};
use rgb::{RGB8, RGB16};

use crate::composite::{Background, composite};
use crate::config::LoaderConfig;
use crate::error::DecodeError;
use crate::format::ImageFormat;
use crate::quantize::quantize;

/// Maximum palette entries in any indexed raster.
pub const MAX_PALETTE: usize = 256;

/// Shared color table. Frames that use the global table share one
/// allocation.
pub type Palette = Arc<[RGB8]>;

/// How raster bytes are interpreted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ColorClass {
    /// Palette indices into a gray ramp.
    Grayscale,
    /// Palette indices.
    Indexed,
    /// Three bytes per pixel.
    Rgb,
}

/// What happens to a frame's area before the next frame is drawn.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Disposal {
    /// No disposal specified.
    #[default]
    Unspecified,
    /// Leave the frame in place.
    Keep,
    /// Restore the area to the background color.
    RestoreBackground,
    /// Restore the area to what was there before the frame.
    RestorePrevious,
}

impl Disposal {
    /// Map the 3-bit graphic control disposal field. Reserved codes map
    /// to [`Disposal::Unspecified`].
    pub fn from_code(code: u8) -> Self {
        match code {
            1 => Self::Keep,
            2 => Self::RestoreBackground,
            3 => Self::RestorePrevious,
            _ => Self::Unspecified,
        }
    }

    /// The graphic control code for this disposal.
    pub fn code(self) -> u8 {
        match self {
            Self::Unspecified => 0,
            Self::Keep => 1,
            Self::RestoreBackground => 2,
            Self::RestorePrevious => 3,
        }
    }
}

/// Per-frame placement and timing.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FrameControl {
    /// Left edge on the logical screen.
    pub x: u32,
    /// Top edge on the logical screen.
    pub y: u32,
    /// Display time in milliseconds.
    pub delay_ms: u32,
    /// Disposal before the next frame.
    pub disposal: Disposal,
    /// Palette index rendered as transparent, if any.
    pub transparent: Option<u8>,
    /// The frame lies outside the logical screen and has no raster.
    pub ignore: bool,
}

/// Decoded pixels of one frame.
#[derive(Clone, Debug, PartialEq)]
pub enum Raster {
    /// One palette index per pixel.
    Indexed {
        /// Palette indices, row-major.
        pixels: ImgVec<u8>,
        /// At most [`MAX_PALETTE`] colors.
        palette: Palette,
        /// [`ColorClass::Grayscale`] or [`ColorClass::Indexed`].
        class: ColorClass,
    },
    /// Full color, as produced by the PNG/JPEG bridges.
    Rgb {
        /// Color samples.
        pixels: ImgVec<RGB8>,
        /// Straight alpha, 255 = opaque.
        alpha: Option<ImgVec<u8>>,
    },
}

impl Raster {
    /// Raster width in pixels.
    pub fn width(&self) -> u32 {
        match self {
            Raster::Indexed { pixels, .. } => pixels.width() as u32,
            Raster::Rgb { pixels, .. } => pixels.width() as u32,
        }
    }

    /// Raster height in pixels.
    pub fn height(&self) -> u32 {
        match self {
            Raster::Indexed { pixels, .. } => pixels.height() as u32,
            Raster::Rgb { pixels, .. } => pixels.height() as u32,
        }
    }

    /// Color class tag.
    pub fn color_class(&self) -> ColorClass {
        match self {
            Raster::Indexed { class, .. } => *class,
            Raster::Rgb { .. } => ColorClass::Rgb,
        }
    }

    /// Whether the raster carries an alpha plane.
    pub fn has_alpha(&self) -> bool {
        matches!(self, Raster::Rgb { alpha: Some(_), .. })
    }

    /// Palette with components upscaled to 16 bits (`v * 257`), the scale
    /// surface builders allocate colors in.
    pub fn palette_u16(&self) -> Vec<RGB16> {
        match self {
            Raster::Indexed { palette, .. } => palette
                .iter()
                .map(|c| RGB16::new(c.r as u16 * 257, c.g as u16 * 257, c.b as u16 * 257))
                .collect(),
            Raster::Rgb { .. } => Vec::new(),
        }
    }

    /// Check the palette invariants: an indexed raster has 1..=256 colors
    /// and every pixel indexes inside the palette.
    pub fn validate(&self) -> Result<(), DecodeError> {
        match self {
            Raster::Indexed {
                pixels, palette, ..
            } => {
                if palette.is_empty() || palette.len() > MAX_PALETTE {
                    return Err(DecodeError::InvalidColorTable);
                }
                if let Some(&bad) = pixels.buf().iter().find(|&&p| p as usize >= palette.len()) {
                    return Err(DecodeError::Malformed(format!(
                        "pixel index {bad} outside {}-color palette",
                        palette.len()
                    )));
                }
                Ok(())
            }
            Raster::Rgb { pixels, alpha } => match alpha {
                Some(a) if a.width() != pixels.width() || a.height() != pixels.height() => Err(
                    DecodeError::Malformed("alpha plane size differs from color plane".into()),
                ),
                _ => Ok(()),
            },
        }
    }
}

/// One image descriptor's worth of output.
#[derive(Clone, Debug, PartialEq)]
pub struct Frame {
    /// Placement and timing.
    pub control: FrameControl,
    /// Pixels, `None` when the frame is ignored.
    pub raster: Option<Raster>,
}

/// How a multi-frame stream should be played.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AnimationKind {
    /// A single image.
    Static,
    /// Several image descriptors without a loop extension; plays once.
    MultiImage,
    /// Netscape loop extension present. `0` loops forever.
    Looping(u16),
}

impl AnimationKind {
    /// Whether more than one frame will be shown.
    pub fn is_animated(self) -> bool {
        !matches!(self, AnimationKind::Static)
    }
}

/// Everything a decoder produced for one load.
#[derive(Clone, Debug, PartialEq)]
pub struct DecodedImage {
    /// Source format.
    pub format: ImageFormat,
    /// Logical screen width.
    pub width: u32,
    /// Logical screen height.
    pub height: u32,
    /// Logical screen background palette index.
    pub background_index: Option<u8>,
    /// Playback classification.
    pub animation: AnimationKind,
    /// Frames in stream order.
    pub frames: Vec<Frame>,
}

impl DecodedImage {
    /// Wrap a single full-screen raster.
    pub fn single(format: ImageFormat, raster: Raster, transparent: Option<u8>) -> Self {
        Self {
            format,
            width: raster.width(),
            height: raster.height(),
            background_index: None,
            animation: AnimationKind::Static,
            frames: vec![Frame {
                control: FrameControl {
                    transparent,
                    ..FrameControl::default()
                },
                raster: Some(raster),
            }],
        }
    }

    /// Loop count from the Netscape extension, if present.
    pub fn loop_count(&self) -> Option<u16> {
        match self.animation {
            AnimationKind::Looping(n) => Some(n),
            _ => None,
        }
    }

    /// Sum of all frame delays.
    pub fn total_delay_ms(&self) -> u64 {
        self.frames.iter().map(|f| f.control.delay_ms as u64).sum()
    }

    /// Convert every frame to a palettized raster ready for a display
    /// surface: alpha rasters are composited over the configured background
    /// and full-color rasters are quantized. Ignored frames stay ignored.
    ///
    /// Fails if any raster breaks the checks in [`Raster::validate`].
    pub fn to_display(&self, config: &LoaderConfig) -> Result<Vec<DisplayFrame>, DecodeError> {
        self.frames
            .iter()
            .map(|frame| {
                let Some(raster) = &frame.raster else {
                    return Ok(DisplayFrame {
                        control: frame.control,
                        pixels: None,
                        palette: Palette::from([]),
                    });
                };
                raster.validate()?;
                let (pixels, palette, transparent) = match raster {
                    Raster::Indexed {
                        pixels, palette, ..
                    } => (pixels.clone(), palette.clone(), frame.control.transparent),
                    Raster::Rgb { pixels, alpha } => {
                        let flat = match alpha {
                            Some(alpha) => composite(
                                pixels.as_ref(),
                                alpha.as_ref(),
                                &config.background,
                                config.display_gamma,
                            ),
                            None => pixels.clone(),
                        };
                        let q = quantize(flat.as_ref(), &config.quantize);
                        (q.indices, q.palette.into(), None)
                    }
                };
                Ok(DisplayFrame {
                    control: FrameControl {
                        transparent,
                        ..frame.control
                    },
                    pixels: Some(pixels),
                    palette,
                })
            })
            .collect()
    }
}

/// A palettized frame ready for a display surface.
#[derive(Clone, Debug, PartialEq)]
pub struct DisplayFrame {
    /// Placement and timing.
    pub control: FrameControl,
    /// Palette indices, `None` for ignored frames.
    pub pixels: Option<ImgVec<u8>>,
    /// Palette for `pixels`.
    pub palette: Palette,
}

/// Copy the top-left `width × height` corner of `src`.
pub(crate) fn crop<T: Copy>(src: ImgRef<'_, T>, width: usize, height: usize) -> ImgVec<T> {
    let width = width.min(src.width());
    let height = height.min(src.height());
    let mut out = Vec::with_capacity(width * height);
    for row in src.rows().take(height) {
        out.extend_from_slice(&row[..width]);
    }
    ImgVec::new(out, width, height)
}

/// Build a composite background from a raster, for tiling behind alpha
/// images.
pub fn background_from(raster: &Raster) -> Background {
    match raster {
        Raster::Indexed {
            pixels, palette, ..
        } => {
            let rgb = pixels
                .buf()
                .iter()
                .map(|&i| palette.get(i as usize).copied().unwrap_or_default())
                .collect();
            Background::Image(ImgVec::new(rgb, pixels.width(), pixels.height()))
        }
        Raster::Rgb { pixels, .. } => Background::Image(pixels.clone()),
    }
}
