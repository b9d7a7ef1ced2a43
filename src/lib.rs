//! Progressive image decoding for an embedded HTML viewer.
//!
//! The crate turns image bytes, arriving a piece at a time, into palettized
//! rasters a display surface can be built from:
//!
//! - [`ImageBuffer`]: growable input with a read cursor and block reads
//! - [`lzw`]: resumable GIF-LZW decompression
//! - [`gif`]: the GIF/GZF container, frames, animation metadata
//! - [`interlace`]: four-pass row ordering and progressive row fill
//! - [`text`], [`bridge`]: XBM/XPM, and PNG/JPEG through `image`
//! - [`ProgressiveLoader`]: the suspendable per-image load state machine
//! - [`ImageManager`]: several loads in one host loop
//! - [`quantize()`](quantize::quantize): median cut and the 3/3/2 color cube
//! - [`composite()`](composite::composite): gamma-aware alpha compositing
//!
//! Nothing here blocks or spawns threads. The host pushes data into a
//! loader and calls [`step`](ProgressiveLoader::step) whenever it has time.
//! Results and problems go to an [`ImageConsumer`].
//!
//! ```
//! use mozimage::{Collector, LoadStatus, LoaderConfig, ProgressiveLoader, Unstoppable};
//!
//! let mut loader = ProgressiveLoader::new("spacer.gif", LoaderConfig::default());
//! let mut consumer = Collector::new();
//! loader.push_data(b"GIF89a\x01\x00\x01\x00");
//! assert_eq!(loader.step(&mut consumer, &Unstoppable), LoadStatus::Suspended);
//! ```

#![forbid(unsafe_code)]

pub mod bridge;
mod buffer;
pub mod composite;
mod config;
mod consumer;
mod decoder;
mod error;
mod format;
pub mod gif;
pub mod interlace;
mod limits;
pub mod lzw;
mod manager;
mod progressive;
pub mod quantize;
mod raw;
pub mod text;

pub use buffer::{ImageBuffer, MAX_BLOCK_LEN, Mark, ReadStatus};
pub use composite::Background;
pub use config::{LoaderConfig, QuantizeConfig, QuantizeMethod};
pub use consumer::{Collector, ImageConsumer, Preview};
pub use decoder::{Decoder, ImageDecoder, Progress};
pub use error::DecodeError;
pub use format::ImageFormat;
pub use limits::{LimitExceeded, ResourceLimits};
pub use manager::{FallbackImages, ImageManager, LoadId};
pub use progressive::{LoadStatus, ProgressiveLoader, load_complete};
pub use raw::{
    AnimationKind, ColorClass, DecodedImage, DisplayFrame, Disposal, Frame, FrameControl,
    MAX_PALETTE, Palette, Raster, background_from,
};

// Re-exports for hosts.
pub use almost_enough::Stopper;
pub use enough::{Stop, StopReason, Unstoppable};
pub use imgref::{Img, ImgRef, ImgVec};
pub use rgb;
pub use rgb::{RGB8, RGB16};
