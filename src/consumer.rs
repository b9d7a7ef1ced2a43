//! The receiving end of a load.
//!
//! [`ImageConsumer`] is what turns decoded rasters into something a page
//! can show. The loader calls out to it for exactly three things: building
//! a surface from a finished image, reporting a problem with the source,
//! and announcing that the load is over.
//!
//! # Contract
//!
//! - [`progress`](ImageConsumer::progress) may be called any number of
//!   times while a GIF/GZF frame is still arriving.
//! - [`build_surface`](ImageConsumer::build_surface) is called at most once:
//!   with the decoded image when the load completes, or with a placeholder
//!   when an [`ImageManager`](crate::ImageManager) has one for failed loads.
//! - [`warning`](ImageConsumer::warning) is called before the load aborts,
//!   and also for recoverable oddities.
//! - [`finish`](ImageConsumer::finish) is called exactly once, last, with
//!   the terminal status.

use core::fmt;

use crate::progressive::LoadStatus;
use crate::raw::{DecodedImage, FrameControl, Palette};

/// A partially decoded frame, offered for progressive display.
#[derive(Clone, Copy, Debug)]
pub struct Preview<'a> {
    /// Index of the frame within the image.
    pub frame: usize,
    /// Placement and timing of the frame.
    pub control: &'a FrameControl,
    /// Frame width in pixels.
    pub width: usize,
    /// Frame height in pixels.
    pub height: usize,
    /// Palette indices, row-major, not-yet-decoded rows filled.
    pub pixels: &'a [u8],
    /// Colors for `pixels`.
    pub palette: &'a Palette,
    /// Scanlines decoded so far.
    pub rows_decoded: usize,
}

/// Receives the results of one image load.
///
/// # Object safety
///
/// This trait is object-safe; loaders hold it as `&mut dyn ImageConsumer`.
pub trait ImageConsumer {
    /// Take ownership of a completely decoded image.
    fn build_surface(&mut self, source: &str, image: DecodedImage);

    /// Report a problem with `source`.
    fn warning(&mut self, source: &str, args: fmt::Arguments<'_>);

    /// A frame has grown since the last call.
    fn progress(&mut self, _source: &str, _preview: &Preview<'_>) {}

    /// The load reached a terminal status.
    fn finish(&mut self, _source: &str, _status: LoadStatus) {}
}

/// Consumer that keeps everything it is given.
#[derive(Debug, Default)]
pub struct Collector {
    /// Images passed to `build_surface`.
    pub images: Vec<(String, DecodedImage)>,
    /// Formatted warnings.
    pub warnings: Vec<String>,
    /// Rows reported by `progress`, per call.
    pub previews: Vec<usize>,
    /// Terminal statuses passed to `finish`.
    pub finished: Vec<(String, LoadStatus)>,
}

impl Collector {
    /// Empty collector.
    pub fn new() -> Self {
        Self::default()
    }
}

impl ImageConsumer for Collector {
    fn build_surface(&mut self, source: &str, image: DecodedImage) {
        self.images.push((source.to_owned(), image));
    }

    fn warning(&mut self, source: &str, args: fmt::Arguments<'_>) {
        self.warnings.push(format!("{source}: {args}"));
    }

    fn progress(&mut self, _source: &str, preview: &Preview<'_>) {
        self.previews.push(preview.rows_decoded);
    }

    fn finish(&mut self, source: &str, status: LoadStatus) {
        self.finished.push((source.to_owned(), status));
    }
}
