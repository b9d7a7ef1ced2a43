//! PNG and JPEG through the `image` crate.
//!
//! These formats are handed to a complete decoder instead of being parsed
//! here, so the bridge gathers the whole stream first. Dimensions are read
//! and checked against the limits before any pixels are decoded.

use std::io::Cursor;

use imgref::ImgVec;
use rgb::RGB8;

use crate::buffer::ImageBuffer;
use crate::composite::is_opaque;
use crate::decoder::{ImageDecoder, Progress, gather};
use crate::error::DecodeError;
use crate::format::ImageFormat;
use crate::limits::ResourceLimits;
use crate::raw::{DecodedImage, Raster};

/// Buffering decoder for the formats `image` understands.
#[derive(Debug)]
pub struct BridgeDecoder {
    format: ImageFormat,
    limits: ResourceLimits,
    data: Vec<u8>,
    complete: bool,
}

impl BridgeDecoder {
    /// Bridge for PNG or JPEG.
    pub fn new(format: ImageFormat, limits: ResourceLimits) -> Self {
        Self {
            format,
            limits,
            data: Vec::new(),
            complete: false,
        }
    }

    fn image_format(&self) -> Result<image::ImageFormat, DecodeError> {
        match self.format {
            ImageFormat::Png => Ok(image::ImageFormat::Png),
            ImageFormat::Jpeg => Ok(image::ImageFormat::Jpeg),
            other => Err(DecodeError::Unsupported(format!("{other} is not bridged"))),
        }
    }
}

impl ImageDecoder for BridgeDecoder {
    fn format(&self) -> ImageFormat {
        self.format
    }

    fn init(&mut self, _buf: &mut ImageBuffer) -> Result<Progress, DecodeError> {
        Ok(Progress::Done)
    }

    fn step(&mut self, buf: &mut ImageBuffer) -> Result<Progress, DecodeError> {
        self.complete = gather(buf, &mut self.data);
        Ok(if self.complete {
            Progress::Done
        } else {
            Progress::NeedInput
        })
    }

    fn finish(&mut self) -> Result<DecodedImage, DecodeError> {
        if !self.complete {
            return Err(DecodeError::Truncated("image data"));
        }
        let format = self.image_format()?;
        let data = core::mem::take(&mut self.data);
        let raster = decode_rgb(&data, format, &self.limits)?;
        log::debug!(
            "{} bridged {}x{}{}",
            self.format,
            raster.width(),
            raster.height(),
            if raster.has_alpha() { " with alpha" } else { "" }
        );
        Ok(DecodedImage::single(self.format, raster, None))
    }
}

/// Decode a complete PNG or JPEG into an RGB raster.
///
/// An alpha plane is kept only when some pixel is not fully opaque.
pub fn decode_rgb(
    data: &[u8],
    format: image::ImageFormat,
    limits: &ResourceLimits,
) -> Result<Raster, DecodeError> {
    let (width, height) =
        image::ImageReader::with_format(Cursor::new(data), format).into_dimensions()?;
    limits.check_dimensions(width, height)?;

    let decoded = image::ImageReader::with_format(Cursor::new(data), format).decode()?;
    let (w, h) = (width as usize, height as usize);
    if !decoded.color().has_alpha() {
        let rgb = decoded.to_rgb8();
        let pixels = rgb
            .as_raw()
            .chunks_exact(3)
            .map(|c| RGB8::new(c[0], c[1], c[2]))
            .collect();
        return Ok(Raster::Rgb {
            pixels: ImgVec::new(pixels, w, h),
            alpha: None,
        });
    }

    let rgba = decoded.to_rgba8();
    let mut pixels = Vec::with_capacity(w * h);
    let mut alpha = Vec::with_capacity(w * h);
    for c in rgba.as_raw().chunks_exact(4) {
        pixels.push(RGB8::new(c[0], c[1], c[2]));
        alpha.push(c[3]);
    }
    let alpha = ImgVec::new(alpha, w, h);
    Ok(Raster::Rgb {
        pixels: ImgVec::new(pixels, w, h),
        alpha: (!is_opaque(alpha.as_ref())).then_some(alpha),
    })
}
