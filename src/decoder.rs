//! Decoder dispatch.
//!
//! Every supported format implements [`ImageDecoder`]: `init` until the
//! header is understood, `step` until the stream is done, then `finish`
//! once to take the decoded image. [`Decoder`] is the closed set of
//! implementations a loader can drive.

use crate::bridge::BridgeDecoder;
use crate::buffer::ImageBuffer;
use crate::config::LoaderConfig;
use crate::consumer::Preview;
use crate::error::DecodeError;
use crate::format::ImageFormat;
use crate::gif::{GifDecoder, GifOptions, GifVariant};
use crate::raw::DecodedImage;
use crate::text::{XbmDecoder, XpmDecoder};

/// Outcome of one `init` or `step` call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Progress {
    /// Input ran out or the step budget was spent; call again later with
    /// the same buffer.
    NeedInput,
    /// This phase is finished.
    Done,
}

/// Resumable decoder interface.
///
/// Implementations keep every bit of progress in `self`. When a call
/// returns [`Progress::NeedInput`] the buffer cursor sits at the start of
/// the structure that could not be read yet, so the same call can simply
/// be repeated once more input has arrived.
///
/// # Object safety
///
/// This trait is object-safe.
pub trait ImageDecoder {
    /// Format this decoder reads.
    fn format(&self) -> ImageFormat;

    /// Parse the header.
    fn init(&mut self, buf: &mut ImageBuffer) -> Result<Progress, DecodeError>;

    /// Decode more of the stream.
    fn step(&mut self, buf: &mut ImageBuffer) -> Result<Progress, DecodeError>;

    /// Take the decoded image. Called once, after `step` returned
    /// [`Progress::Done`].
    fn finish(&mut self) -> Result<DecodedImage, DecodeError>;

    /// The frame currently being decoded, if the format can show one early.
    fn preview(&self) -> Option<Preview<'_>> {
        None
    }
}

/// Move every byte the step window allows into `into`.
///
/// Returns `true` once the whole stream has been gathered.
pub(crate) fn gather(buf: &mut ImageBuffer, into: &mut Vec<u8>) -> bool {
    let mut chunk = [0u8; 4096];
    loop {
        let n = buf.read(&mut chunk);
        if n == 0 {
            break;
        }
        into.extend_from_slice(&chunk[..n]);
    }
    buf.is_exhausted()
}

/// One decoder per supported format.
pub enum Decoder {
    Gif(GifDecoder),
    Gzf(GifDecoder),
    Png(BridgeDecoder),
    Jpeg(BridgeDecoder),
    Xpm(XpmDecoder),
    Xbm(XbmDecoder),
}

impl Decoder {
    /// Decoder for `format`.
    pub fn new(format: ImageFormat, config: &LoaderConfig) -> Self {
        let gif = GifOptions {
            limits: config.limits,
            progressive_fill: config.progressive_fill,
        };
        match format {
            ImageFormat::Gif => Decoder::Gif(GifDecoder::new(GifVariant::Gif, gif)),
            ImageFormat::Gzf => Decoder::Gzf(GifDecoder::new(GifVariant::Gzf, gif)),
            ImageFormat::Png => Decoder::Png(BridgeDecoder::new(format, config.limits)),
            ImageFormat::Jpeg => Decoder::Jpeg(BridgeDecoder::new(format, config.limits)),
            ImageFormat::Xpm => Decoder::Xpm(XpmDecoder::new(config.limits)),
            ImageFormat::Xbm => Decoder::Xbm(XbmDecoder::new(config.limits)),
        }
    }

    /// Decoder for the buffer's declared or sniffed format.
    ///
    /// Returns `Ok(None)` while too few bytes have arrived to tell, and
    /// [`DecodeError::BadMagic`] once the stream is complete and matches
    /// nothing.
    pub fn for_buffer(buf: &ImageBuffer, config: &LoaderConfig) -> Result<Option<Self>, DecodeError> {
        match buf.format() {
            Some(format) => Ok(Some(Self::new(format, config))),
            None if buf.is_end_of_input() || buf.len() >= ImageFormat::DETECT_BYTES => {
                Err(DecodeError::BadMagic)
            }
            None => Ok(None),
        }
    }

    fn inner(&self) -> &dyn ImageDecoder {
        match self {
            Decoder::Gif(d) | Decoder::Gzf(d) => d,
            Decoder::Png(d) | Decoder::Jpeg(d) => d,
            Decoder::Xpm(d) => d,
            Decoder::Xbm(d) => d,
        }
    }

    fn inner_mut(&mut self) -> &mut dyn ImageDecoder {
        match self {
            Decoder::Gif(d) | Decoder::Gzf(d) => d,
            Decoder::Png(d) | Decoder::Jpeg(d) => d,
            Decoder::Xpm(d) => d,
            Decoder::Xbm(d) => d,
        }
    }
}

impl ImageDecoder for Decoder {
    fn format(&self) -> ImageFormat {
        self.inner().format()
    }

    fn init(&mut self, buf: &mut ImageBuffer) -> Result<Progress, DecodeError> {
        self.inner_mut().init(buf)
    }

    fn step(&mut self, buf: &mut ImageBuffer) -> Result<Progress, DecodeError> {
        self.inner_mut().step(buf)
    }

    fn finish(&mut self) -> Result<DecodedImage, DecodeError> {
        self.inner_mut().finish()
    }

    fn preview(&self) -> Option<Preview<'_>> {
        self.inner().preview()
    }
}

impl core::fmt::Debug for Decoder {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_tuple("Decoder").field(&self.format()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gif::tests::{GifBuilder, PALETTE4};

    #[test]
    fn dispatch_follows_sniffed_format() {
        let gif = GifBuilder::new(1, 1, &PALETTE4).frame(1, 1, &[0]).finish();
        let buf = ImageBuffer::from_complete(gif);
        let dec = Decoder::for_buffer(&buf, &LoaderConfig::default()).unwrap().unwrap();
        assert_eq!(dec.format(), ImageFormat::Gif);
    }

    #[test]
    fn dispatch_waits_for_magic() {
        let mut buf = ImageBuffer::new();
        buf.push(b"GI");
        assert!(Decoder::for_buffer(&buf, &LoaderConfig::default()).unwrap().is_none());
        buf.finish_input();
        assert_eq!(
            Decoder::for_buffer(&buf, &LoaderConfig::default()).unwrap_err(),
            DecodeError::BadMagic
        );
    }

    #[test]
    fn declared_type_wins() {
        let buf = ImageBuffer::new().with_format(ImageFormat::Xbm);
        let dec = Decoder::for_buffer(&buf, &LoaderConfig::default()).unwrap().unwrap();
        assert_eq!(dec.format(), ImageFormat::Xbm);
    }

    #[test]
    fn gather_respects_window() {
        let mut buf = ImageBuffer::from_complete(vec![7; 10]);
        let mut out = Vec::new();
        buf.open_window(4);
        assert!(!gather(&mut buf, &mut out));
        assert_eq!(out.len(), 4);
        buf.close_window();
        assert!(gather(&mut buf, &mut out));
        assert_eq!(out.len(), 10);
    }
}
