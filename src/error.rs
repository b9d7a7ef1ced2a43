//! Decode error taxonomy.
//!
//! Every variant is terminal for the image being decoded. Running out of
//! buffered input is not an error; decoder steps report it as
//! [`Progress::NeedInput`](crate::decoder::Progress::NeedInput) instead.

use enough::StopReason;

use crate::limits::LimitExceeded;

/// Why an image load was aborted.
#[derive(Clone, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum DecodeError {
    /// The leading magic bytes do not name a format this decoder handles.
    BadMagic,
    /// Input ended (end-of-input was signalled) inside the named structure.
    Truncated(&'static str),
    /// A color table is missing, empty, or larger than 256 entries.
    InvalidColorTable,
    /// The LZW code stream references codes that cannot exist.
    CorruptLzw(&'static str),
    /// The deflate stream inside a GZF frame is corrupt.
    Deflate(String),
    /// A structurally valid feature this decoder does not implement.
    Unsupported(String),
    /// Any other parser invariant violation.
    Malformed(String),
    /// A configured resource limit was exceeded.
    Limit(LimitExceeded),
    /// The caller's stop token fired between steps.
    Stopped(StopReason),
    /// The PNG/JPEG bridge library rejected the stream.
    Bridge(String),
}

impl DecodeError {
    /// Whether this error comes from a corrupt compressed stream rather
    /// than a malformed container.
    pub fn is_corrupt_stream(&self) -> bool {
        matches!(self, Self::CorruptLzw(_) | Self::Deflate(_))
    }
}

impl core::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::BadMagic => f.write_str("not a recognized image signature"),
            Self::Truncated(what) => write!(f, "image data ends inside {what}"),
            Self::InvalidColorTable => f.write_str("indecipherable color table"),
            Self::CorruptLzw(why) => write!(f, "corrupt LZW stream: {why}"),
            Self::Deflate(msg) => write!(f, "corrupt deflate stream: {msg}"),
            Self::Unsupported(msg) => write!(f, "unsupported image feature: {msg}"),
            Self::Malformed(msg) => write!(f, "malformed image: {msg}"),
            Self::Limit(err) => write!(f, "{err}"),
            Self::Stopped(reason) => write!(f, "decode stopped: {reason:?}"),
            Self::Bridge(msg) => write!(f, "{msg}"),
        }
    }
}

impl std::error::Error for DecodeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Limit(err) => Some(err),
            _ => None,
        }
    }
}

impl From<LimitExceeded> for DecodeError {
    fn from(err: LimitExceeded) -> Self {
        Self::Limit(err)
    }
}

impl From<StopReason> for DecodeError {
    fn from(reason: StopReason) -> Self {
        Self::Stopped(reason)
    }
}

impl From<image::ImageError> for DecodeError {
    fn from(err: image::ImageError) -> Self {
        Self::Bridge(format!("{err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_messages() {
        assert_eq!(
            format!("{}", DecodeError::Truncated("logical screen descriptor")),
            "image data ends inside logical screen descriptor"
        );
        assert_eq!(
            format!("{}", DecodeError::CorruptLzw("code beyond table")),
            "corrupt LZW stream: code beyond table"
        );
    }

    #[test]
    fn limit_converts_and_chains() {
        use std::error::Error;
        let err: DecodeError = LimitExceeded::Width {
            actual: 9000,
            max: 4096,
        }
        .into();
        assert!(matches!(err, DecodeError::Limit(_)));
        assert!(err.source().is_some());
        assert_eq!(format!("{err}"), "width 9000 exceeds limit 4096");
    }

    #[test]
    fn corrupt_stream_classification() {
        assert!(DecodeError::CorruptLzw("x").is_corrupt_stream());
        assert!(DecodeError::Deflate("x".into()).is_corrupt_stream());
        assert!(!DecodeError::BadMagic.is_corrupt_stream());
    }
}
