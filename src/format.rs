//! Image format detection.

/// Formats the loader can decode.
#[non_exhaustive]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ImageFormat {
    Gif,
    /// GIF framing with deflate-compressed raster data.
    Gzf,
    Png,
    Jpeg,
    Xpm,
    Xbm,
}

impl ImageFormat {
    /// Every format, in detection order.
    pub const ALL: [ImageFormat; 6] = [
        ImageFormat::Gif,
        ImageFormat::Gzf,
        ImageFormat::Png,
        ImageFormat::Jpeg,
        ImageFormat::Xpm,
        ImageFormat::Xbm,
    ];

    /// Detect format from magic bytes. Returns `None` if unrecognized
    /// or if too few bytes are available to decide.
    pub fn detect(data: &[u8]) -> Option<Self> {
        if data.len() >= 6 && data[3] == b'8' && (data[4] == b'7' || data[4] == b'9') && data[5] == b'a'
        {
            match &data[..3] {
                b"GIF" => return Some(ImageFormat::Gif),
                b"GZF" => return Some(ImageFormat::Gzf),
                _ => {}
            }
        }

        if data.len() >= 8 && data[..8] == [0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A] {
            return Some(ImageFormat::Png);
        }

        if data.len() >= 3 && data[0] == 0xFF && data[1] == 0xD8 && data[2] == 0xFF {
            return Some(ImageFormat::Jpeg);
        }

        let text = skip_ascii_whitespace(data);
        if text.starts_with(b"/* XPM */") || text.starts_with(b"! XPM2") {
            return Some(ImageFormat::Xpm);
        }
        if text.starts_with(b"#define") {
            return Some(ImageFormat::Xbm);
        }

        None
    }

    /// Detect format from a file extension (case-insensitive).
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "gif" => Some(ImageFormat::Gif),
            "gzf" => Some(ImageFormat::Gzf),
            "png" => Some(ImageFormat::Png),
            "jpg" | "jpeg" | "jpe" | "jfif" => Some(ImageFormat::Jpeg),
            "xpm" => Some(ImageFormat::Xpm),
            "xbm" => Some(ImageFormat::Xbm),
            _ => None,
        }
    }

    /// Detect format from a MIME type.
    pub fn from_mime_type(mime: &str) -> Option<Self> {
        ImageFormat::ALL
            .into_iter()
            .find(|f| f.mime_type().eq_ignore_ascii_case(mime))
    }

    /// MIME type string.
    pub fn mime_type(self) -> &'static str {
        match self {
            ImageFormat::Gif => "image/gif",
            ImageFormat::Gzf => "image/x-gzf",
            ImageFormat::Png => "image/png",
            ImageFormat::Jpeg => "image/jpeg",
            ImageFormat::Xpm => "image/x-xpixmap",
            ImageFormat::Xbm => "image/x-xbitmap",
        }
    }

    /// Whether the decoder produces pixels before all input has arrived.
    pub fn is_progressive(self) -> bool {
        matches!(self, ImageFormat::Gif | ImageFormat::Gzf)
    }

    /// Whether the format can carry more than one frame.
    pub fn supports_animation(self) -> bool {
        matches!(self, ImageFormat::Gif | ImageFormat::Gzf)
    }

    /// Whether the format can carry a full alpha channel (rather than a
    /// single transparent palette index).
    pub fn supports_alpha_channel(self) -> bool {
        matches!(self, ImageFormat::Png)
    }

    /// Bytes needed before [`detect`](Self::detect) can decide.
    pub const DETECT_BYTES: usize = 16;
}

fn skip_ascii_whitespace(data: &[u8]) -> &[u8] {
    let start = data
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(data.len());
    &data[start..]
}

impl core::fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(match self {
            ImageFormat::Gif => "GIF",
            ImageFormat::Gzf => "GZF",
            ImageFormat::Png => "PNG",
            ImageFormat::Jpeg => "JPEG",
            ImageFormat::Xpm => "XPM",
            ImageFormat::Xbm => "XBM",
        })
    }
}
