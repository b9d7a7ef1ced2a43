//! X11 text image formats.
//!
//! XBM bitmaps and XPM pixmaps are C source fragments, so nothing useful
//! can be decoded before the closing brace arrives. Both decoders gather the
//! whole stream through the step window and parse it in one go.

use imgref::ImgVec;
use rgb::RGB8;

use crate::buffer::ImageBuffer;
use crate::decoder::{ImageDecoder, Progress, gather};
use crate::error::DecodeError;
use crate::format::ImageFormat;
use crate::limits::ResourceLimits;
use crate::raw::{ColorClass, DecodedImage, MAX_PALETTE, Palette, Raster};

fn malformed(msg: impl Into<String>) -> DecodeError {
    DecodeError::Malformed(msg.into())
}

/// Decoder for XBM bitmaps.
#[derive(Debug)]
pub struct XbmDecoder {
    limits: ResourceLimits,
    data: Vec<u8>,
    complete: bool,
}

impl XbmDecoder {
    pub fn new(limits: ResourceLimits) -> Self {
        Self {
            limits,
            data: Vec::new(),
            complete: false,
        }
    }
}

impl ImageDecoder for XbmDecoder {
    fn format(&self) -> ImageFormat {
        ImageFormat::Xbm
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
            return Err(DecodeError::Truncated("bitmap"));
        }
        let text = String::from_utf8_lossy(&self.data);
        let raster = parse_xbm(&text, &self.limits)?;
        self.data = Vec::new();
        Ok(DecodedImage::single(ImageFormat::Xbm, raster, Some(0)))
    }
}

/// Parse an XBM bitmap: index 0 is the (transparent) background, index 1
/// the black foreground.
pub fn parse_xbm(text: &str, limits: &ResourceLimits) -> Result<Raster, DecodeError> {
    let mut width = None;
    let mut height = None;
    for line in text.lines() {
        let mut words = line.split_whitespace();
        if words.next() != Some("#define") {
            continue;
        }
        let (Some(name), Some(value)) = (words.next(), words.next()) else {
            continue;
        };
        let value: u32 = value
            .parse()
            .map_err(|_| malformed(format!("bad value in #define {name}")))?;
        if name.ends_with("_width") {
            width = Some(value);
        } else if name.ends_with("_height") {
            height = Some(value);
        }
    }
    let (Some(width), Some(height)) = (width, height) else {
        return Err(malformed("missing _width or _height"));
    };
    if width == 0 || height == 0 {
        return Err(malformed("empty bitmap"));
    }
    limits.check_dimensions(width, height)?;

    let open = text.find('{').ok_or_else(|| malformed("missing bitmap data"))?;
    let words16 = text[..open].contains("short");
    let body = &text[open + 1..];
    let body = &body[..body.find('}').unwrap_or(body.len())];
    let bits_per_word = if words16 { 16 } else { 8 };

    let (w, h) = (width as usize, height as usize);
    let words_per_row = w.div_ceil(bits_per_word);
    let needed = words_per_row
        .checked_mul(h)
        .ok_or_else(|| malformed(format!("bitmap {width}x{height} out of range")))?;
    let tokens: Vec<&str> = body
        .split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .collect();
    if tokens.len() < needed {
        return Err(DecodeError::Truncated("bitmap data"));
    }
    let mut words = Vec::with_capacity(needed);
    for token in tokens.into_iter().take(needed) {
        let hex = token
            .strip_prefix("0x")
            .or_else(|| token.strip_prefix("0X"))
            .unwrap_or(token);
        let v = u16::from_str_radix(hex, 16)
            .map_err(|_| malformed(format!("bad bitmap word {token:?}")))?;
        words.push(v);
    }

    let mut pixels = Vec::with_capacity(w * h);
    for row in words.chunks_exact(words_per_row).take(h) {
        for x in 0..w {
            let word = row[x / bits_per_word];
            pixels.push(((word >> (x % bits_per_word)) & 1) as u8);
        }
    }
    let palette: Palette = [RGB8::new(255, 255, 255), RGB8::new(0, 0, 0)].into();
    Ok(Raster::Indexed {
        pixels: ImgVec::new(pixels, w, h),
        palette,
        class: ColorClass::Grayscale,
    })
}

/// Decoder for XPM pixmaps (XPM3 C arrays and plain XPM2).
#[derive(Debug)]
pub struct XpmDecoder {
    limits: ResourceLimits,
    data: Vec<u8>,
    complete: bool,
}

impl XpmDecoder {
    pub fn new(limits: ResourceLimits) -> Self {
        Self {
            limits,
            data: Vec::new(),
            complete: false,
        }
    }
}

impl ImageDecoder for XpmDecoder {
    fn format(&self) -> ImageFormat {
        ImageFormat::Xpm
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
            return Err(DecodeError::Truncated("pixmap"));
        }
        let text = String::from_utf8_lossy(&self.data);
        let (raster, transparent) = parse_xpm(&text, &self.limits)?;
        self.data = Vec::new();
        Ok(DecodedImage::single(ImageFormat::Xpm, raster, transparent))
    }
}

/// The quoted strings of an XPM3 array, or the lines of an XPM2 file.
fn xpm_lines(text: &str) -> Vec<&str> {
    let trimmed = text.trim_start();
    if let Some(rest) = trimmed.strip_prefix("! XPM2") {
        return rest.lines().filter(|l| !l.is_empty()).collect();
    }
    let mut out = Vec::new();
    let mut rest = text;
    loop {
        let comment = rest.find("/*");
        let quote = rest.find('"');
        match (comment, quote) {
            (Some(c), Some(q)) if c < q => match rest[c + 2..].find("*/") {
                Some(end) => rest = &rest[c + 2 + end + 2..],
                None => break,
            },
            (_, Some(q)) => {
                let body = &rest[q + 1..];
                let Some(end) = body.find('"') else {
                    break;
                };
                out.push(&body[..end]);
                rest = &body[end + 1..];
            }
            _ => break,
        }
    }
    out
}

/// What a color key maps to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum XpmColor {
    Rgb(RGB8),
    None,
}

const NAMED: &[(&str, [u8; 3])] = &[
    ("black", [0, 0, 0]),
    ("white", [255, 255, 255]),
    ("red", [255, 0, 0]),
    ("green", [0, 255, 0]),
    ("blue", [0, 0, 255]),
    ("yellow", [255, 255, 0]),
    ("cyan", [0, 255, 255]),
    ("magenta", [255, 0, 255]),
    ("gray", [190, 190, 190]),
    ("grey", [190, 190, 190]),
    ("darkgray", [169, 169, 169]),
    ("darkgrey", [169, 169, 169]),
    ("lightgray", [211, 211, 211]),
    ("lightgrey", [211, 211, 211]),
    ("orange", [255, 165, 0]),
    ("brown", [165, 42, 42]),
    ("navy", [0, 0, 128]),
    ("maroon", [176, 48, 96]),
    ("purple", [160, 32, 240]),
];

fn parse_color(spec: &str) -> Option<XpmColor> {
    if spec.eq_ignore_ascii_case("none") {
        return Some(XpmColor::None);
    }
    if let Some(hex) = spec.strip_prefix('#') {
        let digits = hex.len() / 3;
        if digits == 0 || hex.len() % 3 != 0 || digits > 4 {
            return None;
        }
        let channel = |i: usize| -> Option<u8> {
            let part = hex.get(i * digits..(i + 1) * digits)?;
            let v = u16::from_str_radix(part, 16).ok()?;
            // Scale to 8 bits from however many hex digits were given.
            Some(match digits {
                1 => (v * 17) as u8,
                2 => v as u8,
                3 => (v >> 4) as u8,
                _ => (v >> 8) as u8,
            })
        };
        return Some(XpmColor::Rgb(RGB8::new(channel(0)?, channel(1)?, channel(2)?)));
    }
    let squashed: String = spec
        .chars()
        .filter(|c| !c.is_whitespace())
        .map(|c| c.to_ascii_lowercase())
        .collect();
    NAMED
        .iter()
        .find(|(name, _)| *name == squashed)
        .map(|(_, [r, g, b])| XpmColor::Rgb(RGB8::new(*r, *g, *b)))
}

/// Pick the best color out of the key/value pairs after a color's chars.
fn color_definition(def: &str) -> Option<XpmColor> {
    const KEYS: [&str; 5] = ["c", "g", "g4", "m", "s"];
    let words: Vec<&str> = def.split_whitespace().collect();
    let mut found: Vec<(&str, String)> = Vec::new();
    let mut i = 0;
    while i < words.len() {
        if KEYS.contains(&words[i]) && i + 1 < words.len() {
            let key = words[i];
            let mut j = i + 1;
            let mut value = words[j].to_owned();
            j += 1;
            while j < words.len() && !KEYS.contains(&words[j]) {
                value.push(' ');
                value.push_str(words[j]);
                j += 1;
            }
            found.push((key, value));
            i = j;
        } else {
            i += 1;
        }
    }
    ["c", "g", "g4", "m"].iter().find_map(|want| {
        found
            .iter()
            .find(|(k, _)| k == want)
            .and_then(|(_, v)| parse_color(v))
    })
}

/// Parse an XPM pixmap. Returns the raster and its transparent index.
///
/// Pixmaps with more than 256 colors come back as RGB, with an alpha
/// plane when any color is `None`.
pub fn parse_xpm(text: &str, limits: &ResourceLimits) -> Result<(Raster, Option<u8>), DecodeError> {
    let lines = xpm_lines(text);
    let header = lines.first().ok_or_else(|| malformed("missing XPM header"))?;
    let values: Vec<usize> = header
        .split_whitespace()
        .take(4)
        .map(|v| v.parse().map_err(|_| malformed(format!("bad XPM header {header:?}"))))
        .collect::<Result<_, _>>()?;
    let [width, height, ncolors, cpp] = values[..] else {
        return Err(malformed(format!("short XPM header {header:?}")));
    };
    if cpp == 0 || ncolors == 0 {
        return Err(DecodeError::InvalidColorTable);
    }
    let too_large = || malformed(format!("XPM header {header:?} out of range"));
    let (w32, h32) = (
        u32::try_from(width).map_err(|_| too_large())?,
        u32::try_from(height).map_err(|_| too_large())?,
    );
    limits.check_dimensions(w32, h32)?;
    let body_end = ncolors
        .checked_add(height)
        .and_then(|n| n.checked_add(1))
        .ok_or_else(too_large)?;
    if lines.len() < body_end {
        return Err(DecodeError::Truncated("pixmap data"));
    }
    let row_len = width.checked_mul(cpp).ok_or_else(too_large)?;
    if lines[1 + ncolors..body_end].iter().any(|l| l.len() < row_len) {
        return Err(DecodeError::Truncated("pixmap row"));
    }

    let mut keys: Vec<&str> = Vec::with_capacity(ncolors);
    let mut colors: Vec<XpmColor> = Vec::with_capacity(ncolors);
    for line in &lines[1..=ncolors] {
        let key = line.get(..cpp).ok_or(DecodeError::InvalidColorTable)?;
        let color = color_definition(&line[cpp..]).unwrap_or_else(|| {
            log::debug!("unknown XPM color {:?}, using black", line[cpp..].trim());
            XpmColor::Rgb(RGB8::new(0, 0, 0))
        });
        keys.push(key);
        colors.push(color);
    }
    let mut order: Vec<usize> = (0..ncolors).collect();
    order.sort_by_key(|&i| keys[i]);
    let lookup = |k: &str| -> Option<usize> {
        order
            .binary_search_by(|&i| keys[i].cmp(k))
            .ok()
            .map(|at| order[at])
    };

    let mut indices = Vec::with_capacity(width * height);
    for line in &lines[1 + ncolors..body_end] {
        for x in 0..width {
            let key = line
                .get(x * cpp..(x + 1) * cpp)
                .ok_or(DecodeError::Truncated("pixmap row"))?;
            let index = lookup(key)
                .ok_or_else(|| malformed(format!("pixel key {key:?} not in color table")))?;
            indices.push(index);
        }
    }

    let transparent = colors.iter().position(|c| *c == XpmColor::None);
    if ncolors <= MAX_PALETTE {
        let palette: Palette = colors
            .iter()
            .map(|c| match c {
                XpmColor::Rgb(rgb) => *rgb,
                XpmColor::None => RGB8::new(0, 0, 0),
            })
            .collect();
        let class = if palette.iter().all(|c| c.r == c.g && c.g == c.b) {
            ColorClass::Grayscale
        } else {
            ColorClass::Indexed
        };
        let pixels = indices.into_iter().map(|i| i as u8).collect();
        return Ok((
            Raster::Indexed {
                pixels: ImgVec::new(pixels, width, height),
                palette,
                class,
            },
            transparent.map(|t| t as u8),
        ));
    }

    log::debug!("XPM with {ncolors} colors decoded as RGB");
    let rgb = indices
        .iter()
        .map(|&i| match colors[i] {
            XpmColor::Rgb(c) => c,
            XpmColor::None => RGB8::new(0, 0, 0),
        })
        .collect();
    let alpha = transparent.map(|_| {
        let plane = indices
            .iter()
            .map(|&i| if colors[i] == XpmColor::None { 0 } else { 255 })
            .collect();
        ImgVec::new(plane, width, height)
    });
    Ok((
        Raster::Rgb {
            pixels: ImgVec::new(rgb, width, height),
            alpha,
        },
        None,
    ))
}
