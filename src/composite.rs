//! Gamma-aware alpha compositing.
//!
//! Alpha rasters never reach a display surface directly: they are blended
//! over a solid color or a tiled background image here and then quantized.
//! Foreground samples are decoded with the inverse of the display encoding,
//! background samples with the fixed [`BACKGROUND_GAMMA`], and the linear
//! blend is re-encoded with exponent `VIEWING_GAMMA / display_gamma`.

use imgref::{ImgRef, ImgVec};
use rgb::RGB8;

/// Gamma the background samples are decoded with.
pub const BACKGROUND_GAMMA: f64 = 2.2222;

/// Viewing-condition gamma in the re-encode exponent.
pub const VIEWING_GAMMA: f64 = 1.2;

/// What an alpha raster is composited over.
#[derive(Clone, Debug, PartialEq)]
pub enum Background {
    /// One color everywhere.
    Solid(RGB8),
    /// An image repeated in both directions.
    Image(ImgVec<RGB8>),
}

impl Background {
    /// Background color under pixel `(x, y)`.
    pub fn sample(&self, x: usize, y: usize) -> RGB8 {
        match self {
            Background::Solid(c) => *c,
            Background::Image(img) if img.width() > 0 && img.height() > 0 => {
                img[(x % img.width(), y % img.height())]
            }
            Background::Image(_) => RGB8::new(0, 0, 0),
        }
    }
}

/// Per-channel transfer tables.
struct Gamma {
    fg: [f64; 256],
    bg: [f64; 256],
    encode: f64,
}

impl Gamma {
    fn new(display_gamma: f64) -> Self {
        let display_gamma = if display_gamma.is_finite() && display_gamma > 0.0 {
            display_gamma
        } else {
            crate::config::DEFAULT_DISPLAY_GAMMA
        };
        let encode = VIEWING_GAMMA / display_gamma;
        let mut fg = [0.0; 256];
        let mut bg = [0.0; 256];
        for i in 0..256 {
            let v = i as f64 / 255.0;
            fg[i] = v.powf(1.0 / encode);
            bg[i] = v.powf(BACKGROUND_GAMMA);
        }
        Self { fg, bg, encode }
    }

    fn opaque(&self, c: u8) -> u8 {
        to_byte(self.fg[c as usize].powf(self.encode))
    }

    fn blend(&self, fg: u8, bg: u8, alpha: u8) -> u8 {
        let a = alpha as f64 / 255.0;
        let linear = a * self.fg[fg as usize] + (1.0 - a) * self.bg[bg as usize];
        let out = to_byte(linear.powf(self.encode));
        // Keep the result within the endpoints of the blend.
        let top = self.opaque(fg);
        out.clamp(bg.min(top), bg.max(top))
    }
}

fn to_byte(v: f64) -> u8 {
    (v * 255.0).round().clamp(0.0, 255.0) as u8
}

/// Flatten `pixels` with straight `alpha` over `background`.
///
/// Pixels without a matching alpha sample are treated as opaque.
pub fn composite(
    pixels: ImgRef<'_, RGB8>,
    alpha: ImgRef<'_, u8>,
    background: &Background,
    display_gamma: f64,
) -> ImgVec<RGB8> {
    let gamma = Gamma::new(display_gamma);
    let mut out = Vec::with_capacity(pixels.width() * pixels.height());
    let mut alpha_rows = alpha.rows();
    for (y, row) in pixels.rows().enumerate() {
        let alpha_row = alpha_rows.next().unwrap_or(&[]);
        for (x, &fg) in row.iter().enumerate() {
            let a = alpha_row.get(x).copied().unwrap_or(255);
            let px = match a {
                0 => background.sample(x, y),
                255 => RGB8::new(gamma.opaque(fg.r), gamma.opaque(fg.g), gamma.opaque(fg.b)),
                _ => {
                    let bg = background.sample(x, y);
                    RGB8::new(
                        gamma.blend(fg.r, bg.r, a),
                        gamma.blend(fg.g, bg.g, a),
                        gamma.blend(fg.b, bg.b, a),
                    )
                }
            };
            out.push(px);
        }
    }
    ImgVec::new(out, pixels.width(), pixels.height())
}

/// Whether every alpha sample is fully opaque.
pub fn is_opaque(alpha: ImgRef<'_, u8>) -> bool {
    alpha.pixels().all(|a| a == 255)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn one(fg: RGB8, a: u8, bg: &Background) -> RGB8 {
        let px = ImgVec::new(vec![fg], 1, 1);
        let alpha = ImgVec::new(vec![a], 1, 1);
        composite(px.as_ref(), alpha.as_ref(), bg, 2.2).buf()[0]
    }

    #[test]
    fn transparent_is_exact_background() {
        let bg = Background::Solid(RGB8::new(12, 34, 56));
        assert_eq!(one(RGB8::new(200, 200, 200), 0, &bg), RGB8::new(12, 34, 56));
    }

    #[test]
    fn opaque_round_trips_foreground() {
        let bg = Background::Solid(RGB8::new(0, 0, 0));
        for v in [0u8, 1, 64, 128, 200, 255] {
            let out = one(RGB8::new(v, v, v), 255, &bg);
            assert!((out.r as i16 - v as i16).abs() <= 1, "{v} -> {}", out.r);
        }
    }

    #[test]
    fn partial_alpha_is_between_and_monotonic() {
        let bg = Background::Solid(RGB8::new(20, 128, 250));
        let fg = RGB8::new(240, 200, 10);
        let mut prev = one(fg, 1, &bg);
        for a in [32u8, 64, 128, 192, 254] {
            let out = one(fg, a, &bg);
            assert!(out.r >= prev.r && out.g >= prev.g && out.b <= prev.b);
            prev = out;
        }
        let mid = one(fg, 128, &bg);
        assert!(mid.r > 20 && mid.r < 240);
        assert!(mid.g > 128 && mid.g < 200);
        assert!(mid.b > 10 && mid.b < 250);
    }

    #[test]
    fn image_background_tiles() {
        let tile = ImgVec::new(
            vec![RGB8::new(1, 1, 1), RGB8::new(2, 2, 2), RGB8::new(3, 3, 3), RGB8::new(4, 4, 4)],
            2,
            2,
        );
        let bg = Background::Image(tile);
        let px = ImgVec::new(vec![RGB8::new(0, 0, 0); 9], 3, 3);
        let alpha = ImgVec::new(vec![0u8; 9], 3, 3);
        let out = composite(px.as_ref(), alpha.as_ref(), &bg, 2.2);
        let r: Vec<u8> = out.buf().iter().map(|p| p.r).collect();
        assert_eq!(r, vec![1, 2, 1, 3, 4, 3, 1, 2, 1]);
    }

    #[test]
    fn opacity_check() {
        assert!(is_opaque(ImgVec::new(vec![255u8; 4], 2, 2).as_ref()));
        assert!(!is_opaque(ImgVec::new(vec![255u8, 3], 2, 1).as_ref()));
    }
}
