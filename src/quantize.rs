//! Palette reduction for full-color rasters.
//!
//! [`quantize`] first tries to collect the exact set of colors; rasters that
//! already fit the target palette are mapped losslessly. Everything else
//! goes through median cut over a hashed histogram, or through the fixed
//! 3/3/2 color cube with error diffusion when that method is selected.

use std::collections::HashMap;

use imgref::{ImgRef, ImgVec};
use rgb::RGB8;

use crate::config::{QuantizeConfig, QuantizeMethod};
use crate::raw::MAX_PALETTE;

/// Channel weights used to pick the split axis.
const LUMA: [f64; 3] = [0.299, 0.587, 0.114];

/// A quantized raster.
#[derive(Clone, Debug, PartialEq)]
pub struct Quantized {
    /// At most the requested number of colors.
    pub palette: Vec<RGB8>,
    /// One palette index per source pixel.
    pub indices: ImgVec<u8>,
}

fn pack(c: RGB8) -> u32 {
    (c.r as u32) << 16 | (c.g as u32) << 8 | c.b as u32
}

fn unpack(v: u32) -> RGB8 {
    RGB8::new((v >> 16) as u8, (v >> 8) as u8, v as u8)
}

/// Reduce `pixels` to a palette of at most `config.max_colors` entries.
pub fn quantize(pixels: ImgRef<'_, RGB8>, config: &QuantizeConfig) -> Quantized {
    let target = config.target_colors();
    if let Some(q) = exact(pixels, target) {
        log::trace!("{} distinct colors fit without reduction", q.palette.len());
        return q;
    }
    match config.method {
        QuantizeMethod::ColorCube if target == MAX_PALETTE => color_cube(pixels),
        _ => median_cut(pixels, target, config.histogram_limit),
    }
}

/// Map `pixels` losslessly if they use at most `target` distinct colors.
pub fn exact(pixels: ImgRef<'_, RGB8>, target: usize) -> Option<Quantized> {
    let mut colors: Vec<u32> = Vec::new();
    for px in pixels.pixels() {
        let key = pack(px);
        if let Err(at) = colors.binary_search(&key) {
            if colors.len() == target {
                return None;
            }
            colors.insert(at, key);
        }
    }
    let indices = pixels
        .pixels()
        .map(|px| colors.binary_search(&pack(px)).unwrap_or(0) as u8)
        .collect();
    Some(Quantized {
        palette: colors.into_iter().map(unpack).collect(),
        indices: ImgVec::new(indices, pixels.width(), pixels.height()),
    })
}

/// One histogram bucket: all source colors that agree at the current
/// precision.
#[derive(Clone, Copy, Debug, Default)]
struct Bucket {
    key: u32,
    count: u64,
    sum: [u64; 3],
}

impl Bucket {
    fn mean(&self) -> [u8; 3] {
        let n = self.count.max(1);
        [
            ((self.sum[0] + n / 2) / n) as u8,
            ((self.sum[1] + n / 2) / n) as u8,
            ((self.sum[2] + n / 2) / n) as u8,
        ]
    }
}

/// Build a histogram with at most `limit` buckets, halving color precision
/// until it fits.
fn histogram(pixels: ImgRef<'_, RGB8>, limit: usize) -> Vec<Bucket> {
    let mut shift = 0u32;
    loop {
        let mask = (0xffu32 << shift) & 0xff;
        let mask = mask << 16 | mask << 8 | mask;
        let mut map: HashMap<u32, Bucket> = HashMap::new();
        let mut overflowed = false;
        for px in pixels.pixels() {
            let key = pack(px) & mask;
            let entry = map.entry(key).or_insert(Bucket {
                key,
                ..Bucket::default()
            });
            entry.count += 1;
            entry.sum[0] += px.r as u64;
            entry.sum[1] += px.g as u64;
            entry.sum[2] += px.b as u64;
            if map.len() > limit && shift < 7 {
                overflowed = true;
                break;
            }
        }
        if !overflowed {
            let mut buckets: Vec<Bucket> = map.into_values().collect();
            buckets.sort_unstable_by_key(|b| b.key);
            if shift > 0 {
                log::debug!("histogram reduced to {} bits per channel", 8 - shift);
            }
            return buckets;
        }
        shift += 1;
    }
}

#[derive(Clone, Copy, Debug)]
struct ColorBox {
    start: usize,
    end: usize,
    count: u64,
}

impl ColorBox {
    fn splittable(&self) -> bool {
        self.end - self.start >= 2
    }
}

/// Channel with the largest luminance-weighted range.
fn widest_axis(buckets: &[Bucket]) -> usize {
    let mut lo = [255u8; 3];
    let mut hi = [0u8; 3];
    for b in buckets {
        let m = b.mean();
        for c in 0..3 {
            lo[c] = lo[c].min(m[c]);
            hi[c] = hi[c].max(m[c]);
        }
    }
    let mut best = 0;
    let mut best_range = -1.0;
    for c in 0..3 {
        let range = (hi[c] - lo[c]) as f64 * LUMA[c];
        if range > best_range {
            best = c;
            best_range = range;
        }
    }
    best
}

fn split(buckets: &mut [Bucket], cbox: ColorBox) -> (ColorBox, ColorBox) {
    let slice = &mut buckets[cbox.start..cbox.end];
    let axis = widest_axis(slice);
    slice.sort_by_key(|b| (b.mean()[axis], b.key));

    // First index where the running pixel count reaches half the box.
    let half = cbox.count.div_ceil(2);
    let mut running = 0;
    let mut at = slice.len() - 1;
    for (i, b) in slice.iter().enumerate() {
        running += b.count;
        if running >= half {
            at = i + 1;
            break;
        }
    }
    let at = at.clamp(1, slice.len() - 1);
    let left_count: u64 = slice[..at].iter().map(|b| b.count).sum();
    let mid = cbox.start + at;
    (
        ColorBox {
            start: cbox.start,
            end: mid,
            count: left_count,
        },
        ColorBox {
            start: mid,
            end: cbox.end,
            count: cbox.count - left_count,
        },
    )
}

fn representative(buckets: &[Bucket]) -> RGB8 {
    let mut sum = [0u64; 3];
    let mut n = 0u64;
    for b in buckets {
        n += b.count;
        for c in 0..3 {
            sum[c] += b.sum[c];
        }
    }
    let n = n.max(1);
    RGB8::new(
        ((sum[0] + n / 2) / n) as u8,
        ((sum[1] + n / 2) / n) as u8,
        ((sum[2] + n / 2) / n) as u8,
    )
}

/// Choose a palette of at most `target` colors by median cut.
pub fn median_cut_palette(pixels: ImgRef<'_, RGB8>, target: usize, histogram_limit: usize) -> Vec<RGB8> {
    let target = target.clamp(1, MAX_PALETTE);
    let mut buckets = histogram(pixels, histogram_limit.max(target));
    if buckets.is_empty() {
        return Vec::new();
    }
    let total = buckets.iter().map(|b| b.count).sum();
    let mut boxes = vec![ColorBox {
        start: 0,
        end: buckets.len(),
        count: total,
    }];
    while boxes.len() < target {
        // Most populated splittable box; the earliest wins ties.
        let Some((i, _)) = boxes
            .iter()
            .enumerate()
            .filter(|(_, b)| b.splittable())
            .fold(None::<(usize, u64)>, |best, (i, b)| match best {
                Some((_, count)) if count >= b.count => best,
                _ => Some((i, b.count)),
            })
        else {
            break;
        };
        let (left, right) = split(&mut buckets, boxes[i]);
        boxes[i] = left;
        boxes.insert(i + 1, right);
    }
    boxes
        .iter()
        .map(|b| representative(&buckets[b.start..b.end]))
        .collect()
}

fn distance(a: RGB8, b: RGB8) -> u32 {
    let dr = a.r as i32 - b.r as i32;
    let dg = a.g as i32 - b.g as i32;
    let db = a.b as i32 - b.b as i32;
    (dr * dr + dg * dg + db * db) as u32
}

/// Index of the palette entry nearest to `color`.
pub fn nearest(palette: &[RGB8], color: RGB8) -> u8 {
    let mut best = 0;
    let mut best_d = u32::MAX;
    for (i, &p) in palette.iter().enumerate() {
        let d = distance(p, color);
        if d < best_d {
            best = i;
            best_d = d;
            if d == 0 {
                break;
            }
        }
    }
    best as u8
}

/// Map every pixel to its nearest palette entry.
pub fn remap(pixels: ImgRef<'_, RGB8>, palette: &[RGB8]) -> ImgVec<u8> {
    let mut cache: HashMap<u32, u8> = HashMap::new();
    let indices = pixels
        .pixels()
        .map(|px| *cache.entry(pack(px)).or_insert_with(|| nearest(palette, px)))
        .collect();
    ImgVec::new(indices, pixels.width(), pixels.height())
}

fn median_cut(pixels: ImgRef<'_, RGB8>, target: usize, histogram_limit: usize) -> Quantized {
    let palette = median_cut_palette(pixels, target, histogram_limit);
    let indices = remap(pixels, &palette);
    log::debug!("median cut chose {} colors", palette.len());
    Quantized { palette, indices }
}

/// The 256-entry 3/3/2 color cube.
pub fn cube_palette() -> Vec<RGB8> {
    (0..=255u8)
        .map(|i| {
            RGB8::new(
                level(i >> 5, 7),
                level((i >> 2) & 0x07, 7),
                level(i & 0x03, 3),
            )
        })
        .collect()
}

fn level(step: u8, max: u8) -> u8 {
    ((step as u32 * 255 + max as u32 / 2) / max as u32) as u8
}

fn cube_index(c: [i32; 3]) -> (u8, [i32; 3]) {
    let q = |v: i32, max: i32| ((v.clamp(0, 255) * max + 127) / 255) as u8;
    let (r, g, b) = (q(c[0], 7), q(c[1], 7), q(c[2], 3));
    let out = [level(r, 7) as i32, level(g, 7) as i32, level(b, 3) as i32];
    ((r << 5) | (g << 2) | b, out)
}

/// Map `pixels` onto the 3/3/2 cube with Floyd-Steinberg error diffusion
/// (7/16 right, 3/16 below-left, 5/16 below, 1/16 below-right).
pub fn color_cube(pixels: ImgRef<'_, RGB8>) -> Quantized {
    let width = pixels.width();
    let mut indices = Vec::with_capacity(width * pixels.height());
    // Error rows padded by one pixel on each side.
    let mut cur = vec![[0i32; 3]; width + 2];
    let mut next = vec![[0i32; 3]; width + 2];
    for row in pixels.rows() {
        for (x, px) in row.iter().enumerate() {
            let e = cur[x + 1];
            let want = [
                px.r as i32 + e[0] / 16,
                px.g as i32 + e[1] / 16,
                px.b as i32 + e[2] / 16,
            ];
            let (index, got) = cube_index(want);
            indices.push(index);
            for c in 0..3 {
                let err = want[c].clamp(0, 255) - got[c];
                cur[x + 2][c] += err * 7;
                next[x][c] += err * 3;
                next[x + 1][c] += err * 5;
                next[x + 2][c] += err;
            }
        }
        core::mem::swap(&mut cur, &mut next);
        next.iter_mut().for_each(|e| *e = [0; 3]);
    }
    Quantized {
        palette: cube_palette(),
        indices: ImgVec::new(indices, width, pixels.height()),
    }
}
