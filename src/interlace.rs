//! Scanline ordering for sequential and four-pass interlaced rasters.
//!
//! GIF interlacing stores every 8th row starting at 0, then every 8th row
//! starting at 4, then every 4th starting at 2, then every 2nd starting at 1.
//! [`Canvas`] accepts decoded pixels in stream order and places each row
//! where it belongs, so a partially decoded image is always displayable.

use imgref::ImgVec;

/// `(first row, row step)` for each interlace pass.
const PASSES: [(usize, usize); 4] = [(0, 8), (4, 8), (2, 4), (1, 2)];

/// Rows below a freshly written row that have not been written by any
/// earlier pass, per pass.
const FILL_BELOW: [usize; 4] = [7, 3, 1, 0];

/// Which row the next scanline of the stream lands on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RowSequencer {
    height: usize,
    interlaced: bool,
    pass: usize,
    row: usize,
    done: bool,
}

impl RowSequencer {
    /// Sequencer for a raster `height` rows tall.
    pub fn new(height: usize, interlaced: bool) -> Self {
        let mut seq = Self {
            height,
            interlaced,
            pass: 0,
            row: 0,
            done: height == 0,
        };
        if interlaced {
            seq.skip_empty_passes();
        }
        seq
    }

    fn skip_empty_passes(&mut self) {
        while self.pass < PASSES.len() && PASSES[self.pass].0 >= self.height {
            self.pass += 1;
        }
        match PASSES.get(self.pass) {
            Some(&(start, _)) => self.row = start,
            None => self.done = true,
        }
    }

    /// Row the next scanline belongs to, `None` once every row is placed.
    pub fn current(&self) -> Option<usize> {
        (!self.done).then_some(self.row)
    }

    /// Current interlace pass (always 0 for sequential rasters).
    pub fn pass(&self) -> usize {
        self.pass
    }

    /// Move past the current row.
    pub fn advance(&mut self) {
        if self.done {
            return;
        }
        if !self.interlaced {
            self.row += 1;
            self.done = self.row >= self.height;
            return;
        }
        self.row += PASSES[self.pass].1;
        if self.row >= self.height {
            self.pass += 1;
            self.skip_empty_passes();
        }
    }
}

impl Iterator for RowSequencer {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        let row = self.current()?;
        self.advance();
        Some(row)
    }
}

/// A frame raster being filled in stream order.
#[derive(Clone, Debug)]
pub struct Canvas {
    width: usize,
    height: usize,
    pixels: Vec<u8>,
    seq: RowSequencer,
    col: usize,
    rows_written: usize,
    progressive_fill: bool,
}

impl Canvas {
    /// Blank canvas filled with `fill_index`.
    ///
    /// With `progressive_fill`, each interlaced row is also copied into the
    /// not-yet-decoded rows beneath it, which later passes overwrite.
    pub fn new(
        width: usize,
        height: usize,
        interlaced: bool,
        progressive_fill: bool,
        fill_index: u8,
    ) -> Self {
        Self {
            width,
            height,
            pixels: vec![fill_index; width * height],
            seq: RowSequencer::new(if width == 0 { 0 } else { height }, interlaced),
            col: 0,
            rows_written: 0,
            progressive_fill: progressive_fill && interlaced,
        }
    }

    /// Store decoded pixels, returning how many were used. Pixels beyond
    /// the last row are not consumed.
    pub fn write(&mut self, mut data: &[u8]) -> usize {
        let mut used = 0;
        while let Some(row) = self.seq.current() {
            if data.is_empty() {
                break;
            }
            let n = (self.width - self.col).min(data.len());
            let start = row * self.width + self.col;
            self.pixels[start..start + n].copy_from_slice(&data[..n]);
            self.col += n;
            used += n;
            data = &data[n..];
            if self.col == self.width {
                self.finish_row(row);
            }
        }
        used
    }

    fn finish_row(&mut self, row: usize) {
        if self.progressive_fill {
            let below = FILL_BELOW[self.seq.pass()];
            let last = (row + below).min(self.height - 1);
            let src = row * self.width;
            for dst_row in row + 1..=last {
                self.pixels
                    .copy_within(src..src + self.width, dst_row * self.width);
            }
        }
        self.col = 0;
        self.rows_written += 1;
        self.seq.advance();
    }

    /// Whether every row has been written.
    pub fn is_complete(&self) -> bool {
        self.seq.current().is_none()
    }

    /// Rows fully written so far.
    pub fn rows_written(&self) -> usize {
        self.rows_written
    }

    /// Pixels written so far, including partial rows.
    pub fn pixels_written(&self) -> usize {
        self.rows_written * self.width + self.col
    }

    /// The raster in its current state.
    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// Canvas width.
    pub fn width(&self) -> usize {
        self.width
    }

    /// Canvas height.
    pub fn height(&self) -> usize {
        self.height
    }

    /// Take the raster.
    pub fn into_image(self) -> ImgVec<u8> {
        ImgVec::new(self.pixels, self.width, self.height)
    }
}

/// Reorder a complete interlaced raster into top-to-bottom order.
pub fn deinterlace(data: &[u8], width: usize, height: usize) -> Vec<u8> {
    let mut canvas = Canvas::new(width, height, true, false, 0);
    canvas.write(data);
    canvas.pixels
}
