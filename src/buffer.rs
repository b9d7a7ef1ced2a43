//! Sequential byte access over a growing input buffer.
//!
//! [`ImageBuffer`] is the only way decoders see input. It never blocks:
//! every read that cannot be satisfied returns `0` or `None`, and
//! [`status()`](ImageBuffer::status) tells the caller whether more input may
//! still arrive. Structured reads ([`take`](ImageBuffer::take),
//! [`read_block`](ImageBuffer::read_block)) are all-or-nothing, so a decoder
//! that comes up short can retry the same read later with the cursor
//! unchanged.
//!
//! # Step windows
//!
//! The progressive loader bounds how much a single step may consume by
//! setting a window with [`open_window`](ImageBuffer::open_window). Reads
//! that *start* before the window end are allowed to finish past it, so an
//! atomic read larger than the window still makes progress.

use crate::format::ImageFormat;

/// Result of the most recent read on an [`ImageBuffer`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReadStatus {
    /// The read was satisfied.
    Ok,
    /// `read_block` hit a zero-length sub-block (explicit terminator).
    Terminator,
    /// Not enough data is available yet, or the step window is used up.
    Underrun,
    /// End of input was signalled and the read ran past the last byte.
    Exhausted,
}

/// A saved cursor position for non-destructive look-ahead.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Mark(usize);

/// Largest payload of a GIF data sub-block.
pub const MAX_BLOCK_LEN: usize = 255;

/// Input bytes for one image load plus a read cursor.
#[derive(Clone, Debug, Default)]
pub struct ImageBuffer {
    data: Vec<u8>,
    pos: usize,
    window_end: Option<usize>,
    format: Option<ImageFormat>,
    depth: u8,
    end_of_input: bool,
    status: Option<ReadStatus>,
}

impl ImageBuffer {
    /// Empty buffer awaiting input.
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffer holding a complete stream; end of input is already signalled.
    pub fn from_complete(data: Vec<u8>) -> Self {
        Self {
            data,
            end_of_input: true,
            ..Self::default()
        }
    }

    /// Declare the stream's format instead of sniffing it.
    pub fn with_format(mut self, format: ImageFormat) -> Self {
        self.format = Some(format);
        self
    }

    /// Set the bit-depth hint of the display the image is destined for.
    pub fn with_depth(mut self, depth: u8) -> Self {
        self.depth = depth;
        self
    }

    /// Declared type tag, or the sniffed format once enough bytes arrived.
    pub fn format(&self) -> Option<ImageFormat> {
        self.format.or_else(|| ImageFormat::detect(&self.data))
    }

    /// Bit-depth hint (0 when unknown).
    pub fn depth(&self) -> u8 {
        self.depth
    }

    /// Append newly arrived input.
    pub fn push(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }

    /// Signal that no more input will arrive.
    pub fn finish_input(&mut self) {
        self.end_of_input = true;
    }

    /// Whether end of input has been signalled.
    pub fn is_end_of_input(&self) -> bool {
        self.end_of_input
    }

    /// Total bytes received.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether no bytes have been received.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Cursor position.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Bytes received but not yet consumed (ignores the step window).
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    /// All bytes received so far, consumed or not.
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Status of the most recent read, `None` before the first read.
    pub fn status(&self) -> Option<ReadStatus> {
        self.status
    }

    /// Whether every byte has been consumed and no more will arrive.
    pub fn is_exhausted(&self) -> bool {
        self.end_of_input && self.pos >= self.data.len()
    }

    /// Limit the current step to `budget` more bytes from the cursor.
    pub fn open_window(&mut self, budget: usize) {
        self.window_end = Some(self.pos.saturating_add(budget.max(1)));
    }

    /// Remove the step window.
    pub fn close_window(&mut self) {
        self.window_end = None;
    }

    /// Whether the step window has been used up while data remains.
    pub fn window_spent(&self) -> bool {
        matches!(self.window_end, Some(end) if self.pos >= end && self.pos < self.data.len())
    }

    /// Save the cursor.
    pub fn mark(&self) -> Mark {
        Mark(self.pos)
    }

    /// Restore a saved cursor.
    pub fn rewind(&mut self, mark: Mark) {
        self.pos = mark.0.min(self.data.len());
    }

    /// Give the received bytes back to the caller.
    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    fn may_start(&self) -> bool {
        match self.window_end {
            Some(end) => self.pos < end,
            None => true,
        }
    }

    fn short(&mut self, needed_end: usize) {
        self.status = Some(if self.end_of_input && needed_end > self.data.len() {
            ReadStatus::Exhausted
        } else {
            ReadStatus::Underrun
        });
    }

    /// Copy up to `dst.len()` bytes, returning how many were copied.
    ///
    /// Returns 0 when nothing is available; never fails partway.
    pub fn read(&mut self, dst: &mut [u8]) -> usize {
        if dst.is_empty() {
            self.status = Some(ReadStatus::Ok);
            return 0;
        }
        let mut end = self.data.len();
        if let Some(window) = self.window_end {
            end = end.min(window);
        }
        let n = end.saturating_sub(self.pos).min(dst.len());
        if n == 0 {
            self.short(self.pos + 1);
            return 0;
        }
        dst[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
        self.pos += n;
        self.status = Some(ReadStatus::Ok);
        n
    }

    /// Read one byte.
    pub fn read_byte(&mut self) -> Option<u8> {
        self.take(1).map(|b| b[0])
    }

    /// Consume exactly `n` bytes, or nothing.
    pub fn take(&mut self, n: usize) -> Option<&[u8]> {
        let end = self.pos + n;
        if end > self.data.len() || (n > 0 && !self.may_start()) {
            self.short(end);
            return None;
        }
        let start = self.pos;
        self.pos = end;
        self.status = Some(ReadStatus::Ok);
        Some(&self.data[start..end])
    }

    /// Look at the next `n` bytes without consuming them.
    pub fn peek(&self, n: usize) -> Option<&[u8]> {
        self.data.get(self.pos..self.pos + n)
    }

    /// Skip exactly `n` bytes, or nothing.
    pub fn skip(&mut self, n: usize) -> bool {
        self.take(n).is_some()
    }

    /// Read one length-prefixed data sub-block into `dst`.
    ///
    /// Returns the payload length. Returns 0 both for a zero-length block
    /// (status [`ReadStatus::Terminator`], terminator consumed) and when the
    /// whole block is not yet available (status `Underrun` or `Exhausted`,
    /// nothing consumed).
    pub fn read_block(&mut self, dst: &mut [u8; MAX_BLOCK_LEN]) -> usize {
        if !self.may_start() || self.pos >= self.data.len() {
            self.short(self.pos + 1);
            return 0;
        }
        let len = self.data[self.pos] as usize;
        let end = self.pos + 1 + len;
        if end > self.data.len() {
            self.short(end);
            return 0;
        }
        dst[..len].copy_from_slice(&self.data[self.pos + 1..end]);
        self.pos = end;
        self.status = Some(if len == 0 {
            ReadStatus::Terminator
        } else {
            ReadStatus::Ok
        });
        len
    }

    /// Skip a whole run of sub-blocks up to and including the terminator.
    ///
    /// Returns `true` once the terminator is consumed. Blocks consumed
    /// before an underrun stay consumed, so the call can be repeated.
    pub fn skip_blocks(&mut self) -> bool {
        let mut scratch = [0u8; MAX_BLOCK_LEN];
        loop {
            self.read_block(&mut scratch);
            match self.status {
                Some(ReadStatus::Ok) => continue,
                Some(ReadStatus::Terminator) => return true,
                _ => return false,
            }
        }
    }
}
