//! Resumable GIF-flavoured LZW decompression.
//!
//! [`LzwDecoder`] accepts compressed bytes in arbitrary pieces (usually one
//! data sub-block at a time) and appends palette indices to an output
//! vector. All progress lives in the decoder: a partial code left over at
//! the end of one piece is completed by the first bits of the next.
//!
//! Codes are packed least-significant-bit first regardless of byte
//! boundaries, which is what lets code widths below 8 bits work unchanged.

use crate::error::DecodeError;

/// Size of the code table; codes are at most 12 bits wide.
pub const MAX_CODES: usize = 4096;

const MAX_CODE_BITS: u8 = 12;
/// Smallest initial code size GIF allows.
const MIN_CODE_BITS: u8 = 2;

/// Whether the code stream has ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LzwStatus {
    /// All input was consumed; feed more.
    NeedMore,
    /// The end code was read. Further input is ignored.
    Done,
}

/// Incremental LZW decoder state.
#[derive(Clone, Debug)]
pub struct LzwDecoder {
    min_code_size: u8,
    clear_code: u16,
    end_code: u16,
    code_size: u8,
    capacity: u16,
    next_code: u16,
    prefix: Vec<u16>,
    suffix: Vec<u8>,
    stack: Vec<u8>,
    prev: Option<u16>,
    bits: u32,
    nbits: u8,
    done: bool,
    clears: u32,
}

impl LzwDecoder {
    /// Create a decoder for the given initial code size (bits per
    /// uncompressed symbol, the byte that precedes GIF raster data).
    pub fn new(min_code_size: u8) -> Result<Self, DecodeError> {
        if !(MIN_CODE_BITS..MAX_CODE_BITS).contains(&min_code_size) {
            return Err(DecodeError::CorruptLzw("initial code size out of range"));
        }
        let clear_code = 1u16 << min_code_size;
        let mut suffix = vec![0u8; MAX_CODES];
        for (code, slot) in suffix.iter_mut().enumerate().take(clear_code as usize) {
            *slot = code as u8;
        }
        let mut dec = Self {
            min_code_size,
            clear_code,
            end_code: clear_code + 1,
            code_size: 0,
            capacity: 0,
            next_code: 0,
            prefix: vec![0u16; MAX_CODES],
            suffix,
            stack: Vec::with_capacity(MAX_CODES),
            prev: None,
            bits: 0,
            nbits: 0,
            done: false,
            clears: 0,
        };
        dec.reset();
        Ok(dec)
    }

    fn reset(&mut self) {
        self.code_size = self.min_code_size + 1;
        self.capacity = 1 << self.code_size;
        self.next_code = self.end_code + 1;
        self.prev = None;
    }

    /// Initial code size this decoder was created with.
    pub fn min_code_size(&self) -> u8 {
        self.min_code_size
    }

    /// Current code width in bits.
    pub fn code_size(&self) -> u8 {
        self.code_size
    }

    /// Number of clear codes seen so far.
    pub fn clears(&self) -> u32 {
        self.clears
    }

    /// Whether the end code has been read.
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Decode `input`, appending palette indices to `out`.
    ///
    /// Every input byte is consumed unless the end code appears first.
    pub fn feed(&mut self, input: &[u8], out: &mut Vec<u8>) -> Result<LzwStatus, DecodeError> {
        for &byte in input {
            if self.done {
                break;
            }
            self.bits |= (byte as u32) << self.nbits;
            self.nbits += 8;
            while !self.done && self.nbits >= self.code_size {
                let code = (self.bits & ((1u32 << self.code_size) - 1)) as u16;
                self.bits >>= self.code_size;
                self.nbits -= self.code_size;
                self.handle(code, out)?;
            }
        }
        Ok(if self.done {
            LzwStatus::Done
        } else {
            LzwStatus::NeedMore
        })
    }

    fn handle(&mut self, code: u16, out: &mut Vec<u8>) -> Result<(), DecodeError> {
        if code == self.clear_code {
            self.clears += 1;
            self.reset();
            return Ok(());
        }
        if code == self.end_code {
            log::trace!("lzw end code after {} clears", self.clears);
            self.done = true;
            return Ok(());
        }

        let Some(prev) = self.prev else {
            if code > self.end_code {
                return Err(DecodeError::CorruptLzw("first code after clear is not a literal"));
            }
            out.push(code as u8);
            self.prev = Some(code);
            return Ok(());
        };

        let first = if code < self.next_code {
            self.expand(code, out)?
        } else if code == self.next_code && (self.next_code as usize) < MAX_CODES {
            let first = self.expand(prev, out)?;
            out.push(first);
            first
        } else {
            return Err(DecodeError::CorruptLzw("code beyond end of table"));
        };

        if (self.next_code as usize) < MAX_CODES {
            let slot = self.next_code as usize;
            self.prefix[slot] = prev;
            self.suffix[slot] = first;
            self.next_code += 1;
            if self.next_code == self.capacity && self.code_size < MAX_CODE_BITS {
                self.code_size += 1;
                self.capacity <<= 1;
            }
        }
        self.prev = Some(code);
        Ok(())
    }

    /// Append the byte chain of `code` to `out` and return its first byte.
    fn expand(&mut self, code: u16, out: &mut Vec<u8>) -> Result<u8, DecodeError> {
        self.stack.clear();
        let mut c = code;
        while c > self.end_code {
            if self.stack.len() >= MAX_CODES {
                return Err(DecodeError::CorruptLzw("circular code chain"));
            }
            self.stack.push(self.suffix[c as usize]);
            c = self.prefix[c as usize];
        }
        if c >= self.clear_code {
            return Err(DecodeError::CorruptLzw("chain ends in a control code"));
        }
        let first = c as u8;
        self.stack.push(first);
        out.extend(self.stack.iter().rev());
        Ok(first)
    }
}

/// Decode a complete LZW stream in one call.
pub fn decode_all(min_code_size: u8, data: &[u8]) -> Result<Vec<u8>, DecodeError> {
    let mut dec = LzwDecoder::new(min_code_size)?;
    let mut out = Vec::new();
    dec.feed(data, &mut out)?;
    Ok(out)
}
