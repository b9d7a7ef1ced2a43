//! GIF and GZF container decoding.
//!
//! [`GifDecoder`] is a resumable state machine over the block structure:
//! header, logical screen descriptor, global color table, then a run of
//! extension blocks and image descriptors up to the trailer. Each state
//! reads one complete structure from the [`ImageBuffer`] or nothing at all,
//! so running out of input simply returns [`Progress::NeedInput`] and the
//! next call resumes in the same state.
//!
//! GZF files share the GIF framing byte for byte; only the magic differs
//! and the raster sub-blocks carry a zlib stream instead of LZW codes.

use flate2::{Decompress, FlushDecompress, Status};
use imgref::ImgVec;
use rgb::RGB8;

use crate::buffer::{ImageBuffer, MAX_BLOCK_LEN, ReadStatus};
use crate::consumer::Preview;
use crate::decoder::{ImageDecoder, Progress};
use crate::error::DecodeError;
use crate::format::ImageFormat;
use crate::interlace::Canvas;
use crate::limits::ResourceLimits;
use crate::lzw::{LzwDecoder, LzwStatus};
use crate::raw::{
    AnimationKind, ColorClass, DecodedImage, Disposal, Frame, FrameControl, MAX_PALETTE, Palette,
    Raster, crop,
};

const EXTENSION: u8 = b'!';
const IMAGE: u8 = b',';
const TRAILER: u8 = b';';

const PLAIN_TEXT: u8 = 0x01;
const GRAPHIC_CONTROL: u8 = 0xF9;
const COMMENT: u8 = 0xFE;
const APPLICATION: u8 = 0xFF;

/// Which container flavour a decoder expects.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GifVariant {
    /// LZW raster data.
    Gif,
    /// Deflate raster data.
    Gzf,
}

impl GifVariant {
    fn magic_prefix(self) -> &'static [u8; 3] {
        match self {
            GifVariant::Gif => b"GIF",
            GifVariant::Gzf => b"GZF",
        }
    }

    fn format(self) -> ImageFormat {
        match self {
            GifVariant::Gif => ImageFormat::Gif,
            GifVariant::Gzf => ImageFormat::Gzf,
        }
    }
}

/// Logical screen descriptor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ScreenDescriptor {
    pub width: u16,
    pub height: u16,
    /// Entries in the global color table, if one follows.
    pub global_table: Option<usize>,
    pub background: u8,
    pub aspect: u8,
}

impl ScreenDescriptor {
    fn parse(b: &[u8]) -> Self {
        let packed = b[4];
        Self {
            width: u16::from_le_bytes([b[0], b[1]]),
            height: u16::from_le_bytes([b[2], b[3]]),
            global_table: (packed & 0x80 != 0).then(|| table_len(packed)),
            background: b[5],
            aspect: b[6],
        }
    }
}

/// Image descriptor of one frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ImageDescriptor {
    pub x: u16,
    pub y: u16,
    pub width: u16,
    pub height: u16,
    /// Entries in the local color table, if one follows.
    pub local_table: Option<usize>,
    pub interlaced: bool,
}

impl ImageDescriptor {
    fn parse(b: &[u8]) -> Self {
        let packed = b[8];
        Self {
            x: u16::from_le_bytes([b[0], b[1]]),
            y: u16::from_le_bytes([b[2], b[3]]),
            width: u16::from_le_bytes([b[4], b[5]]),
            height: u16::from_le_bytes([b[6], b[7]]),
            local_table: (packed & 0x80 != 0).then(|| table_len(packed)),
            interlaced: packed & 0x40 != 0,
        }
    }
}

fn table_len(packed: u8) -> usize {
    1 << ((packed & 0x07) + 1)
}

fn parse_palette(bytes: &[u8]) -> Palette {
    bytes
        .chunks_exact(3)
        .map(|c| RGB8::new(c[0], c[1], c[2]))
        .collect()
}

/// Graphic control extension payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GraphicControl {
    pub disposal: Disposal,
    pub delay_ms: u32,
    pub transparent: Option<u8>,
}

impl GraphicControl {
    fn parse(b: &[u8]) -> Self {
        let packed = b[0];
        // Some encoders write delays as negative 16-bit values.
        let centis = i16::from_le_bytes([b[1], b[2]]).unsigned_abs() as u32;
        Self {
            disposal: Disposal::from_code((packed >> 2) & 0x07),
            delay_ms: centis * 10,
            transparent: (packed & 0x01 != 0).then_some(b[3]),
        }
    }
}

fn is_loop_application(id: &[u8]) -> bool {
    id == b"NETSCAPE2.0" || id == b"ANIMEXTS1.0"
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum State {
    Header,
    Screen,
    GlobalTable(usize),
    BlockTag,
    ExtensionLabel,
    GraphicControl,
    ApplicationId,
    LoopData,
    SkipBlocks,
    Descriptor,
    LocalTable(ImageDescriptor),
    CodeSize(ImageDescriptor),
    Raster,
    Done,
}

enum Decompressor {
    Lzw(LzwDecoder),
    Deflate(Box<Decompress>),
}

impl Decompressor {
    /// Decode one sub-block, producing at most `limit` more pixels.
    fn feed(
        &mut self,
        input: &[u8],
        out: &mut Vec<u8>,
        limit: usize,
    ) -> Result<LzwStatus, DecodeError> {
        match self {
            Decompressor::Lzw(lzw) => lzw.feed(input, out),
            Decompressor::Deflate(inflate) => inflate_block(inflate, input, out, limit),
        }
    }
}

fn inflate_block(
    inflate: &mut Decompress,
    mut input: &[u8],
    out: &mut Vec<u8>,
    limit: usize,
) -> Result<LzwStatus, DecodeError> {
    loop {
        if out.len() >= limit {
            return Ok(LzwStatus::NeedMore);
        }
        let room = (limit - out.len()).clamp(1, 64 * 1024);
        out.reserve(room);
        let (in_before, out_before) = (inflate.total_in(), inflate.total_out());
        let status = inflate
            .decompress_vec(input, out, FlushDecompress::None)
            .map_err(|e| DecodeError::Deflate(e.to_string()))?;
        let consumed = (inflate.total_in() - in_before) as usize;
        let produced = inflate.total_out() - out_before;
        input = &input[consumed..];
        match status {
            Status::StreamEnd => return Ok(LzwStatus::Done),
            _ if consumed == 0 && produced == 0 => return Ok(LzwStatus::NeedMore),
            _ if input.is_empty() && out.len() < out.capacity() => {
                return Ok(LzwStatus::NeedMore);
            }
            _ => {}
        }
    }
}

/// A frame whose raster data is being read.
struct FrameDecode {
    control: FrameControl,
    desc: ImageDescriptor,
    clip_width: usize,
    clip_height: usize,
    palette: Palette,
    canvas: Canvas,
    stream: Option<Decompressor>,
    stream_done: bool,
    scratch: Vec<u8>,
}

impl FrameDecode {
    fn into_frame(self) -> Frame {
        if self.stream.is_none() || self.control.ignore {
            return Frame {
                control: self.control,
                raster: None,
            };
        }
        let full = self.canvas.into_image();
        let pixels = if full.width() == self.clip_width && full.height() == self.clip_height {
            full
        } else {
            crop(full.as_ref(), self.clip_width, self.clip_height)
        };
        let palette = cover_indices(self.palette, &pixels);
        let class = if palette.iter().all(|c| c.r == c.g && c.g == c.b) {
            ColorClass::Grayscale
        } else {
            ColorClass::Indexed
        };
        Frame {
            control: self.control,
            raster: Some(Raster::Indexed {
                pixels,
                palette,
                class,
            }),
        }
    }
}

/// Extend `palette` with black entries so every pixel indexes inside it.
fn cover_indices(palette: Palette, pixels: &ImgVec<u8>) -> Palette {
    let max = pixels.buf().iter().copied().max().unwrap_or(0) as usize;
    if max < palette.len() {
        return palette;
    }
    log::debug!(
        "pixel index {max} outside {}-entry palette, padding with black",
        palette.len()
    );
    let mut wide = palette.to_vec();
    wide.resize((max + 1).min(MAX_PALETTE), RGB8::new(0, 0, 0));
    wide.into()
}

/// Options that shape GIF/GZF decoding.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GifOptions {
    /// Caps on screen size, frame size, and frame count.
    pub limits: ResourceLimits,
    /// Copy interlaced rows downward until later passes arrive.
    pub progressive_fill: bool,
}

impl Default for GifOptions {
    fn default() -> Self {
        Self {
            limits: ResourceLimits::viewer(),
            progressive_fill: false,
        }
    }
}

/// Resumable GIF/GZF decoder.
pub struct GifDecoder {
    variant: GifVariant,
    options: GifOptions,
    state: State,
    screen: Option<ScreenDescriptor>,
    global_palette: Option<Palette>,
    pending: FrameControl,
    loop_count: Option<u16>,
    frames: Vec<Frame>,
    current: Option<FrameDecode>,
    hint: Option<AnimationKind>,
    block: Box<[u8; MAX_BLOCK_LEN]>,
}

impl GifDecoder {
    /// Decoder for the given flavour.
    pub fn new(variant: GifVariant, options: GifOptions) -> Self {
        Self {
            variant,
            options,
            state: State::Header,
            screen: None,
            global_palette: None,
            pending: FrameControl::default(),
            loop_count: None,
            frames: Vec::new(),
            current: None,
            hint: None,
            block: Box::new([0u8; MAX_BLOCK_LEN]),
        }
    }

    /// The logical screen, once parsed.
    pub fn screen(&self) -> Option<&ScreenDescriptor> {
        self.screen.as_ref()
    }

    /// Frames finished so far.
    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    /// Animation classification from the look-ahead scan, when the
    /// whole stream was available at init time.
    pub fn animation_hint(&self) -> Option<AnimationKind> {
        self.hint
    }

    /// The frame currently being decoded: its control block, palette, and
    /// the partially filled raster.
    pub fn partial(&self) -> Option<(&FrameControl, &Palette, &Canvas)> {
        self.current
            .as_ref()
            .filter(|f| f.stream.is_some())
            .map(|f| (&f.control, &f.palette, &f.canvas))
    }

    /// Whether the trailer (or a clean end of input) has been reached.
    pub fn is_done(&self) -> bool {
        self.state == State::Done
    }

    /// A read came up short. Waits for more input, or once input has ended,
    /// keeps the frames already finished and drops whatever was cut off.
    fn starved(&mut self, buf: &ImageBuffer, what: &'static str) -> Result<Progress, DecodeError> {
        if buf.status() != Some(ReadStatus::Exhausted) {
            return Ok(Progress::NeedInput);
        }
        if self.frames.is_empty() {
            return Err(DecodeError::Truncated(what));
        }
        log::warn!(
            "input ends inside {what}, keeping {} complete frames",
            self.frames.len()
        );
        self.current = None;
        self.state = State::Done;
        Ok(Progress::Done)
    }

    /// Run states until the screen descriptor and global table are parsed.
    fn run_header(&mut self, buf: &mut ImageBuffer) -> Result<Progress, DecodeError> {
        loop {
            match self.state {
                State::Header => {
                    let Some(magic) = buf.take(6) else {
                        return self.starved(buf, "header");
                    };
                    let prefix = self.variant.magic_prefix();
                    if &magic[..3] != prefix || (&magic[3..] != b"87a" && &magic[3..] != b"89a") {
                        return Err(DecodeError::BadMagic);
                    }
                    self.state = State::Screen;
                }
                State::Screen => {
                    let Some(bytes) = buf.take(7) else {
                        return self.starved(buf, "logical screen descriptor");
                    };
                    let screen = ScreenDescriptor::parse(bytes);
                    self.options
                        .limits
                        .check_dimensions(screen.width as u32, screen.height as u32)?;
                    log::debug!(
                        "{} logical screen {}x{}, global table {:?}",
                        self.variant.format(),
                        screen.width,
                        screen.height,
                        screen.global_table
                    );
                    self.state = match screen.global_table {
                        Some(n) => State::GlobalTable(n),
                        None => State::BlockTag,
                    };
                    self.screen = Some(screen);
                }
                State::GlobalTable(n) => {
                    let Some(bytes) = buf.take(3 * n) else {
                        return self.starved(buf, "global color table");
                    };
                    self.global_palette = Some(parse_palette(bytes));
                    self.state = State::BlockTag;
                }
                _ => return Ok(Progress::Done),
            }
        }
    }

    /// Run block states until the trailer, an input shortage, or an error.
    fn run_blocks(&mut self, buf: &mut ImageBuffer) -> Result<Progress, DecodeError> {
        loop {
            match self.state {
                State::Header | State::Screen | State::GlobalTable(_) => {
                    if self.run_header(buf)? == Progress::NeedInput {
                        return Ok(Progress::NeedInput);
                    }
                }
                State::BlockTag => {
                    let Some(tag) = buf.read_byte() else {
                        if buf.status() == Some(ReadStatus::Exhausted) && !self.frames.is_empty() {
                            log::debug!("stream ends without trailer after {} frames", self.frames.len());
                            self.state = State::Done;
                            continue;
                        }
                        return self.starved(buf, "block introducer");
                    };
                    self.state = match tag {
                        EXTENSION => State::ExtensionLabel,
                        IMAGE => State::Descriptor,
                        TRAILER => State::Done,
                        other if !self.frames.is_empty() => {
                            log::warn!("stray byte {other:#04x} after last frame, treating as trailer");
                            State::Done
                        }
                        other => {
                            return Err(DecodeError::Malformed(format!(
                                "unknown block introducer {other:#04x}"
                            )));
                        }
                    };
                }
                State::ExtensionLabel => {
                    let Some(label) = buf.read_byte() else {
                        return self.starved(buf, "extension label");
                    };
                    self.state = match label {
                        GRAPHIC_CONTROL => State::GraphicControl,
                        APPLICATION => State::ApplicationId,
                        PLAIN_TEXT | COMMENT => State::SkipBlocks,
                        other => {
                            log::debug!("skipping unknown extension {other:#04x}");
                            State::SkipBlocks
                        }
                    };
                }
                State::GraphicControl => {
                    let n = buf.read_block(&mut self.block);
                    match buf.status() {
                        Some(ReadStatus::Ok) if n >= 4 => {
                            let gce = GraphicControl::parse(&self.block[..4]);
                            self.pending = FrameControl {
                                delay_ms: gce.delay_ms,
                                disposal: gce.disposal,
                                transparent: gce.transparent,
                                ..FrameControl::default()
                            };
                            self.state = State::SkipBlocks;
                        }
                        Some(ReadStatus::Ok) => {
                            return Err(DecodeError::Malformed(format!(
                                "graphic control block of {n} bytes"
                            )));
                        }
                        Some(ReadStatus::Terminator) => self.state = State::BlockTag,
                        _ => return self.starved(buf, "graphic control extension"),
                    }
                }
                State::ApplicationId => {
                    let n = buf.read_block(&mut self.block);
                    match buf.status() {
                        Some(ReadStatus::Ok) => {
                            self.state = if is_loop_application(&self.block[..n]) {
                                State::LoopData
                            } else {
                                State::SkipBlocks
                            };
                        }
                        Some(ReadStatus::Terminator) => self.state = State::BlockTag,
                        _ => return self.starved(buf, "application extension"),
                    }
                }
                State::LoopData => {
                    let n = buf.read_block(&mut self.block);
                    match buf.status() {
                        Some(ReadStatus::Ok) => {
                            if n >= 3 && self.block[0] == 1 {
                                let count = u16::from_le_bytes([self.block[1], self.block[2]]);
                                log::debug!("loop extension, count {count}");
                                self.loop_count = Some(count);
                            }
                        }
                        Some(ReadStatus::Terminator) => self.state = State::BlockTag,
                        _ => return self.starved(buf, "loop extension"),
                    }
                }
                State::SkipBlocks => {
                    if buf.skip_blocks() {
                        self.state = State::BlockTag;
                    } else {
                        return self.starved(buf, "extension data");
                    }
                }
                State::Descriptor => {
                    let Some(bytes) = buf.take(9) else {
                        return self.starved(buf, "image descriptor");
                    };
                    let desc = ImageDescriptor::parse(bytes);
                    self.options
                        .limits
                        .check_frames(self.frames.len() as u32 + 1)?;
                    self.options
                        .limits
                        .check_dimensions(desc.width as u32, desc.height as u32)?;
                    self.state = match desc.local_table {
                        Some(_) => State::LocalTable(desc),
                        None => {
                            let palette = self
                                .global_palette
                                .clone()
                                .ok_or(DecodeError::InvalidColorTable)?;
                            self.begin_frame(desc, palette);
                            State::CodeSize(desc)
                        }
                    };
                }
                State::LocalTable(desc) => {
                    let n = desc.local_table.unwrap_or(0);
                    let Some(bytes) = buf.take(3 * n) else {
                        return self.starved(buf, "local color table");
                    };
                    let local = parse_palette(bytes);
                    let palette = match &self.global_palette {
                        Some(global) if **global == *local => global.clone(),
                        _ => local,
                    };
                    self.begin_frame(desc, palette);
                    self.state = State::CodeSize(desc);
                }
                State::CodeSize(_) => {
                    let Some(min_code_size) = buf.read_byte() else {
                        return self.starved(buf, "LZW code size");
                    };
                    if let Some(frame) = self.current.as_mut()
                        && !frame.control.ignore
                    {
                        frame.stream = Some(match self.variant {
                            GifVariant::Gif => Decompressor::Lzw(LzwDecoder::new(min_code_size)?),
                            GifVariant::Gzf => {
                                Decompressor::Deflate(Box::new(Decompress::new(true)))
                            }
                        });
                    }
                    self.state = State::Raster;
                }
                State::Raster => {
                    if let Some(progress) = self.raster_block(buf)? {
                        return Ok(progress);
                    }
                }
                State::Done => return Ok(Progress::Done),
            }
        }
    }

    fn begin_frame(&mut self, desc: ImageDescriptor, palette: Palette) {
        let mut control = core::mem::take(&mut self.pending);
        let screen = self.screen.get_or_insert(ScreenDescriptor {
            width: 0,
            height: 0,
            global_table: None,
            background: 0,
            aspect: 0,
        });
        if screen.width == 0 || screen.height == 0 {
            screen.width = desc.x.saturating_add(desc.width);
            screen.height = desc.y.saturating_add(desc.height);
        }
        let (sw, sh) = (screen.width as usize, screen.height as usize);
        let (x, y) = (desc.x as usize, desc.y as usize);
        control.x = desc.x as u32;
        control.y = desc.y as u32;
        if let Some(t) = control.transparent
            && t as usize >= palette.len()
        {
            log::debug!("transparent index {t} outside palette, ignoring");
            control.transparent = None;
        }

        let (mut clip_width, mut clip_height) = (desc.width as usize, desc.height as usize);
        if x >= sw || y >= sh || clip_width == 0 || clip_height == 0 {
            log::debug!(
                "frame at {x},{y} size {clip_width}x{clip_height} outside {sw}x{sh} screen, ignored"
            );
            control.ignore = true;
            clip_width = 0;
            clip_height = 0;
        } else {
            clip_width = clip_width.min(sw - x);
            clip_height = clip_height.min(sh - y);
        }
        let fill = control.transparent.unwrap_or(screen.background);
        let canvas = if control.ignore {
            Canvas::new(0, 0, false, false, fill)
        } else {
            Canvas::new(
                desc.width as usize,
                desc.height as usize,
                desc.interlaced,
                self.options.progressive_fill,
                fill,
            )
        };
        log::debug!(
            "frame {} at {},{} {}x{}{}",
            self.frames.len(),
            desc.x,
            desc.y,
            desc.width,
            desc.height,
            if desc.interlaced { " interlaced" } else { "" }
        );
        self.current = Some(FrameDecode {
            control,
            desc,
            clip_width,
            clip_height,
            palette,
            canvas,
            stream: None,
            stream_done: false,
            scratch: Vec::new(),
        });
    }

    /// Handle one raster sub-block. Returns `Some` when the step must end.
    fn raster_block(&mut self, buf: &mut ImageBuffer) -> Result<Option<Progress>, DecodeError> {
        let n = buf.read_block(&mut self.block);
        match buf.status() {
            Some(ReadStatus::Ok) => {
                let Some(frame) = self.current.as_mut() else {
                    return Err(DecodeError::Malformed("raster data without a frame".into()));
                };
                if frame.stream_done {
                    return Ok(None);
                }
                let Some(stream) = frame.stream.as_mut() else {
                    return Ok(None);
                };
                let remaining = frame.canvas.width() * frame.canvas.height()
                    - frame.canvas.pixels_written();
                frame.scratch.clear();
                let status = stream.feed(&self.block[..n], &mut frame.scratch, remaining)?;
                frame.canvas.write(&frame.scratch);
                if status == LzwStatus::Done {
                    frame.stream_done = true;
                }
                Ok(None)
            }
            Some(ReadStatus::Terminator) => {
                let Some(frame) = self.current.take() else {
                    return Err(DecodeError::Malformed("raster data without a frame".into()));
                };
                if frame.stream.is_some() && !frame.canvas.is_complete() {
                    log::debug!(
                        "frame {} ended after {} of {} rows",
                        self.frames.len(),
                        frame.canvas.rows_written(),
                        frame.desc.height
                    );
                }
                self.frames.push(frame.into_frame());
                self.state = State::BlockTag;
                Ok(None)
            }
            _ => self.starved(buf, "image data").map(Some),
        }
    }

    fn animation(&self) -> AnimationKind {
        match self.loop_count {
            Some(count) => AnimationKind::Looping(count),
            None if self.frames.len() > 1 => AnimationKind::MultiImage,
            None => AnimationKind::Static,
        }
    }
}

impl ImageDecoder for GifDecoder {
    fn format(&self) -> ImageFormat {
        self.variant.format()
    }

    fn init(&mut self, buf: &mut ImageBuffer) -> Result<Progress, DecodeError> {
        if self.state == State::Header && buf.is_end_of_input() {
            self.hint = classify_animation(buf).ok();
        }
        self.run_header(buf)
    }

    fn step(&mut self, buf: &mut ImageBuffer) -> Result<Progress, DecodeError> {
        self.run_blocks(buf)
    }

    fn preview(&self) -> Option<Preview<'_>> {
        let (control, palette, canvas) = self.partial()?;
        Some(Preview {
            frame: self.frames.len(),
            control,
            width: canvas.width(),
            height: canvas.height(),
            pixels: canvas.pixels(),
            palette,
            rows_decoded: canvas.rows_written(),
        })
    }

    fn finish(&mut self) -> Result<DecodedImage, DecodeError> {
        if self.frames.is_empty() {
            return Err(DecodeError::Malformed("no image data".into()));
        }
        let screen = self.screen.ok_or(DecodeError::Truncated("logical screen descriptor"))?;
        let animation = self.animation();
        Ok(DecodedImage {
            format: self.variant.format(),
            width: screen.width as u32,
            height: screen.height as u32,
            background_index: self.global_palette.as_ref().map(|_| screen.background),
            animation,
            frames: core::mem::take(&mut self.frames),
        })
    }
}

/// Classify a GIF/GZF stream by walking its blocks without decoding.
///
/// A loop extension makes it [`AnimationKind::Looping`]; otherwise a
/// second image descriptor makes it [`AnimationKind::MultiImage`]. The
/// buffer cursor is restored before returning. Fails with
/// [`DecodeError::Truncated`] if the walk runs out of received data,
/// whether or not more may arrive.
pub fn classify_animation(buf: &mut ImageBuffer) -> Result<AnimationKind, DecodeError> {
    let mark = buf.mark();
    let result = walk_blocks(buf);
    buf.rewind(mark);
    result
}

fn walk_blocks(buf: &mut ImageBuffer) -> Result<AnimationKind, DecodeError> {
    let header = buf.take(6).ok_or(DecodeError::Truncated("header"))?;
    if !matches!(&header[..3], b"GIF" | b"GZF") {
        return Err(DecodeError::BadMagic);
    }
    let screen = ScreenDescriptor::parse(buf.take(7).ok_or(DecodeError::Truncated("logical screen descriptor"))?);
    if let Some(n) = screen.global_table
        && !buf.skip(3 * n)
    {
        return Err(DecodeError::Truncated("global color table"));
    }
    let mut block = [0u8; MAX_BLOCK_LEN];
    let mut images = 0;
    loop {
        let Some(tag) = buf.read_byte() else {
            break;
        };
        match tag {
            EXTENSION => {
                let label = buf.read_byte().ok_or(DecodeError::Truncated("extension label"))?;
                if label == APPLICATION {
                    let n = buf.read_block(&mut block);
                    if buf.status() == Some(ReadStatus::Ok) && is_loop_application(&block[..n]) {
                        let n = buf.read_block(&mut block);
                        let count = if n >= 3 && block[0] == 1 {
                            u16::from_le_bytes([block[1], block[2]])
                        } else {
                            0
                        };
                        return Ok(AnimationKind::Looping(count));
                    }
                    if buf.status() == Some(ReadStatus::Terminator) {
                        continue;
                    }
                }
                if !buf.skip_blocks() {
                    return Err(DecodeError::Truncated("extension data"));
                }
            }
            IMAGE => {
                images += 1;
                if images > 1 {
                    return Ok(AnimationKind::MultiImage);
                }
                let desc = ImageDescriptor::parse(buf.take(9).ok_or(DecodeError::Truncated("image descriptor"))?);
                if let Some(n) = desc.local_table
                    && !buf.skip(3 * n)
                {
                    return Err(DecodeError::Truncated("local color table"));
                }
                if !buf.skip(1) || !buf.skip_blocks() {
                    return Err(DecodeError::Truncated("image data"));
                }
            }
            _ => break,
        }
    }
    Ok(AnimationKind::Static)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use weezl::BitOrder;
    use weezl::encode::Encoder;

    /// Builder for GIF byte streams used across the crate's tests.
    pub(crate) struct GifBuilder {
        bytes: Vec<u8>,
        gzf: bool,
    }

    impl GifBuilder {
        pub(crate) fn new(width: u16, height: u16, palette: &[[u8; 3]]) -> Self {
            Self::with_magic(b"GIF89a", width, height, palette)
        }

        pub(crate) fn gzf(width: u16, height: u16, palette: &[[u8; 3]]) -> Self {
            let mut b = Self::with_magic(b"GZF89a", width, height, palette);
            b.gzf = true;
            b
        }

        fn with_magic(magic: &[u8; 6], width: u16, height: u16, palette: &[[u8; 3]]) -> Self {
            let mut bytes = magic.to_vec();
            bytes.extend_from_slice(&width.to_le_bytes());
            bytes.extend_from_slice(&height.to_le_bytes());
            if palette.is_empty() {
                bytes.extend_from_slice(&[0, 0, 0]);
            } else {
                let bits = table_bits(palette.len());
                bytes.extend_from_slice(&[0x80 | (bits - 1), 0, 0]);
                push_table(&mut bytes, palette, bits);
            }
            Self { bytes, gzf: false }
        }

        pub(crate) fn looping(mut self, count: u16) -> Self {
            self.bytes.extend_from_slice(&[EXTENSION, APPLICATION, 11]);
            self.bytes.extend_from_slice(b"NETSCAPE2.0");
            self.bytes.extend_from_slice(&[3, 1]);
            self.bytes.extend_from_slice(&count.to_le_bytes());
            self.bytes.push(0);
            self
        }

        pub(crate) fn comment(mut self, text: &[u8]) -> Self {
            self.bytes.extend_from_slice(&[EXTENSION, COMMENT, text.len() as u8]);
            self.bytes.extend_from_slice(text);
            self.bytes.push(0);
            self
        }

        pub(crate) fn control(mut self, disposal: u8, delay: i16, transparent: Option<u8>) -> Self {
            let packed = (disposal << 2) | transparent.is_some() as u8;
            self.bytes.extend_from_slice(&[EXTENSION, GRAPHIC_CONTROL, 4, packed]);
            self.bytes.extend_from_slice(&delay.to_le_bytes());
            self.bytes.extend_from_slice(&[transparent.unwrap_or(0), 0]);
            self
        }

        #[allow(clippy::too_many_arguments)]
        pub(crate) fn frame_at(
            mut self,
            x: u16,
            y: u16,
            width: u16,
            height: u16,
            local: Option<&[[u8; 3]]>,
            interlaced: bool,
            pixels: &[u8],
        ) -> Self {
            self.bytes.push(IMAGE);
            for v in [x, y, width, height] {
                self.bytes.extend_from_slice(&v.to_le_bytes());
            }
            let mut packed = if interlaced { 0x40 } else { 0 };
            let mut min_code = 2u8;
            if let Some(local) = local {
                let bits = table_bits(local.len());
                packed |= 0x80 | (bits - 1);
                self.bytes.push(packed);
                push_table(&mut self.bytes, local, bits);
                min_code = bits.max(2);
            } else {
                self.bytes.push(packed);
                let max = pixels.iter().copied().max().unwrap_or(0) as usize + 1;
                min_code = min_code.max(table_bits(max));
            }
            self.bytes.push(min_code);
            let data = if self.gzf {
                use flate2::Compression;
                use flate2::write::ZlibEncoder;
                use std::io::Write;
                let mut enc = ZlibEncoder::new(Vec::new(), Compression::default());
                enc.write_all(pixels).unwrap();
                enc.finish().unwrap()
            } else {
                Encoder::new(BitOrder::Lsb, min_code).encode(pixels).unwrap()
            };
            for chunk in data.chunks(255) {
                self.bytes.push(chunk.len() as u8);
                self.bytes.extend_from_slice(chunk);
            }
            self.bytes.push(0);
            self
        }

        pub(crate) fn frame(self, width: u16, height: u16, pixels: &[u8]) -> Self {
            self.frame_at(0, 0, width, height, None, false, pixels)
        }

        pub(crate) fn finish(mut self) -> Vec<u8> {
            self.bytes.push(TRAILER);
            self.bytes
        }
    }

    fn table_bits(len: usize) -> u8 {
        let mut bits = 1;
        while (1usize << bits) < len {
            bits += 1;
        }
        bits
    }

    fn push_table(bytes: &mut Vec<u8>, palette: &[[u8; 3]], bits: u8) {
        for i in 0..(1usize << bits) {
            bytes.extend_from_slice(palette.get(i).unwrap_or(&[0, 0, 0]));
        }
    }

    pub(crate) const PALETTE4: [[u8; 3]; 4] = [[0, 0, 0], [255, 0, 0], [0, 255, 0], [0, 0, 255]];

    fn decode(variant: GifVariant, bytes: Vec<u8>) -> Result<DecodedImage, DecodeError> {
        let mut buf = ImageBuffer::from_complete(bytes);
        let mut dec = GifDecoder::new(variant, GifOptions::default());
        assert_eq!(dec.init(&mut buf)?, Progress::Done);
        assert_eq!(dec.step(&mut buf)?, Progress::Done);
        dec.finish()
    }

    fn indices(frame: &Frame) -> &[u8] {
        match frame.raster.as_ref().unwrap() {
            Raster::Indexed { pixels, .. } => pixels.buf(),
            Raster::Rgb { .. } => panic!("expected indexed raster"),
        }
    }

    #[test]
    fn decodes_single_frame() {
        let pixels = [0, 1, 2, 3, 3, 2, 1, 0];
        let gif = GifBuilder::new(4, 2, &PALETTE4).frame(4, 2, &pixels).finish();
        let image = decode(GifVariant::Gif, gif).unwrap();
        assert_eq!((image.width, image.height), (4, 2));
        assert_eq!(image.animation, AnimationKind::Static);
        assert_eq!(indices(&image.frames[0]), &pixels);
        assert_eq!(image.frames[0].control.transparent, None);
    }

    #[test]
    fn decodes_gzf_frame() {
        let pixels: Vec<u8> = (0..64).map(|i| (i % 4) as u8).collect();
        let gzf = GifBuilder::gzf(8, 8, &PALETTE4).frame(8, 8, &pixels).finish();
        let image = decode(GifVariant::Gzf, gzf).unwrap();
        assert_eq!(image.format, ImageFormat::Gzf);
        assert_eq!(indices(&image.frames[0]), &pixels[..]);
    }

    #[test]
    fn wrong_magic_for_variant() {
        let gif = GifBuilder::new(1, 1, &PALETTE4).frame(1, 1, &[0]).finish();
        assert_eq!(
            decode(GifVariant::Gzf, gif).unwrap_err(),
            DecodeError::BadMagic
        );
    }

    #[test]
    fn interlaced_frame_is_reordered() {
        let raster: Vec<u8> = (0..16).map(|i| (i / 2 % 4) as u8).collect();
        // Rows 0..8 of a 2-wide image in pass order 0,4,2,6,1,3,5,7.
        let mut stream = Vec::new();
        for row in [0usize, 4, 2, 6, 1, 3, 5, 7] {
            stream.extend_from_slice(&raster[row * 2..row * 2 + 2]);
        }
        let gif = GifBuilder::new(2, 8, &PALETTE4)
            .frame_at(0, 0, 2, 8, None, true, &stream)
            .finish();
        let image = decode(GifVariant::Gif, gif).unwrap();
        assert_eq!(indices(&image.frames[0]), &raster[..]);
    }

    #[test]
    fn graphic_control_applies_to_one_frame() {
        let gif = GifBuilder::new(1, 1, &PALETTE4)
            .control(2, -7, Some(3))
            .frame(1, 1, &[3])
            .frame(1, 1, &[1])
            .finish();
        let image = decode(GifVariant::Gif, gif).unwrap();
        let first = image.frames[0].control;
        assert_eq!(first.delay_ms, 70);
        assert_eq!(first.disposal, Disposal::RestoreBackground);
        assert_eq!(first.transparent, Some(3));
        let second = image.frames[1].control;
        assert_eq!(second.transparent, None);
        assert_eq!(second.delay_ms, 0);
    }

    #[test]
    fn local_table_replaces_global() {
        let gif = GifBuilder::new(1, 1, &PALETTE4)
            .frame_at(0, 0, 1, 1, Some(&PALETTE4), false, &[1])
            .frame_at(0, 0, 1, 1, Some(&[[9, 9, 9], [8, 8, 8]]), false, &[1])
            .finish();
        let image = decode(GifVariant::Gif, gif).unwrap();
        let palette = |f: &Frame| match f.raster.as_ref().unwrap() {
            Raster::Indexed { palette, .. } => palette.clone(),
            Raster::Rgb { .. } => unreachable!(),
        };
        let first = palette(&image.frames[0]);
        let second = palette(&image.frames[1]);
        assert_eq!(first.len(), 4);
        assert_eq!(second.len(), 2);
        assert_eq!(second[0], RGB8::new(9, 9, 9));
        assert_eq!(
            image.frames[1].raster.as_ref().unwrap().color_class(),
            ColorClass::Grayscale
        );
    }

    #[test]
    fn global_table_is_shared_between_frames() {
        let gif = GifBuilder::new(1, 1, &PALETTE4)
            .frame(1, 1, &[0])
            .frame_at(0, 0, 1, 1, Some(&PALETTE4), false, &[2])
            .finish();
        let mut buf = ImageBuffer::from_complete(gif);
        let mut dec = GifDecoder::new(GifVariant::Gif, GifOptions::default());
        dec.init(&mut buf).unwrap();
        dec.step(&mut buf).unwrap();
        let image = dec.finish().unwrap();
        let pal = |i: usize| match image.frames[i].raster.as_ref().unwrap() {
            Raster::Indexed { palette, .. } => palette.clone(),
            Raster::Rgb { .. } => unreachable!(),
        };
        assert!(std::sync::Arc::ptr_eq(&pal(0), &pal(1)));
    }

    #[test]
    fn clips_frame_to_screen() {
        let pixels: Vec<u8> = (0..12).map(|i| (i % 4) as u8).collect();
        let gif = GifBuilder::new(4, 4, &PALETTE4)
            .frame_at(2, 1, 4, 3, None, false, &pixels)
            .finish();
        let image = decode(GifVariant::Gif, gif).unwrap();
        let raster = image.frames[0].raster.as_ref().unwrap();
        assert_eq!((raster.width(), raster.height()), (2, 3));
        assert_eq!(indices(&image.frames[0]), &[0, 1, 0, 1, 0, 1]);
    }

    #[test]
    fn frame_outside_screen_is_ignored_but_timed() {
        let gif = GifBuilder::new(4, 4, &PALETTE4)
            .frame(4, 4, &[1; 16])
            .control(1, 25, None)
            .frame_at(10, 0, 2, 2, None, false, &[2; 4])
            .finish();
        let image = decode(GifVariant::Gif, gif).unwrap();
        assert_eq!(image.frames.len(), 2);
        let ignored = &image.frames[1];
        assert!(ignored.control.ignore);
        assert!(ignored.raster.is_none());
        assert_eq!(ignored.control.delay_ms, 250);
        assert_eq!(image.animation, AnimationKind::MultiImage);
    }

    #[test]
    fn classifies_animation_kinds() {
        let single = GifBuilder::new(1, 1, &PALETTE4).comment(b"hi").frame(1, 1, &[0]).finish();
        let multi = GifBuilder::new(1, 1, &PALETTE4)
            .frame(1, 1, &[0])
            .frame(1, 1, &[1])
            .finish();
        let looping = GifBuilder::new(1, 1, &PALETTE4)
            .looping(0)
            .frame(1, 1, &[0])
            .finish();
        let classify = |bytes: Vec<u8>| {
            let mut buf = ImageBuffer::from_complete(bytes);
            let kind = classify_animation(&mut buf).unwrap();
            assert_eq!(buf.position(), 0);
            kind
        };
        assert_eq!(classify(single), AnimationKind::Static);
        assert_eq!(classify(multi), AnimationKind::MultiImage);
        assert_eq!(classify(looping), AnimationKind::Looping(0));
    }

    #[test]
    fn loop_count_reaches_decoded_image() {
        let gif = GifBuilder::new(1, 1, &PALETTE4)
            .looping(3)
            .frame(1, 1, &[0])
            .finish();
        let image = decode(GifVariant::Gif, gif).unwrap();
        assert_eq!(image.loop_count(), Some(3));
    }

    #[test]
    fn missing_color_table_aborts() {
        let gif = GifBuilder::new(1, 1, &[]).frame(1, 1, &[0]).finish();
        assert_eq!(
            decode(GifVariant::Gif, gif).unwrap_err(),
            DecodeError::InvalidColorTable
        );
    }

    #[test]
    fn truncated_first_frame_aborts() {
        let mut gif = GifBuilder::new(4, 4, &PALETTE4).frame(4, 4, &[1; 16]).finish();
        gif.truncate(gif.len() - 6);
        assert!(matches!(
            decode(GifVariant::Gif, gif),
            Err(DecodeError::Truncated(_))
        ));
    }

    #[test]
    fn missing_trailer_after_frame_is_accepted() {
        let mut gif = GifBuilder::new(1, 1, &PALETTE4).frame(1, 1, &[2]).finish();
        gif.pop();
        let image = decode(GifVariant::Gif, gif).unwrap();
        assert_eq!(image.frames.len(), 1);
    }

    #[test]
    fn input_ending_inside_later_blocks_keeps_finished_frames() {
        let cuts: [&[u8]; 4] = [
            &[IMAGE, 0, 0, 0],
            &[IMAGE, 0, 0, 0, 0, 1, 0, 1, 0, 0x81, 10, 20, 30],
            &[IMAGE, 0, 0, 0, 0, 1, 0, 1, 0, 0],
            &[EXTENSION, GRAPHIC_CONTROL, 4, 0],
        ];
        for cut in cuts {
            let mut gif = GifBuilder::new(1, 1, &PALETTE4).frame(1, 1, &[2]).finish();
            gif.pop();
            gif.extend_from_slice(cut);
            let image = decode(GifVariant::Gif, gif).unwrap();
            assert_eq!(image.frames.len(), 1, "cut {cut:?}");
            assert_eq!(indices(&image.frames[0]), &[2]);
        }
    }

    #[test]
    fn oversized_frame_is_refused_by_default() {
        let mut gif = GifBuilder::new(1, 1, &PALETTE4).finish();
        gif.pop();
        gif.extend_from_slice(&[IMAGE, 0, 0, 0, 0, 0xff, 0xff, 0xff, 0xff, 0, 2, 0, TRAILER]);
        assert!(matches!(
            decode(GifVariant::Gif, gif),
            Err(DecodeError::Limit(_))
        ));
    }

    #[test]
    fn screen_limits_are_enforced() {
        let gif = GifBuilder::new(100, 100, &PALETTE4).frame(1, 1, &[0]).finish();
        let mut buf = ImageBuffer::from_complete(gif);
        let options = GifOptions {
            limits: ResourceLimits::none().with_max_width(50),
            progressive_fill: false,
        };
        let mut dec = GifDecoder::new(GifVariant::Gif, options);
        assert!(matches!(dec.init(&mut buf), Err(DecodeError::Limit(_))));
    }
}
