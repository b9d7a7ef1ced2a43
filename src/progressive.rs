//! The progressive loader context.
//!
//! A [`ProgressiveLoader`] owns everything one in-flight image needs: the
//! input buffer, the format decoder, byte counters, and the load status.
//! The host feeds it bytes as they arrive and calls
//! [`step`](ProgressiveLoader::step) from its idle loop. Each step consumes
//! at most [`LoaderConfig::chunk_size`] bytes and never blocks.
//!
//! ```text
//!           push_data           step: NeedInput
//! Active ──────────────▶ ... ─────────────────▶ Suspended
//!   ▲                                              │
//!   └────────────── push_data / finish_input ──────┘
//!   │
//!   ├── step: decoder done ──▶ Complete
//!   └── error / stop / abort ─▶ Aborted
//! ```
//!
//! Reaching `Complete` or `Aborted` drops the decoder and the buffer
//! exactly once and then hands the result to the consumer. Later calls to
//! `step` return the terminal status without touching the decoder again.

use enough::Stop;

use crate::buffer::ImageBuffer;
use crate::config::LoaderConfig;
use crate::consumer::ImageConsumer;
use crate::decoder::{Decoder, ImageDecoder, Progress};
use crate::error::DecodeError;
use crate::format::ImageFormat;
use crate::raw::DecodedImage;

/// Where a load stands.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LoadStatus {
    /// More work can be done right now.
    Active,
    /// Waiting for more input.
    Suspended,
    /// Stopped by an error or cancellation. Terminal.
    Aborted,
    /// Decoded and delivered. Terminal.
    Complete,
}

impl LoadStatus {
    /// Whether no further steps will do anything.
    pub fn is_terminal(self) -> bool {
        matches!(self, LoadStatus::Aborted | LoadStatus::Complete)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    Sniff,
    Init,
    Decode,
}

/// One resumable image load.
#[derive(Debug)]
pub struct ProgressiveLoader {
    source: String,
    config: LoaderConfig,
    buffer: Option<ImageBuffer>,
    decoder: Option<Decoder>,
    phase: Phase,
    status: LoadStatus,
    bytes_received: u64,
    bytes_consumed: u64,
    steps: u64,
    pending: Option<DecodeError>,
    error: Option<DecodeError>,
    format: Option<ImageFormat>,
    last_preview: Option<(usize, usize)>,
}

impl ProgressiveLoader {
    /// Loader for `source` (a name used in warnings) with no input yet.
    pub fn new(source: impl Into<String>, config: LoaderConfig) -> Self {
        Self::with_buffer(source, ImageBuffer::new(), config)
    }

    /// Loader over an existing buffer, which may carry a declared format
    /// and already hold input.
    pub fn with_buffer(source: impl Into<String>, buffer: ImageBuffer, config: LoaderConfig) -> Self {
        let mut loader = Self {
            source: source.into(),
            config,
            bytes_received: buffer.len() as u64,
            buffer: Some(buffer),
            decoder: None,
            phase: Phase::Sniff,
            status: LoadStatus::Active,
            bytes_consumed: 0,
            steps: 0,
            pending: None,
            error: None,
            format: None,
            last_preview: None,
        };
        loader.check_input_size();
        loader
    }

    /// Name of the image source.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Current status.
    pub fn status(&self) -> LoadStatus {
        self.status
    }

    /// Configuration of this load.
    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    /// Format being decoded, once known.
    pub fn format(&self) -> Option<ImageFormat> {
        self.format
    }

    /// Bytes handed to [`push_data`](Self::push_data) so far.
    pub fn bytes_received(&self) -> u64 {
        self.bytes_received
    }

    /// Bytes the decoder has consumed so far.
    pub fn bytes_consumed(&self) -> u64 {
        self.bytes_consumed
    }

    /// Steps taken, including ones that made no progress.
    pub fn steps(&self) -> u64 {
        self.steps
    }

    /// Why the load aborted, if it did.
    pub fn error(&self) -> Option<&DecodeError> {
        self.error.as_ref()
    }

    /// Append input. Ignored once the load is terminal.
    pub fn push_data(&mut self, bytes: &[u8]) {
        if self.status.is_terminal() || bytes.is_empty() {
            return;
        }
        let Some(buffer) = self.buffer.as_mut() else {
            return;
        };
        buffer.push(bytes);
        self.bytes_received += bytes.len() as u64;
        log::trace!("{}: received {} bytes ({} total)", self.source, bytes.len(), self.bytes_received);
        self.check_input_size();
        if self.status == LoadStatus::Suspended {
            self.status = LoadStatus::Active;
        }
    }

    /// Signal that no more input will arrive.
    pub fn finish_input(&mut self) {
        if let Some(buffer) = self.buffer.as_mut() {
            buffer.finish_input();
        }
        if self.status == LoadStatus::Suspended {
            self.status = LoadStatus::Active;
        }
    }

    fn check_input_size(&mut self) {
        if let Err(e) = self.config.limits.check_input_bytes(self.bytes_received) {
            self.pending.get_or_insert(e.into());
            self.status = LoadStatus::Active;
        }
    }

    /// Do one bounded slice of work.
    pub fn step(&mut self, consumer: &mut dyn ImageConsumer, stop: &dyn Stop) -> LoadStatus {
        if self.status.is_terminal() {
            return self.status;
        }
        self.steps += 1;
        if let Err(reason) = stop.check() {
            self.abort_with(consumer, reason.into());
            return self.status;
        }
        if let Some(err) = self.pending.take() {
            self.abort_with(consumer, err);
            return self.status;
        }
        match self.advance(consumer) {
            Ok(Some(image)) => self.complete(consumer, image),
            Ok(None) => {}
            Err(err) => self.abort_with(consumer, err),
        }
        self.status
    }

    /// Step until the load suspends or ends.
    pub fn run(&mut self, consumer: &mut dyn ImageConsumer, stop: &dyn Stop) -> LoadStatus {
        while self.step(consumer, stop) == LoadStatus::Active {}
        self.status
    }

    /// Cancel the load. Partial output is discarded and the consumer is told
    /// the load aborted. Does nothing once the load is terminal.
    pub fn abort(&mut self, consumer: &mut dyn ImageConsumer) {
        if self.status.is_terminal() {
            return;
        }
        log::debug!("{}: aborted by caller", self.source);
        self.teardown(LoadStatus::Aborted);
        consumer.finish(&self.source, LoadStatus::Aborted);
    }

    /// Run phases inside one step window. `Some` once decoding finished.
    fn advance(&mut self, consumer: &mut dyn ImageConsumer) -> Result<Option<DecodedImage>, DecodeError> {
        let Some(buffer) = self.buffer.as_mut() else {
            return Err(DecodeError::Malformed("loader has no input buffer".into()));
        };
        let start = buffer.position();
        buffer.open_window(self.config.chunk_size);
        let result = loop {
            match self.phase {
                Phase::Sniff => match Decoder::for_buffer(buffer, &self.config)? {
                    Some(decoder) => {
                        log::debug!("{}: decoding as {}", self.source, decoder.format());
                        self.format = Some(decoder.format());
                        self.decoder = Some(decoder);
                        self.phase = Phase::Init;
                    }
                    None => break Progress::NeedInput,
                },
                Phase::Init => {
                    let decoder = self.decoder.as_mut().ok_or(DecodeError::BadMagic)?;
                    match decoder.init(buffer)? {
                        Progress::Done => self.phase = Phase::Decode,
                        Progress::NeedInput => break Progress::NeedInput,
                    }
                }
                Phase::Decode => {
                    let decoder = self.decoder.as_mut().ok_or(DecodeError::BadMagic)?;
                    break decoder.step(buffer)?;
                }
            }
        };
        let budget_spent = buffer.window_spent();
        let exhausted = buffer.is_exhausted();
        buffer.close_window();
        let consumed = buffer.position() - start;
        self.bytes_consumed += consumed as u64;
        log::trace!("{}: step consumed {consumed} bytes", self.source);

        self.offer_preview(consumer);

        match result {
            Progress::Done => {
                let decoder = self.decoder.as_mut().ok_or(DecodeError::BadMagic)?;
                decoder.finish().map(Some)
            }
            Progress::NeedInput if budget_spent => {
                self.status = LoadStatus::Active;
                Ok(None)
            }
            Progress::NeedInput if exhausted => Err(DecodeError::Truncated("stream")),
            Progress::NeedInput => {
                if self.status != LoadStatus::Suspended {
                    log::debug!("{}: suspended after {} bytes", self.source, self.bytes_consumed);
                }
                self.status = LoadStatus::Suspended;
                Ok(None)
            }
        }
    }

    fn offer_preview(&mut self, consumer: &mut dyn ImageConsumer) {
        let Some(preview) = self.decoder.as_ref().and_then(|d| d.preview()) else {
            return;
        };
        let key = (preview.frame, preview.rows_decoded);
        if preview.rows_decoded > 0 && self.last_preview != Some(key) {
            self.last_preview = Some(key);
            consumer.progress(&self.source, &preview);
        }
    }

    fn complete(&mut self, consumer: &mut dyn ImageConsumer, image: DecodedImage) {
        log::debug!(
            "{}: complete, {} frames, {} bytes",
            self.source,
            image.frames.len(),
            self.bytes_consumed
        );
        self.teardown(LoadStatus::Complete);
        consumer.build_surface(&self.source, image);
        consumer.finish(&self.source, LoadStatus::Complete);
    }

    fn abort_with(&mut self, consumer: &mut dyn ImageConsumer, err: DecodeError) {
        log::warn!("{}: {err}", self.source);
        consumer.warning(&self.source, format_args!("{err}"));
        self.error = Some(err);
        self.teardown(LoadStatus::Aborted);
        consumer.finish(&self.source, LoadStatus::Aborted);
    }

    /// Release decoder and buffer and enter a terminal status.
    fn teardown(&mut self, status: LoadStatus) {
        self.status = status;
        self.decoder = None;
        self.buffer = None;
        self.pending = None;
    }
}

/// Decode a complete in-memory stream in one go.
pub fn load_complete(
    source: &str,
    data: Vec<u8>,
    config: LoaderConfig,
    consumer: &mut dyn ImageConsumer,
    stop: &dyn Stop,
) -> LoadStatus {
    let mut loader = ProgressiveLoader::with_buffer(source, ImageBuffer::from_complete(data), config);
    loader.run(consumer, stop)
}
