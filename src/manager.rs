//! Several loads sharing one host loop.
//!
//! [`ImageManager`] keeps every in-flight [`ProgressiveLoader`] of a page,
//! gives each a step in turn, and cancels them all at once through a shared
//! [`Stopper`]. Placeholder images for loads that are still waiting or that
//! failed are supplied by the caller through [`FallbackImages`].

use std::sync::Arc;

use almost_enough::Stopper;
use enough::Stop;

use crate::buffer::ImageBuffer;
use crate::config::LoaderConfig;
use crate::consumer::{ImageConsumer, Preview};
use crate::progressive::{LoadStatus, ProgressiveLoader};
use crate::raw::DecodedImage;

/// Handle for one load owned by an [`ImageManager`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LoadId(u64);

/// Placeholder images shown instead of a real one.
#[derive(Clone, Debug, Default)]
pub struct FallbackImages {
    /// Shown while a load is still waiting for data.
    pub loading: Option<Arc<DecodedImage>>,
    /// Delivered to the consumer when a load aborts.
    pub broken: Option<Arc<DecodedImage>>,
}

impl FallbackImages {
    /// No placeholders.
    pub fn none() -> Self {
        Self::default()
    }

    /// Set the image shown while loading.
    pub fn with_loading(mut self, image: DecodedImage) -> Self {
        self.loading = Some(Arc::new(image));
        self
    }

    /// Set the image delivered for failed loads.
    pub fn with_broken(mut self, image: DecodedImage) -> Self {
        self.broken = Some(Arc::new(image));
        self
    }
}

/// Forwards to the real consumer, substituting the broken-image
/// placeholder when a load aborts.
struct WithFallback<'a> {
    inner: &'a mut dyn ImageConsumer,
    broken: Option<&'a DecodedImage>,
}

impl ImageConsumer for WithFallback<'_> {
    fn build_surface(&mut self, source: &str, image: DecodedImage) {
        self.inner.build_surface(source, image);
    }

    fn warning(&mut self, source: &str, args: core::fmt::Arguments<'_>) {
        self.inner.warning(source, args);
    }

    fn progress(&mut self, source: &str, preview: &Preview<'_>) {
        self.inner.progress(source, preview);
    }

    fn finish(&mut self, source: &str, status: LoadStatus) {
        if status == LoadStatus::Aborted
            && let Some(broken) = self.broken
        {
            self.inner.build_surface(source, broken.clone());
        }
        self.inner.finish(source, status);
    }
}

/// Round-robin scheduler over independent loads.
pub struct ImageManager {
    config: LoaderConfig,
    fallbacks: FallbackImages,
    loads: Vec<(LoadId, ProgressiveLoader)>,
    next_id: u64,
    cursor: usize,
    stopper: Stopper,
}

impl core::fmt::Debug for ImageManager {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ImageManager")
            .field("loads", &self.loads.len())
            .field("cursor", &self.cursor)
            .field("next_id", &self.next_id)
            .finish_non_exhaustive()
    }
}

impl ImageManager {
    /// Manager whose loads all use `config`.
    pub fn new(config: LoaderConfig) -> Self {
        Self {
            config,
            fallbacks: FallbackImages::none(),
            loads: Vec::new(),
            next_id: 0,
            cursor: 0,
            stopper: Stopper::new(),
        }
    }

    /// Install placeholder images.
    pub fn with_fallbacks(mut self, fallbacks: FallbackImages) -> Self {
        self.fallbacks = fallbacks;
        self
    }

    /// The placeholder images in use.
    pub fn fallbacks(&self) -> &FallbackImages {
        &self.fallbacks
    }

    /// Cancellation token shared by every load started from now on.
    pub fn stop_token(&self) -> Stopper {
        self.stopper.clone()
    }

    /// Start a load with no input yet.
    pub fn start(&mut self, source: impl Into<String>) -> LoadId {
        self.start_with_buffer(source, ImageBuffer::new())
    }

    /// Start a load over an existing buffer.
    pub fn start_with_buffer(&mut self, source: impl Into<String>, buffer: ImageBuffer) -> LoadId {
        let id = LoadId(self.next_id);
        self.next_id += 1;
        let loader = ProgressiveLoader::with_buffer(source, buffer, self.config.clone());
        log::debug!("{}: started as load {}", loader.source(), id.0);
        self.loads.push((id, loader));
        id
    }

    fn get_mut(&mut self, id: LoadId) -> Option<&mut ProgressiveLoader> {
        self.loads.iter_mut().find(|(i, _)| *i == id).map(|(_, l)| l)
    }

    /// The loader behind `id`, while the manager still holds it.
    pub fn get(&self, id: LoadId) -> Option<&ProgressiveLoader> {
        self.loads.iter().find(|(i, _)| *i == id).map(|(_, l)| l)
    }

    /// Feed input to a load. Returns `false` for unknown ids.
    pub fn push_data(&mut self, id: LoadId, bytes: &[u8]) -> bool {
        self.get_mut(id).map(|l| l.push_data(bytes)).is_some()
    }

    /// Signal end of input for a load. Returns `false` for unknown ids.
    pub fn finish_input(&mut self, id: LoadId) -> bool {
        self.get_mut(id).map(|l| l.finish_input()).is_some()
    }

    /// Status of a load.
    pub fn status(&self, id: LoadId) -> Option<LoadStatus> {
        self.get(id).map(|l| l.status())
    }

    /// Image to show for a load that has nothing of its own to show yet.
    pub fn placeholder(&self, id: LoadId) -> Option<Arc<DecodedImage>> {
        match self.status(id)? {
            LoadStatus::Active | LoadStatus::Suspended => self.fallbacks.loading.clone(),
            LoadStatus::Aborted => self.fallbacks.broken.clone(),
            LoadStatus::Complete => None,
        }
    }

    /// Loads held, terminal ones included.
    pub fn len(&self) -> usize {
        self.loads.len()
    }

    /// Whether the manager holds no loads.
    pub fn is_empty(&self) -> bool {
        self.loads.is_empty()
    }

    /// Whether any load can make progress without more input.
    pub fn has_work(&self) -> bool {
        self.loads
            .iter()
            .any(|(_, l)| l.status() == LoadStatus::Active)
    }

    fn step_at(&mut self, index: usize, consumer: &mut dyn ImageConsumer) -> LoadStatus {
        let stop: &dyn Stop = &self.stopper;
        let mut target = WithFallback {
            inner: consumer,
            broken: self.fallbacks.broken.as_deref(),
        };
        self.loads[index].1.step(&mut target, stop)
    }

    /// Step the next active load after the previous one stepped. Returns
    /// the id stepped, or `None` when no load is active.
    pub fn step_next(&mut self, consumer: &mut dyn ImageConsumer) -> Option<LoadId> {
        let n = self.loads.len();
        for offset in 0..n {
            let index = (self.cursor + offset) % n;
            if self.loads[index].1.status() == LoadStatus::Active {
                self.cursor = (index + 1) % n;
                self.step_at(index, consumer);
                return Some(self.loads[index].0);
            }
        }
        None
    }

    /// Give every active load one step. Returns how many were stepped.
    pub fn tick(&mut self, consumer: &mut dyn ImageConsumer) -> usize {
        let mut stepped = 0;
        for index in 0..self.loads.len() {
            if self.loads[index].1.status() == LoadStatus::Active {
                self.step_at(index, consumer);
                stepped += 1;
            }
        }
        stepped
    }

    /// Abort one load.
    pub fn abort(&mut self, id: LoadId, consumer: &mut dyn ImageConsumer) -> bool {
        let Some(index) = self.loads.iter().position(|(i, _)| *i == id) else {
            return false;
        };
        let mut target = WithFallback {
            inner: consumer,
            broken: self.fallbacks.broken.as_deref(),
        };
        self.loads[index].1.abort(&mut target);
        true
    }

    /// Cancel every unfinished load through the shared stop token, then
    /// start over with a fresh token.
    pub fn cancel_all(&mut self, consumer: &mut dyn ImageConsumer) {
        self.stopper.cancel();
        for index in 0..self.loads.len() {
            if !self.loads[index].1.status().is_terminal() {
                self.step_at(index, consumer);
            }
        }
        log::debug!("cancelled {} loads", self.loads.len());
        self.stopper = Stopper::new();
    }

    /// Drop terminal loads, returning their ids and final statuses.
    pub fn reap(&mut self) -> Vec<(LoadId, LoadStatus)> {
        let mut done = Vec::new();
        self.loads.retain(|(id, loader)| {
            let status = loader.status();
            if status.is_terminal() {
                done.push((*id, status));
                false
            } else {
                true
            }
        });
        if self.cursor >= self.loads.len() {
            self.cursor = 0;
        }
        done
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consumer::Collector;
    use crate::format::ImageFormat;
    use crate::gif::tests::{GifBuilder, PALETTE4};
    use crate::raw::{ColorClass, Raster};
    use imgref::ImgVec;
    use rgb::RGB8;

    fn icon() -> DecodedImage {
        DecodedImage::single(
            ImageFormat::Gif,
            Raster::Indexed {
                pixels: ImgVec::new(vec![0], 1, 1),
                palette: [RGB8::new(1, 2, 3)].into(),
                class: ColorClass::Indexed,
            },
            None,
        )
    }

    fn gif(color: u8) -> Vec<u8> {
        GifBuilder::new(8, 8, &PALETTE4).frame(8, 8, &[color; 64]).finish()
    }

    #[test]
    fn round_robin_alternates_loads() {
        let mut manager = ImageManager::new(LoaderConfig::default().with_chunk_size(8));
        let a = manager.start_with_buffer("a.gif", ImageBuffer::from_complete(gif(1)));
        let b = manager.start_with_buffer("b.gif", ImageBuffer::from_complete(gif(2)));
        let mut consumer = Collector::new();
        assert_eq!(manager.step_next(&mut consumer), Some(a));
        assert_eq!(manager.step_next(&mut consumer), Some(b));
        assert_eq!(manager.step_next(&mut consumer), Some(a));
        while manager.has_work() {
            manager.tick(&mut consumer);
        }
        assert_eq!(manager.status(a), Some(LoadStatus::Complete));
        assert_eq!(manager.status(b), Some(LoadStatus::Complete));
        assert_eq!(consumer.images.len(), 2);
        assert_eq!(manager.reap().len(), 2);
        assert!(manager.is_empty());
        assert_eq!(manager.step_next(&mut consumer), None);
    }

    #[test]
    fn cancel_all_aborts_unfinished_loads() {
        let mut manager = ImageManager::new(LoaderConfig::default());
        let waiting = manager.start("w.gif");
        manager.push_data(waiting, &gif(1)[..10]);
        let done = manager.start_with_buffer("d.gif", ImageBuffer::from_complete(gif(3)));
        let mut consumer = Collector::new();
        while manager.has_work() {
            manager.tick(&mut consumer);
        }
        assert_eq!(manager.status(waiting), Some(LoadStatus::Suspended));
        manager.cancel_all(&mut consumer);
        assert_eq!(manager.status(waiting), Some(LoadStatus::Aborted));
        assert_eq!(manager.status(done), Some(LoadStatus::Complete));

        // A fresh token lets new loads run.
        let again = manager.start_with_buffer("again.gif", ImageBuffer::from_complete(gif(2)));
        while manager.has_work() {
            manager.tick(&mut consumer);
        }
        assert_eq!(manager.status(again), Some(LoadStatus::Complete));
    }

    #[test]
    fn broken_placeholder_is_delivered_on_abort() {
        let fallbacks = FallbackImages::none().with_loading(icon()).with_broken(icon());
        let mut manager = ImageManager::new(LoaderConfig::default()).with_fallbacks(fallbacks);
        let id = manager.start("bad.gif");
        assert!(manager.placeholder(id).is_some());
        manager.push_data(id, b"GIF89a\x01\x00\x01\x00\x00\x00\x00\x2a");
        manager.finish_input(id);
        let mut consumer = Collector::new();
        while manager.has_work() {
            manager.tick(&mut consumer);
        }
        assert_eq!(manager.status(id), Some(LoadStatus::Aborted));
        assert_eq!(consumer.images.len(), 1);
        assert_eq!(consumer.images[0].1, icon());
        assert_eq!(consumer.warnings.len(), 1);
        assert!(manager.placeholder(id).is_some());
    }

    #[test]
    fn unknown_ids() {
        let mut manager = ImageManager::new(LoaderConfig::default());
        let id = manager.start("x");
        manager.reap();
        let mut consumer = Collector::new();
        assert!(manager.push_data(id, b"GIF"));
        assert!(manager.abort(id, &mut consumer));
        manager.reap();
        assert!(!manager.push_data(id, b"GIF"));
        assert!(!manager.finish_input(id));
        assert_eq!(manager.status(id), None);
    }
}
