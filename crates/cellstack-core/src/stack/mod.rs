pub mod meta;
pub mod metadata;
pub mod order;
pub mod source;
pub mod store;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use rayon::prelude::*;
use tracing::{debug, info};

use crate::annotations::Annotations;
use crate::config::LoadOptions;
use crate::consts::LOAD_PROGRESS_STEP;
use crate::error::{Result, StackError};
use crate::io::tiff_source::TiffPageSource;
use crate::listener::{EventKind, ListenerId};
use crate::plane::{scaled_dims, BitDepth, Image, ImageView};
use crate::roi::{FrameSel, Roi, RoiKind, RoiSet};
use crate::sync;

pub use meta::{ChannelInfo, ChannelSource, ChannelSpec, ChannelType, MetaStack, RenderFn};
pub use metadata::{parse_description, Dialect, StackMetadata};
pub use order::{DimensionOrder, PositionIndexer, StackPosition};
pub use source::{LoadProgress, PageInfo, PageSource};
pub use store::{PixelStore, StoreShape};

use source::NoProgress;

/// Frozen plane geometry shared by every channel of a stack.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Geometry {
    pub width: usize,
    pub height: usize,
    pub n_frames: usize,
    pub depth: BitDepth,
}

impl Geometry {
    fn describe(&self) -> String {
        format!("{}x{} px, {} frames", self.width, self.height, self.n_frames)
    }

    /// Same plane size and frame count; depth is not compared.
    pub fn is_compatible(&self, other: &Geometry) -> bool {
        (self.width, self.height, self.n_frames) == (other.width, other.height, other.n_frames)
    }
}

/// Read surface shared by [`Stack`] and [`MetaStack`], so consumers need
/// only one interface for a single stack or a composite.
pub trait ImageStack: Send + Sync {
    fn width(&self) -> usize;
    fn height(&self) -> usize;
    fn n_channels(&self) -> usize;
    fn n_frames(&self) -> usize;

    /// Run `f` on the plane at `(channel, frame)`, resampled by `scale`.
    ///
    /// The view must not escape `f`. No lock is held while `f` runs, so it
    /// may read, close or reload the same stack. `scale` must be finite and
    /// positive, and the scaled plane must fit [`MAX_SCALED_DIMENSION`].
    ///
    /// [`MAX_SCALED_DIMENSION`]: crate::consts::MAX_SCALED_DIMENSION
    fn with_image(
        &self,
        channel: usize,
        frame: usize,
        scale: Option<f64>,
        f: &mut dyn FnMut(ImageView<'_>),
    ) -> Result<()>;

    /// Owned copy of the plane at `(channel, frame)`.
    fn get_image_copy(&self, channel: usize, frame: usize) -> Result<Image>;

    fn add_listener(&self, callback: Box<dyn Fn(EventKind) + Send + Sync>, kind: EventKind) -> ListenerId;

    /// Remove a listener. Returns false if `id` is unknown.
    ///
    /// Blocks until invocations of that callback already running on other
    /// threads return. Deleting a listener while holding a lock its callback
    /// takes deadlocks, as do two callbacks on different threads that delete
    /// each other. Deleting from inside the callback itself is fine.
    fn delete_listener(&self, id: ListenerId) -> bool;

    fn set_rois(&self, rois: Vec<(String, Roi)>, kind: RoiKind, frame: FrameSel) -> Result<()>;
    fn get_rois(&self, frame: FrameSel) -> Option<RoiSet>;

    /// The ROI labelled `label` in the effective set of `frame`.
    fn get_roi(&self, frame: usize, label: &str) -> Option<Roi>;

    fn clear_rois(&self, frame: FrameSel);
}

/// Fields guarded by the image/metadata lock.
#[derive(Debug, Default)]
struct StackState {
    path: Option<PathBuf>,
    depth: Option<BitDepth>,
    order: Option<DimensionOrder>,
    width: usize,
    height: usize,
    n_channels: usize,
    n_frames: usize,
    store: Option<Arc<PixelStore>>,
}

impl StackState {
    fn indexer(&self) -> PositionIndexer {
        PositionIndexer::new(
            self.order.unwrap_or(DimensionOrder::FrameMajor),
            self.n_channels,
            self.n_frames,
        )
    }

    /// Shared handle on the buffer holding `(channel, frame)`, validated.
    fn store_for(&self, channel: usize, frame: usize) -> Result<Arc<PixelStore>> {
        match &self.store {
            Some(store) => {
                store.plane(channel, frame)?;
                Ok(Arc::clone(store))
            }
            None => Err(StackError::index("channel", channel, 0)),
        }
    }

    fn geometry(&self) -> Option<Geometry> {
        Some(Geometry {
            width: self.width,
            height: self.height,
            n_frames: self.n_frames,
            depth: self.depth?,
        })
    }
}

/// Consistent copy of a stack's metadata.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StackSnapshot {
    pub path: Option<PathBuf>,
    pub depth: Option<BitDepth>,
    pub order: Option<DimensionOrder>,
    pub width: usize,
    pub height: usize,
    pub n_images: usize,
    pub n_channels: usize,
    pub n_frames: usize,
}

/// Zero-copy plane of a [`Stack`].
///
/// Shares the pixel buffer instead of locking the stack: closing or
/// reloading the stack swaps in a new buffer and the old one is released
/// once the last `StackImage` on it is dropped.
#[derive(Clone, Debug)]
pub struct StackImage {
    store: Arc<PixelStore>,
    channel: usize,
    frame: usize,
}

impl StackImage {
    pub fn view(&self) -> ImageView<'_> {
        self.store
            .plane(self.channel, self.frame)
            .expect("plane validated when the image was taken")
    }

    pub fn to_image(&self) -> Image {
        self.view().to_image()
    }
}

/// One multi-frame, multi-channel image stack loaded from a single file.
///
/// Two independent lock domains guard a stack: one for pixel data and
/// metadata, one (inside [`Annotations`]) for ROI sets. ROI edits never
/// wait for a load. Listeners are notified after every lock is released.
#[derive(Debug, Default)]
pub struct Stack {
    state: RwLock<StackState>,
    info: Mutex<HashMap<String, String>>,
    annotations: Annotations,
    /// Frame count for ROI bound checks, readable without the image lock.
    roi_frame_bound: AtomicUsize,
    options: LoadOptions,
}

impl Stack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: LoadOptions) -> Self {
        Self {
            options,
            ..Self::default()
        }
    }

    /// Create a stack and load `path` into it.
    pub fn open(path: &Path) -> Result<Self> {
        let stack = Self::new();
        stack.load(path)?;
        Ok(stack)
    }

    pub fn load(&self, path: &Path) -> Result<()> {
        self.load_with(path, &NoProgress)
    }

    /// Load a TIFF stack from `path`, replacing the current contents.
    ///
    /// On failure the stack is left empty. Image listeners are notified in
    /// both cases.
    pub fn load_with(&self, path: &Path, progress: &dyn LoadProgress) -> Result<()> {
        debug!(path = %path.display(), "Loading stack");
        self.replace_contents(progress, || {
            let mut source = TiffPageSource::open(path)?;
            Ok((source_into_store(&mut source, &self.options, progress)?, Some(path.to_path_buf())))
        })
    }

    /// Load from any page source, e.g. an in-memory decoder.
    pub fn load_from(&self, source: &mut dyn PageSource, progress: &dyn LoadProgress) -> Result<()> {
        self.replace_contents(progress, || {
            Ok((source_into_store(source, &self.options, progress)?, None))
        })
    }

    fn replace_contents(
        &self,
        progress: &dyn LoadProgress,
        build: impl FnOnce() -> Result<(Loaded, Option<PathBuf>)>,
    ) -> Result<()> {
        sync::lock(&self.info).clear();
        let result = {
            let mut state = sync::write(&self.state);
            *state = StackState::default();
            let result = build().map(|(loaded, path)| {
                *state = StackState {
                    path,
                    depth: Some(loaded.meta.depth),
                    order: Some(loaded.meta.order),
                    width: loaded.width,
                    height: loaded.height,
                    n_channels: loaded.meta.n_channels,
                    n_frames: loaded.meta.n_frames,
                    store: Some(Arc::new(loaded.store)),
                };
                info!(
                    path = ?state.path,
                    channels = state.n_channels,
                    frames = state.n_frames,
                    width = state.width,
                    height = state.height,
                    order = %loaded.meta.order,
                    "Stack loaded"
                );
            });
            self.roi_frame_bound.store(state.n_frames, Ordering::Release);
            result
        };
        progress.finish();
        if let Err(ref e) = result {
            debug!(error = %e, "Stack load failed");
        }

        let had_rois = self.annotations.reset_rois();
        self.annotations.notify(EventKind::Image);
        if had_rois {
            self.annotations.notify(EventKind::Roi);
        }
        result
    }

    /// Release the pixel buffer and reset to empty.
    pub fn close(&self) {
        let released = {
            let mut state = sync::write(&self.state);
            self.roi_frame_bound.store(0, Ordering::Release);
            std::mem::take(&mut *state).store.is_some()
        };
        sync::lock(&self.info).clear();
        if released {
            debug!("Stack closed");
        }

        let had_rois = self.annotations.reset_rois();
        self.annotations.notify(EventKind::Image);
        if had_rois {
            self.annotations.notify(EventKind::Roi);
        }
    }

    /// Zero-copy view of the plane at `(channel, frame)`.
    ///
    /// The image lock is released before this returns.
    pub fn get_image(&self, channel: usize, frame: usize) -> Result<StackImage> {
        let store = sync::read(&self.state).store_for(channel, frame)?;
        Ok(StackImage { store, channel, frame })
    }

    pub fn get_image_copy(&self, channel: usize, frame: usize) -> Result<Image> {
        Ok(self.get_image(channel, frame)?.to_image())
    }

    pub fn convert_position(&self, position: StackPosition) -> Result<StackPosition> {
        sync::read(&self.state).indexer().convert(position)
    }

    pub fn snapshot(&self) -> StackSnapshot {
        let state = sync::read(&self.state);
        StackSnapshot {
            path: state.path.clone(),
            depth: state.depth,
            order: state.order,
            width: state.width,
            height: state.height,
            n_images: state.n_channels * state.n_frames,
            n_channels: state.n_channels,
            n_frames: state.n_frames,
        }
    }

    /// Geometry of the loaded stack, `None` while empty.
    pub fn geometry(&self) -> Option<Geometry> {
        sync::read(&self.state).geometry()
    }

    pub fn path(&self) -> Option<PathBuf> {
        sync::read(&self.state).path.clone()
    }

    pub fn depth(&self) -> Option<BitDepth> {
        sync::read(&self.state).depth
    }

    pub fn order(&self) -> Option<DimensionOrder> {
        sync::read(&self.state).order
    }

    pub fn n_images(&self) -> usize {
        let state = sync::read(&self.state);
        state.n_channels * state.n_frames
    }

    pub fn is_loaded(&self) -> bool {
        sync::read(&self.state).store.is_some()
    }

    /// Minimum and maximum sample value over every plane, `None` while empty.
    pub fn intensity_range(&self) -> Option<(u16, u16)> {
        let (store, indexer) = {
            let state = sync::read(&self.state);
            (Arc::clone(state.store.as_ref()?), state.indexer())
        };
        (0..indexer.n_images())
            .into_par_iter()
            .filter_map(|i| {
                let (channel, frame) = indexer.to_position(i).ok()?;
                store.plane(channel, frame).ok()?.min_max()
            })
            .reduce_with(|(lo_a, hi_a), (lo_b, hi_b)| (lo_a.min(lo_b), hi_a.max(hi_b)))
    }

    pub fn update_info(&self, name: impl Into<String>, value: impl Into<String>) {
        sync::lock(&self.info).insert(name.into(), value.into());
    }

    pub fn get_info(&self, name: &str) -> Option<String> {
        sync::lock(&self.info).get(name).cloned()
    }

    pub fn clear_info(&self) {
        sync::lock(&self.info).clear();
    }

    pub fn roi_frames(&self) -> Vec<usize> {
        self.annotations.roi_frames()
    }
}

impl ImageStack for Stack {
    fn width(&self) -> usize {
        sync::read(&self.state).width
    }

    fn height(&self) -> usize {
        sync::read(&self.state).height
    }

    fn n_channels(&self) -> usize {
        sync::read(&self.state).n_channels
    }

    fn n_frames(&self) -> usize {
        sync::read(&self.state).n_frames
    }

    fn with_image(
        &self,
        channel: usize,
        frame: usize,
        scale: Option<f64>,
        f: &mut dyn FnMut(ImageView<'_>),
    ) -> Result<()> {
        let image = self.get_image(channel, frame)?;
        let view = image.view();
        let (w, h) = scaled_dims(view.width(), view.height(), scale)?;
        if (w, h) == (view.width(), view.height()) {
            f(view);
        } else {
            f(view.resized(w, h)?.view());
        }
        Ok(())
    }

    fn get_image_copy(&self, channel: usize, frame: usize) -> Result<Image> {
        Stack::get_image_copy(self, channel, frame)
    }

    fn add_listener(&self, callback: Box<dyn Fn(EventKind) + Send + Sync>, kind: EventKind) -> ListenerId {
        self.annotations.add_listener(callback, kind)
    }

    fn delete_listener(&self, id: ListenerId) -> bool {
        self.annotations.delete_listener(id)
    }

    fn set_rois(&self, rois: Vec<(String, Roi)>, kind: RoiKind, frame: FrameSel) -> Result<()> {
        let n_frames = self.roi_frame_bound.load(Ordering::Acquire);
        self.annotations.set_rois(rois, kind, frame, n_frames)
    }

    fn get_rois(&self, frame: FrameSel) -> Option<RoiSet> {
        self.annotations.get_rois(frame)
    }

    fn get_roi(&self, frame: usize, label: &str) -> Option<Roi> {
        self.annotations.get_roi(frame, label)
    }

    fn clear_rois(&self, frame: FrameSel) {
        self.annotations.clear_rois(frame);
    }
}

/// A fully decoded stack waiting to be published.
struct Loaded {
    meta: StackMetadata,
    width: usize,
    height: usize,
    store: PixelStore,
}

fn source_into_store(source: &mut dyn PageSource, options: &LoadOptions, progress: &dyn LoadProgress) -> Result<Loaded> {
    let page_count = source.page_count();
    if page_count == 0 {
        return Err(StackError::format("no pages found"));
    }
    let first = source.first_page().clone();
    let meta = parse_description(first.description.as_deref(), first.bits_per_sample)?;
    if meta.n_images() != page_count {
        return Err(StackError::format(format!(
            "metadata declare {} images ({} channels x {} frames), but found {} pages",
            meta.n_images(),
            meta.n_channels,
            meta.n_frames,
            page_count
        )));
    }

    let shape = StoreShape {
        n_channels: meta.n_channels,
        n_frames: meta.n_frames,
        height: first.height,
        width: first.width,
    };
    let mut store = PixelStore::allocate(shape, meta.depth, options.scratch_dir.as_deref())?;
    let indexer = PositionIndexer::new(meta.order, meta.n_channels, meta.n_frames);

    progress.begin(page_count);
    for page in 0..page_count {
        let (channel, frame) = indexer.to_position(page)?;
        source.read_page(page, store.plane_mut(channel, frame)?)?;
        let done = page + 1;
        if done % LOAD_PROGRESS_STEP == 0 || done == page_count {
            progress.advance(done);
        }
    }

    Ok(Loaded {
        meta,
        width: first.width,
        height: first.height,
        store,
    })
}
