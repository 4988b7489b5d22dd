use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock, Weak};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{Geometry, ImageStack, LoadProgress, Stack};
use crate::annotations::Annotations;
use crate::config::CompositionConfig;
use crate::error::{Result, StackError};
use crate::listener::{EventKind, ListenerId};
use crate::plane::{scaled_dims, Image, ImageView};
use crate::roi::{FrameSel, Roi, RoiKind, RoiSet};
use crate::sync;

/// Imaging modality of a channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChannelType {
    PhaseContrast,
    Fluorescence,
    Segmentation,
}

impl std::fmt::Display for ChannelType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PhaseContrast => write!(f, "phase-contrast"),
            Self::Fluorescence => write!(f, "fluorescence"),
            Self::Segmentation => write!(f, "segmentation"),
        }
    }
}

/// Renders a computed channel as `render(metastack, frame, scale)`.
pub type RenderFn = Arc<dyn Fn(&MetaStack, usize, Option<f64>) -> Result<Image> + Send + Sync>;

/// One channel of a [`MetaStack`].
#[derive(Clone)]
pub enum ChannelSpec {
    /// A channel read from a registered stack.
    Real {
        stack: String,
        channel: usize,
        label: String,
        kind: ChannelType,
    },
    /// A channel produced on demand by a render function.
    Computed {
        render: RenderFn,
        /// Whether `render` honours the requested scale itself.
        supports_scale: bool,
        label: String,
        kind: ChannelType,
    },
}

impl std::fmt::Debug for ChannelSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Real {
                stack,
                channel,
                label,
                kind,
            } => f
                .debug_struct("Real")
                .field("stack", stack)
                .field("channel", channel)
                .field("label", label)
                .field("kind", kind)
                .finish(),
            Self::Computed {
                supports_scale,
                label,
                kind,
                ..
            } => f
                .debug_struct("Computed")
                .field("supports_scale", supports_scale)
                .field("label", label)
                .field("kind", kind)
                .finish_non_exhaustive(),
        }
    }
}

impl ChannelSpec {
    fn info(&self) -> ChannelInfo {
        match self {
            Self::Real {
                stack,
                channel,
                label,
                kind,
            } => ChannelInfo {
                label: label.clone(),
                kind: *kind,
                source: ChannelSource::Real {
                    stack: stack.clone(),
                    channel: *channel,
                },
            },
            Self::Computed {
                supports_scale,
                label,
                kind,
                ..
            } => ChannelInfo {
                label: label.clone(),
                kind: *kind,
                source: ChannelSource::Computed {
                    supports_scale: *supports_scale,
                },
            },
        }
    }
}

/// Where a channel's pixels come from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChannelSource {
    Real { stack: String, channel: usize },
    Computed { supports_scale: bool },
}

/// Snapshot of one [`MetaStack`] channel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChannelInfo {
    pub label: String,
    pub kind: ChannelType,
    pub source: ChannelSource,
}

struct Member {
    stack: Weak<Stack>,
    /// Forwards the stack's Image events to the metastack's listeners.
    forwarder: ListenerId,
}

#[derive(Default)]
struct MetaState {
    stacks: BTreeMap<String, Member>,
    channels: Vec<ChannelSpec>,
    geometry: Option<Geometry>,
    /// Geometry set explicitly; kept when the last channel is removed.
    pinned: bool,
}

/// Channel source resolved under the metastack lock, used after releasing it.
enum Resolved {
    Real { stack: Arc<Stack>, channel: usize },
    Computed { render: RenderFn, supports_scale: bool },
}

/// Several stacks and computed channels composed into one logical
/// multi-channel stack.
///
/// A metastack holds non-owning references to its stacks; dropping a stack
/// elsewhere turns reads of its channels into [`StackError::UnknownStack`].
/// Geometry (plane size and frame count) is frozen by the first channel and
/// every later real channel must match it.
///
/// Reads resolve the channel under the metastack lock and release it before
/// touching a constituent stack, so at most one stack's locks are held at a
/// time.
#[derive(Default)]
pub struct MetaStack {
    state: RwLock<MetaState>,
    annotations: Annotations,
}

impl std::fmt::Debug for MetaStack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = sync::read(&self.state);
        f.debug_struct("MetaStack")
            .field("stacks", &state.stacks.keys().collect::<Vec<_>>())
            .field("channels", &state.channels)
            .field("geometry", &state.geometry)
            .finish()
    }
}

impl MetaStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open every stack named in `config` and compose its channels.
    ///
    /// Returns the metastack together with the stacks it references, which
    /// the caller must keep alive for as long as the metastack is read.
    pub fn from_config(config: &CompositionConfig, progress: &dyn LoadProgress) -> Result<(Self, Vec<Arc<Stack>>)> {
        let meta = Self::new();
        let mut stacks = Vec::with_capacity(config.stacks.len());
        for entry in &config.stacks {
            let stack = Arc::new(Stack::with_options(config.load.clone()));
            stack.load_with(&entry.path, progress)?;
            meta.add_stack(&stack, &entry.name)?;
            stacks.push(stack);
        }
        for channel in &config.channels {
            let label = channel
                .label
                .clone()
                .unwrap_or_else(|| format!("{}:{}", channel.stack, channel.index));
            meta.add_channel(&channel.stack, channel.index, label, channel.kind)?;
        }
        Ok((meta, stacks))
    }

    /// Register `stack` under a unique `name`.
    pub fn add_stack(&self, stack: &Arc<Stack>, name: &str) -> Result<()> {
        let mut state = sync::write(&self.state);
        if state.stacks.contains_key(name) {
            return Err(StackError::DuplicateStack(name.to_string()));
        }
        let registry = Arc::downgrade(self.annotations.listeners());
        let forwarder = stack.add_listener(
            Box::new(move |event| {
                if let Some(registry) = registry.upgrade() {
                    registry.notify(event);
                }
            }),
            EventKind::Image,
        );
        state.stacks.insert(
            name.to_string(),
            Member {
                stack: Arc::downgrade(stack),
                forwarder,
            },
        );
        debug!(name, "Stack added to metastack");
        Ok(())
    }

    /// Unregister a stack and drop every channel read from it.
    pub fn remove_stack(&self, name: &str) -> Result<()> {
        let member = {
            let mut state = sync::write(&self.state);
            let member = state
                .stacks
                .remove(name)
                .ok_or_else(|| StackError::UnknownStack(name.to_string()))?;
            state
                .channels
                .retain(|spec| !matches!(spec, ChannelSpec::Real { stack, .. } if stack == name));
            if state.channels.is_empty() && !state.pinned {
                state.geometry = None;
            }
            member
        };
        if let Some(stack) = member.stack.upgrade() {
            stack.delete_listener(member.forwarder);
        }
        debug!(name, "Stack removed from metastack");
        self.annotations.notify(EventKind::Image);
        Ok(())
    }

    /// Append a channel read from channel `channel` of the stack registered
    /// as `stack_name`. Returns the new channel's index.
    ///
    /// The first channel locks the metastack geometry; a later channel whose
    /// stack differs in width, height or frame count is rejected with
    /// [`StackError::DimensionMismatch`] and the metastack is left unchanged.
    pub fn add_channel(
        &self,
        stack_name: &str,
        channel: usize,
        label: impl Into<String>,
        kind: ChannelType,
    ) -> Result<usize> {
        let stack = self.member(stack_name)?;
        let snapshot = stack.snapshot();
        if channel >= snapshot.n_channels {
            return Err(StackError::index("channel", channel, snapshot.n_channels));
        }
        let depth = snapshot
            .depth
            .ok_or_else(|| StackError::index("channel", channel, 0))?;
        let candidate = Geometry {
            width: snapshot.width,
            height: snapshot.height,
            n_frames: snapshot.n_frames,
            depth,
        };

        let index = {
            let mut state = sync::write(&self.state);
            if !state.stacks.contains_key(stack_name) {
                return Err(StackError::UnknownStack(stack_name.to_string()));
            }
            match state.geometry {
                Some(locked) if !locked.is_compatible(&candidate) => {
                    return Err(StackError::DimensionMismatch {
                        expected: locked.describe(),
                        found: format!("{} in stack '{stack_name}'", candidate.describe()),
                    });
                }
                Some(_) => {}
                None => state.geometry = Some(candidate),
            }
            state.channels.push(ChannelSpec::Real {
                stack: stack_name.to_string(),
                channel,
                label: label.into(),
                kind,
            });
            state.channels.len() - 1
        };
        info!(stack = stack_name, channel, index, "Channel added to metastack");
        self.annotations.notify(EventKind::Image);
        Ok(index)
    }

    /// Append a channel rendered on demand. Returns the new channel's index.
    ///
    /// `render` must return planes of the metastack's (scaled) size. When
    /// `supports_scale` is false it is always called with `None` and its
    /// output is resampled here.
    pub fn add_computed_channel(
        &self,
        render: impl Fn(&MetaStack, usize, Option<f64>) -> Result<Image> + Send + Sync + 'static,
        supports_scale: bool,
        label: impl Into<String>,
        kind: ChannelType,
    ) -> usize {
        let index = {
            let mut state = sync::write(&self.state);
            state.channels.push(ChannelSpec::Computed {
                render: Arc::new(render),
                supports_scale,
                label: label.into(),
                kind,
            });
            state.channels.len() - 1
        };
        info!(index, supports_scale, "Computed channel added to metastack");
        self.annotations.notify(EventKind::Image);
        index
    }

    /// Lock the geometry before any real channel is added.
    pub fn set_geometry(&self, geometry: Geometry) -> Result<()> {
        {
            let mut state = sync::write(&self.state);
            if let Some(locked) = state.geometry {
                if !locked.is_compatible(&geometry) {
                    return Err(StackError::DimensionMismatch {
                        expected: locked.describe(),
                        found: geometry.describe(),
                    });
                }
            }
            state.geometry = Some(geometry);
            state.pinned = true;
        }
        self.annotations.notify(EventKind::Image);
        Ok(())
    }

    pub fn geometry(&self) -> Option<Geometry> {
        sync::read(&self.state).geometry
    }

    pub fn channels(&self) -> Vec<ChannelInfo> {
        sync::read(&self.state).channels.iter().map(ChannelSpec::info).collect()
    }

    pub fn stack_names(&self) -> Vec<String> {
        sync::read(&self.state).stacks.keys().cloned().collect()
    }

    /// Plane of channel `channel` at `frame`, resampled by `scale`.
    pub fn get_image(&self, channel: usize, frame: usize, scale: Option<f64>) -> Result<Image> {
        let (resolved, geometry) = self.resolve(channel, frame)?;
        let expected = scaled_dims(geometry.width, geometry.height, scale)?;
        match resolved {
            Resolved::Real { stack, channel } => {
                let mut image = None;
                self.read_real(&stack, channel, frame, scale, expected, &mut |view| {
                    image = Some(view.to_image())
                })?;
                image.ok_or_else(|| StackError::index("frame", frame, geometry.n_frames))
            }
            Resolved::Computed {
                render,
                supports_scale,
            } => self.render(&render, supports_scale, frame, scale, expected),
        }
    }

    fn member(&self, name: &str) -> Result<Arc<Stack>> {
        sync::read(&self.state)
            .stacks
            .get(name)
            .and_then(|m| m.stack.upgrade())
            .ok_or_else(|| StackError::UnknownStack(name.to_string()))
    }

    fn resolve(&self, channel: usize, frame: usize) -> Result<(Resolved, Geometry)> {
        let state = sync::read(&self.state);
        let spec = state
            .channels
            .get(channel)
            .ok_or_else(|| StackError::index("channel", channel, state.channels.len()))?;
        let geometry = state.geometry.ok_or_else(|| StackError::DimensionMismatch {
            expected: "a locked geometry".to_string(),
            found: "none".to_string(),
        })?;
        if frame >= geometry.n_frames {
            return Err(StackError::index("frame", frame, geometry.n_frames));
        }
        let resolved = match spec {
            ChannelSpec::Real { stack, channel, .. } => Resolved::Real {
                stack: state
                    .stacks
                    .get(stack)
                    .and_then(|m| m.stack.upgrade())
                    .ok_or_else(|| StackError::UnknownStack(stack.clone()))?,
                channel: *channel,
            },
            ChannelSpec::Computed {
                render,
                supports_scale,
                ..
            } => Resolved::Computed {
                render: Arc::clone(render),
                supports_scale: *supports_scale,
            },
        };
        Ok((resolved, geometry))
    }

    fn read_real(
        &self,
        stack: &Stack,
        channel: usize,
        frame: usize,
        scale: Option<f64>,
        expected: (usize, usize),
        f: &mut dyn FnMut(ImageView<'_>),
    ) -> Result<()> {
        let mut checked = Ok(());
        stack.with_image(channel, frame, scale, &mut |view| {
            let found = (view.width(), view.height());
            if found == expected {
                f(view);
            } else {
                checked = Err(size_mismatch(expected, found));
            }
        })?;
        checked
    }

    fn render(
        &self,
        render: &RenderFn,
        supports_scale: bool,
        frame: usize,
        scale: Option<f64>,
        expected: (usize, usize),
    ) -> Result<Image> {
        let image = render(self, frame, if supports_scale { scale } else { None })?;
        let found = (image.width(), image.height());
        if found == expected {
            return Ok(image);
        }
        if supports_scale || scale.is_none() {
            return Err(size_mismatch(expected, found));
        }
        let image = image.view().resized(expected.0, expected.1)?;
        Ok(image)
    }
}

fn size_mismatch(expected: (usize, usize), found: (usize, usize)) -> StackError {
    StackError::DimensionMismatch {
        expected: format!("{}x{} px", expected.0, expected.1),
        found: format!("{}x{} px", found.0, found.1),
    }
}

impl ImageStack for MetaStack {
    fn width(&self) -> usize {
        self.geometry().map_or(0, |g| g.width)
    }

    fn height(&self) -> usize {
        self.geometry().map_or(0, |g| g.height)
    }

    fn n_channels(&self) -> usize {
        sync::read(&self.state).channels.len()
    }

    fn n_frames(&self) -> usize {
        self.geometry().map_or(0, |g| g.n_frames)
    }

    fn with_image(
        &self,
        channel: usize,
        frame: usize,
        scale: Option<f64>,
        f: &mut dyn FnMut(ImageView<'_>),
    ) -> Result<()> {
        let (resolved, geometry) = self.resolve(channel, frame)?;
        let expected = scaled_dims(geometry.width, geometry.height, scale)?;
        match resolved {
            Resolved::Real { stack, channel } => self.read_real(&stack, channel, frame, scale, expected, f),
            Resolved::Computed {
                render,
                supports_scale,
            } => {
                let image = self.render(&render, supports_scale, frame, scale, expected)?;
                f(image.view());
                Ok(())
            }
        }
    }

    fn get_image_copy(&self, channel: usize, frame: usize) -> Result<Image> {
        self.get_image(channel, frame, None)
    }

    fn add_listener(&self, callback: Box<dyn Fn(EventKind) + Send + Sync>, kind: EventKind) -> ListenerId {
        self.annotations.add_listener(callback, kind)
    }

    fn delete_listener(&self, id: ListenerId) -> bool {
        self.annotations.delete_listener(id)
    }

    fn set_rois(&self, rois: Vec<(String, Roi)>, kind: RoiKind, frame: FrameSel) -> Result<()> {
        let n_frames = ImageStack::n_frames(self);
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

impl Drop for MetaStack {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        for member in state.stacks.values() {
            if let Some(stack) = member.stack.upgrade() {
                stack.delete_listener(member.forwarder);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    fn constant(width: usize, height: usize, value: u8) -> Image {
        Image::U8(Array2::from_elem((height, width), value))
    }

    fn geometry(width: usize, height: usize, n_frames: usize) -> Geometry {
        Geometry {
            width,
            height,
            n_frames,
            depth: crate::plane::BitDepth::Eight,
        }
    }

    #[test]
    fn test_computed_channel_without_geometry_fails() {
        let meta = MetaStack::new();
        meta.add_computed_channel(|_, _, _| Ok(constant(4, 4, 1)), false, "ones", ChannelType::Segmentation);
        assert!(matches!(
            meta.get_image(0, 0, None),
            Err(StackError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn test_computed_channel_renders_and_scales() {
        let meta = MetaStack::new();
        meta.set_geometry(geometry(8, 6, 3)).unwrap();
        meta.add_computed_channel(|_, frame, _| Ok(constant(8, 6, frame as u8)), false, "frame", ChannelType::Fluorescence);

        let full = meta.get_image(0, 2, None).unwrap();
        assert_eq!((full.width(), full.height()), (8, 6));
        assert_eq!(full.view().min_max(), Some((2, 2)));

        let half = meta.get_image(0, 1, Some(0.5)).unwrap();
        assert_eq!((half.width(), half.height()), (4, 3));

        assert!(matches!(meta.get_image(0, 3, None), Err(StackError::Index { .. })));
        assert!(matches!(meta.get_image(1, 0, None), Err(StackError::Index { .. })));
    }

    #[test]
    fn test_computed_channel_wrong_size_rejected_at_read() {
        let meta = MetaStack::new();
        meta.set_geometry(geometry(8, 6, 1)).unwrap();
        meta.add_computed_channel(|_, _, _| Ok(constant(5, 5, 0)), true, "bad", ChannelType::Segmentation);
        assert!(matches!(
            meta.get_image(0, 0, None),
            Err(StackError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn test_set_geometry_conflict() {
        let meta = MetaStack::new();
        meta.set_geometry(geometry(8, 6, 3)).unwrap();
        assert!(meta.set_geometry(geometry(8, 6, 3)).is_ok());
        assert!(matches!(
            meta.set_geometry(geometry(9, 6, 3)),
            Err(StackError::DimensionMismatch { .. })
        ));
        assert_eq!(meta.geometry(), Some(geometry(8, 6, 3)));
    }

    #[test]
    fn test_unknown_stack_rejected() {
        let meta = MetaStack::new();
        assert!(matches!(
            meta.add_channel("missing", 0, "x", ChannelType::PhaseContrast),
            Err(StackError::UnknownStack(_))
        ));
        assert!(matches!(meta.remove_stack("missing"), Err(StackError::UnknownStack(_))));
    }

    #[test]
    fn test_channel_type_names() {
        assert_eq!(ChannelType::PhaseContrast.to_string(), "phase-contrast");
        let parsed: ChannelType = serde_json::from_str("\"segmentation\"").unwrap();
        assert_eq!(parsed, ChannelType::Segmentation);
    }
}
