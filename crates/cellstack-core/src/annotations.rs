use std::sync::{Arc, Mutex};

use crate::error::{Result, StackError};
use crate::listener::{EventKind, ListenerId, ListenerRegistry};
use crate::roi::{FrameSel, Roi, RoiKind, RoiSet, RoiStore};
use crate::sync;

/// ROI lock domain plus the listener registry, shared by [`Stack`] and
/// [`MetaStack`].
///
/// ROI edits never wait for the image/metadata lock: callers look up the
/// frame count first and pass it in. Listeners are notified after the ROI
/// lock is released.
///
/// [`Stack`]: crate::stack::Stack
/// [`MetaStack`]: crate::stack::MetaStack
#[derive(Debug, Default)]
pub struct Annotations {
    rois: Mutex<RoiStore>,
    listeners: Arc<ListenerRegistry>,
}

impl Annotations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn listeners(&self) -> &Arc<ListenerRegistry> {
        &self.listeners
    }

    pub fn add_listener(&self, callback: impl Fn(EventKind) + Send + Sync + 'static, kind: EventKind) -> ListenerId {
        self.listeners.register(callback, kind)
    }

    pub fn delete_listener(&self, id: ListenerId) -> bool {
        self.listeners.delete(id)
    }

    pub fn notify(&self, event: EventKind) {
        self.listeners.notify(event);
    }

    pub fn set_rois(&self, rois: Vec<(String, Roi)>, kind: RoiKind, frame: FrameSel, n_frames: usize) -> Result<()> {
        if let FrameSel::Frame(f) = frame {
            if f >= n_frames {
                return Err(StackError::index("frame", f, n_frames));
            }
        }
        let set = RoiSet::new(kind, rois)?;
        sync::lock(&self.rois).set(frame, set);
        self.notify(EventKind::Roi);
        Ok(())
    }

    pub fn get_rois(&self, frame: FrameSel) -> Option<RoiSet> {
        sync::lock(&self.rois).get(frame).cloned()
    }

    pub fn get_roi(&self, frame: usize, label: &str) -> Option<Roi> {
        sync::lock(&self.rois)
            .get(FrameSel::Frame(frame))
            .and_then(|set| set.get(label))
            .cloned()
    }

    /// Frames with an explicit ROI set.
    pub fn roi_frames(&self) -> Vec<usize> {
        sync::lock(&self.rois).frames()
    }

    pub fn clear_rois(&self, frame: FrameSel) {
        let changed = sync::lock(&self.rois).clear(frame);
        if changed {
            self.notify(EventKind::Roi);
        }
    }

    /// Drop every ROI set without notifying. Returns whether anything was removed.
    pub(crate) fn reset_rois(&self) -> bool {
        sync::lock(&self.rois).clear(FrameSel::All)
    }
}
