use std::fs::File;
use std::ops::Range;
use std::path::Path;

use memmap2::MmapMut;
use ndarray::{ArrayView2, ArrayViewMut2};

use crate::error::{Result, StackError};
use crate::plane::{BitDepth, ImageView, PlaneMut};

/// Shape of a pixel store: (channels, frames, rows, columns).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StoreShape {
    pub n_channels: usize,
    pub n_frames: usize,
    pub height: usize,
    pub width: usize,
}

impl StoreShape {
    pub fn plane_len(&self) -> usize {
        self.height * self.width
    }
}

/// Disk-backed pixel buffer of shape `[channel][frame][row][col]`.
///
/// The buffer lives in an anonymous temporary file that is mapped into
/// memory, so stacks larger than resident memory can still be held. Dropping
/// the store unmaps the region and deletes the file.
pub struct PixelStore {
    mmap: MmapMut,
    _file: File,
    depth: BitDepth,
    shape: StoreShape,
}

impl std::fmt::Debug for PixelStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PixelStore")
            .field("depth", &self.depth)
            .field("shape", &self.shape)
            .field("bytes", &self.mmap.len())
            .finish()
    }
}

impl PixelStore {
    /// Allocate a zeroed store in `scratch_dir` (system temp dir if `None`).
    pub fn allocate(shape: StoreShape, depth: BitDepth, scratch_dir: Option<&Path>) -> Result<Self> {
        let bytes = shape
            .n_channels
            .checked_mul(shape.n_frames)
            .and_then(|n| n.checked_mul(shape.plane_len()))
            .and_then(|n| n.checked_mul(depth.bytes_per_sample()))
            .ok_or_else(|| {
                StackError::Resource(std::io::Error::other("pixel buffer size overflows"))
            })?;
        if bytes == 0 {
            return Err(StackError::format(format!(
                "empty stack: {}x{} px, {} channels, {} frames",
                shape.width, shape.height, shape.n_channels, shape.n_frames
            )));
        }

        let file = match scratch_dir {
            Some(dir) => tempfile::tempfile_in(dir),
            None => tempfile::tempfile(),
        }
        .map_err(StackError::Resource)?;
        file.set_len(bytes as u64).map_err(StackError::Resource)?;
        // The file is anonymous and only reachable through this store.
        let mmap = unsafe { MmapMut::map_mut(&file) }.map_err(StackError::Resource)?;

        Ok(Self {
            mmap,
            _file: file,
            depth,
            shape,
        })
    }

    pub fn depth(&self) -> BitDepth {
        self.depth
    }

    pub fn shape(&self) -> StoreShape {
        self.shape
    }

    pub fn byte_len(&self) -> usize {
        self.mmap.len()
    }

    fn plane_range(&self, channel: usize, frame: usize) -> Result<Range<usize>> {
        if channel >= self.shape.n_channels {
            return Err(StackError::index("channel", channel, self.shape.n_channels));
        }
        if frame >= self.shape.n_frames {
            return Err(StackError::index("frame", frame, self.shape.n_frames));
        }
        let plane_bytes = self.shape.plane_len() * self.depth.bytes_per_sample();
        let start = (channel * self.shape.n_frames + frame) * plane_bytes;
        Ok(start..start + plane_bytes)
    }

    /// Zero-copy view of one plane.
    pub fn plane(&self, channel: usize, frame: usize) -> Result<ImageView<'_>> {
        let range = self.plane_range(channel, frame)?;
        let dim = (self.shape.height, self.shape.width);
        let bytes = &self.mmap[range];
        Ok(match self.depth {
            BitDepth::Eight => ImageView::U8(ArrayView2::from_shape(dim, bytes).map_err(shape_error)?),
            BitDepth::Sixteen => {
                let samples: &[u16] = bytemuck::try_cast_slice(bytes).map_err(cast_error)?;
                ImageView::U16(ArrayView2::from_shape(dim, samples).map_err(shape_error)?)
            }
        })
    }

    /// Writable view of one plane, used while filling the store.
    pub fn plane_mut(&mut self, channel: usize, frame: usize) -> Result<PlaneMut<'_>> {
        let range = self.plane_range(channel, frame)?;
        let dim = (self.shape.height, self.shape.width);
        let bytes = &mut self.mmap[range];
        Ok(match self.depth {
            BitDepth::Eight => PlaneMut::U8(ArrayViewMut2::from_shape(dim, bytes).map_err(shape_error)?),
            BitDepth::Sixteen => {
                let samples: &mut [u16] = bytemuck::try_cast_slice_mut(bytes).map_err(cast_error)?;
                PlaneMut::U16(ArrayViewMut2::from_shape(dim, samples).map_err(shape_error)?)
            }
        })
    }
}

fn shape_error(e: ndarray::ShapeError) -> StackError {
    StackError::DimensionMismatch {
        expected: "plane matching store shape".into(),
        found: e.to_string(),
    }
}

fn cast_error(e: bytemuck::PodCastError) -> StackError {
    StackError::Resource(std::io::Error::other(format!("unaligned pixel buffer: {e:?}")))
}
