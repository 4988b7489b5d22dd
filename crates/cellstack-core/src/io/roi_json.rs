//! ROI sets as JSON.
//!
//! One object per frame, mapping each label to the covered pixels:
//!
//! ```json
//! {
//!   "n_frames": 2,
//!   "frames": [
//!     { "1": { "name": "cell 1", "rows": [0, 0], "cols": [3, 4] } },
//!     {}
//!   ]
//! }
//! ```
//!
//! Rectangular ROIs are written as their pixel lists and read back as raw.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, StackError};
use crate::roi::{FrameSel, Roi, RoiKind};
use crate::stack::ImageStack;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RoiRecord {
    #[serde(default)]
    pub name: Option<String>,
    pub rows: Vec<u32>,
    pub cols: Vec<u32>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RoiDocument {
    pub n_frames: usize,
    pub frames: Vec<BTreeMap<String, RoiRecord>>,
}

impl RoiDocument {
    /// Collect the effective ROI set of every frame of `stack`.
    pub fn from_stack(stack: &dyn ImageStack) -> Self {
        let n_frames = stack.n_frames();
        let frames = (0..n_frames)
            .map(|frame| {
                stack
                    .get_rois(FrameSel::Frame(frame))
                    .map(|set| {
                        set.iter()
                            .map(|(label, roi)| {
                                let (rows, cols) = roi.coords();
                                let record = RoiRecord {
                                    name: roi.name.clone(),
                                    rows,
                                    cols,
                                };
                                (label.to_string(), record)
                            })
                            .collect()
                    })
                    .unwrap_or_default()
            })
            .collect();
        Self { n_frames, frames }
    }

    /// Replace the ROIs of every frame of `stack` with raw ROIs from this document.
    ///
    /// Every record is checked before any frame is touched, so an error
    /// leaves `stack` unchanged.
    pub fn apply(&self, stack: &dyn ImageStack) -> Result<()> {
        let n_frames = stack.n_frames();
        if self.n_frames != n_frames || self.frames.len() != n_frames {
            return Err(StackError::DimensionMismatch {
                expected: format!("{n_frames} frames"),
                found: format!("{} frames in ROI document", self.frames.len()),
            });
        }
        let frames = self
            .frames
            .iter()
            .map(|records| {
                records
                    .iter()
                    .map(|(label, record)| {
                        let mut roi = Roi::raw(record.rows.clone(), record.cols.clone())?;
                        roi.name = record.name.clone();
                        Ok((label.clone(), roi))
                    })
                    .collect::<Result<Vec<_>>>()
            })
            .collect::<Result<Vec<_>>>()?;

        for (frame, rois) in frames.into_iter().enumerate() {
            if rois.is_empty() {
                stack.clear_rois(FrameSel::Frame(frame));
            } else {
                stack.set_rois(rois, RoiKind::Raw, FrameSel::Frame(frame))?;
            }
        }
        Ok(())
    }
}

pub fn write_rois(stack: &dyn ImageStack, path: &Path) -> Result<()> {
    let doc = RoiDocument::from_stack(stack);
    let mut writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(&mut writer, &doc)?;
    writer.flush()?;
    debug!(path = %path.display(), frames = doc.n_frames, "ROIs written");
    Ok(())
}

pub fn read_rois(path: &Path) -> Result<RoiDocument> {
    let reader = BufReader::new(File::open(path)?);
    Ok(serde_json::from_reader(reader)?)
}
