use serde::{Deserialize, Serialize};

use crate::error::{Result, StackError};

/// Page interleaving of a stack file.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DimensionOrder {
    /// Channel varies fastest: `c0f0, c1f0, ..., c0f1, c1f1, ...` ("tc").
    FrameMajor,
    /// Frame varies fastest: `c0f0, c0f1, ..., c1f0, c1f1, ...` ("ct").
    ChannelMajor,
}

impl std::fmt::Display for DimensionOrder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::FrameMajor => write!(f, "tc"),
            Self::ChannelMajor => write!(f, "ct"),
        }
    }
}

/// A stack position, either as (channel, frame) or as linear page index.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StackPosition {
    Planar { channel: usize, frame: usize },
    Linear(usize),
}

/// Bijective mapping between linear page index and (channel, frame).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PositionIndexer {
    pub order: DimensionOrder,
    pub n_channels: usize,
    pub n_frames: usize,
}

impl PositionIndexer {
    pub fn new(order: DimensionOrder, n_channels: usize, n_frames: usize) -> Self {
        Self {
            order,
            n_channels,
            n_frames,
        }
    }

    pub fn n_images(&self) -> usize {
        self.n_channels * self.n_frames
    }

    /// Linear page index of `(channel, frame)`.
    pub fn to_index(&self, channel: usize, frame: usize) -> Result<usize> {
        if channel >= self.n_channels {
            return Err(StackError::index("channel", channel, self.n_channels));
        }
        if frame >= self.n_frames {
            return Err(StackError::index("frame", frame, self.n_frames));
        }
        Ok(match self.order {
            DimensionOrder::FrameMajor => frame * self.n_channels + channel,
            DimensionOrder::ChannelMajor => channel * self.n_frames + frame,
        })
    }

    /// `(channel, frame)` of a linear page index.
    pub fn to_position(&self, index: usize) -> Result<(usize, usize)> {
        let total = self.n_images();
        if index >= total {
            return Err(StackError::index("image", index, total));
        }
        Ok(match self.order {
            DimensionOrder::FrameMajor => (index % self.n_channels, index / self.n_channels),
            DimensionOrder::ChannelMajor => (index / self.n_frames, index % self.n_frames),
        })
    }

    /// Convert a position into the other form.
    pub fn convert(&self, position: StackPosition) -> Result<StackPosition> {
        match position {
            StackPosition::Planar { channel, frame } => {
                self.to_index(channel, frame).map(StackPosition::Linear)
            }
            StackPosition::Linear(index) => {
                let (channel, frame) = self.to_position(index)?;
                Ok(StackPosition::Planar { channel, frame })
            }
        }
    }
}
