use std::sync::OnceLock;

use regex::Regex;

use crate::error::{Result, StackError};
use crate::plane::BitDepth;

use super::order::DimensionOrder;

/// Metadata dialect found in the description tag of the first page.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Dialect {
    ImageJ,
    Ome,
}

/// Stack dimensions decoded from the description tag.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StackMetadata {
    pub dialect: Dialect,
    pub depth: BitDepth,
    pub order: DimensionOrder,
    pub n_channels: usize,
    pub n_frames: usize,
}

impl StackMetadata {
    pub fn n_images(&self) -> usize {
        self.n_channels * self.n_frames
    }
}

/// Decode stack dimensions from the raw description text of the first page.
pub fn parse_description(description: Option<&str>, bits_per_sample: u32) -> Result<StackMetadata> {
    let depth = BitDepth::from_bits(bits_per_sample)?;
    let text = description.unwrap_or("").trim_start();

    if text.starts_with("ImageJ=") {
        let (n_channels, n_frames) = parse_imagej(text)?;
        Ok(StackMetadata {
            dialect: Dialect::ImageJ,
            depth,
            order: DimensionOrder::FrameMajor,
            n_channels,
            n_frames,
        })
    } else if text.starts_with('<') && text.contains("OME") {
        let (n_channels, n_frames, order) = parse_ome(text)?;
        Ok(StackMetadata {
            dialect: Dialect::Ome,
            depth,
            order,
            n_channels,
            n_frames,
        })
    } else {
        Err(StackError::format("unknown dialect"))
    }
}

fn imagej_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(frames|slices|channels)=(\d+)").expect("static pattern is valid")
    })
}

/// Returns `(n_channels, n_frames)` from ImageJ `key=value` text.
fn parse_imagej(text: &str) -> Result<(usize, usize)> {
    let mut frames = None;
    let mut slices = None;
    let mut channels = None;

    for caps in imagej_pattern().captures_iter(text) {
        let value: usize = caps[2]
            .parse()
            .map_err(|_| StackError::format(format!("bad '{}' value in ImageJ description", &caps[1])))?;
        if value < 1 {
            return Err(StackError::format(format!(
                "non-positive '{}' value in ImageJ description",
                &caps[1]
            )));
        }
        let slot = match &caps[1] {
            "frames" => &mut frames,
            "slices" => &mut slices,
            _ => &mut channels,
        };
        slot.get_or_insert(value);
    }

    let mut n_frames = frames.unwrap_or(1);
    if let Some(n_slices) = slices.filter(|&s| s > 1) {
        if n_frames > 1 {
            return Err(StackError::AmbiguousDimensions {
                frames: n_frames,
                slices: n_slices,
            });
        }
        n_frames = n_slices;
    }

    Ok((channels.unwrap_or(1), n_frames))
}

/// Returns `(n_channels, n_frames, order)` from an OME-XML document.
fn parse_ome(text: &str) -> Result<(usize, usize, DimensionOrder)> {
    let doc = roxmltree::Document::parse(text)
        .map_err(|e| StackError::format(format!("malformed OME description: {e}")))?;

    let image = doc
        .root_element()
        .children()
        .find(|n| n.is_element() && n.tag_name().name() == "Image")
        .ok_or_else(|| StackError::format("no 'Image' tag found in OME description"))?;
    let pixels = image
        .children()
        .find(|n| n.is_element() && n.tag_name().name() == "Pixels")
        .ok_or_else(|| StackError::format("no 'Pixels' tag found in OME description"))?;

    let size = |name: &str| -> Result<u32> {
        let raw = pixels
            .attribute(name)
            .ok_or_else(|| StackError::format(format!("no '{name}' attribute found in OME description")))?;
        let value: i64 = raw
            .trim()
            .parse()
            .map_err(|_| StackError::format(format!("bad '{name}' value in OME description")))?;
        if value < 1 {
            return Err(StackError::format(format!(
                "non-positive '{name}' value in OME description"
            )));
        }
        u32::try_from(value)
            .map_err(|_| StackError::format(format!("bad '{name}' value in OME description")))
    };

    let size_t = size("SizeT")?;
    let size_c = size("SizeC")?;
    let size_z = size("SizeZ")?;
    if size_z != 1 {
        return Err(StackError::UnsupportedZStack(size_z));
    }

    let dim_order = pixels
        .attribute("DimensionOrder")
        .ok_or_else(|| StackError::format("no 'DimensionOrder' attribute found in OME description"))?;
    let order = resolve_dimension_order(dim_order)?;

    Ok((size_c as usize, size_t as usize, order))
}

/// Map an OME `DimensionOrder` string such as `XYCZT` onto a page order.
pub fn resolve_dimension_order(dim_order: &str) -> Result<DimensionOrder> {
    let bad = || StackError::format(format!("bad 'DimensionOrder' value '{dim_order}' in OME description"));

    let rest = dim_order.strip_prefix("XY").ok_or_else(bad)?;
    let mut sorted: Vec<char> = rest.chars().collect();
    sorted.sort_unstable();
    if sorted != ['C', 'T', 'Z'] {
        return Err(bad());
    }

    let idx_c = rest.find('C').ok_or_else(bad)?;
    let idx_t = rest.find('T').ok_or_else(bad)?;
    if idx_c < idx_t {
        Ok(DimensionOrder::FrameMajor)
    } else {
        Ok(DimensionOrder::ChannelMajor)
    }
}
