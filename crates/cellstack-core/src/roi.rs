use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::str::FromStr;

use ndarray::ArrayView2;
use num_traits::{PrimInt, Zero};
use serde::{Deserialize, Serialize};

use crate::consts::DEFAULT_ROI_STROKE_WIDTH;
use crate::error::{Result, StackError};
use crate::plane::ImageView;

/// Geometry kind of an ROI set.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoiKind {
    /// Rectangular bounds.
    Rect,
    /// Explicit pixel coordinate lists.
    Raw,
}

impl FromStr for RoiKind {
    type Err = StackError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "rect" => Ok(Self::Rect),
            "raw" => Ok(Self::Raw),
            other => Err(StackError::format(format!("unknown ROI type '{other}'"))),
        }
    }
}

impl std::fmt::Display for RoiKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Rect => write!(f, "rect"),
            Self::Raw => write!(f, "raw"),
        }
    }
}

/// Inclusive pixel bounds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BoundingBox {
    pub y_min: u32,
    pub x_min: u32,
    pub y_max: u32,
    pub x_max: u32,
}

impl BoundingBox {
    pub fn height(&self) -> u32 {
        self.y_max - self.y_min + 1
    }

    pub fn width(&self) -> u32 {
        self.x_max - self.x_min + 1
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum RoiGeometry {
    Rect(BoundingBox),
    Raw { rows: Vec<u32>, cols: Vec<u32> },
}

/// Presentation attributes. Only meaningful to a viewer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RoiStyle {
    pub visible: bool,
    pub name_visible: bool,
    /// Stroke color as `#rrggbb`; `None` uses the viewer default.
    pub color: Option<String>,
    pub stroke_width: f32,
}

impl Default for RoiStyle {
    fn default() -> Self {
        Self {
            visible: true,
            name_visible: true,
            color: None,
            stroke_width: DEFAULT_ROI_STROKE_WIDTH,
        }
    }
}

/// A labeled image region, typically one cell in one frame.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Roi {
    geometry: RoiGeometry,
    area: usize,
    bbox: BoundingBox,
    pub name: Option<String>,
    pub style: RoiStyle,
}

impl Roi {
    pub fn rect(bbox: BoundingBox) -> Result<Self> {
        if bbox.y_min > bbox.y_max || bbox.x_min > bbox.x_max {
            return Err(StackError::format(format!("inverted ROI bounds {bbox:?}")));
        }
        Ok(Self {
            geometry: RoiGeometry::Rect(bbox),
            area: bbox.height() as usize * bbox.width() as usize,
            bbox,
            name: None,
            style: RoiStyle::default(),
        })
    }

    /// ROI covering the pixels `(rows[i], cols[i])`.
    ///
    /// Repeated coordinates are kept once; pixels are stored in row-major order.
    pub fn raw(rows: Vec<u32>, cols: Vec<u32>) -> Result<Self> {
        if rows.len() != cols.len() {
            return Err(StackError::format(format!(
                "ROI has {} row but {} column coordinates",
                rows.len(),
                cols.len()
            )));
        }
        let (Some(&y_min), Some(&y_max), Some(&x_min), Some(&x_max)) = (
            rows.iter().min(),
            rows.iter().max(),
            cols.iter().min(),
            cols.iter().max(),
        ) else {
            return Err(StackError::format("ROI has no pixels"));
        };
        let (rows, cols): (Vec<u32>, Vec<u32>) = rows
            .into_iter()
            .zip(cols)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .unzip();
        Ok(Self {
            area: rows.len(),
            bbox: BoundingBox {
                y_min,
                x_min,
                y_max,
                x_max,
            },
            geometry: RoiGeometry::Raw { rows, cols },
            name: None,
            style: RoiStyle::default(),
        })
    }

    /// Raw ROI of all pixels of `mask` equal to `label`; `None` if there are none.
    pub fn from_label_mask<T: PrimInt>(mask: ArrayView2<'_, T>, label: T) -> Option<Self> {
        let mut rows = Vec::new();
        let mut cols = Vec::new();
        for ((r, c), &v) in mask.indexed_iter() {
            if v == label {
                rows.push(r as u32);
                cols.push(c as u32);
            }
        }
        Self::raw(rows, cols).ok()
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn kind(&self) -> RoiKind {
        match self.geometry {
            RoiGeometry::Rect(_) => RoiKind::Rect,
            RoiGeometry::Raw { .. } => RoiKind::Raw,
        }
    }

    pub fn geometry(&self) -> &RoiGeometry {
        &self.geometry
    }

    /// Number of pixels covered.
    pub fn area(&self) -> usize {
        self.area
    }

    pub fn bbox(&self) -> BoundingBox {
        self.bbox
    }

    /// Mean (row, column) of the covered pixels.
    pub fn centroid(&self) -> (f64, f64) {
        match &self.geometry {
            RoiGeometry::Rect(b) => (
                (b.y_min as f64 + b.y_max as f64) / 2.0,
                (b.x_min as f64 + b.x_max as f64) / 2.0,
            ),
            RoiGeometry::Raw { rows, cols } => {
                let n = rows.len() as f64;
                let sum_r: f64 = rows.iter().map(|&r| r as f64).sum();
                let sum_c: f64 = cols.iter().map(|&c| c as f64).sum();
                (sum_r / n, sum_c / n)
            }
        }
    }

    pub fn contains(&self, row: u32, col: u32) -> bool {
        match &self.geometry {
            RoiGeometry::Rect(b) => (b.y_min..=b.y_max).contains(&row) && (b.x_min..=b.x_max).contains(&col),
            RoiGeometry::Raw { rows, cols } => rows.iter().zip(cols).any(|(&r, &c)| r == row && c == col),
        }
    }

    /// Row and column coordinates of every covered pixel.
    pub fn coords(&self) -> (Vec<u32>, Vec<u32>) {
        match &self.geometry {
            RoiGeometry::Rect(b) => (b.y_min..=b.y_max)
                .flat_map(|r| (b.x_min..=b.x_max).map(move |c| (r, c)))
                .unzip(),
            RoiGeometry::Raw { rows, cols } => (rows.clone(), cols.clone()),
        }
    }
}

/// One raw ROI per non-zero label of a segmentation image, keyed by label.
pub fn rois_from_labels(labels: ImageView<'_>) -> Vec<(String, Roi)> {
    match labels {
        ImageView::U8(a) => collect_labels(a),
        ImageView::U16(a) => collect_labels(a),
    }
}

fn collect_labels<T: PrimInt + std::fmt::Display>(a: ArrayView2<'_, T>) -> Vec<(String, Roi)> {
    let mut coords: BTreeMap<T, (Vec<u32>, Vec<u32>)> = BTreeMap::new();
    for ((r, c), &v) in a.indexed_iter() {
        if !v.is_zero() {
            let entry = coords.entry(v).or_default();
            entry.0.push(r as u32);
            entry.1.push(c as u32);
        }
    }
    coords
        .into_iter()
        .filter_map(|(label, (rows, cols))| Roi::raw(rows, cols).ok().map(|roi| (label.to_string(), roi)))
        .collect()
}

/// Labeled ROIs of one geometry kind.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RoiSet {
    kind: RoiKind,
    rois: BTreeMap<String, Roi>,
}

impl RoiSet {
    pub fn new(kind: RoiKind, rois: impl IntoIterator<Item = (String, Roi)>) -> Result<Self> {
        let mut map = BTreeMap::new();
        for (label, roi) in rois {
            if roi.kind() != kind {
                return Err(StackError::format(format!(
                    "ROI '{label}' is {} but the set is {kind}",
                    roi.kind()
                )));
            }
            map.insert(label, roi);
        }
        Ok(Self { kind, rois: map })
    }

    pub fn kind(&self) -> RoiKind {
        self.kind
    }

    /// ROI with `label`; absence is not an error.
    pub fn get(&self, label: &str) -> Option<&Roi> {
        self.rois.get(label)
    }

    pub fn len(&self) -> usize {
        self.rois.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rois.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Roi)> {
        self.rois.iter().map(|(k, v)| (k.as_str(), v))
    }
}

/// Frame selector for ROI operations.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FrameSel {
    /// The shared default, applying to frames without an explicit set.
    /// For clearing, every set.
    All,
    Frame(usize),
}

/// Per-frame ROI sets with a shared default.
#[derive(Clone, Debug, Default)]
pub struct RoiStore {
    default: Option<RoiSet>,
    frames: HashMap<usize, RoiSet>,
}

impl RoiStore {
    pub fn set(&mut self, frame: FrameSel, set: RoiSet) {
        match frame {
            FrameSel::All => self.default = Some(set),
            FrameSel::Frame(f) => {
                self.frames.insert(f, set);
            }
        }
    }

    /// The set of `frame`, falling back to the shared default.
    pub fn get(&self, frame: FrameSel) -> Option<&RoiSet> {
        match frame {
            FrameSel::All => self.default.as_ref(),
            FrameSel::Frame(f) => self.frames.get(&f).or(self.default.as_ref()),
        }
    }

    /// Returns whether anything was removed.
    pub fn clear(&mut self, frame: FrameSel) -> bool {
        match frame {
            FrameSel::All => {
                let had_any = !self.is_empty();
                self.default = None;
                self.frames.clear();
                had_any
            }
            FrameSel::Frame(f) => self.frames.remove(&f).is_some(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.default.is_none() && self.frames.is_empty()
    }

    /// Frames with an explicit set, ascending.
    pub fn frames(&self) -> Vec<usize> {
        let mut frames: Vec<usize> = self.frames.keys().copied().collect();
        frames.sort_unstable();
        frames
    }
}
