use image::imageops::{self, FilterType};
use image::{DynamicImage, ImageBuffer, Luma};
use ndarray::{Array2, ArrayView2, ArrayViewMut2, Zip};
use num_traits::{PrimInt, ToPrimitive};
use serde::{Deserialize, Serialize};

use crate::consts::{MAX_SCALED_DIMENSION, PARALLEL_PIXEL_THRESHOLD};
use crate::error::{Result, StackError};

/// Sample depth of a stack. Only 8 and 16 bits per sample are supported.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BitDepth {
    Eight,
    Sixteen,
}

impl BitDepth {
    pub fn from_bits(bits: u32) -> Result<Self> {
        match bits {
            8 => Ok(Self::Eight),
            16 => Ok(Self::Sixteen),
            other => Err(StackError::UnsupportedDepth(other)),
        }
    }

    pub fn bits(self) -> u32 {
        match self {
            Self::Eight => 8,
            Self::Sixteen => 16,
        }
    }

    pub fn bytes_per_sample(self) -> usize {
        match self {
            Self::Eight => 1,
            Self::Sixteen => 2,
        }
    }
}

impl std::fmt::Display for BitDepth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-bit", self.bits())
    }
}

/// Owned single-plane image, shape = (height, width).
#[derive(Clone, Debug, PartialEq)]
pub enum Image {
    U8(Array2<u8>),
    U16(Array2<u16>),
}

/// Borrowed single-plane image, shape = (height, width).
#[derive(Clone, Copy, Debug)]
pub enum ImageView<'a> {
    U8(ArrayView2<'a, u8>),
    U16(ArrayView2<'a, u16>),
}

/// Mutable plane handed to a page decoder.
#[derive(Debug)]
pub enum PlaneMut<'a> {
    U8(ArrayViewMut2<'a, u8>),
    U16(ArrayViewMut2<'a, u16>),
}

impl PlaneMut<'_> {
    pub fn depth(&self) -> BitDepth {
        match self {
            Self::U8(_) => BitDepth::Eight,
            Self::U16(_) => BitDepth::Sixteen,
        }
    }

    /// (height, width)
    pub fn dim(&self) -> (usize, usize) {
        match self {
            Self::U8(p) => p.dim(),
            Self::U16(p) => p.dim(),
        }
    }
}

/// Dimensions of a plane resampled by `scale`, never smaller than 1x1.
///
/// `scale` must be finite and positive, and neither scaled side may exceed
/// [`MAX_SCALED_DIMENSION`].
pub fn scaled_dims(width: usize, height: usize, scale: Option<f64>) -> Result<(usize, usize)> {
    let Some(scale) = scale else {
        return Ok((width, height));
    };
    if !scale.is_finite() || scale <= 0.0 {
        return Err(StackError::InvalidScale {
            scale,
            reason: "must be finite and greater than zero",
        });
    }
    let scaled = |d: usize| {
        let d = (d as f64 * scale).round().max(1.0);
        if d > MAX_SCALED_DIMENSION as f64 {
            Err(StackError::InvalidScale {
                scale,
                reason: "scaled plane too large",
            })
        } else {
            Ok(d as usize)
        }
    };
    Ok((scaled(width)?, scaled(height)?))
}

impl Image {
    pub fn depth(&self) -> BitDepth {
        self.view().depth()
    }

    pub fn width(&self) -> usize {
        self.view().width()
    }

    pub fn height(&self) -> usize {
        self.view().height()
    }

    pub fn view(&self) -> ImageView<'_> {
        match self {
            Self::U8(a) => ImageView::U8(a.view()),
            Self::U16(a) => ImageView::U16(a.view()),
        }
    }

    pub fn to_display_u8(&self) -> Array2<u8> {
        self.view().to_display_u8()
    }

    pub fn to_dynamic(&self) -> DynamicImage {
        self.view().to_dynamic()
    }
}

impl<'a> ImageView<'a> {
    pub fn depth(&self) -> BitDepth {
        match self {
            Self::U8(_) => BitDepth::Eight,
            Self::U16(_) => BitDepth::Sixteen,
        }
    }

    pub fn width(&self) -> usize {
        match self {
            Self::U8(a) => a.ncols(),
            Self::U16(a) => a.ncols(),
        }
    }

    pub fn height(&self) -> usize {
        match self {
            Self::U8(a) => a.nrows(),
            Self::U16(a) => a.nrows(),
        }
    }

    pub fn to_image(&self) -> Image {
        match self {
            Self::U8(a) => Image::U8(a.to_owned()),
            Self::U16(a) => Image::U16(a.to_owned()),
        }
    }

    /// Minimum and maximum sample value, `None` for an empty plane.
    pub fn min_max(&self) -> Option<(u16, u16)> {
        match self {
            Self::U8(a) => plane_min_max(a),
            Self::U16(a) => plane_min_max(a),
        }
    }

    /// 8-bit rendition for display; 16-bit samples are divided by 256.
    pub fn to_display_u8(&self) -> Array2<u8> {
        match self {
            Self::U8(a) => a.to_owned(),
            Self::U16(a) => {
                let mut out = Array2::<u8>::zeros(a.dim());
                let zip = Zip::from(&mut out).and(a);
                if a.len() >= PARALLEL_PIXEL_THRESHOLD {
                    zip.par_for_each(|o, &v| *o = (v >> 8) as u8);
                } else {
                    zip.for_each(|o, &v| *o = (v >> 8) as u8);
                }
                out
            }
        }
    }

    pub fn to_dynamic(&self) -> DynamicImage {
        match self {
            Self::U8(a) => DynamicImage::ImageLuma8(to_buffer(a)),
            Self::U16(a) => DynamicImage::ImageLuma16(to_buffer(a)),
        }
    }

    /// Resample to `width` x `height` with a triangle filter.
    pub fn resized(&self, width: usize, height: usize) -> Result<Image> {
        if width == self.width() && height == self.height() {
            return Ok(self.to_image());
        }
        Ok(match self {
            Self::U8(a) => Image::U8(resize_plane(a, width, height)?),
            Self::U16(a) => Image::U16(resize_plane(a, width, height)?),
        })
    }
}

fn plane_min_max<T: PrimInt + ToPrimitive>(a: &ArrayView2<'_, T>) -> Option<(u16, u16)> {
    let mut iter = a.iter().copied();
    let first = iter.next()?;
    let (lo, hi) = iter.fold((first, first), |(lo, hi), v| (lo.min(v), hi.max(v)));
    Some((lo.to_u16()?, hi.to_u16()?))
}

fn to_buffer<T>(a: &ArrayView2<'_, T>) -> ImageBuffer<Luma<T>, Vec<T>>
where
    T: image::Primitive,
    Luma<T>: image::Pixel<Subpixel = T>,
{
    let (h, w) = a.dim();
    let raw: Vec<T> = a.iter().copied().collect();
    ImageBuffer::from_raw(w as u32, h as u32, raw).expect("buffer size matches dimensions")
}

fn resize_plane<T>(a: &ArrayView2<'_, T>, width: usize, height: usize) -> Result<Array2<T>>
where
    T: image::Primitive + 'static,
    Luma<T>: image::Pixel<Subpixel = T>,
{
    let src = to_buffer(a);
    let dst = imageops::resize(&src, width as u32, height as u32, FilterType::Triangle);
    Array2::from_shape_vec((height, width), dst.into_raw()).map_err(|e| {
        StackError::DimensionMismatch {
            expected: format!("{width}x{height}"),
            found: e.to_string(),
        }
    })
}
