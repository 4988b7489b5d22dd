use std::path::Path;

use image::{DynamicImage, GrayImage, ImageFormat};

use crate::error::Result;
use crate::plane::ImageView;

/// Save a plane at its native depth as grayscale TIFF.
pub fn save_tiff(plane: ImageView<'_>, path: &Path) -> Result<()> {
    plane.to_dynamic().save_with_format(path, ImageFormat::Tiff)?;
    Ok(())
}

/// Save a plane as 8-bit grayscale PNG; 16-bit samples are divided by 256.
pub fn save_png(plane: ImageView<'_>, path: &Path) -> Result<()> {
    let display = plane.to_display_u8();
    let (h, w) = display.dim();
    let raw: Vec<u8> = display.iter().copied().collect();
    let img = GrayImage::from_raw(w as u32, h as u32, raw).expect("buffer size matches dimensions");
    DynamicImage::ImageLuma8(img).save_with_format(path, ImageFormat::Png)?;
    Ok(())
}

/// Save a plane, choosing format from file extension. TIFF unless `.png`.
pub fn save_plane(plane: ImageView<'_>, path: &Path) -> Result<()> {
    match path.extension().and_then(|e| e.to_str()) {
        Some("png") => save_png(plane, path),
        _ => save_tiff(plane, path),
    }
}
