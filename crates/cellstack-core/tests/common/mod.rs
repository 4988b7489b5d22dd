#![allow(dead_code)]

use std::time::Duration;

use cellstack_core::error::Result;
use cellstack_core::plane::PlaneMut;
use cellstack_core::stack::{PageInfo, PageSource};
use tempfile::NamedTempFile;
use tiff::encoder::{colortype, TiffEncoder};
use tiff::tags::Tag;

/// ImageJ description text. `None` leaves the key out.
pub fn imagej_description(channels: Option<usize>, frames: Option<usize>, slices: Option<usize>) -> String {
    let mut text = String::from("ImageJ=1.53t\n");
    let n_images = channels.unwrap_or(1) * frames.unwrap_or(1) * slices.unwrap_or(1);
    text.push_str(&format!("images={n_images}\n"));
    if let Some(c) = channels {
        text.push_str(&format!("channels={c}\n"));
    }
    if let Some(s) = slices {
        text.push_str(&format!("slices={s}\n"));
    }
    if let Some(f) = frames {
        text.push_str(&format!("frames={f}\n"));
    }
    text.push_str("hyperstack=true\n");
    text
}

/// Minimal OME-XML with a single image.
pub fn ome_description(size_c: usize, size_t: usize, size_z: usize, order: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<OME xmlns="http://www.openmicroscopy.org/Schemas/OME/2016-06">
  <Image ID="Image:0" Name="test">
    <Pixels ID="Pixels:0" DimensionOrder="{order}" Type="uint8" SizeX="4" SizeY="3" SizeC="{size_c}" SizeT="{size_t}" SizeZ="{size_z}"/>
  </Image>
</OME>"#
    )
}

/// Page `index` of a synthetic stack: every sample equals `index`.
pub fn uniform_page(width: u32, height: u32, index: usize) -> Vec<u8> {
    vec![index as u8; (width * height) as usize]
}

/// Write an 8-bit multi-page TIFF; `description` goes on the first page.
pub fn write_tiff_u8(width: u32, height: u32, pages: &[Vec<u8>], description: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    {
        let mut encoder = TiffEncoder::new(file.as_file_mut()).unwrap();
        for (i, page) in pages.iter().enumerate() {
            let mut image = encoder.new_image::<colortype::Gray8>(width, height).unwrap();
            if i == 0 {
                image.encoder().write_tag(Tag::ImageDescription, description).unwrap();
            }
            image.write_data(page).unwrap();
        }
    }
    file
}

/// Write a 16-bit multi-page TIFF; `description` goes on the first page.
pub fn write_tiff_u16(width: u32, height: u32, pages: &[Vec<u16>], description: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    {
        let mut encoder = TiffEncoder::new(file.as_file_mut()).unwrap();
        for (i, page) in pages.iter().enumerate() {
            let mut image = encoder.new_image::<colortype::Gray16>(width, height).unwrap();
            if i == 0 {
                image.encoder().write_tag(Tag::ImageDescription, description).unwrap();
            }
            image.write_data(page).unwrap();
        }
    }
    file
}

/// ImageJ stack of `n_channels * n_frames` uniform 8-bit pages, page `i` filled with `i`.
pub fn imagej_stack(width: u32, height: u32, n_channels: usize, n_frames: usize) -> NamedTempFile {
    let pages: Vec<_> = (0..n_channels * n_frames)
        .map(|i| uniform_page(width, height, i))
        .collect();
    let description = imagej_description(Some(n_channels), Some(n_frames), None);
    write_tiff_u8(width, height, &pages, &description)
}

/// In-memory page source filling page `i` with the value `i`.
pub struct SyntheticSource {
    pub info: PageInfo,
    pub pages: usize,
    pub fail_at: Option<usize>,
    /// Pause before each page, to keep a load in flight.
    pub delay: Option<Duration>,
}

impl SyntheticSource {
    pub fn new(width: usize, height: usize, bits: u32, pages: usize, description: &str) -> Self {
        Self {
            info: PageInfo {
                width,
                height,
                bits_per_sample: bits,
                description: Some(description.to_string()),
            },
            pages,
            fail_at: None,
            delay: None,
        }
    }
}

impl PageSource for SyntheticSource {
    fn page_count(&self) -> usize {
        self.pages
    }

    fn first_page(&self) -> &PageInfo {
        &self.info
    }

    fn read_page(&mut self, index: usize, out: PlaneMut<'_>) -> Result<()> {
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        if self.fail_at == Some(index) {
            return Err(std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "truncated page").into());
        }
        match out {
            PlaneMut::U8(mut plane) => plane.fill(index as u8),
            PlaneMut::U16(mut plane) => plane.fill(index as u16 * 1000),
        }
        Ok(())
    }
}
