use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use tiff::decoder::{Decoder, DecodingResult};
use tiff::tags::Tag;

use crate::error::{Result, StackError};
use crate::plane::PlaneMut;
use crate::stack::{PageInfo, PageSource};

type TiffDecoder = Decoder<BufReader<File>>;

/// [`PageSource`] over the pages (IFDs) of a TIFF file.
pub struct TiffPageSource {
    path: PathBuf,
    decoder: TiffDecoder,
    /// Index of the page the decoder currently points at.
    current: usize,
    page_count: usize,
    first: PageInfo,
}

impl TiffPageSource {
    /// Open a TIFF file, count its pages and read the first page's tags.
    pub fn open(path: &Path) -> Result<Self> {
        let page_count = count_pages(open_decoder(path)?)?;
        let mut decoder = open_decoder(path)?;

        let (width, height) = decoder.dimensions()?;
        let bits_per_sample = decoder
            .find_tag(Tag::BitsPerSample)?
            .map(|v| v.into_u32_vec())
            .transpose()?
            .and_then(|bits| bits.first().copied())
            .unwrap_or(1);
        let description = decoder
            .find_tag(Tag::ImageDescription)?
            .map(|v| v.into_string())
            .transpose()?;

        Ok(Self {
            path: path.to_path_buf(),
            decoder,
            current: 0,
            page_count,
            first: PageInfo {
                width: width as usize,
                height: height as usize,
                bits_per_sample,
                description,
            },
        })
    }

    fn seek(&mut self, index: usize) -> Result<()> {
        if index < self.current {
            self.decoder = open_decoder(&self.path)?;
            self.current = 0;
        }
        while self.current < index {
            self.decoder.next_image()?;
            self.current += 1;
        }
        Ok(())
    }
}

impl PageSource for TiffPageSource {
    fn page_count(&self) -> usize {
        self.page_count
    }

    fn first_page(&self) -> &PageInfo {
        &self.first
    }

    fn read_page(&mut self, index: usize, out: PlaneMut<'_>) -> Result<()> {
        if index >= self.page_count {
            return Err(StackError::index("page", index, self.page_count));
        }
        self.seek(index)?;

        let (width, height) = self.decoder.dimensions()?;
        let (h, w) = out.dim();
        if (width as usize, height as usize) != (w, h) {
            return Err(StackError::DimensionMismatch {
                expected: format!("{w}x{h}"),
                found: format!("{width}x{height} on page {index}"),
            });
        }

        match (self.decoder.read_image()?, out) {
            (DecodingResult::U8(data), PlaneMut::U8(mut plane)) if data.len() == w * h => {
                plane.iter_mut().zip(data).for_each(|(dst, src)| *dst = src);
            }
            (DecodingResult::U16(data), PlaneMut::U16(mut plane)) if data.len() == w * h => {
                plane.iter_mut().zip(data).for_each(|(dst, src)| *dst = src);
            }
            (DecodingResult::U8(_) | DecodingResult::U16(_), _) => {
                return Err(StackError::format(format!(
                    "page {index} does not match the sample layout of the first page"
                )));
            }
            _ => {
                return Err(StackError::format(format!(
                    "page {index} has an unsupported sample format"
                )));
            }
        }
        Ok(())
    }
}

fn open_decoder(path: &Path) -> Result<TiffDecoder> {
    let file = File::open(path)?;
    Ok(Decoder::new(BufReader::new(file))?)
}

fn count_pages(mut decoder: TiffDecoder) -> Result<usize> {
    let mut count = 1;
    while decoder.more_images() {
        decoder.next_image()?;
        count += 1;
    }
    Ok(count)
}
