use crate::error::Result;
use crate::plane::PlaneMut;

/// Properties of the first page of a stack file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PageInfo {
    pub width: usize,
    pub height: usize,
    pub bits_per_sample: u32,
    /// Raw description tag, if present.
    pub description: Option<String>,
}

/// Page-level decoder of a multi-page image file.
///
/// The stack only orchestrates iteration and placement; bitstream decoding
/// is left to the implementor. Pages are requested in file order.
pub trait PageSource {
    fn page_count(&self) -> usize;

    fn first_page(&self) -> &PageInfo;

    /// Decode page `index` into `out`, whose shape and depth match the first page.
    fn read_page(&mut self, index: usize, out: PlaneMut<'_>) -> Result<()>;
}

/// Progress reporting for [`Stack::load_with`](super::Stack::load_with).
///
/// All methods have default no-op implementations.
pub trait LoadProgress: Send + Sync {
    /// Loading started; `total_pages` pages will be decoded.
    fn begin(&self, _total_pages: usize) {}

    /// `pages_done` pages have been placed into the buffer.
    fn advance(&self, _pages_done: usize) {}

    /// Loading finished, successfully or not.
    fn finish(&self) {}
}

/// No-op progress reporter, used when `load` delegates.
pub(crate) struct NoProgress;
impl LoadProgress for NoProgress {}
