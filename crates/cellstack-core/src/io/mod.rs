pub mod export;
pub mod roi_json;
pub mod tiff_source;

pub use export::save_plane;
pub use roi_json::{read_rois, write_rois, RoiDocument};
pub use tiff_source::TiffPageSource;
