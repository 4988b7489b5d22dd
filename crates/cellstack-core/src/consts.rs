/// Minimum pixel count (h*w) to use row-level Rayon parallelism.
pub const PARALLEL_PIXEL_THRESHOLD: usize = 65_536;

/// Page count step between two load progress updates.
pub const LOAD_PROGRESS_STEP: usize = 16;

/// Default stroke width of an ROI outline, in display pixels.
pub const DEFAULT_ROI_STROKE_WIDTH: f32 = 1.0;

/// Largest width or height a scaled read may produce.
pub const MAX_SCALED_DIMENSION: usize = 65_536;
