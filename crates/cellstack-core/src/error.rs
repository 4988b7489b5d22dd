use thiserror::Error;

#[derive(Error, Debug)]
pub enum StackError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid stack format: {0}")]
    Format(String),

    #[error("Only stacks with one slice are supported; found {0} slices")]
    UnsupportedZStack(u32),

    #[error("Only 8-bit and 16-bit images are supported; found {0} bits per sample")]
    UnsupportedDepth(u32),

    #[error("Ambiguous dimensions: {frames} frames and {slices} slices declared")]
    AmbiguousDimensions { frames: usize, slices: usize },

    #[error("Dimension mismatch: expected {expected}, found {found}")]
    DimensionMismatch { expected: String, found: String },

    #[error("Backing storage allocation failed: {0}")]
    Resource(#[source] std::io::Error),

    #[error("{what} index {index} out of range (total: {total})")]
    Index {
        what: &'static str,
        index: usize,
        total: usize,
    },

    #[error("Invalid scale {scale}: {reason}")]
    InvalidScale { scale: f64, reason: &'static str },

    #[error("Unknown stack: {0}")]
    UnknownStack(String),

    #[error("A stack named '{0}' is already registered")]
    DuplicateStack(String),

    #[error("TIFF decoding error: {0}")]
    Tiff(#[from] tiff::TiffError),

    #[error("Image format error: {0}")]
    Image(#[from] image::ImageError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Config error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Config serialization error: {0}")]
    TomlSer(#[from] toml::ser::Error),
}

impl StackError {
    pub(crate) fn format(msg: impl Into<String>) -> Self {
        Self::Format(msg.into())
    }

    pub(crate) fn index(what: &'static str, index: usize, total: usize) -> Self {
        Self::Index { what, index, total }
    }
}

pub type Result<T> = std::result::Result<T, StackError>;
