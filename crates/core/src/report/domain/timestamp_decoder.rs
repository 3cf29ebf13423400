use std::path::PathBuf;

use thiserror::Error;

use crate::video::infrastructure::frame_stream::TimestampBuffer;

#[derive(Error, Debug)]
pub enum TimestampError {
    #[error("failed to load glyph {path}: {reason}")]
    Glyph { path: PathBuf, reason: String },
    #[error("no glyph images found in {0}")]
    NoGlyphs(PathBuf),
    #[error("glyphs in {dir} differ in size")]
    MixedGlyphSizes { dir: PathBuf },
    #[error("timestamp crop {index} was never recorded")]
    MissingCrop { index: usize },
}

/// Turns the timestamp overlay crop of each frame into text.
pub trait TimestampDecoder: Send + Sync {
    /// Returns one string per recorded crop, in frame order.
    fn stringify(&self, crops: &TimestampBuffer) -> Result<Vec<String>, TimestampError>;
}
