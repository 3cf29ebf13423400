use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::shared::video_dimensions::VideoDimensions;

#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("failed to run probe for {path}: {source}")]
    Spawn {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("probe exited with {status} for {path}: {stderr}")]
    Failed {
        path: PathBuf,
        status: String,
        stderr: String,
    },
    #[error("failed to parse probe output for {path}: {reason}")]
    Parse { path: PathBuf, reason: String },
    #[error("no video stream found in {0}")]
    NoVideoStream(PathBuf),
    #[error("invalid dimensions {width}x{height} ({frame_count} frames) for {path}")]
    InvalidDimensions {
        path: PathBuf,
        width: u32,
        height: u32,
        frame_count: usize,
    },
}

/// Reads a video's native width, height, and frame count without decoding it.
pub trait DimensionProbe: Send + Sync {
    fn probe(&self, path: &Path) -> Result<VideoDimensions, ProbeError>;
}
