use std::path::{Path, PathBuf};

use ndarray::ArrayView2;
use thiserror::Error;

use super::timestamp_decoder::TimestampError;

#[derive(Error, Debug)]
pub enum ReportError {
    #[error("failed to write report {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("probabilities have {actual} classes but {expected} class names were given")]
    ClassCount { expected: usize, actual: usize },
    #[error("{actual} timestamps for {expected} frames")]
    TimestampCount { expected: usize, actual: usize },
    #[error("timestamps requested but none were decoded")]
    MissingTimestamps,
    #[error("failed to decode timestamps: {0}")]
    Timestamps(#[from] TimestampError),
}

/// Everything a report writer needs for one video.
///
/// `probabilities` is the raw classifier output; smoothing and
/// binarization are applied by the writer.
#[derive(Debug, Clone, Copy)]
pub struct ReportRequest<'a> {
    pub video_name: &'a str,
    pub output_dir: &'a Path,
    pub include_timestamps: bool,
    pub timestamps: Option<&'a [String]>,
    pub probabilities: ArrayView2<'a, f32>,
    pub class_names: &'a [String],
    pub smoothing: Option<usize>,
    pub binarize: bool,
}

/// Persists one report per video.
pub trait ReportWriter: Send + Sync {
    /// Writes the report and returns the path of the persisted artifact.
    fn write_report(&self, request: &ReportRequest<'_>) -> Result<PathBuf, ReportError>;
}
