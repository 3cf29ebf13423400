use std::path::Path;

use thiserror::Error;

use crate::classification::domain::frame_classifier::{AnalysisError, ClassifierError};
use crate::classification::domain::probability_matrix::MatrixError;
use crate::devices::domain::device_pool::DeviceLeaseViolation;
use crate::report::domain::report_writer::ReportError;
use crate::shared::geometry::GeometryError;
use crate::video::domain::dimension_probe::ProbeError;
use crate::video::infrastructure::frame_stream::StreamError;

use super::concurrency_budget::BudgetViolation;

/// Why a single video job failed.
#[derive(Error, Debug)]
pub enum JobError {
    #[error("dimension probe failed: {0}")]
    DimensionProbe(#[source] ProbeError),
    #[error("invalid frame geometry: {0}")]
    InvalidGeometry(#[source] GeometryError),
    #[error("decoder did not start: {0}")]
    SubprocessStart(#[source] StreamError),
    #[error("frame read failed after {frames_processed} frames: {source}")]
    FrameRead {
        frames_processed: usize,
        #[source]
        source: StreamError,
    },
    #[error("processed {processed} frames but the probe reported {expected}")]
    FrameCountMismatch { expected: usize, processed: usize },
    #[error("classifier failed after {frames_processed} frames: {source}")]
    Classifier {
        frames_processed: usize,
        #[source]
        source: ClassifierError,
    },
    #[error("report failed: {0}")]
    Report(#[source] ReportError),
    #[error(transparent)]
    DeviceLeaseViolation(DeviceLeaseViolation),
    #[error(transparent)]
    BudgetViolation(BudgetViolation),
    #[error("job thread panicked")]
    Panicked,
}

impl JobError {
    /// Broken lease or permit bookkeeping; the run must stop.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            JobError::DeviceLeaseViolation(_) | JobError::BudgetViolation(_)
        )
    }

    /// Classifies an analysis failure and logs it with the video path and
    /// frame position. `trailing_frames` counts frames the decoder produced
    /// after the matrix overflowed.
    pub(crate) fn from_analysis(
        error: AnalysisError,
        video_path: &Path,
        trailing_frames: usize,
    ) -> Self {
        let job_error = match error {
            AnalysisError::Stream {
                frames_processed,
                source,
            } => JobError::FrameRead {
                frames_processed,
                source,
            },
            AnalysisError::Classifier {
                frames_processed,
                source,
            } => JobError::Classifier {
                frames_processed,
                source,
            },
            AnalysisError::Matrix {
                source:
                    MatrixError::Overflow {
                        capacity,
                        written,
                        attempted,
                    },
                ..
            } => JobError::FrameCountMismatch {
                expected: capacity,
                processed: written + attempted + trailing_frames,
            },
            AnalysisError::Matrix {
                frames_processed,
                source: MatrixError::ClassCount { expected, actual },
            } => JobError::Classifier {
                frames_processed,
                source: ClassifierError::OutputShape {
                    actual: vec![frames_processed, actual],
                    batch: frames_processed,
                    classes: expected,
                },
            },
        };
        log::error!("{}: {job_error}", video_path.display());
        job_error
    }
}
