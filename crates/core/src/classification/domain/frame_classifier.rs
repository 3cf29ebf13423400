use std::path::PathBuf;

use ndarray::{s, Array2, Array4};
use thiserror::Error;

use crate::devices::domain::device::DeviceHandle;
use crate::shared::frame::FrameRecord;
use crate::shared::video_dimensions::FrameShape;
use crate::video::infrastructure::frame_stream::StreamError;

use super::frame_preprocessor::FramePreprocessor;
use super::probability_matrix::{MatrixError, ProbabilityMatrix};

#[derive(Error, Debug)]
pub enum ClassifierError {
    #[error("failed to load model {path}: {reason}")]
    Load { path: PathBuf, reason: String },
    #[error("inference failed on {device}: {reason}")]
    Inference { device: DeviceHandle, reason: String },
    #[error("model output has shape {actual:?}, expected {batch} rows of {classes} classes")]
    OutputShape {
        actual: Vec<usize>,
        batch: usize,
        classes: usize,
    },
}

/// Failure while driving frames through a classifier.
#[derive(Error, Debug)]
pub enum AnalysisError {
    #[error("frame stream failed after {frames_processed} frames: {source}")]
    Stream {
        frames_processed: usize,
        #[source]
        source: StreamError,
    },
    #[error("classification failed after {frames_processed} frames: {source}")]
    Classifier {
        frames_processed: usize,
        #[source]
        source: ClassifierError,
    },
    #[error("could not store probabilities after {frames_processed} frames: {source}")]
    Matrix {
        frames_processed: usize,
        #[source]
        source: MatrixError,
    },
}

/// A batched frame classifier bound to no particular device.
///
/// The device is passed on every call; implementations must not rely on
/// process-wide device selection.
pub trait FrameClassifier: Send + Sync {
    fn num_classes(&self) -> usize;

    /// Classifies an `N×S×S×C` batch, returning `N×num_classes` probabilities.
    fn classify_batch(
        &self,
        device: &DeviceHandle,
        batch: Array4<f32>,
    ) -> Result<Array2<f32>, ClassifierError>;
}

/// Drives `frames` through `classifier` in batches of `batch_size`, writing
/// one probability row per frame into `output` in arrival order.
///
/// Each frame is preprocessed into the batch tensor as soon as it arrives
/// and then dropped. Returns the number of frames consumed.
pub fn analyze<I>(
    classifier: &dyn FrameClassifier,
    frames: I,
    shape: FrameShape,
    batch_size: usize,
    device: &DeviceHandle,
    preprocessor: &dyn FramePreprocessor,
    output: &mut ProbabilityMatrix,
) -> Result<usize, AnalysisError>
where
    I: IntoIterator<Item = Result<FrameRecord, StreamError>>,
{
    let batch_size = batch_size.max(1);
    let size = preprocessor.input_size() as usize;
    let channels = shape.channels as usize;
    let mut batch = Array4::<f32>::zeros((batch_size, size, size, channels));
    let mut filled = 0;
    let mut processed = 0;

    for item in frames {
        let frame = item.map_err(|source| AnalysisError::Stream {
            frames_processed: processed,
            source,
        })?;
        preprocessor.preprocess(&frame, batch.slice_mut(s![filled, .., .., ..]));
        drop(frame);
        filled += 1;

        if filled == batch_size {
            let full = std::mem::replace(
                &mut batch,
                Array4::zeros((batch_size, size, size, channels)),
            );
            processed += run_batch(classifier, device, full, processed, output)?;
            filled = 0;
        }
    }

    if filled > 0 {
        let partial = batch.slice(s![..filled, .., .., ..]).to_owned();
        processed += run_batch(classifier, device, partial, processed, output)?;
    }

    Ok(processed)
}

fn run_batch(
    classifier: &dyn FrameClassifier,
    device: &DeviceHandle,
    batch: Array4<f32>,
    processed: usize,
    output: &mut ProbabilityMatrix,
) -> Result<usize, AnalysisError> {
    let n = batch.shape()[0];
    let probs = classifier
        .classify_batch(device, batch)
        .map_err(|source| AnalysisError::Classifier {
            frames_processed: processed,
            source,
        })?;

    if probs.nrows() != n || probs.ncols() != output.num_classes() {
        return Err(AnalysisError::Classifier {
            frames_processed: processed,
            source: ClassifierError::OutputShape {
                actual: probs.shape().to_vec(),
                batch: n,
                classes: output.num_classes(),
            },
        });
    }

    output
        .push_rows(probs.view())
        .map_err(|source| AnalysisError::Matrix {
            frames_processed: processed,
            source,
        })?;
    log::debug!("classified frames {}..{} on {device}", processed, processed + n);
    Ok(n)
}
