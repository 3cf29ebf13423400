//! Batched frame classifier using ONNX Runtime via `ort`.
//!
//! One session is built per device on first use and reused by every job
//! that later leases that device.
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use ndarray::{Array2, Array4, Axis};
use ort::session::Session;

use crate::classification::domain::frame_classifier::{ClassifierError, FrameClassifier};
use crate::devices::domain::device::DeviceHandle;

use super::execution_provider::execution_providers_for;

/// Row sums further than this from 1.0 are treated as logits.
const PROBABILITY_SUM_TOLERANCE: f32 = 1e-3;

/// Memory layout the model expects for its image input.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InputLayout {
    /// `N×S×S×C`
    Nhwc,
    /// `N×C×S×S`
    Nchw,
}

pub struct OnnxFrameClassifier {
    model_path: PathBuf,
    num_classes: usize,
    sessions: Mutex<HashMap<DeviceHandle, Arc<Mutex<DeviceSession>>>>,
}

struct DeviceSession {
    session: Session,
    layout: InputLayout,
}

impl OnnxFrameClassifier {
    pub fn new(model_path: &Path, num_classes: usize) -> Self {
        Self {
            model_path: model_path.to_path_buf(),
            num_classes,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    fn session_for(
        &self,
        device: &DeviceHandle,
    ) -> Result<Arc<Mutex<DeviceSession>>, ClassifierError> {
        if let Some(existing) = self
            .sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(device)
        {
            return Ok(Arc::clone(existing));
        }

        let built = Arc::new(Mutex::new(self.build_session(device)?));
        let mut sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(Arc::clone(sessions.entry(device.clone()).or_insert(built)))
    }

    fn build_session(&self, device: &DeviceHandle) -> Result<DeviceSession, ClassifierError> {
        let session = Session::builder()
            .map_err(|e| self.load_error(e))?
            .with_execution_providers(execution_providers_for(device))
            .map_err(|e| self.load_error(e))?
            .commit_from_file(&self.model_path)
            .map_err(|e| self.load_error(e))?;

        // Image input is NCHW when axis 1 holds the 3 colour channels.
        let layout = session
            .inputs()
            .first()
            .and_then(|input| {
                if let ort::value::ValueType::Tensor { ref shape, .. } = input.dtype() {
                    (shape.len() == 4 && shape[1] == 3 && shape[3] != 3).then_some(InputLayout::Nchw)
                } else {
                    None
                }
            })
            .unwrap_or(InputLayout::Nhwc);

        log::info!(
            "loaded {} on {device} ({layout:?} input)",
            self.model_path.display()
        );
        Ok(DeviceSession { session, layout })
    }

    fn load_error(&self, e: impl std::fmt::Display) -> ClassifierError {
        ClassifierError::Load {
            path: self.model_path.clone(),
            reason: e.to_string(),
        }
    }
}

impl FrameClassifier for OnnxFrameClassifier {
    fn num_classes(&self) -> usize {
        self.num_classes
    }

    fn classify_batch(
        &self,
        device: &DeviceHandle,
        batch: Array4<f32>,
    ) -> Result<Array2<f32>, ClassifierError> {
        let n = batch.shape()[0];
        let handle = self.session_for(device)?;
        let mut guard = handle.lock().unwrap_or_else(PoisonError::into_inner);
        let inference_err = |reason: String| ClassifierError::Inference {
            device: device.clone(),
            reason,
        };

        let input = match guard.layout {
            InputLayout::Nhwc => batch,
            InputLayout::Nchw => batch
                .permuted_axes([0, 3, 1, 2])
                .as_standard_layout()
                .into_owned(),
        };
        let input_value =
            ort::value::Tensor::from_array(input).map_err(|e| inference_err(e.to_string()))?;
        let outputs = guard
            .session
            .run(ort::inputs![input_value])
            .map_err(|e| inference_err(e.to_string()))?;
        if outputs.len() == 0 {
            return Err(inference_err("model produced no outputs".into()));
        }
        let tensor = outputs[0]
            .try_extract_array::<f32>()
            .map_err(|e| inference_err(e.to_string()))?;

        let shape = tensor.shape().to_vec();
        let per_row: usize = shape.iter().skip(1).product();
        if shape.first() != Some(&n) || per_row != self.num_classes {
            return Err(ClassifierError::OutputShape {
                actual: shape,
                batch: n,
                classes: self.num_classes,
            });
        }

        let mut probs =
            Array2::from_shape_vec((n, self.num_classes), tensor.iter().copied().collect())
                .map_err(|e| inference_err(e.to_string()))?;
        if !rows_are_distributions(&probs) {
            softmax_rows(&mut probs);
        }
        Ok(probs)
    }
}

fn rows_are_distributions(probs: &Array2<f32>) -> bool {
    probs.axis_iter(Axis(0)).all(|row| {
        row.iter().all(|p| (0.0..=1.0).contains(p))
            && (row.sum() - 1.0).abs() <= PROBABILITY_SUM_TOLERANCE
    })
}

fn softmax_rows(values: &mut Array2<f32>) {
    for mut row in values.axis_iter_mut(Axis(0)) {
        let max = row.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        row.mapv_inplace(|v| (v - max).exp());
        let sum = row.sum();
        if sum > 0.0 {
            row.mapv_inplace(|v| v / sum);
        }
    }
}
