use ndarray::ArrayViewMut3;

use crate::shared::frame::FrameRecord;

/// Converts one raw frame into the model's `S×S×C` float input.
pub trait FramePreprocessor: Send + Sync {
    /// Side length `S` of the square model input.
    fn input_size(&self) -> u32;

    /// Writes the model input for `frame` into `out` (shape `S×S×C`).
    fn preprocess(&self, frame: &FrameRecord, out: ArrayViewMut3<'_, f32>);
}
