use ndarray::{s, Array2, ArrayView2};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MatrixError {
    #[error("matrix holds {capacity} rows, cannot append {attempted} more after {written}")]
    Overflow {
        capacity: usize,
        written: usize,
        attempted: usize,
    },
    #[error("rows have {actual} classes, matrix expects {expected}")]
    ClassCount { expected: usize, actual: usize },
}

/// Per-frame class probabilities, pre-sized to `num_frames × num_classes`.
///
/// Rows are appended in frame order and never reallocated.
#[derive(Debug, Clone)]
pub struct ProbabilityMatrix {
    values: Array2<f32>,
    rows_written: usize,
}

impl ProbabilityMatrix {
    pub fn new(num_frames: usize, num_classes: usize) -> Self {
        Self {
            values: Array2::zeros((num_frames, num_classes)),
            rows_written: 0,
        }
    }

    pub fn num_frames(&self) -> usize {
        self.values.nrows()
    }

    pub fn num_classes(&self) -> usize {
        self.values.ncols()
    }

    pub fn rows_written(&self) -> usize {
        self.rows_written
    }

    pub fn is_complete(&self) -> bool {
        self.rows_written == self.num_frames()
    }

    /// Appends `rows` after the last written row.
    pub fn push_rows(&mut self, rows: ArrayView2<'_, f32>) -> Result<(), MatrixError> {
        if rows.ncols() != self.num_classes() {
            return Err(MatrixError::ClassCount {
                expected: self.num_classes(),
                actual: rows.ncols(),
            });
        }
        let start = self.rows_written;
        let end = start + rows.nrows();
        if end > self.num_frames() {
            return Err(MatrixError::Overflow {
                capacity: self.num_frames(),
                written: start,
                attempted: rows.nrows(),
            });
        }

        self.values.slice_mut(s![start..end, ..]).assign(&rows);
        self.rows_written = end;
        Ok(())
    }

    /// The rows written so far.
    pub fn written(&self) -> ArrayView2<'_, f32> {
        self.values.slice(s![..self.rows_written, ..])
    }

    pub fn into_inner(self) -> Array2<f32> {
        self.values
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;

    #[test]
    fn test_rows_are_appended_in_order() {
        let mut matrix = ProbabilityMatrix::new(3, 2);
        matrix.push_rows(array![[0.1, 0.9]].view()).unwrap();
        matrix.push_rows(array![[0.2, 0.8], [0.3, 0.7]].view()).unwrap();

        assert!(matrix.is_complete());
        let written = matrix.written();
        assert_relative_eq!(written[[0, 1]], 0.9);
        assert_relative_eq!(written[[1, 0]], 0.2);
        assert_relative_eq!(written[[2, 1]], 0.7);
    }

    #[test]
    fn test_overflow_is_rejected_without_partial_write() {
        let mut matrix = ProbabilityMatrix::new(2, 1);
        matrix.push_rows(array![[0.5]].view()).unwrap();
        let err = matrix.push_rows(array![[0.1], [0.2]].view()).unwrap_err();

        assert_eq!(
            err,
            MatrixError::Overflow {
                capacity: 2,
                written: 1,
                attempted: 2
            }
        );
        assert_eq!(matrix.rows_written(), 1);
    }

    #[test]
    fn test_class_count_mismatch() {
        let mut matrix = ProbabilityMatrix::new(2, 3);
        let err = matrix.push_rows(array![[0.5, 0.5]].view()).unwrap_err();
        assert_eq!(
            err,
            MatrixError::ClassCount {
                expected: 3,
                actual: 2
            }
        );
    }

    #[test]
    fn test_incomplete_matrix() {
        let mut matrix = ProbabilityMatrix::new(4, 1);
        matrix.push_rows(array![[1.0]].view()).unwrap();
        assert!(!matrix.is_complete());
        assert_eq!(matrix.written().nrows(), 1);
    }
}
