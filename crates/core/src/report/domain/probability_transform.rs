use ndarray::{Array2, ArrayView2, Axis};

/// Threshold at or above which a binarized probability becomes 1.
pub const BINARIZE_THRESHOLD: f32 = 0.5;

/// Applies the requested post-processing: smoothing first, then binarization.
pub fn apply(probs: ArrayView2<'_, f32>, smoothing: Option<usize>, binarize: bool) -> Array2<f32> {
    let smoothed = match smoothing {
        Some(factor) => smooth(probs, factor),
        None => probs.to_owned(),
    };
    if binarize {
        binarize_in_place(smoothed)
    } else {
        smoothed
    }
}

/// Class-wise centered moving average over `factor` frames.
///
/// The window is truncated at both ends of the video, so the first and
/// last frames average over fewer neighbours. A factor of 0 or 1 leaves
/// the values unchanged.
pub fn smooth(probs: ArrayView2<'_, f32>, factor: usize) -> Array2<f32> {
    let n = probs.nrows();
    if factor <= 1 || n == 0 {
        return probs.to_owned();
    }
    let before = (factor - 1) / 2;
    let after = factor / 2;

    let mut out = Array2::zeros(probs.raw_dim());
    for (class, column) in probs.axis_iter(Axis(1)).enumerate() {
        let mut prefix = Vec::with_capacity(n + 1);
        prefix.push(0.0f64);
        for v in column.iter() {
            let last = prefix[prefix.len() - 1];
            prefix.push(last + *v as f64);
        }
        for i in 0..n {
            let lo = i.saturating_sub(before);
            let hi = (i + after + 1).min(n);
            out[[i, class]] = ((prefix[hi] - prefix[lo]) / (hi - lo) as f64) as f32;
        }
    }
    out
}

/// Rounds each value to 0 or 1; ties round up.
pub fn binarize(probs: ArrayView2<'_, f32>) -> Array2<f32> {
    binarize_in_place(probs.to_owned())
}

fn binarize_in_place(mut probs: Array2<f32>) -> Array2<f32> {
    probs.mapv_inplace(|p| if p >= BINARIZE_THRESHOLD { 1.0 } else { 0.0 });
    probs
}
