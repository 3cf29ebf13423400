use image::imageops::{self, FilterType};
use image::{GrayImage, RgbImage};
use ndarray::ArrayViewMut3;

use crate::classification::domain::frame_preprocessor::FramePreprocessor;
use crate::shared::frame::FrameRecord;

/// Inception-style preprocessing: bilinear resize to `S×S`, then scale
/// pixel values from `[0, 255]` to `[-1, 1]`.
pub struct InceptionPreprocessor {
    input_size: u32,
}

impl InceptionPreprocessor {
    pub fn new(input_size: u32) -> Self {
        Self { input_size }
    }

    fn resized(&self, frame: &FrameRecord) -> Vec<u8> {
        let (w, h, s) = (frame.width(), frame.height(), self.input_size);
        if w == s && h == s {
            return frame.data().to_vec();
        }
        match frame.channels() {
            3 => RgbImage::from_raw(w, h, frame.data().to_vec())
                .map(|img| imageops::resize(&img, s, s, FilterType::Triangle).into_raw()),
            1 => GrayImage::from_raw(w, h, frame.data().to_vec())
                .map(|img| imageops::resize(&img, s, s, FilterType::Triangle).into_raw()),
            _ => None,
        }
        .unwrap_or_else(|| nearest(frame, s))
    }
}

impl FramePreprocessor for InceptionPreprocessor {
    fn input_size(&self) -> u32 {
        self.input_size
    }

    fn preprocess(&self, frame: &FrameRecord, mut out: ArrayViewMut3<'_, f32>) {
        let pixels = self.resized(frame);
        for (dst, src) in out.iter_mut().zip(pixels.iter()) {
            *dst = *src as f32 / 127.5 - 1.0;
        }
    }
}

fn nearest(frame: &FrameRecord, size: u32) -> Vec<u8> {
    let src = frame.as_ndarray();
    let (h, w, c) = (frame.height() as usize, frame.width() as usize, frame.channels() as usize);
    let s = size as usize;
    let mut out = Vec::with_capacity(s * s * c);
    for y in 0..s {
        let sy = (y * h / s).min(h.saturating_sub(1));
        for x in 0..s {
            let sx = (x * w / s).min(w.saturating_sub(1));
            for ch in 0..c {
                out.push(src[[sy, sx, ch]]);
            }
        }
    }
    out
}
