use ndarray::ArrayView3;

/// One decoded frame: contiguous 8-bit interleaved pixels in row-major order.
///
/// Produced by the frame stream, consumed exactly once by the classifier.
/// The buffer is dropped as soon as its batch has been classified.
#[derive(Clone, Debug)]
pub struct FrameRecord {
    data: Vec<u8>,
    width: u32,
    height: u32,
    channels: u8,
    index: usize,
}

impl FrameRecord {
    pub fn new(data: Vec<u8>, width: u32, height: u32, channels: u8, index: usize) -> Self {
        debug_assert_eq!(
            data.len(),
            (width as usize) * (height as usize) * (channels as usize),
            "data length must equal width * height * channels"
        );
        Self {
            data,
            width,
            height,
            channels,
            index,
        }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn channels(&self) -> u8 {
        self.channels
    }

    /// Zero-based position of this frame in the decoded stream.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn as_ndarray(&self) -> ArrayView3<'_, u8> {
        ArrayView3::from_shape(self.shape(), &self.data)
            .expect("Frame data length must match dimensions")
    }

    /// Copies the `width × height` window at `(x, y)` row by row into `dest`.
    ///
    /// `dest` must hold exactly `width * height * channels` bytes and the
    /// window must lie inside the frame.
    pub fn copy_window(&self, x: u32, y: u32, width: u32, height: u32, dest: &mut [u8]) {
        let ch = self.channels as usize;
        let row_len = width as usize * ch;
        debug_assert_eq!(dest.len(), row_len * height as usize);
        debug_assert!(x + width <= self.width && y + height <= self.height);

        let stride = self.width as usize * ch;
        for row in 0..height as usize {
            let src_start = (y as usize + row) * stride + x as usize * ch;
            dest[row * row_len..(row + 1) * row_len]
                .copy_from_slice(&self.data[src_start..src_start + row_len]);
        }
    }

    fn shape(&self) -> (usize, usize, usize) {
        (
            self.height as usize,
            self.width as usize,
            self.channels as usize,
        )
    }
}
