/// Native dimensions and frame count of a video, read once before streaming.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VideoDimensions {
    pub width: u32,
    pub height: u32,
    pub frame_count: usize,
}

/// Shape of the frames a stream yields: `(height, width, channels)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameShape {
    pub height: u32,
    pub width: u32,
    pub channels: u8,
}

impl FrameShape {
    pub fn new(height: u32, width: u32, channels: u8) -> Self {
        Self {
            height,
            width,
            channels,
        }
    }

    /// Number of bytes one raw frame occupies on the decoder pipe.
    pub fn byte_len(&self) -> usize {
        self.height as usize * self.width as usize * self.channels as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_byte_len() {
        assert_eq!(FrameShape::new(480, 640, 3).byte_len(), 640 * 480 * 3);
        assert_eq!(FrameShape::new(1, 1, 1).byte_len(), 1);
    }

    #[test]
    fn test_dimensions_are_copy() {
        let dims = VideoDimensions {
            width: 640,
            height: 480,
            frame_count: 900,
        };
        let copied = dims;
        assert_eq!(dims, copied);
    }
}
