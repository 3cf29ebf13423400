use thiserror::Error;

use super::video_dimensions::{FrameShape, VideoDimensions};

/// Decoder-side crop, in native frame coordinates.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CropRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl CropRect {
    /// Whether this crop fits inside a `frame_width × frame_height` frame.
    pub fn fits(&self, frame_width: u32, frame_height: u32) -> bool {
        self.width > 0
            && self.height > 0
            && self.x as u64 + self.width as u64 <= frame_width as u64
            && self.y as u64 + self.height as u64 <= frame_height as u64
    }
}

/// Location of the burned-in timestamp overlay, in native (pre-crop)
/// frame coordinates.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TimestampRegion {
    pub x: u32,
    pub y: u32,
    pub height: u32,
    pub max_width: u32,
}

/// Timestamp window relative to the frames the stream actually yields.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TimestampWindow {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum GeometryError {
    #[error(
        "timestamp window at ({x}, {y}) size {width}x{height} does not fit a {frame_width}x{frame_height} frame"
    )]
    TimestampOutOfBounds {
        x: i64,
        y: i64,
        width: u32,
        height: u32,
        frame_width: u32,
        frame_height: u32,
    },
}

/// Frame layout decided once per video, before the decoder starts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameGeometry {
    /// Shape of the yielded frames (post-crop when a crop is applied).
    pub shape: FrameShape,
    /// The crop handed to the decoder, if it was applicable.
    pub crop: Option<CropRect>,
    pub timestamp: Option<TimestampWindow>,
}

impl FrameGeometry {
    /// Plans the decoded frame shape and timestamp window for one video.
    ///
    /// A crop that does not fit the native frame is dropped with a warning.
    /// The timestamp window is shifted by the applied crop offset and must
    /// lie entirely inside the yielded frame.
    pub fn plan(
        dimensions: &VideoDimensions,
        channels: u8,
        crop: Option<CropRect>,
        timestamp: Option<TimestampRegion>,
    ) -> Result<Self, GeometryError> {
        let crop = crop.and_then(|c| {
            if c.fits(dimensions.width, dimensions.height) {
                Some(c)
            } else {
                log::warn!(
                    "ignoring crop {}x{}+{}+{}: does not fit {}x{} frame",
                    c.width,
                    c.height,
                    c.x,
                    c.y,
                    dimensions.width,
                    dimensions.height
                );
                None
            }
        });

        let (width, height, offset_x, offset_y) = match crop {
            Some(c) => (c.width, c.height, c.x, c.y),
            None => (dimensions.width, dimensions.height, 0, 0),
        };

        let timestamp = timestamp
            .map(|ts| timestamp_window(&ts, offset_x, offset_y, width, height))
            .transpose()?;

        Ok(Self {
            shape: FrameShape::new(height, width, channels),
            crop,
            timestamp,
        })
    }

    pub fn frame_byte_len(&self) -> usize {
        self.shape.byte_len()
    }
}

fn timestamp_window(
    ts: &TimestampRegion,
    offset_x: u32,
    offset_y: u32,
    frame_width: u32,
    frame_height: u32,
) -> Result<TimestampWindow, GeometryError> {
    let x = ts.x as i64 - offset_x as i64;
    let y = ts.y as i64 - offset_y as i64;

    let inside = x >= 0
        && y >= 0
        && ts.max_width > 0
        && ts.height > 0
        && x + ts.max_width as i64 <= frame_width as i64
        && y + ts.height as i64 <= frame_height as i64;

    if !inside {
        return Err(GeometryError::TimestampOutOfBounds {
            x,
            y,
            width: ts.max_width,
            height: ts.height,
            frame_width,
            frame_height,
        });
    }

    Ok(TimestampWindow {
        x: x as u32,
        y: y as u32,
        width: ts.max_width,
        height: ts.height,
    })
}
