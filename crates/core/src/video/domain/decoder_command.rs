use std::path::Path;
use std::process::Command;

use crate::shared::geometry::CropRect;

/// Builds the external decoder invocation for one video.
///
/// The spawned process must write raw 8-bit interleaved frames with
/// `channels` bytes per pixel to stdout, with no container framing,
/// cropped to `crop` when one is given.
pub trait DecoderCommand: Send + Sync {
    fn command(&self, video_path: &Path, crop: Option<&CropRect>, channels: u8) -> Command;
}
