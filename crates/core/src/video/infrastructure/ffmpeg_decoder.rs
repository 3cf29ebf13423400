use std::path::{Path, PathBuf};
use std::process::Command;

use crate::shared::geometry::CropRect;
use crate::video::domain::decoder_command::DecoderCommand;

/// Decodes videos to raw `gray` or `rgb24` frames on stdout with an
/// `ffmpeg` subprocess.
pub struct FfmpegDecoder {
    ffmpeg_path: PathBuf,
}

impl FfmpegDecoder {
    pub fn new(ffmpeg_path: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.into(),
        }
    }
}

impl DecoderCommand for FfmpegDecoder {
    fn command(&self, video_path: &Path, crop: Option<&CropRect>, channels: u8) -> Command {
        let mut command = Command::new(&self.ffmpeg_path);
        command.arg("-i").arg(video_path);

        if let Some(c) = crop {
            command.arg("-vf").arg(format!(
                "crop=w={}:h={}:x={}:y={}",
                c.width, c.height, c.x, c.y
            ));
        }

        command.args([
            "-vcodec",
            "rawvideo",
            "-pix_fmt",
            pixel_format(channels),
            "-vsync",
            "vfr",
            "-hide_banner",
            "-loglevel",
            "0",
            "-f",
            "image2pipe",
            "pipe:1",
        ]);

        command
    }
}

/// Raw pixel format with `channels` bytes per pixel.
fn pixel_format(channels: u8) -> &'static str {
    match channels {
        1 => "gray",
        _ => "rgb24",
    }
}

/// Renders a command line for logging.
pub fn command_as_string(command: &Command) -> String {
    std::iter::once(command.get_program())
        .chain(command.get_args())
        .map(|part| part.to_string_lossy())
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args_of(command: &Command) -> Vec<String> {
        command
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn test_command_without_crop() {
        let decoder = FfmpegDecoder::new("/usr/bin/ffmpeg");
        let command = decoder.command(Path::new("/videos/a.mp4"), None, 3);

        assert_eq!(command.get_program(), "/usr/bin/ffmpeg");
        let args = args_of(&command);
        assert_eq!(&args[..2], &["-i", "/videos/a.mp4"]);
        assert!(!args.contains(&"-vf".to_string()));
        assert_eq!(args.last().unwrap(), "pipe:1");
        assert!(args.windows(2).any(|w| w == ["-pix_fmt", "rgb24"]));
    }

    #[test]
    fn test_command_with_crop_filter() {
        let decoder = FfmpegDecoder::new("ffmpeg");
        let crop = CropRect {
            x: 2,
            y: 0,
            width: 474,
            height: 356,
        };
        let command = decoder.command(Path::new("a.mp4"), Some(&crop), 3);

        let args = args_of(&command);
        assert!(args
            .windows(2)
            .any(|w| w == ["-vf", "crop=w=474:h=356:x=2:y=0"]));
    }

    #[test]
    fn test_single_channel_decodes_to_gray() {
        let decoder = FfmpegDecoder::new("ffmpeg");
        let args = args_of(&decoder.command(Path::new("a.mp4"), None, 1));
        assert!(args.windows(2).any(|w| w == ["-pix_fmt", "gray"]));
        assert!(!args.contains(&"rgb24".to_string()));
    }

    #[test]
    fn test_command_as_string() {
        let decoder = FfmpegDecoder::new("ffmpeg");
        let rendered = command_as_string(&decoder.command(Path::new("a.mp4"), None, 3));
        assert!(rendered.starts_with("ffmpeg -i a.mp4 -vcodec rawvideo"));
        assert!(rendered.ends_with("-f image2pipe pipe:1"));
    }
}
