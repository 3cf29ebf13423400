use std::path::{Path, PathBuf};
use std::process::Command;

use serde::Deserialize;

use crate::shared::video_dimensions::VideoDimensions;
use crate::video::domain::dimension_probe::{DimensionProbe, ProbeError};

/// Reads video dimensions by running `ffprobe` and parsing its JSON output.
///
/// Frame count comes from counting packets (`nb_read_packets`), falling back
/// to the container's `nb_frames` when packet counting is unavailable.
pub struct FfprobeProbe {
    ffprobe_path: PathBuf,
}

#[derive(Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
}

#[derive(Deserialize)]
struct ProbeStream {
    width: Option<u32>,
    height: Option<u32>,
    nb_read_packets: Option<String>,
    nb_frames: Option<String>,
}

impl FfprobeProbe {
    pub fn new(ffprobe_path: impl Into<PathBuf>) -> Self {
        Self {
            ffprobe_path: ffprobe_path.into(),
        }
    }

    fn args(video_path: &Path) -> Vec<std::ffi::OsString> {
        let mut args: Vec<std::ffi::OsString> = [
            "-v",
            "error",
            "-select_streams",
            "v:0",
            "-count_packets",
            "-show_entries",
            "stream=width,height,nb_read_packets,nb_frames",
            "-of",
            "json",
        ]
        .iter()
        .map(|arg| std::ffi::OsString::from(*arg))
        .collect();
        args.push(video_path.as_os_str().to_owned());
        args
    }
}

impl DimensionProbe for FfprobeProbe {
    fn probe(&self, path: &Path) -> Result<VideoDimensions, ProbeError> {
        log::debug!("probing dimensions of {}", path.display());

        let output = Command::new(&self.ffprobe_path)
            .args(Self::args(path))
            .output()
            .map_err(|source| ProbeError::Spawn {
                path: path.to_path_buf(),
                source,
            })?;

        if !output.status.success() {
            return Err(ProbeError::Failed {
                path: path.to_path_buf(),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        parse_probe_output(path, &output.stdout)
    }
}

fn parse_probe_output(path: &Path, stdout: &[u8]) -> Result<VideoDimensions, ProbeError> {
    let parsed: ProbeOutput = serde_json::from_slice(stdout).map_err(|e| ProbeError::Parse {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;

    let stream = parsed
        .streams
        .into_iter()
        .next()
        .ok_or_else(|| ProbeError::NoVideoStream(path.to_path_buf()))?;

    let width = stream.width.unwrap_or(0);
    let height = stream.height.unwrap_or(0);
    let frame_count = [stream.nb_read_packets, stream.nb_frames]
        .into_iter()
        .flatten()
        .find_map(|count| count.trim().parse::<usize>().ok())
        .unwrap_or(0);

    if width == 0 || height == 0 || frame_count == 0 {
        return Err(ProbeError::InvalidDimensions {
            path: path.to_path_buf(),
            width,
            height,
            frame_count,
        });
    }

    Ok(VideoDimensions {
        width,
        height,
        frame_count,
    })
}
