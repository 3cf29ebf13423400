use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::shared::constants::{REPORT_EXTENSION, VIDEO_EXTENSIONS};

use super::video_job::video_name;

#[derive(Error, Debug)]
pub enum DiscoveryError {
    #[error("video path {0} is neither a file nor a directory")]
    NotFound(PathBuf),
    #[error("failed to list {path}: {source}")]
    ReadDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Lists the videos under `path`: a directory's non-hidden video files
/// sorted by name, or `path` itself when it is a file.
pub fn read_video_file_names(path: &Path) -> Result<Vec<PathBuf>, DiscoveryError> {
    if path.is_file() {
        return Ok(vec![path.to_path_buf()]);
    }
    if !path.is_dir() {
        return Err(DiscoveryError::NotFound(path.to_path_buf()));
    }

    let read_dir_error = |source| DiscoveryError::ReadDir {
        path: path.to_path_buf(),
        source,
    };
    let mut videos = Vec::new();
    for entry in fs::read_dir(path).map_err(read_dir_error)? {
        let entry = entry.map_err(read_dir_error)?;
        let candidate = entry.path();
        if candidate.is_file() && !is_hidden(&candidate) && is_video(&candidate) {
            videos.push(candidate);
        } else {
            log::debug!("Skipping {}", candidate.display());
        }
    }
    videos.sort();
    Ok(videos)
}

/// Drops videos that already have a report in `report_dir`.
pub fn exclude_previously_processed(videos: Vec<PathBuf>, report_dir: &Path) -> Vec<PathBuf> {
    let reported: HashSet<String> = match fs::read_dir(report_dir) {
        Ok(entries) => entries
            .filter_map(Result::ok)
            .map(|e| e.path())
            .filter(|p| has_extension(p, REPORT_EXTENSION))
            .map(|p| video_name(&p))
            .collect(),
        Err(_) => return videos,
    };

    let before = videos.len();
    let remaining: Vec<PathBuf> = videos
        .into_iter()
        .filter(|v| !reported.contains(&video_name(v)))
        .collect();
    log::info!(
        "Excluding {} previously processed videos",
        before - remaining.len()
    );
    remaining
}

pub fn is_video(path: &Path) -> bool {
    VIDEO_EXTENSIONS.iter().any(|ext| has_extension(path, ext))
}

fn has_extension(path: &Path, expected: &str) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case(expected))
        .unwrap_or(false)
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(|name| name.starts_with('.'))
        .unwrap_or(false)
}
