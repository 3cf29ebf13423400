use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::report::domain::probability_transform;
use crate::report::domain::report_writer::{ReportError, ReportRequest, ReportWriter};
use crate::shared::constants::REPORT_EXTENSION;

const PARTIAL_SUFFIX: &str = "partial";

/// Writes one CSV per video: `frame_number[,timestamp],<classes…>`.
///
/// Rows go to `<name>.csv.partial` first and are renamed into place once
/// complete.
#[derive(Debug, Default)]
pub struct CsvReportWriter;

impl CsvReportWriter {
    pub fn new() -> Self {
        Self
    }
}

/// Location of the report for a video with the given name.
pub fn report_path(output_dir: &Path, video_name: &str) -> PathBuf {
    output_dir.join(format!("{video_name}.{REPORT_EXTENSION}"))
}

impl ReportWriter for CsvReportWriter {
    fn write_report(&self, request: &ReportRequest<'_>) -> Result<PathBuf, ReportError> {
        let probs = request.probabilities;
        if probs.ncols() != request.class_names.len() {
            return Err(ReportError::ClassCount {
                expected: request.class_names.len(),
                actual: probs.ncols(),
            });
        }

        let timestamps = if request.include_timestamps {
            let ts = request.timestamps.ok_or(ReportError::MissingTimestamps)?;
            if ts.len() != probs.nrows() {
                return Err(ReportError::TimestampCount {
                    expected: probs.nrows(),
                    actual: ts.len(),
                });
            }
            Some(ts)
        } else {
            None
        };

        let values = probability_transform::apply(probs, request.smoothing, request.binarize);

        let path = report_path(request.output_dir, request.video_name);
        let partial = path.with_extension(format!("{REPORT_EXTENSION}.{PARTIAL_SUFFIX}"));
        let io_err = |source| ReportError::Io {
            path: path.clone(),
            source,
        };

        fs::create_dir_all(request.output_dir).map_err(io_err)?;

        let written = (|| -> std::io::Result<()> {
            let mut out = BufWriter::new(File::create(&partial)?);

            write!(out, "frame_number")?;
            if timestamps.is_some() {
                write!(out, ",timestamp")?;
            }
            for name in request.class_names {
                write!(out, ",{}", escape(name))?;
            }
            writeln!(out)?;

            for (i, row) in values.outer_iter().enumerate() {
                write!(out, "{}", i + 1)?;
                if let Some(ts) = timestamps {
                    write!(out, ",{}", escape(&ts[i]))?;
                }
                for p in row.iter() {
                    if request.binarize {
                        write!(out, ",{p:.0}")?;
                    } else {
                        write!(out, ",{p:.4}")?;
                    }
                }
                writeln!(out)?;
            }

            out.into_inner().map_err(|e| e.into_error())?.sync_all()?;
            fs::rename(&partial, &path)
        })();

        if let Err(e) = written {
            let _ = fs::remove_file(&partial);
            return Err(io_err(e));
        }

        log::info!("wrote report {} ({} frames)", path.display(), values.nrows());
        Ok(path)
    }
}

fn escape(field: &str) -> String {
    if field.contains([',', '"', '\n']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn request<'a>(
        dir: &'a Path,
        probs: ndarray::ArrayView2<'a, f32>,
        class_names: &'a [String],
    ) -> ReportRequest<'a> {
        ReportRequest {
            video_name: "clip",
            output_dir: dir,
            include_timestamps: false,
            timestamps: None,
            probabilities: probs,
            class_names,
            smoothing: None,
            binarize: false,
        }
    }

    #[test]
    fn test_writes_header_and_rows() {
        let dir = tempfile::tempdir().unwrap();
        let probs = array![[0.125f32, 0.875], [0.5, 0.5]];
        let classes = names(&["no", "yes"]);

        let path = CsvReportWriter::new()
            .write_report(&request(dir.path(), probs.view(), &classes))
            .unwrap();

        assert_eq!(path, dir.path().join("clip.csv"));
        let content = fs::read_to_string(&path).unwrap();
        assert_eq!(
            content,
            "frame_number,no,yes\n1,0.1250,0.8750\n2,0.5000,0.5000\n"
        );
        assert!(!dir.path().join("clip.csv.partial").exists());
    }

    #[test]
    fn test_timestamps_column() {
        let dir = tempfile::tempdir().unwrap();
        let probs = array![[0.2f32], [0.8]];
        let classes = names(&["work_zone"]);
        let ts = names(&["12:00:01", "12:00:02"]);
        let mut req = request(dir.path(), probs.view(), &classes);
        req.include_timestamps = true;
        req.timestamps = Some(&ts);

        let path = CsvReportWriter::new().write_report(&req).unwrap();
        let content = fs::read_to_string(path).unwrap();
        assert_eq!(
            content,
            "frame_number,timestamp,work_zone\n1,12:00:01,0.2000\n2,12:00:02,0.8000\n"
        );
    }

    #[test]
    fn test_binarized_values_are_integers() {
        let dir = tempfile::tempdir().unwrap();
        let probs = array![[0.5f32, 0.49]];
        let classes = names(&["a", "b"]);
        let mut req = request(dir.path(), probs.view(), &classes);
        req.binarize = true;

        let path = CsvReportWriter::new().write_report(&req).unwrap();
        assert_eq!(
            fs::read_to_string(path).unwrap(),
            "frame_number,a,b\n1,1,0\n"
        );
    }

    #[test]
    fn test_smoothing_is_applied() {
        let dir = tempfile::tempdir().unwrap();
        let probs = array![[0.0f32], [1.0], [0.0]];
        let classes = names(&["a"]);
        let mut req = request(dir.path(), probs.view(), &classes);
        req.smoothing = Some(3);

        let path = CsvReportWriter::new().write_report(&req).unwrap();
        assert_eq!(
            fs::read_to_string(path).unwrap(),
            "frame_number,a\n1,0.5000\n2,0.3333\n3,0.5000\n"
        );
    }

    #[test]
    fn test_class_count_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let probs = array![[0.5f32, 0.5]];
        let classes = names(&["only"]);
        let err = CsvReportWriter::new()
            .write_report(&request(dir.path(), probs.view(), &classes))
            .unwrap_err();
        assert!(matches!(
            err,
            ReportError::ClassCount {
                expected: 1,
                actual: 2
            }
        ));
    }

    #[test]
    fn test_missing_timestamps() {
        let dir = tempfile::tempdir().unwrap();
        let probs = array![[0.5f32]];
        let classes = names(&["a"]);
        let mut req = request(dir.path(), probs.view(), &classes);
        req.include_timestamps = true;

        assert!(matches!(
            CsvReportWriter::new().write_report(&req),
            Err(ReportError::MissingTimestamps)
        ));
    }

    #[test]
    fn test_timestamp_count_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let probs = array![[0.5f32], [0.5]];
        let classes = names(&["a"]);
        let ts = names(&["00:00:01"]);
        let mut req = request(dir.path(), probs.view(), &classes);
        req.include_timestamps = true;
        req.timestamps = Some(&ts);

        assert!(matches!(
            CsvReportWriter::new().write_report(&req),
            Err(ReportError::TimestampCount {
                expected: 2,
                actual: 1
            })
        ));
    }

    #[test]
    fn test_creates_output_dir() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("reports/run1");
        let probs = array![[1.0f32]];
        let classes = names(&["a"]);

        let path = CsvReportWriter::new()
            .write_report(&request(&nested, probs.view(), &classes))
            .unwrap();
        assert!(path.starts_with(&nested));
        assert!(path.exists());
    }

    #[test]
    fn test_escape() {
        assert_eq!(escape("plain"), "plain");
        assert_eq!(escape("a,b"), "\"a,b\"");
        assert_eq!(escape("say \"hi\""), "\"say \"\"hi\"\"\"");
    }
}
