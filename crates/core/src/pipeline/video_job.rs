use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use crate::classification::domain::frame_classifier::{analyze, AnalysisError, FrameClassifier};
use crate::classification::domain::frame_preprocessor::FramePreprocessor;
use crate::classification::domain::probability_matrix::{MatrixError, ProbabilityMatrix};
use crate::devices::domain::device::DeviceHandle;
use crate::devices::domain::device_pool::DevicePool;
use crate::report::domain::report_writer::{ReportError, ReportRequest, ReportWriter};
use crate::report::domain::timestamp_decoder::TimestampDecoder;
use crate::shared::cancellation::CancellationToken;
use crate::shared::geometry::FrameGeometry;
use crate::shared::video_dimensions::VideoDimensions;
use crate::video::domain::decoder_command::DecoderCommand;
use crate::video::domain::dimension_probe::DimensionProbe;
use crate::video::infrastructure::frame_stream::{read_buffer_len, FrameStream, TimestampBuffer};

use super::concurrency_budget::Permit;
use super::error::JobError;
use super::job_settings::JobSettings;
use super::pipeline_logger::PipelineLogger;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobId(pub usize);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "job#{}", self.0)
    }
}

/// Lifecycle of one video job.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JobState {
    Pending,
    Probing,
    Streaming,
    Reporting,
    Succeeded,
    Failed,
    Cancelled,
}

/// How a job ended, as seen by the scheduler.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExitKind {
    Return,
    Exception,
}

impl fmt::Display for ExitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitKind::Return => write!(f, "return"),
            ExitKind::Exception => write!(f, "exception"),
        }
    }
}

#[derive(Debug)]
pub enum JobOutcome {
    Succeeded { report_path: PathBuf, frames: usize },
    Failed(JobError),
    /// Stopped early at a frame boundary after a cancellation request.
    Cancelled {
        frames_processed: usize,
        expected: usize,
    },
}

impl JobOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            JobOutcome::Succeeded { .. } => "succeeded",
            JobOutcome::Failed(_) => "failed",
            JobOutcome::Cancelled { .. } => "cancelled",
        }
    }
}

/// The single result every dispatched job produces.
#[derive(Debug)]
pub struct JobResult {
    pub job_id: JobId,
    pub video_path: PathBuf,
    pub device: Option<DeviceHandle>,
    pub outcome: JobOutcome,
}

impl JobResult {
    pub fn exit_kind(&self) -> ExitKind {
        match self.outcome {
            JobOutcome::Succeeded { .. } => ExitKind::Return,
            JobOutcome::Failed(_) | JobOutcome::Cancelled { .. } => ExitKind::Exception,
        }
    }
}

/// Collaborators shared by every job in a run.
pub struct JobServices {
    pub probe: Arc<dyn DimensionProbe>,
    pub decoder: Arc<dyn DecoderCommand>,
    pub classifier: Arc<dyn FrameClassifier>,
    pub preprocessor: Arc<dyn FramePreprocessor>,
    pub timestamp_decoder: Option<Arc<dyn TimestampDecoder>>,
    pub report_writer: Arc<dyn ReportWriter>,
    pub devices: Arc<DevicePool>,
    pub logger: Arc<dyn PipelineLogger>,
}

enum Streamed {
    Complete {
        probabilities: ProbabilityMatrix,
        timestamps: Option<TimestampBuffer>,
    },
    Cancelled {
        frames_processed: usize,
    },
}

/// End-to-end processing of one video:
/// probe, lease a device, stream frames through the classifier, report.
pub struct VideoJob {
    id: JobId,
    video_path: PathBuf,
    services: Arc<JobServices>,
    settings: Arc<JobSettings>,
    cancel: CancellationToken,
    state: JobState,
    device: Option<DeviceHandle>,
}

impl VideoJob {
    pub fn new(
        id: JobId,
        video_path: PathBuf,
        services: Arc<JobServices>,
        settings: Arc<JobSettings>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            id,
            video_path,
            services,
            settings,
            cancel,
            state: JobState::Pending,
            device: None,
        }
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    /// Runs the job to a terminal state and releases `permit` exactly once.
    pub fn run(mut self, permit: Permit) -> JobResult {
        log::info!("{} started for {}", self.id, self.video_path.display());

        let outcome = match self.execute() {
            Ok(outcome) => outcome,
            Err(e) => JobOutcome::Failed(e),
        };
        let outcome = match permit.release() {
            Ok(()) => outcome,
            Err(violation) => {
                log::error!("{}: {violation}", self.video_path.display());
                JobOutcome::Failed(JobError::BudgetViolation(violation))
            }
        };

        self.state = match outcome {
            JobOutcome::Succeeded { .. } => JobState::Succeeded,
            JobOutcome::Failed(_) => JobState::Failed,
            JobOutcome::Cancelled { .. } => JobState::Cancelled,
        };
        match &outcome {
            JobOutcome::Succeeded { report_path, frames } => log::info!(
                "{} succeeded for {}: {frames} frames, report {}",
                self.id,
                self.video_path.display(),
                report_path.display()
            ),
            JobOutcome::Failed(e) => {
                log::error!("{} failed for {}: {e}", self.id, self.video_path.display())
            }
            JobOutcome::Cancelled {
                frames_processed,
                expected,
            } => log::warn!(
                "{} cancelled for {} after {frames_processed} of {expected} frames",
                self.id,
                self.video_path.display()
            ),
        }

        JobResult {
            job_id: self.id,
            video_path: self.video_path,
            device: self.device,
            outcome,
        }
    }

    fn execute(&mut self) -> Result<JobOutcome, JobError> {
        self.state = JobState::Probing;
        let started = Instant::now();
        let dimensions = self
            .services
            .probe
            .probe(&self.video_path)
            .map_err(JobError::DimensionProbe)?;
        self.services.logger.timing("probe", elapsed_ms(started));
        log::debug!(
            "{}: {}x{}, {} frames",
            self.video_path.display(),
            dimensions.width,
            dimensions.height,
            dimensions.frame_count
        );

        let geometry = FrameGeometry::plan(
            &dimensions,
            self.settings.num_channels,
            self.settings.crop,
            self.settings.timestamp,
        )
        .map_err(JobError::InvalidGeometry)?;

        self.state = JobState::Streaming;
        let lease = self.services.devices.lease();
        self.device = Some(lease.device().clone());
        let streamed = self.stream(&dimensions, &geometry, lease.device());
        lease.release().map_err(JobError::DeviceLeaseViolation)?;

        match streamed? {
            Streamed::Cancelled { frames_processed } => Ok(JobOutcome::Cancelled {
                frames_processed,
                expected: dimensions.frame_count,
            }),
            Streamed::Complete {
                probabilities,
                timestamps,
            } => {
                self.state = JobState::Reporting;
                let report_path = self.report(&probabilities, timestamps.as_ref())?;
                Ok(JobOutcome::Succeeded {
                    report_path,
                    frames: probabilities.rows_written(),
                })
            }
        }
    }

    fn stream(
        &self,
        dimensions: &VideoDimensions,
        geometry: &FrameGeometry,
        device: &DeviceHandle,
    ) -> Result<Streamed, JobError> {
        let settings = &self.settings;
        let services = &self.services;
        let command = services
            .decoder
            .command(&self.video_path, geometry.crop.as_ref(), geometry.shape.channels);
        let timestamps = geometry.timestamp.map(|window| {
            TimestampBuffer::new(window, settings.num_channels, dimensions.frame_count)
        });

        let mut stream = FrameStream::spawn(
            command,
            &self.video_path,
            geometry.shape,
            read_buffer_len(settings.batch_size, geometry.frame_byte_len()),
            self.cancel.clone(),
            timestamps,
        )
        .map_err(|e| {
            log::error!("{}: {e}", self.video_path.display());
            JobError::SubprocessStart(e)
        })?;

        let mut probabilities =
            ProbabilityMatrix::new(dimensions.frame_count, services.classifier.num_classes());
        let started = Instant::now();
        let analyzed = analyze(
            services.classifier.as_ref(),
            &mut stream,
            geometry.shape,
            settings.batch_size,
            device,
            services.preprocessor.as_ref(),
            &mut probabilities,
        );
        services.logger.timing("analyze", elapsed_ms(started));

        // Overflow stops analysis early; count what the decoder still has.
        let trailing_frames = match &analyzed {
            Err(AnalysisError::Matrix {
                source: MatrixError::Overflow { .. },
                ..
            }) => stream.by_ref().take_while(Result::is_ok).count(),
            _ => 0,
        };

        let cancelled = stream.was_cancelled();
        let timestamps = stream.take_timestamps();
        drop(stream);

        let frames_processed = analyzed
            .map_err(|e| JobError::from_analysis(e, &self.video_path, trailing_frames))?;
        services.logger.metric("frames", frames_processed as f64);

        if cancelled {
            return Ok(Streamed::Cancelled { frames_processed });
        }
        if frames_processed != dimensions.frame_count {
            log::error!(
                "{}: classified {frames_processed} frames, probe reported {}",
                self.video_path.display(),
                dimensions.frame_count
            );
            return Err(JobError::FrameCountMismatch {
                expected: dimensions.frame_count,
                processed: frames_processed,
            });
        }

        Ok(Streamed::Complete {
            probabilities,
            timestamps,
        })
    }

    fn report(
        &self,
        probabilities: &ProbabilityMatrix,
        timestamps: Option<&TimestampBuffer>,
    ) -> Result<PathBuf, JobError> {
        let include_timestamps = self.settings.timestamp.is_some();
        let strings = match (timestamps, &self.services.timestamp_decoder) {
            (Some(buffer), Some(decoder)) if include_timestamps => {
                let started = Instant::now();
                let strings = decoder
                    .stringify(buffer)
                    .map_err(|e| JobError::Report(ReportError::from(e)))?;
                self.services.logger.timing("timestamps", elapsed_ms(started));
                Some(strings)
            }
            _ => None,
        };

        let video_name = video_name(&self.video_path);
        let request = ReportRequest {
            video_name: &video_name,
            output_dir: &self.settings.report_dir,
            include_timestamps,
            timestamps: strings.as_deref(),
            probabilities: probabilities.written(),
            class_names: &self.settings.class_names,
            smoothing: self.settings.smoothing,
            binarize: self.settings.binarize,
        };

        let started = Instant::now();
        let path = self
            .services
            .report_writer
            .write_report(&request)
            .map_err(JobError::Report)?;
        self.services.logger.timing("report", elapsed_ms(started));
        Ok(path)
    }
}

/// Report name for a video: its file stem.
pub fn video_name(path: &Path) -> String {
    path.file_stem()
        .unwrap_or(path.as_os_str())
        .to_string_lossy()
        .into_owned()
}

fn elapsed_ms(started: Instant) -> f64 {
    started.elapsed().as_secs_f64() * 1000.0
}

#[cfg(all(test, unix))]
pub(crate) mod tests {
    use super::*;
    use crate::classification::domain::frame_classifier::tests::{
        EchoClassifier, FirstBytePreprocessor,
    };
    use crate::pipeline::concurrency_budget::ConcurrencyBudget;
    use crate::pipeline::pipeline_logger::NullPipelineLogger;
    use crate::report::domain::timestamp_decoder::TimestampError;
    use crate::shared::geometry::{CropRect, TimestampRegion};
    use crate::video::domain::dimension_probe::ProbeError;
    use std::collections::HashMap;
    use std::process::Command;
    use std::sync::Mutex;

    /// Reports fixed dimensions per file name.
    pub(crate) struct StubProbe {
        pub dimensions: HashMap<String, VideoDimensions>,
    }

    impl DimensionProbe for StubProbe {
        fn probe(&self, path: &Path) -> Result<VideoDimensions, ProbeError> {
            self.dimensions
                .get(&video_name(path))
                .copied()
                .ok_or_else(|| ProbeError::NoVideoStream(path.to_path_buf()))
        }
    }

    /// Emits `pixels` zero-valued pixels of the requested channel count
    /// for each video, or an endless stream.
    pub(crate) struct HeadDecoder {
        pub pixels: HashMap<String, usize>,
        pub endless: bool,
    }

    impl DecoderCommand for HeadDecoder {
        fn command(&self, video_path: &Path, _crop: Option<&CropRect>, channels: u8) -> Command {
            let mut command = Command::new("sh");
            if self.endless {
                command.arg("-c").arg("exec cat /dev/zero");
            } else {
                let pixels = self.pixels.get(&video_name(video_path)).copied().unwrap_or(0);
                let n = pixels * channels as usize;
                command.arg("-c").arg(format!("head -c {n} /dev/zero"));
            }
            command
        }
    }

    /// Records every request instead of writing files.
    #[derive(Default)]
    pub(crate) struct RecordingWriter {
        pub written: Mutex<Vec<(String, usize, Option<Vec<String>>)>>,
    }

    impl ReportWriter for RecordingWriter {
        fn write_report(&self, request: &ReportRequest<'_>) -> Result<PathBuf, ReportError> {
            if request.include_timestamps && request.timestamps.is_none() {
                return Err(ReportError::MissingTimestamps);
            }
            self.written.lock().unwrap().push((
                request.video_name.to_string(),
                request.probabilities.nrows(),
                request.timestamps.map(|t| t.to_vec()),
            ));
            Ok(request.output_dir.join(format!("{}.csv", request.video_name)))
        }
    }

    struct CountingTimestamps;

    impl TimestampDecoder for CountingTimestamps {
        fn stringify(&self, crops: &TimestampBuffer) -> Result<Vec<String>, TimestampError> {
            Ok((0..crops.len()).map(|i| format!("t{i}")).collect())
        }
    }

    pub(crate) fn dims(width: u32, height: u32, frame_count: usize) -> VideoDimensions {
        VideoDimensions {
            width,
            height,
            frame_count,
        }
    }

    pub(crate) fn services(
        probe: StubProbe,
        decoder: HeadDecoder,
        writer: Arc<RecordingWriter>,
        devices: Arc<DevicePool>,
    ) -> Arc<JobServices> {
        Arc::new(JobServices {
            probe: Arc::new(probe),
            decoder: Arc::new(decoder),
            classifier: Arc::new(EchoClassifier::new()),
            preprocessor: Arc::new(FirstBytePreprocessor),
            timestamp_decoder: Some(Arc::new(CountingTimestamps)),
            report_writer: writer,
            devices,
            logger: Arc::new(NullPipelineLogger),
        })
    }

    pub(crate) fn settings() -> Arc<JobSettings> {
        Arc::new(JobSettings {
            batch_size: 4,
            class_names: Arc::from(vec!["a".to_string(), "b".to_string()]),
            ..JobSettings::default()
        })
    }

    fn single(name: &str, d: VideoDimensions, pixels: usize) -> (StubProbe, HeadDecoder) {
        (
            StubProbe {
                dimensions: HashMap::from([(name.to_string(), d)]),
            },
            HeadDecoder {
                pixels: HashMap::from([(name.to_string(), pixels)]),
                endless: false,
            },
        )
    }

    fn run_job(
        services: Arc<JobServices>,
        settings: Arc<JobSettings>,
        path: &str,
        cancel: CancellationToken,
    ) -> (JobResult, Arc<ConcurrencyBudget>) {
        let budget = Arc::new(ConcurrencyBudget::new(1));
        let permit = budget.acquire();
        let job = VideoJob::new(JobId(0), PathBuf::from(path), services, settings, cancel);
        assert_eq!(job.state(), JobState::Pending);
        (job.run(permit), budget)
    }

    #[test]
    fn test_successful_job_writes_every_frame() {
        let (probe, decoder) = single("clip", dims(4, 2, 10), 4 * 2 * 10);
        let writer = Arc::new(RecordingWriter::default());
        let pool = Arc::new(DevicePool::new(vec![DeviceHandle::Cpu]).unwrap());
        let services = services(probe, decoder, Arc::clone(&writer), Arc::clone(&pool));

        let (result, budget) = run_job(services, settings(), "/v/clip.mp4", CancellationToken::new());

        assert!(matches!(
            result.outcome,
            JobOutcome::Succeeded { frames: 10, .. }
        ));
        assert_eq!(result.exit_kind(), ExitKind::Return);
        assert_eq!(result.device, Some(DeviceHandle::Cpu));
        assert_eq!(writer.written.lock().unwrap()[0], ("clip".to_string(), 10, None));
        assert_eq!(pool.available_count(), 1);
        assert_eq!(budget.in_use(), 0);
    }

    #[test]
    fn test_probe_failure_leases_no_device() {
        let probe = StubProbe {
            dimensions: HashMap::new(),
        };
        let decoder = HeadDecoder {
            pixels: HashMap::new(),
            endless: false,
        };
        let writer = Arc::new(RecordingWriter::default());
        let pool = Arc::new(DevicePool::new(vec![DeviceHandle::Cpu]).unwrap());
        let services = services(probe, decoder, writer, Arc::clone(&pool));

        let (result, budget) = run_job(services, settings(), "/v/missing.mp4", CancellationToken::new());

        assert!(matches!(
            result.outcome,
            JobOutcome::Failed(JobError::DimensionProbe(_))
        ));
        assert_eq!(result.exit_kind(), ExitKind::Exception);
        assert_eq!(result.device, None);
        assert_eq!(budget.in_use(), 0);
        assert_eq!(budget.stats().released, 1);
    }

    #[test]
    fn test_short_stream_is_frame_count_mismatch() {
        let (probe, decoder) = single("clip", dims(2, 2, 5), 2 * 2 * 3);
        let writer = Arc::new(RecordingWriter::default());
        let pool = Arc::new(DevicePool::new(vec![DeviceHandle::Gpu("0".into())]).unwrap());
        let services = services(probe, decoder, Arc::clone(&writer), Arc::clone(&pool));

        let (result, _) = run_job(services, settings(), "/v/clip.mp4", CancellationToken::new());

        assert!(matches!(
            result.outcome,
            JobOutcome::Failed(JobError::FrameCountMismatch {
                expected: 5,
                processed: 3
            })
        ));
        assert!(writer.written.lock().unwrap().is_empty());
        assert_eq!(pool.available_count(), 1);
    }

    #[test]
    fn test_long_stream_counts_every_decoded_frame() {
        // The first batch of 4 overflows a 2-frame matrix; 5 more follow.
        let (probe, decoder) = single("clip", dims(2, 2, 2), 2 * 2 * 9);
        let writer = Arc::new(RecordingWriter::default());
        let pool = Arc::new(DevicePool::new(vec![DeviceHandle::Cpu]).unwrap());
        let services = services(probe, decoder, Arc::clone(&writer), Arc::clone(&pool));

        let (result, _) = run_job(services, settings(), "/v/clip.mp4", CancellationToken::new());

        assert!(matches!(
            result.outcome,
            JobOutcome::Failed(JobError::FrameCountMismatch {
                expected: 2,
                processed: 9
            })
        ));
        assert!(writer.written.lock().unwrap().is_empty());
        assert_eq!(pool.available_count(), 1);
    }

    #[test]
    fn test_single_channel_job_reads_gray_frames() {
        let (probe, decoder) = single("clip", dims(4, 2, 5), 4 * 2 * 5);
        let writer = Arc::new(RecordingWriter::default());
        let pool = Arc::new(DevicePool::new(vec![DeviceHandle::Cpu]).unwrap());
        let services = services(probe, decoder, Arc::clone(&writer), Arc::clone(&pool));
        let settings = Arc::new(JobSettings {
            num_channels: 1,
            ..(*settings()).clone()
        });

        let (result, _) = run_job(services, settings, "/v/clip.mp4", CancellationToken::new());

        assert!(
            matches!(result.outcome, JobOutcome::Succeeded { frames: 5, .. }),
            "{:?}",
            result.outcome
        );
        assert_eq!(writer.written.lock().unwrap()[0].1, 5);
        assert_eq!(pool.available_count(), 1);
    }

    #[test]
    fn test_cancelled_job_processes_fewer_frames_and_returns_device() {
        let probe = StubProbe {
            dimensions: HashMap::from([("clip".to_string(), dims(2, 2, 1_000_000))]),
        };
        let decoder = HeadDecoder {
            pixels: HashMap::new(),
            endless: true,
        };
        let writer = Arc::new(RecordingWriter::default());
        let pool = Arc::new(DevicePool::new(vec![DeviceHandle::Cpu]).unwrap());
        let services = services(probe, decoder, Arc::clone(&writer), Arc::clone(&pool));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let (result, budget) = run_job(services, settings(), "/v/clip.mp4", cancel);

        match result.outcome {
            JobOutcome::Cancelled {
                frames_processed,
                expected,
            } => {
                assert!(frames_processed < expected);
                assert_eq!(expected, 1_000_000);
            }
            other => panic!("expected cancellation, got {other:?}"),
        }
        assert_eq!(result.exit_kind(), ExitKind::Exception);
        assert!(writer.written.lock().unwrap().is_empty());
        assert_eq!(pool.available_count(), 1);
        assert_eq!(budget.in_use(), 0);
    }

    #[test]
    fn test_timestamps_are_decoded_for_report() {
        let (probe, decoder) = single("clip", dims(8, 8, 3), 8 * 8 * 3);
        let writer = Arc::new(RecordingWriter::default());
        let pool = Arc::new(DevicePool::new(vec![DeviceHandle::Cpu]).unwrap());
        let services = services(probe, decoder, Arc::clone(&writer), pool);
        let settings = Arc::new(JobSettings {
            timestamp: Some(TimestampRegion {
                x: 1,
                y: 4,
                height: 2,
                max_width: 6,
            }),
            ..(*settings()).clone()
        });

        let (result, _) = run_job(services, settings, "/v/clip.mp4", CancellationToken::new());

        assert!(matches!(result.outcome, JobOutcome::Succeeded { .. }));
        let written = writer.written.lock().unwrap();
        assert_eq!(
            written[0].2,
            Some(vec!["t0".to_string(), "t1".to_string(), "t2".to_string()])
        );
    }

    #[test]
    fn test_timestamp_outside_frame_is_invalid_geometry() {
        let (probe, decoder) = single("clip", dims(8, 8, 3), 8 * 8 * 3);
        let writer = Arc::new(RecordingWriter::default());
        let pool = Arc::new(DevicePool::new(vec![DeviceHandle::Cpu]).unwrap());
        let services = services(probe, decoder, writer, Arc::clone(&pool));
        let settings = Arc::new(JobSettings {
            timestamp: Some(TimestampRegion {
                x: 4,
                y: 4,
                height: 16,
                max_width: 160,
            }),
            ..(*settings()).clone()
        });

        let (result, _) = run_job(services, settings, "/v/clip.mp4", CancellationToken::new());

        assert!(matches!(
            result.outcome,
            JobOutcome::Failed(JobError::InvalidGeometry(_))
        ));
        assert_eq!(result.device, None);
        assert_eq!(pool.available_count(), 1);
    }

    #[test]
    fn test_crop_shrinks_decoded_frames() {
        // Decoder emits cropped 4x2 frames; the probe reports the native 8x8.
        let (probe, decoder) = single("clip", dims(8, 8, 5), 4 * 2 * 5);
        let writer = Arc::new(RecordingWriter::default());
        let pool = Arc::new(DevicePool::new(vec![DeviceHandle::Cpu]).unwrap());
        let services = services(probe, decoder, Arc::clone(&writer), pool);
        let settings = Arc::new(JobSettings {
            crop: Some(CropRect {
                x: 2,
                y: 0,
                width: 4,
                height: 2,
            }),
            ..(*settings()).clone()
        });

        let (result, _) = run_job(services, settings, "/v/clip.mp4", CancellationToken::new());
        assert!(matches!(
            result.outcome,
            JobOutcome::Succeeded { frames: 5, .. }
        ));
    }

    #[test]
    fn test_video_name_is_stem() {
        assert_eq!(video_name(Path::new("/videos/a.b.mp4")), "a.b");
        assert_eq!(video_name(Path::new("clip")), "clip");
    }
}
