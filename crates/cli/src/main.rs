mod logging;
mod nfs;

use std::fs;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use log::LevelFilter;

use snva_core::classification::infrastructure::inception_preprocessor::InceptionPreprocessor;
use snva_core::classification::infrastructure::model_files;
use snva_core::classification::infrastructure::onnx_frame_classifier::OnnxFrameClassifier;
use snva_core::devices::domain::device_pool::DevicePool;
use snva_core::devices::infrastructure::device_discovery::discover_devices;
use snva_core::pipeline::job_scheduler::{
    DispatchOrder, JobScheduler, SchedulerReport, VideoJobRunner,
};
use snva_core::pipeline::job_settings::{JobSettings, SchedulerSettings};
use snva_core::pipeline::pipeline_logger::{PipelineLogger, RunPipelineLogger};
use snva_core::pipeline::video_discovery::{exclude_previously_processed, read_video_file_names};
use snva_core::pipeline::video_job::{JobOutcome, JobServices};
use snva_core::report::domain::timestamp_decoder::TimestampDecoder;
use snva_core::report::infrastructure::csv_report_writer::CsvReportWriter;
use snva_core::report::infrastructure::glyph_timestamp_decoder::GlyphTimestampDecoder;
use snva_core::shared::cancellation::CancellationToken;
use snva_core::shared::constants::{
    CLASS_NAMES_FILE_NAME, DEFAULT_BATCH_SIZE, DEFAULT_CROP_HEIGHT, DEFAULT_CROP_WIDTH,
    DEFAULT_CROP_X, DEFAULT_CROP_Y, DEFAULT_MODEL_FILE_NAME, DEFAULT_NUM_CHANNELS,
    DEFAULT_SMOOTHING_FACTOR, DEFAULT_TIMESTAMP_HEIGHT, DEFAULT_TIMESTAMP_MAX_WIDTH,
    DEFAULT_TIMESTAMP_X, DEFAULT_TIMESTAMP_Y,
};
use snva_core::shared::geometry::{CropRect, TimestampRegion};
use snva_core::video::infrastructure::ffmpeg_decoder::FfmpegDecoder;
use snva_core::video::infrastructure::ffprobe_probe::FfprobeProbe;

use nfs::NfsMount;

const NFS_MOUNT_POINT: &str = "./videos";

/// Frame-level scene classification for video collections.
#[derive(Parser, Debug)]
#[command(name = "snva", version)]
struct Cli {
    /// Video file or directory of videos (the share path with --nfs).
    #[arg(long, short = 'v')]
    video_path: String,

    /// Name of the model directory under --models-dir.
    #[arg(long)]
    model_name: String,

    /// Parent directory of model directories.
    #[arg(long, default_value = "./models/work_zone_scene_detection")]
    models_dir: PathBuf,

    /// Model file name inside the model directory.
    #[arg(long, default_value = DEFAULT_MODEL_FILE_NAME)]
    model_file: String,

    /// `id:name` class list (default: <models-dir>/class_names.txt).
    #[arg(long)]
    class_names_file: Option<PathBuf>,

    /// Frames per inference batch.
    #[arg(long, default_value_t = DEFAULT_BATCH_SIZE)]
    batch_size: usize,

    /// Ignore GPUs and classify on a single CPU slot.
    #[arg(long)]
    cpu_only: bool,

    /// Crop frames in the decoder to the --crop-* rectangle.
    #[arg(long)]
    crop: bool,

    #[arg(long, default_value_t = DEFAULT_CROP_X)]
    crop_x: u32,

    #[arg(long, default_value_t = DEFAULT_CROP_Y)]
    crop_y: u32,

    #[arg(long, default_value_t = DEFAULT_CROP_WIDTH)]
    crop_width: u32,

    #[arg(long, default_value_t = DEFAULT_CROP_HEIGHT)]
    crop_height: u32,

    /// x of the timestamp overlay's top-left corner (before cropping).
    #[arg(long, default_value_t = DEFAULT_TIMESTAMP_X)]
    timestamp_x: u32,

    /// y of the timestamp overlay's top-left corner (before cropping).
    #[arg(long, default_value_t = DEFAULT_TIMESTAMP_Y)]
    timestamp_y: u32,

    #[arg(long, default_value_t = DEFAULT_TIMESTAMP_HEIGHT)]
    timestamp_height: u32,

    #[arg(long, default_value_t = DEFAULT_TIMESTAMP_MAX_WIDTH)]
    timestamp_max_width: u32,

    /// Do not read timestamps off frames.
    #[arg(long)]
    exclude_timestamps: bool,

    /// Directory of timestamp glyph images (0.png ... 9.png).
    #[arg(long)]
    timestamp_glyphs: Option<PathBuf>,

    /// Channels per decoded pixel (1 or 3).
    #[arg(long, default_value_t = DEFAULT_NUM_CHANNELS)]
    num_channels: u8,

    /// Apply class-wise moving-average smoothing to probabilities.
    #[arg(long)]
    smooth_probs: bool,

    #[arg(long, default_value_t = DEFAULT_SMOOTHING_FACTOR)]
    smoothing_factor: usize,

    /// Round probabilities to 0 or 1 (0.5 rounds up).
    #[arg(long)]
    binarize_probs: bool,

    /// Directory reports are written to.
    #[arg(long, default_value = "./reports")]
    report_path: PathBuf,

    /// Skip videos that already have a report.
    #[arg(long)]
    exclude_previously_processed: bool,

    /// Dispatch order: lifo or fifo.
    #[arg(long, default_value = "lifo")]
    dispatch_order: String,

    /// Longest wait in seconds between polls for finished jobs.
    #[arg(long, default_value = "10")]
    drain_backoff: u64,

    /// Log level: error, info or debug.
    #[arg(long, default_value = "info", value_parser = logging::parse_level)]
    log_level: LevelFilter,

    /// Directory log files are written to.
    #[arg(long, default_value = "./logs")]
    log_path: PathBuf,

    /// Log to the log file only.
    #[arg(long)]
    log_silently: bool,

    /// Treat --video-path as an NFS share and mount it at ./videos.
    #[arg(long)]
    nfs: bool,

    #[arg(long)]
    nfs_username: Option<String>,

    #[arg(long)]
    nfs_password: Option<String>,
}

fn main() {
    let cli = Cli::parse();
    let sink = match logging::init(cli.log_level, &cli.log_path, cli.log_silently) {
        Ok(sink) => sink,
        Err(e) => {
            eprintln!("Error: {e}");
            process::exit(1);
        }
    };
    log::debug!("Logging to {}", sink.path().display());
    let silent = cli.log_silently;

    let result = run(cli);
    if let Err(e) = &result {
        log::error!("{e}");
    }
    sink.shutdown();

    if let Err(e) = result {
        if silent {
            eprintln!("Error: {e}");
        }
        process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let dispatch_order = validate(&cli)?;

    let ffmpeg = resolve_binary("FFMPEG_HOME", "ffmpeg");
    let ffprobe = resolve_binary("FFPROBE_HOME", "ffprobe");
    log::debug!("ffmpeg: {}, ffprobe: {}", ffmpeg.display(), ffprobe.display());

    let devices = discover_devices(cli.cpu_only);
    let device_count = devices.len();
    let pool = Arc::new(DevicePool::new(devices)?);

    let class_names_path = cli
        .class_names_file
        .clone()
        .unwrap_or_else(|| cli.models_dir.join(CLASS_NAMES_FILE_NAME));
    let model = model_files::load(
        &cli.models_dir,
        &cli.model_name,
        &cli.model_file,
        &class_names_path,
    )?;

    let (timestamp_decoder, timestamp) = build_timestamp_decoder(&cli)?;

    let _mount;
    let video_dir = if cli.nfs {
        let mount = NfsMount::mount(
            &cli.video_path,
            Path::new(NFS_MOUNT_POINT),
            cli.nfs_username.as_deref(),
            cli.nfs_password.as_deref(),
        )?;
        let dir = mount.mount_point().to_path_buf();
        _mount = Some(mount);
        dir
    } else {
        _mount = None;
        PathBuf::from(&cli.video_path)
    };

    let mut videos = read_video_file_names(&video_dir)?;
    if cli.exclude_previously_processed {
        videos = exclude_previously_processed(videos, &cli.report_path);
    }
    if videos.is_empty() {
        log::warn!("No videos to process under {}", video_dir.display());
        return Ok(());
    }
    fs::create_dir_all(&cli.report_path)?;

    let cancel = CancellationToken::new();
    let handler_token = cancel.clone();
    ctrlc::set_handler(move || {
        if handler_token.cancel() {
            log::warn!("Interrupt received; finishing in-flight videos");
        } else {
            log::warn!("Already shutting down");
        }
    })?;

    let logger = Arc::new(RunPipelineLogger::new());
    let services = Arc::new(JobServices {
        probe: Arc::new(FfprobeProbe::new(ffprobe)),
        decoder: Arc::new(FfmpegDecoder::new(ffmpeg)),
        classifier: Arc::new(OnnxFrameClassifier::new(
            &model.model_path,
            model.class_names.len(),
        )),
        preprocessor: Arc::new(InceptionPreprocessor::new(model.input_size)),
        timestamp_decoder,
        report_writer: Arc::new(CsvReportWriter::new()),
        devices: pool,
        logger: Arc::clone(&logger) as Arc<dyn PipelineLogger>,
    });
    let settings = Arc::new(JobSettings {
        batch_size: cli.batch_size,
        num_channels: cli.num_channels,
        crop: cli.crop.then_some(CropRect {
            x: cli.crop_x,
            y: cli.crop_y,
            width: cli.crop_width,
            height: cli.crop_height,
        }),
        timestamp,
        smoothing: cli.smooth_probs.then_some(cli.smoothing_factor),
        binarize: cli.binarize_probs,
        report_dir: cli.report_path.clone(),
        class_names: Arc::from(model.class_names),
    });

    let scheduler = JobScheduler::new(
        Arc::new(VideoJobRunner::new(services, settings)),
        device_count,
        SchedulerSettings {
            dispatch_order,
            drain_backoff: Duration::from_secs(cli.drain_backoff),
        },
        cancel,
        Arc::clone(&logger) as Arc<dyn PipelineLogger>,
    );

    let result = scheduler.run(videos);
    logger.summary();
    match result {
        Ok(report) => {
            log_report(&report);
            Ok(())
        }
        Err(e) => {
            if let Some(report) = e.report() {
                log_report(report);
            }
            Err(e.into())
        }
    }
}

fn log_report(report: &SchedulerReport) {
    for result in &report.results {
        if let JobOutcome::Failed(e) = &result.outcome {
            log::warn!("No report for {}: {e}", result.video_path.display());
        }
    }
    for video in &report.undispatched {
        log::warn!("Not processed: {}", video.display());
    }
    log::info!(
        "Processed {} videos in {:.1}s: {} succeeded, {} failed, {} cancelled, {} not dispatched",
        report.results.len(),
        report.elapsed.as_secs_f64(),
        report.succeeded(),
        report.failed(),
        report.cancelled(),
        report.undispatched.len()
    );
}

type TimestampSetup = (Option<Arc<dyn TimestampDecoder>>, Option<TimestampRegion>);

fn build_timestamp_decoder(cli: &Cli) -> Result<TimestampSetup, Box<dyn std::error::Error>> {
    if cli.exclude_timestamps {
        return Ok((None, None));
    }
    let Some(dir) = &cli.timestamp_glyphs else {
        log::warn!("No --timestamp-glyphs directory given; reports will exclude timestamps");
        return Ok((None, None));
    };

    let decoder: Arc<dyn TimestampDecoder> = Arc::new(GlyphTimestampDecoder::load(dir)?);
    let region = TimestampRegion {
        x: cli.timestamp_x,
        y: cli.timestamp_y,
        height: cli.timestamp_height,
        max_width: cli.timestamp_max_width,
    };
    Ok((Some(decoder), Some(region)))
}

fn validate(cli: &Cli) -> Result<DispatchOrder, Box<dyn std::error::Error>> {
    if !cli.models_dir.is_dir() {
        return Err(format!("Models directory not found: {}", cli.models_dir.display()).into());
    }
    if cli.batch_size == 0 {
        return Err("Batch size must be at least 1".into());
    }
    if cli.num_channels != 1 && cli.num_channels != 3 {
        return Err(format!("Channels must be 1 or 3, got {}", cli.num_channels).into());
    }
    if cli.smooth_probs && cli.smoothing_factor == 0 {
        return Err("Smoothing factor must be at least 1".into());
    }
    if cli.drain_backoff == 0 {
        return Err("Drain backoff must be at least 1 second".into());
    }
    if cli.nfs_username.is_some() != cli.nfs_password.is_some() {
        return Err("--nfs-username and --nfs-password must be given together".into());
    }
    if !cli.nfs && !Path::new(&cli.video_path).exists() {
        return Err(format!("Video path not found: {}", cli.video_path).into());
    }
    parse_dispatch_order(&cli.dispatch_order)
}

fn parse_dispatch_order(order: &str) -> Result<DispatchOrder, Box<dyn std::error::Error>> {
    match order {
        "lifo" => Ok(DispatchOrder::Lifo),
        "fifo" => Ok(DispatchOrder::Fifo),
        other => Err(format!("Dispatch order must be 'lifo' or 'fifo', got '{other}'").into()),
    }
}

/// Binary named by `env_var`, else the platform default location.
fn resolve_binary(env_var: &str, name: &str) -> PathBuf {
    if let Some(path) = std::env::var_os(env_var) {
        return PathBuf::from(path);
    }
    log::warn!("{env_var} not set; using default {name} location");
    if cfg!(windows) {
        return PathBuf::from(format!("{name}.exe"));
    }
    let local = Path::new("/usr/local/bin").join(name);
    if local.exists() {
        local
    } else {
        Path::new("/usr/bin").join(name)
    }
}
