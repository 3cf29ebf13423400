use std::time::Duration;

pub const DEFAULT_BATCH_SIZE: usize = 32;
pub const DEFAULT_NUM_CHANNELS: u8 = 3;

pub const DEFAULT_CROP_X: u32 = 2;
pub const DEFAULT_CROP_Y: u32 = 0;
pub const DEFAULT_CROP_WIDTH: u32 = 474;
pub const DEFAULT_CROP_HEIGHT: u32 = 356;

/// Timestamp overlay location in native (pre-crop) coordinates.
pub const DEFAULT_TIMESTAMP_X: u32 = 25;
pub const DEFAULT_TIMESTAMP_Y: u32 = 340;
pub const DEFAULT_TIMESTAMP_HEIGHT: u32 = 16;
pub const DEFAULT_TIMESTAMP_MAX_WIDTH: u32 = 160;

pub const DEFAULT_SMOOTHING_FACTOR: usize = 16;

/// Poll interval of the scheduler's drain loop once no job has finished
/// during a full pass.
pub const DRAIN_BACKOFF: Duration = Duration::from_secs(10);

/// Square input sizes the classifier models are trained at.
pub const VALID_MODEL_INPUT_SIZES: &[u32] = &[224, 299];

pub const DEFAULT_MODEL_FILE_NAME: &str = "model.onnx";
pub const INPUT_SIZE_FILE_NAME: &str = "input_size.txt";
pub const CLASS_NAMES_FILE_NAME: &str = "class_names.txt";

pub const REPORT_EXTENSION: &str = "csv";

pub const VIDEO_EXTENSIONS: &[&str] = &[
    "mp4", "m4v", "mov", "avi", "mkv", "mpg", "mpeg", "ts", "webm", "wmv", "flv",
];
