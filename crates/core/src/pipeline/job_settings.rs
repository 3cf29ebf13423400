use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::shared::constants::{DEFAULT_BATCH_SIZE, DEFAULT_NUM_CHANNELS, DRAIN_BACKOFF};
use crate::shared::geometry::{CropRect, TimestampRegion};

/// Per-video configuration handed unchanged to every job.
#[derive(Clone, Debug)]
pub struct JobSettings {
    pub batch_size: usize,
    pub num_channels: u8,
    /// Decoder-side crop; ignored for videos it does not fit.
    pub crop: Option<CropRect>,
    /// Timestamp overlay location; `None` excludes timestamps from reports.
    pub timestamp: Option<TimestampRegion>,
    /// Moving-average window, when smoothing is enabled.
    pub smoothing: Option<usize>,
    pub binarize: bool,
    pub report_dir: PathBuf,
    pub class_names: Arc<[String]>,
}

impl Default for JobSettings {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            num_channels: DEFAULT_NUM_CHANNELS,
            crop: None,
            timestamp: None,
            smoothing: None,
            binarize: false,
            report_dir: PathBuf::from("reports"),
            class_names: Arc::from(Vec::new()),
        }
    }
}

/// Order in which videos leave the work list.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DispatchOrder {
    /// Last discovered first.
    #[default]
    Lifo,
    /// Discovery order.
    Fifo,
}

#[derive(Clone, Debug)]
pub struct SchedulerSettings {
    pub dispatch_order: DispatchOrder,
    /// Longest wait between drain passes that found nothing new.
    pub drain_backoff: Duration,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            dispatch_order: DispatchOrder::default(),
            drain_backoff: DRAIN_BACKOFF,
        }
    }
}
