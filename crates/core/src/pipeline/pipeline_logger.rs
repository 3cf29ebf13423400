use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, PoisonError};
use std::time::Instant;

/// Cross-cutting logger for pipeline orchestration events.
///
/// Shared by every job, so methods take `&self`.
pub trait PipelineLogger: Send + Sync {
    /// Report run-level progress: jobs finished out of jobs known.
    fn progress(&self, completed: usize, total: usize);

    /// Record how long a named stage took for one video.
    fn timing(&self, stage: &str, duration_ms: f64);

    /// Record a point-in-time metric (e.g. frames classified).
    fn metric(&self, name: &str, value: f64);

    /// Count one finished job under `outcome`.
    fn outcome(&self, outcome: &str);

    /// Emit an end-of-run summary. Default: no-op.
    fn summary(&self) {}
}

/// Silent logger that discards all events.
pub struct NullPipelineLogger;

impl PipelineLogger for NullPipelineLogger {
    fn progress(&self, _completed: usize, _total: usize) {}
    fn timing(&self, _stage: &str, _duration_ms: f64) {}
    fn metric(&self, _name: &str, _value: f64) {}
    fn outcome(&self, _outcome: &str) {}
}

#[derive(Default)]
struct RunStats {
    timings: HashMap<String, Vec<f64>>,
    metrics: HashMap<String, Vec<f64>>,
    outcomes: BTreeMap<String, usize>,
    completed: usize,
    total: usize,
}

/// Aggregates per-stage timings and job outcomes across a run and logs
/// a summary at the end.
pub struct RunPipelineLogger {
    stats: Mutex<RunStats>,
    start_time: Instant,
}

impl RunPipelineLogger {
    pub fn new() -> Self {
        Self {
            stats: Mutex::new(RunStats::default()),
            start_time: Instant::now(),
        }
    }

    /// Returns the formatted summary string, or `None` if no job finished.
    pub fn summary_string(&self) -> Option<String> {
        let stats = self.lock();
        if stats.outcomes.is_empty() && stats.timings.is_empty() {
            return None;
        }

        let elapsed_s = self.start_time.elapsed().as_secs_f64();
        let mut lines = Vec::new();
        lines.push(format!(
            "Run summary ({}/{} videos, {elapsed_s:.1}s total):",
            stats.completed, stats.total
        ));

        let outcomes: Vec<String> = stats
            .outcomes
            .iter()
            .map(|(name, count)| format!("{name} {count}"))
            .collect();
        if !outcomes.is_empty() {
            lines.push(format!("  Outcomes: {}", outcomes.join(", ")));
        }

        let mut stages: Vec<_> = stats.timings.keys().collect();
        stages.sort();
        for stage in stages {
            let durations = &stats.timings[stage];
            let total_ms: f64 = durations.iter().sum();
            let avg_ms = total_ms / durations.len().max(1) as f64;
            lines.push(format!(
                "  {stage:12}: avg {avg_ms:8.1}ms  total {total_ms:9.0}ms  ({} videos)",
                durations.len()
            ));
        }

        let frames: f64 = stats
            .metrics
            .get("frames")
            .map(|v| v.iter().sum())
            .unwrap_or(0.0);
        if frames > 0.0 && elapsed_s > 0.0 {
            lines.push(format!(
                "  Throughput: {:.1} fps ({frames:.0} frames)",
                frames / elapsed_s
            ));
        }

        Some(lines.join("\n"))
    }

    /// Returns the timing data for a given stage.
    pub fn timings_for(&self, stage: &str) -> Option<Vec<f64>> {
        self.lock().timings.get(stage).cloned()
    }

    pub fn outcome_count(&self, outcome: &str) -> usize {
        self.lock().outcomes.get(outcome).copied().unwrap_or(0)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RunStats> {
        self.stats.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for RunPipelineLogger {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineLogger for RunPipelineLogger {
    fn progress(&self, completed: usize, total: usize) {
        {
            let mut stats = self.lock();
            stats.completed = completed;
            stats.total = total;
        }
        if total > 0 {
            let pct = completed as f64 / total as f64 * 100.0;
            log::info!("Completed: {completed}/{total} videos ({pct:.1}%)");
        }
    }

    fn timing(&self, stage: &str, duration_ms: f64) {
        self.lock()
            .timings
            .entry(stage.to_string())
            .or_default()
            .push(duration_ms);
    }

    fn metric(&self, name: &str, value: f64) {
        self.lock()
            .metrics
            .entry(name.to_string())
            .or_default()
            .push(value);
    }

    fn outcome(&self, outcome: &str) {
        *self.lock().outcomes.entry(outcome.to_string()).or_insert(0) += 1;
    }

    fn summary(&self) {
        if let Some(text) = self.summary_string() {
            log::info!("\n\n{text}");
        }
    }
}
