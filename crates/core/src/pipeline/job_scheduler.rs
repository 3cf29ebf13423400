use std::collections::{HashMap, VecDeque};
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use thiserror::Error;

use crate::shared::cancellation::CancellationToken;

use super::concurrency_budget::{BudgetViolation, ConcurrencyBudget, Permit};
use super::error::JobError;
use super::job_settings::{JobSettings, SchedulerSettings};
use super::pipeline_logger::PipelineLogger;
use super::video_job::{video_name, JobId, JobOutcome, JobResult, JobServices, VideoJob};

pub use super::job_settings::DispatchOrder;

/// Why a run stopped early. `report` accounts for every other video: the
/// results collected before the stop and the videos left undispatched.
#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("failed to start job thread for {video}: {source}")]
    Spawn {
        video: PathBuf,
        #[source]
        source: std::io::Error,
        report: Box<SchedulerReport>,
    },
    #[error("invariant violated while processing {video}: {source}")]
    InvariantViolation {
        video: PathBuf,
        #[source]
        source: JobError,
        report: Box<SchedulerReport>,
    },
    #[error(transparent)]
    Budget(#[from] BudgetViolation),
}

impl SchedulerError {
    /// Partial results of the stopped run, when there are any.
    pub fn report(&self) -> Option<&SchedulerReport> {
        match self {
            SchedulerError::Spawn { report, .. }
            | SchedulerError::InvariantViolation { report, .. } => Some(report),
            SchedulerError::Budget(_) => None,
        }
    }
}

/// Runs one admitted video to completion. The runner owns `permit` and
/// must release it before returning.
pub trait JobRunner: Send + Sync {
    fn run(
        &self,
        id: JobId,
        video_path: PathBuf,
        permit: Permit,
        cancel: CancellationToken,
    ) -> JobResult;
}

/// Runs each video as a [`VideoJob`] over shared services.
pub struct VideoJobRunner {
    services: Arc<JobServices>,
    settings: Arc<JobSettings>,
}

impl VideoJobRunner {
    pub fn new(services: Arc<JobServices>, settings: Arc<JobSettings>) -> Self {
        Self { services, settings }
    }
}

impl JobRunner for VideoJobRunner {
    fn run(
        &self,
        id: JobId,
        video_path: PathBuf,
        permit: Permit,
        cancel: CancellationToken,
    ) -> JobResult {
        VideoJob::new(
            id,
            video_path,
            Arc::clone(&self.services),
            Arc::clone(&self.settings),
            cancel,
        )
        .run(permit)
    }
}

/// What happened to every video handed to [`JobScheduler::run`].
#[derive(Debug)]
pub struct SchedulerReport {
    /// One result per dispatched video, in completion order.
    pub results: Vec<JobResult>,
    /// Videos never dispatched because cancellation was requested.
    pub undispatched: Vec<PathBuf>,
    pub elapsed: Duration,
    pub peak_concurrency: usize,
}

impl SchedulerReport {
    pub fn succeeded(&self) -> usize {
        self.count(|o| matches!(o, JobOutcome::Succeeded { .. }))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, JobOutcome::Failed(_)))
    }

    pub fn cancelled(&self) -> usize {
        self.count(|o| matches!(o, JobOutcome::Cancelled { .. }))
    }

    fn count(&self, f: impl Fn(&JobOutcome) -> bool) -> usize {
        self.results.iter().filter(|r| f(&r.outcome)).count()
    }
}

struct PendingJob {
    video: PathBuf,
    handle: JoinHandle<()>,
}

/// Bookkeeping for one `run` call.
struct RunState {
    total: usize,
    results: Vec<JobResult>,
    fatal: Option<JobResult>,
    spawn_failure: Option<(PathBuf, std::io::Error)>,
    pending: HashMap<JobId, PendingJob>,
}

/// Dispatches videos under a `device_count + 1` concurrency budget.
///
/// With more than one device each job runs on its own named thread; with a
/// single device jobs run inline on the caller's thread under the same
/// permit discipline.
pub struct JobScheduler {
    runner: Arc<dyn JobRunner>,
    device_count: usize,
    settings: SchedulerSettings,
    cancel: CancellationToken,
    logger: Arc<dyn PipelineLogger>,
    budget: Arc<ConcurrencyBudget>,
}

impl JobScheduler {
    pub fn new(
        runner: Arc<dyn JobRunner>,
        device_count: usize,
        settings: SchedulerSettings,
        cancel: CancellationToken,
        logger: Arc<dyn PipelineLogger>,
    ) -> Self {
        Self {
            runner,
            device_count,
            settings,
            cancel,
            logger,
            budget: Arc::new(ConcurrencyBudget::for_devices(device_count)),
        }
    }

    pub fn budget(&self) -> &Arc<ConcurrencyBudget> {
        &self.budget
    }

    /// Processes `videos` (in discovery order) until all are done or
    /// cancellation stops dispatch, then waits for in-flight jobs.
    ///
    /// A broken lease or permit invariant in any job, or a job thread that
    /// cannot be started, cancels the run. It is returned as an error
    /// carrying the partial report once in-flight jobs have drained.
    pub fn run(&self, videos: Vec<PathBuf>) -> Result<SchedulerReport, SchedulerError> {
        let started = Instant::now();
        let mut work: VecDeque<PathBuf> = videos.into();
        let mut state = RunState {
            total: work.len(),
            results: Vec::with_capacity(work.len()),
            fatal: None,
            spawn_failure: None,
            pending: HashMap::new(),
        };
        let (tx, rx) = crossbeam_channel::unbounded::<JobResult>();

        log::info!(
            "Processing {} videos on {} device(s), budget {}",
            state.total,
            self.device_count,
            self.budget.capacity()
        );

        let dispatched = self.dispatch(&mut work, &mut state, &tx, &rx);
        drop(tx);
        self.drain(&mut state, &rx);

        dispatched?;
        self.finish(started, work, state)
    }

    /// Builds the run's report, or the error that stopped the run with the
    /// report inside it.
    fn finish(
        &self,
        started: Instant,
        work: VecDeque<PathBuf>,
        state: RunState,
    ) -> Result<SchedulerReport, SchedulerError> {
        let undispatched: Vec<PathBuf> = work.into_iter().collect();
        if !undispatched.is_empty() {
            log::warn!(
                "{} videos were not dispatched because processing was cancelled",
                undispatched.len()
            );
        }

        let report = SchedulerReport {
            results: state.results,
            undispatched,
            elapsed: started.elapsed(),
            peak_concurrency: self.budget.stats().peak_in_use,
        };

        if let Some((video, source)) = state.spawn_failure {
            return Err(SchedulerError::Spawn {
                video,
                source,
                report: Box::new(report),
            });
        }
        if let Some(result) = state.fatal {
            if let JobOutcome::Failed(source) = result.outcome {
                return Err(SchedulerError::InvariantViolation {
                    video: result.video_path,
                    source,
                    report: Box::new(report),
                });
            }
        }
        Ok(report)
    }

    fn dispatch(
        &self,
        work: &mut VecDeque<PathBuf>,
        state: &mut RunState,
        tx: &Sender<JobResult>,
        rx: &Receiver<JobResult>,
    ) -> Result<(), BudgetViolation> {
        let mut next_id = 0;

        while !work.is_empty() {
            let permit = self.budget.acquire();
            while let Ok(result) = rx.try_recv() {
                self.record(state, result);
            }
            if self.cancel.is_cancelled() {
                log::info!("Cancellation requested; no further videos will be dispatched");
                permit.release()?;
                break;
            }

            let next = match self.settings.dispatch_order {
                DispatchOrder::Lifo => work.pop_back(),
                DispatchOrder::Fifo => work.pop_front(),
            };
            let Some(video) = next else {
                permit.release()?;
                break;
            };
            let id = JobId(next_id);
            next_id += 1;
            log::debug!("Dispatching {id} for {}", video.display());

            if self.device_count > 1 {
                // A failed spawn drops the closure and with it the permit.
                match self.spawn(id, video.clone(), permit, tx.clone()) {
                    Ok(handle) => {
                        state.pending.insert(id, PendingJob { video, handle });
                    }
                    Err(source) => {
                        self.abandon(work, state, id, video, source);
                        break;
                    }
                }
            } else {
                let result = self.run_inline(id, video, permit);
                self.record(state, result);
            }
        }

        Ok(())
    }

    fn spawn(
        &self,
        id: JobId,
        video: PathBuf,
        permit: Permit,
        tx: Sender<JobResult>,
    ) -> std::io::Result<JoinHandle<()>> {
        let runner = Arc::clone(&self.runner);
        let cancel = self.cancel.clone();
        std::thread::Builder::new()
            .name(format!("job-{}", video_name(&video)))
            .spawn(move || {
                let result = runner.run(id, video, permit, cancel);
                let _ = tx.send(result);
            })
    }

    /// Stops the run after a job thread failed to start. The video goes back
    /// where it was taken from so it is reported as undispatched.
    fn abandon(
        &self,
        work: &mut VecDeque<PathBuf>,
        state: &mut RunState,
        id: JobId,
        video: PathBuf,
        source: std::io::Error,
    ) {
        log::error!("Failed to start {id} for {}: {source}", video.display());
        self.cancel.cancel();
        match self.settings.dispatch_order {
            DispatchOrder::Lifo => work.push_back(video.clone()),
            DispatchOrder::Fifo => work.push_front(video.clone()),
        }
        state.spawn_failure = Some((video, source));
    }

    fn run_inline(&self, id: JobId, video: PathBuf, permit: Permit) -> JobResult {
        let runner = Arc::clone(&self.runner);
        let cancel = self.cancel.clone();
        let path = video.clone();
        panic::catch_unwind(AssertUnwindSafe(move || runner.run(id, path, permit, cancel)))
            .unwrap_or_else(|_| panicked(id, video))
    }

    /// Collects results until no job is in flight. Sleeps up to the drain
    /// backoff only after a pass that finished nothing.
    fn drain(&self, state: &mut RunState, rx: &Receiver<JobResult>) {
        while !state.pending.is_empty() {
            let finished: Vec<JobId> = state
                .pending
                .iter()
                .filter(|(_, job)| job.handle.is_finished())
                .map(|(id, _)| *id)
                .collect();

            let before = state.pending.len();
            while let Ok(result) = rx.try_recv() {
                self.record(state, result);
            }
            for id in finished {
                // Finished without sending a result: the thread unwound.
                if let Some(job) = state.pending.remove(&id) {
                    let _ = job.handle.join();
                    log::error!("{id} panicked while processing {}", job.video.display());
                    self.record(state, panicked(id, job.video));
                }
            }

            if state.pending.is_empty() || state.pending.len() < before {
                continue;
            }
            match rx.recv_timeout(self.settings.drain_backoff) {
                Ok(result) => self.record(state, result),
                Err(RecvTimeoutError::Timeout) => {
                    log::debug!("Waiting on {} in-flight jobs", state.pending.len())
                }
                Err(RecvTimeoutError::Disconnected) => {
                    std::thread::sleep(Duration::from_millis(1))
                }
            }
        }
    }

    fn record(&self, state: &mut RunState, result: JobResult) {
        if let Some(job) = state.pending.remove(&result.job_id) {
            if job.handle.join().is_err() {
                log::error!("{} unwound after reporting its result", result.job_id);
            }
        }

        self.logger.outcome(result.outcome.label());
        log::debug!(
            "{} exited with {} for {}",
            result.job_id,
            result.exit_kind(),
            result.video_path.display()
        );

        if let JobOutcome::Failed(e) = &result.outcome {
            if e.is_fatal() {
                log::error!(
                    "Fatal error processing {}: {e}; cancelling run",
                    result.video_path.display()
                );
                self.cancel.cancel();
                if state.fatal.is_none() {
                    state.fatal = Some(result);
                    self.progress(state);
                    return;
                }
            }
        }

        state.results.push(result);
        self.progress(state);
    }

    fn progress(&self, state: &RunState) {
        let completed = state.results.len() + usize::from(state.fatal.is_some());
        self.logger.progress(completed, state.total);
    }
}

fn panicked(id: JobId, video_path: PathBuf) -> JobResult {
    JobResult {
        job_id: id,
        video_path,
        device: None,
        outcome: JobOutcome::Failed(JobError::Panicked),
    }
}
