use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

use thiserror::Error;

/// Identifies one issued permit so double releases can be detected.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PermitId(u64);

impl fmt::Display for PermitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "permit#{}", self.0)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BudgetViolation {
    #[error("{0} released more than once")]
    DoubleRelease(PermitId),
    #[error("{0} was never issued")]
    UnknownPermit(PermitId),
}

/// Acquire/release counters, for instrumentation and tests.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BudgetStats {
    pub acquired: u64,
    pub released: u64,
    pub peak_in_use: usize,
}

struct BudgetState {
    outstanding: HashSet<PermitId>,
    next_id: u64,
    stats: BudgetStats,
}

/// Counting admission control for concurrently running jobs.
///
/// One permit per device plus one, so a job's report phase can overlap
/// another job's device-bound phase.
pub struct ConcurrencyBudget {
    state: Mutex<BudgetState>,
    returned: Condvar,
    capacity: usize,
}

impl ConcurrencyBudget {
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(BudgetState {
                outstanding: HashSet::new(),
                next_id: 0,
                stats: BudgetStats::default(),
            }),
            returned: Condvar::new(),
            capacity: capacity.max(1),
        }
    }

    /// Budget of `device_count + 1` permits.
    pub fn for_devices(device_count: usize) -> Self {
        Self::new(device_count + 1)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn in_use(&self) -> usize {
        self.lock().outstanding.len()
    }

    pub fn stats(&self) -> BudgetStats {
        self.lock().stats
    }

    /// Blocks until a permit is free.
    pub fn acquire(self: &Arc<Self>) -> Permit {
        let mut state = self.lock();
        while state.outstanding.len() >= self.capacity {
            state = self
                .returned
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
        self.issue(&mut state)
    }

    /// Takes a permit if one is free right now.
    pub fn try_acquire(self: &Arc<Self>) -> Option<Permit> {
        let mut state = self.lock();
        if state.outstanding.len() >= self.capacity {
            return None;
        }
        Some(self.issue(&mut state))
    }

    /// Returns the permit `id` to the budget.
    pub fn release_id(&self, id: PermitId) -> Result<(), BudgetViolation> {
        let mut state = self.lock();
        if !state.outstanding.remove(&id) {
            return Err(if id.0 < state.next_id {
                BudgetViolation::DoubleRelease(id)
            } else {
                BudgetViolation::UnknownPermit(id)
            });
        }
        state.stats.released += 1;
        drop(state);

        self.returned.notify_one();
        Ok(())
    }

    fn issue(self: &Arc<Self>, state: &mut BudgetState) -> Permit {
        let id = PermitId(state.next_id);
        state.next_id += 1;
        state.outstanding.insert(id);
        state.stats.acquired += 1;
        state.stats.peak_in_use = state.stats.peak_in_use.max(state.outstanding.len());
        Permit {
            budget: Arc::clone(self),
            id,
            released: false,
        }
    }

    fn lock(&self) -> MutexGuard<'_, BudgetState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// One admitted job. Returned by `release`, or on drop if the job unwinds.
pub struct Permit {
    budget: Arc<ConcurrencyBudget>,
    id: PermitId,
    released: bool,
}

impl Permit {
    pub fn id(&self) -> PermitId {
        self.id
    }

    pub fn release(mut self) -> Result<(), BudgetViolation> {
        self.released = true;
        self.budget.release_id(self.id)
    }
}

impl Drop for Permit {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(e) = self.budget.release_id(self.id) {
            log::error!("{e}");
        }
    }
}
