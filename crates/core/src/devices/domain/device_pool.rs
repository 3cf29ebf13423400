use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

use thiserror::Error;

use super::device::DeviceHandle;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum DevicePoolError {
    #[error("device pool needs at least one device")]
    Empty,
    #[error("device {0} listed more than once")]
    Duplicate(DeviceHandle),
}

/// Releasing a device that is not currently leased. Indicates a broken
/// lease/release discipline and is never recoverable.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("device {0} released without an outstanding lease")]
pub struct DeviceLeaseViolation(pub DeviceHandle);

struct PoolState {
    available: VecDeque<DeviceHandle>,
    leased: HashSet<DeviceHandle>,
}

/// Fixed set of devices checked out exclusively, one job at a time.
///
/// `lease` blocks until a device is free. At most `capacity()` leases are
/// outstanding at once.
pub struct DevicePool {
    state: Mutex<PoolState>,
    released: Condvar,
    capacity: usize,
}

impl DevicePool {
    pub fn new(devices: Vec<DeviceHandle>) -> Result<Self, DevicePoolError> {
        if devices.is_empty() {
            return Err(DevicePoolError::Empty);
        }
        let mut seen = HashSet::new();
        for device in &devices {
            if !seen.insert(device.clone()) {
                return Err(DevicePoolError::Duplicate(device.clone()));
            }
        }

        Ok(Self {
            capacity: devices.len(),
            state: Mutex::new(PoolState {
                available: devices.into(),
                leased: HashSet::new(),
            }),
            released: Condvar::new(),
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn available_count(&self) -> usize {
        self.lock().available.len()
    }

    pub fn leased_count(&self) -> usize {
        self.lock().leased.len()
    }

    /// Blocks until a device is free and checks it out.
    pub fn lease(self: &Arc<Self>) -> DeviceLease {
        let mut state = self.lock();
        let device = loop {
            if let Some(device) = state.available.pop_front() {
                break device;
            }
            state = self
                .released
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        };
        state.leased.insert(device.clone());
        drop(state);

        log::debug!("leased device {device}");
        DeviceLease {
            pool: Arc::clone(self),
            device,
            released: false,
        }
    }

    /// Returns `device` to the pool.
    pub fn release(&self, device: &DeviceHandle) -> Result<(), DeviceLeaseViolation> {
        let mut state = self.lock();
        if !state.leased.remove(device) {
            return Err(DeviceLeaseViolation(device.clone()));
        }
        state.available.push_back(device.clone());
        drop(state);

        self.released.notify_one();
        log::debug!("released device {device}");
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Exclusive use of one device. Returned to the pool by `release`, or on
/// drop if the holder unwinds without releasing.
pub struct DeviceLease {
    pool: Arc<DevicePool>,
    device: DeviceHandle,
    released: bool,
}

impl DeviceLease {
    pub fn device(&self) -> &DeviceHandle {
        &self.device
    }

    pub fn release(mut self) -> Result<(), DeviceLeaseViolation> {
        self.released = true;
        self.pool.release(&self.device)
    }
}

impl Drop for DeviceLease {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        log::warn!("device {} returned on drop", self.device);
        if let Err(e) = self.pool.release(&self.device) {
            log::error!("{e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    fn gpus(n: usize) -> Vec<DeviceHandle> {
        (0..n).map(|i| DeviceHandle::Gpu(i.to_string())).collect()
    }

    #[test]
    fn test_empty_pool_is_rejected() {
        assert_eq!(DevicePool::new(vec![]).err(), Some(DevicePoolError::Empty));
    }

    #[test]
    fn test_duplicate_device_is_rejected() {
        let devices = vec![DeviceHandle::Gpu("0".into()), DeviceHandle::Gpu("0".into())];
        assert!(matches!(
            DevicePool::new(devices),
            Err(DevicePoolError::Duplicate(_))
        ));
    }

    #[test]
    fn test_lease_and_release_restore_count() {
        let pool = Arc::new(DevicePool::new(gpus(2)).unwrap());
        let a = pool.lease();
        let b = pool.lease();
        assert_ne!(a.device(), b.device());
        assert_eq!(pool.available_count(), 0);
        assert_eq!(pool.leased_count(), 2);

        a.release().unwrap();
        assert_eq!(pool.available_count(), 1);
        b.release().unwrap();
        assert_eq!(pool.available_count(), 2);
        assert_eq!(pool.leased_count(), 0);
    }

    #[test]
    fn test_drop_returns_device() {
        let pool = Arc::new(DevicePool::new(vec![DeviceHandle::Cpu]).unwrap());
        {
            let lease = pool.lease();
            assert_eq!(lease.device(), &DeviceHandle::Cpu);
            assert_eq!(pool.available_count(), 0);
        }
        assert_eq!(pool.available_count(), 1);
    }

    #[test]
    fn test_release_of_unleased_device_is_violation() {
        let pool = DevicePool::new(gpus(1)).unwrap();
        let err = pool.release(&DeviceHandle::Gpu("0".into())).unwrap_err();
        assert_eq!(err, DeviceLeaseViolation(DeviceHandle::Gpu("0".into())));
        assert_eq!(pool.available_count(), 1);
    }

    #[test]
    fn test_release_of_unknown_device_is_violation() {
        let pool = DevicePool::new(gpus(1)).unwrap();
        assert!(pool.release(&DeviceHandle::Cpu).is_err());
    }

    #[test]
    fn test_double_release_is_violation() {
        let pool = Arc::new(DevicePool::new(gpus(1)).unwrap());
        let lease = pool.lease();
        let device = lease.device().clone();
        lease.release().unwrap();
        assert!(pool.release(&device).is_err());
        assert_eq!(pool.available_count(), 1);
    }

    #[test]
    fn test_lease_blocks_until_release() {
        let pool = Arc::new(DevicePool::new(gpus(1)).unwrap());
        let held = pool.lease();

        let waiter = {
            let pool = Arc::clone(&pool);
            thread::spawn(move || pool.lease().device().clone())
        };

        thread::sleep(Duration::from_millis(50));
        assert!(!waiter.is_finished());

        held.release().unwrap();
        assert_eq!(waiter.join().unwrap(), DeviceHandle::Gpu("0".into()));
    }

    #[test]
    fn test_concurrent_leases_never_exceed_capacity() {
        let pool = Arc::new(DevicePool::new(gpus(3)).unwrap());
        let in_use = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let workers: Vec<_> = (0..12)
            .map(|_| {
                let pool = Arc::clone(&pool);
                let in_use = Arc::clone(&in_use);
                let peak = Arc::clone(&peak);
                thread::spawn(move || {
                    for _ in 0..5 {
                        let lease = pool.lease();
                        let now = in_use.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        assert!(pool.available_count() <= pool.capacity());
                        thread::sleep(Duration::from_millis(1));
                        in_use.fetch_sub(1, Ordering::SeqCst);
                        lease.release().unwrap();
                    }
                })
            })
            .collect();

        for w in workers {
            w.join().unwrap();
        }
        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert_eq!(pool.available_count(), 3);
        assert_eq!(pool.leased_count(), 0);
    }
}
