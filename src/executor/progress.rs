//! Process-wide execution progress counters.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use serde::Serialize;

use crate::device::DevicePoolId;

/// Counters for one pool.
///
/// Purely additive; fields are independent so plain relaxed atomics are
/// enough.
#[derive(Debug, Default)]
pub struct PoolCounters {
    started: AtomicUsize,
    passed: AtomicUsize,
    failed: AtomicUsize,
    ignored: AtomicUsize,
}

/// Read-only view of one pool's counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolProgress {
    /// Attempts dispatched to devices.
    pub started: usize,
    /// Tests with a terminal passed outcome.
    pub passed: usize,
    /// Tests with a terminal failed outcome.
    pub failed: usize,
    /// Tests with a terminal ignored outcome.
    pub ignored: usize,
}

impl PoolCounters {
    fn snapshot(&self) -> PoolProgress {
        PoolProgress {
            started: self.started.load(Ordering::Relaxed),
            passed: self.passed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            ignored: self.ignored.load(Ordering::Relaxed),
        }
    }
}

/// Process-wide started/passed/failed/ignored counters, keyed by pool.
///
/// Shared by every queue in the run; read by the CLI progress display while
/// pools are executing and once more after they terminate.
#[derive(Debug, Default)]
pub struct ProgressReporter {
    pools: Mutex<HashMap<DevicePoolId, Arc<PoolCounters>>>,
}

impl ProgressReporter {
    /// Creates an empty reporter.
    pub fn new() -> Self {
        Self::default()
    }

    fn counters(&self, pool_id: &DevicePoolId) -> Arc<PoolCounters> {
        let mut pools = self.pools.lock().expect("progress lock poisoned");
        pools.entry(pool_id.clone()).or_default().clone()
    }

    /// Records an attempt handed to a device.
    pub fn test_started(&self, pool_id: &DevicePoolId) {
        self.counters(pool_id).started.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a terminal passed outcome.
    pub fn test_passed(&self, pool_id: &DevicePoolId) {
        self.counters(pool_id).passed.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a terminal failed outcome.
    pub fn test_failed(&self, pool_id: &DevicePoolId) {
        self.counters(pool_id).failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a terminal ignored outcome.
    pub fn test_ignored(&self, pool_id: &DevicePoolId) {
        self.counters(pool_id).ignored.fetch_add(1, Ordering::Relaxed);
    }

    /// Snapshot of every pool's counters.
    pub fn snapshot(&self) -> Vec<(DevicePoolId, PoolProgress)> {
        let pools = self.pools.lock().expect("progress lock poisoned");
        let mut entries: Vec<_> = pools
            .iter()
            .map(|(id, counters)| (id.clone(), counters.snapshot()))
            .collect();
        entries.sort_by(|(a, _), (b, _)| a.cmp(b));
        entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate_per_pool() {
        let progress = ProgressReporter::new();
        let omni = DevicePoolId::new("omni");
        let other = DevicePoolId::new("other");

        progress.test_started(&omni);
        progress.test_started(&omni);
        progress.test_passed(&omni);
        progress.test_failed(&other);

        let snapshot: HashMap<_, _> = progress.snapshot().into_iter().collect();
        assert_eq!(snapshot[&omni].started, 2);
        assert_eq!(snapshot[&omni].passed, 1);
        assert_eq!(snapshot[&omni].failed, 0);
        assert_eq!(snapshot[&other].failed, 1);
    }

    #[test]
    fn test_concurrent_increments_are_not_lost() {
        let progress = Arc::new(ProgressReporter::new());
        let pool = DevicePoolId::new("omni");

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let progress = progress.clone();
                let pool = pool.clone();
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        progress.test_started(&pool);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(progress.snapshot()[0].1.started, 800);
    }
}
