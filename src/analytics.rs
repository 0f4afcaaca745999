//! Analytics sinks for terminal test outcomes.
//!
//! The result reporter forwards every outcome event it receives to a
//! [`Tracker`], tagged with whether that event carries the test's
//! authoritative verdict. What happens downstream — a metrics backend, a
//! database, nothing at all — is the sink's business.

use std::sync::Mutex;

use tracing::debug;

use crate::device::{DeviceInfo, DevicePoolId};
use crate::executor::TestResult;

/// Sink for per-attempt test outcomes.
///
/// Called once per event the result reporter receives, in receipt order.
/// `is_final` marks the event that decides the test's verdict for the run;
/// every other event for the same test is informational.
pub trait Tracker: Send + Sync {
    /// Records one test attempt.
    fn test(&self, pool_id: &DevicePoolId, device: &DeviceInfo, result: &TestResult, is_final: bool);
}

/// Tracker that discards everything.
#[derive(Debug, Default)]
pub struct NoopTracker;

impl Tracker for NoopTracker {
    fn test(&self, _: &DevicePoolId, _: &DeviceInfo, _: &TestResult, _: bool) {}
}

/// One event recorded by [`MemoryTracker`].
#[derive(Debug, Clone)]
pub struct TrackedTest {
    /// Pool the event came from.
    pub pool_id: DevicePoolId,
    /// Device that executed the attempt.
    pub device: DeviceInfo,
    /// The attempt's result.
    pub result: TestResult,
    /// Whether this event carried the authoritative verdict.
    pub is_final: bool,
}

/// Tracker that keeps every event in memory.
///
/// Used by the test suite to assert on emission order, and handy for
/// embedders that post-process a run programmatically.
#[derive(Debug, Default)]
pub struct MemoryTracker {
    events: Mutex<Vec<TrackedTest>>,
}

impl MemoryTracker {
    /// Creates an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of all recorded events, in receipt order.
    pub fn events(&self) -> Vec<TrackedTest> {
        self.events.lock().expect("tracker lock poisoned").clone()
    }
}

impl Tracker for MemoryTracker {
    fn test(&self, pool_id: &DevicePoolId, device: &DeviceInfo, result: &TestResult, is_final: bool) {
        self.events
            .lock()
            .expect("tracker lock poisoned")
            .push(TrackedTest {
                pool_id: pool_id.clone(),
                device: device.clone(),
                result: result.clone(),
                is_final,
            });
    }
}

/// Tracker that logs each event through `tracing`.
#[derive(Debug, Default)]
pub struct LogTracker;

impl Tracker for LogTracker {
    fn test(&self, pool_id: &DevicePoolId, device: &DeviceInfo, result: &TestResult, is_final: bool) {
        debug!(
            pool = %pool_id,
            device = %device.serial,
            test = %result.test,
            status = ?result.status,
            is_final,
            "test outcome"
        );
    }
}
