//! The scheduling and execution engine.
//!
//! This module contains the core that distributes tests across device
//! pools, drives per-device workers, compensates for device loss and test
//! flakiness, and produces a complete accounting of every test's final
//! outcome.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                             Scheduler                                 │
//! │  (routes devices to pools, waits for every pool to terminate)        │
//! │                                                                       │
//! │   DeviceEvent stream ──► Pooling strategy ──► pool id                │
//! │                                                                       │
//! │  ┌─────────────────────────────────────────────────────────────┐     │
//! │  │                  DevicePoolCoordinator (per pool)           │     │
//! │  │                                                             │     │
//! │  │   ┌────────────────────┐      ┌──────────────────────┐     │     │
//! │  │   │ TestExecutionQueue │◄────►│ DeviceWorker (per    │     │     │
//! │  │   │  sorting/batching/ │      │ device, sequential)  │     │     │
//! │  │   │  retry/flakiness   │      └──────────┬───────────┘     │     │
//! │  │   └─────────┬──────────┘                 │ execute(batch)  │     │
//! │  │             │                            ▼                 │     │
//! │  │   ┌─────────▼──────────┐      ┌──────────────────────┐     │     │
//! │  │   │ TestResultReporter │      │   Device (vendor)    │     │     │
//! │  │   │  strict-run window │      └──────────────────────┘     │     │
//! │  │   └─────────┬──────────┘                                   │     │
//! │  └─────────────┼───────────────────────────────────────────── ┘     │
//! │                ▼                                                     │
//! │        Tracker (analytics)        ProgressReporter (counters)        │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Execution Flow
//!
//! 1. **Sharding**: each new pool receives its shard of the discovered tests
//! 2. **Dispatch**: workers pull disjoint batches from their pool's queue
//! 3. **Execution**: batches run on devices under batch + inactivity timeouts
//! 4. **Accounting**: outcomes route through retry/flakiness policy; terminal
//!    ones reach the result reporter and analytics exactly once
//! 5. **Termination**: a pool ends when its queue is exhausted, or with a
//!    residual-failure summary when every device is gone
//!
//! # Key Components
//!
//! - [`scheduler::Scheduler`]: top-level orchestrator
//! - [`pool::DevicePoolCoordinator`]: owns one queue + the pool's workers
//! - [`queue::TestExecutionQueue`]: the per-pool work queue
//! - [`worker`]: the per-device execution loop
//! - [`reporter::TestResultReporter`]: strict-run verdict windowing
//! - [`progress::ProgressReporter`]: process-wide counters

pub mod pool;
pub mod progress;
pub mod queue;
pub mod reporter;
pub mod scheduler;
pub mod worker;

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::device::{DeviceInfo, DevicePoolId};
use crate::discovery::{ComponentRef, TestCase};

pub use progress::ProgressReporter;
pub use queue::TestExecutionQueue;
pub use reporter::TestResultReporter;
pub use scheduler::Scheduler;

/// Terminal status of one test attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestStatus {
    /// The test ran and its assertions held.
    Passed,
    /// The test ran and failed.
    Failure,
    /// The test was recognized but deliberately not executed.
    Ignored,
    /// The test neither started nor finished within its batch.
    Incomplete,
}

impl TestStatus {
    /// Returns `true` for outcomes that do not fail a run.
    pub fn is_success(&self) -> bool {
        matches!(self, TestStatus::Passed | TestStatus::Ignored)
    }
}

/// Outcome of one test on one device — one instance per `(test, attempt)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestResult {
    /// The test that was executed.
    pub test: TestCase,

    /// The device the attempt ran on.
    pub device: DeviceInfo,

    /// Status of this attempt.
    pub status: TestStatus,

    /// When the attempt started.
    pub start_time: DateTime<Utc>,

    /// When the attempt ended.
    pub end_time: DateTime<Utc>,

    /// The batch this attempt belonged to.
    pub batch_id: Uuid,

    /// Whether the test was subject to strict-run windowing.
    pub is_strict_run: bool,

    /// Whether the outcome was served from a result cache.
    ///
    /// Always `false` here; carried so downstream consumers share one
    /// result schema with cache-capable producers.
    pub from_cache: bool,

    /// Failure trace, if one was captured.
    pub trace: Option<String>,
}

impl TestResult {
    /// Wall-clock duration of the attempt.
    pub fn duration(&self) -> Duration {
        (self.end_time - self.start_time).to_std().unwrap_or(Duration::ZERO)
    }
}

/// The ordered tests assigned to one pool.
///
/// A shard may hold the same test several times: each entry is one expected
/// run. The pool's queue owns the shard and removes entries only as they
/// reach a terminal outcome.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TestShard {
    /// Expected runs, in assignment order.
    pub tests: Vec<TestCase>,
}

impl TestShard {
    /// Creates a shard from a list of tests.
    pub fn new(tests: Vec<TestCase>) -> Self {
        Self { tests }
    }

    /// Number of expected runs in the shard.
    pub fn len(&self) -> usize {
        self.tests.len()
    }

    /// Returns `true` if the shard holds no tests.
    pub fn is_empty(&self) -> bool {
        self.tests.is_empty()
    }
}

/// A group of tests dispatched to one device for one execution pass.
///
/// Immutable once created; owned by exactly one worker until it resolves.
#[derive(Debug, Clone)]
pub struct TestBatch {
    /// Unique id of this batch.
    pub id: Uuid,

    /// Tests in execution order.
    pub tests: Vec<TestCase>,

    /// The component every test in this batch exercises.
    pub component: ComponentRef,
}

impl TestBatch {
    /// Creates a batch with a fresh id.
    pub fn new(tests: Vec<TestCase>, component: ComponentRef) -> Self {
        Self {
            id: Uuid::new_v4(),
            tests,
            component,
        }
    }
}

/// Everything one executed batch produced.
///
/// `uncompleted` is synthesized by the worker for tests that never reported
/// start/finish — marked [`TestStatus::Failure`] with the end time of the
/// last completed test, or the collection time if none completed.
#[derive(Debug, Clone)]
pub struct TestBatchResults {
    /// Id of the batch these results belong to.
    pub batch_id: Uuid,

    /// Device the batch ran on.
    pub device: DeviceInfo,

    /// Component the batch exercised.
    pub component: ComponentRef,

    /// Attempts that finished successfully (passed or ignored).
    pub finished: Vec<TestResult>,

    /// Attempts that ran and failed.
    pub failed: Vec<TestResult>,

    /// Attempts that never completed.
    pub uncompleted: Vec<TestResult>,
}

/// Final verdict for one test within a pool.
#[derive(Debug, Clone, Serialize)]
pub struct TestVerdict {
    /// The test.
    pub test: TestCase,
    /// Whether the run counts the test as successful.
    pub is_passed: bool,
}

/// Per-device breakdown of a pool's terminal outcomes.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceSummary {
    /// The device.
    pub device: DeviceInfo,
    /// Terminal passed attempts on this device.
    pub passed: Vec<TestResult>,
    /// Terminal failed attempts on this device.
    pub failed: Vec<TestResult>,
    /// Terminal ignored attempts on this device.
    pub ignored: Vec<TestResult>,
    /// Uncompleted attempts observed on this device, with timestamps.
    pub uncompleted: Vec<TestResult>,
}

/// Result of one pool's execution.
#[derive(Debug, Clone, Serialize)]
pub struct PoolSummary {
    /// The pool.
    pub pool_id: DevicePoolId,

    /// Why the pool failed, if it did not complete cleanly.
    ///
    /// `None` means the pool drained its shard and terminated normally.
    pub error: Option<String>,

    /// One final verdict per test assigned to this pool.
    pub verdicts: Vec<TestVerdict>,

    /// Terminal outcomes grouped by executing device.
    pub devices: Vec<DeviceSummary>,
}

impl PoolSummary {
    /// Number of tests this pool counts as passed.
    pub fn passed_count(&self) -> usize {
        self.verdicts.iter().filter(|v| v.is_passed).count()
    }

    /// Number of tests this pool counts as failed.
    pub fn failed_count(&self) -> usize {
        self.verdicts.iter().filter(|v| !v.is_passed).count()
    }
}

/// Aggregated results of an entire run.
///
/// One entry per pool, in the order pools were observed. This is the return
/// value of [`Scheduler::execute`] and the input to summary rendering.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    /// Per-pool results.
    pub pools: Vec<PoolSummary>,

    /// Wall-clock duration of the run.
    pub duration: Duration,
}

impl RunSummary {
    /// Total tests counted as passed across all pools.
    pub fn passed(&self) -> usize {
        self.pools.iter().map(|p| p.passed_count()).sum()
    }

    /// Total tests counted as failed across all pools.
    pub fn failed(&self) -> usize {
        self.pools.iter().map(|p| p.failed_count()).sum()
    }

    /// Returns `true` if every pool completed and no test failed.
    pub fn is_successful(&self) -> bool {
        self.pools.iter().all(|p| p.error.is_none()) && self.failed() == 0
    }

    /// Process exit code for this run.
    ///
    /// Test failures are forgiven when `ignore_failures` is set; pool-level
    /// errors (a pool that could not finish its shard) never are.
    pub fn exit_code(&self, ignore_failures: bool) -> i32 {
        if self.pools.iter().any(|p| p.error.is_some()) {
            1
        } else if self.failed() > 0 && !ignore_failures {
            1
        } else {
            0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::ComponentRef;

    fn verdict(name: &str, is_passed: bool) -> TestVerdict {
        TestVerdict {
            test: TestCase::new("com.example", "SummaryTest", name, ComponentRef::new("app")),
            is_passed,
        }
    }

    fn pool(error: Option<&str>, verdicts: Vec<TestVerdict>) -> PoolSummary {
        PoolSummary {
            pool_id: DevicePoolId::new("omni"),
            error: error.map(String::from),
            verdicts,
            devices: Vec::new(),
        }
    }

    #[test]
    fn test_clean_run_is_successful() {
        let summary = RunSummary {
            pools: vec![pool(None, vec![verdict("a", true), verdict("b", true)])],
            duration: Duration::from_secs(1),
        };
        assert!(summary.is_successful());
        assert_eq!(summary.exit_code(false), 0);
    }

    #[test]
    fn test_failures_respect_ignore_flag() {
        let summary = RunSummary {
            pools: vec![pool(None, vec![verdict("a", true), verdict("b", false)])],
            duration: Duration::from_secs(1),
        };
        assert!(!summary.is_successful());
        assert_eq!(summary.exit_code(false), 1);
        assert_eq!(summary.exit_code(true), 0);
    }

    #[test]
    fn test_pool_error_is_never_ignored() {
        let summary = RunSummary {
            pools: vec![pool(Some("no devices available"), vec![])],
            duration: Duration::from_secs(1),
        };
        assert_eq!(summary.exit_code(true), 1);
    }
}
