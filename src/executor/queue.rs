//! The per-pool test execution queue.
//!
//! The queue owns the pool's shard and its attempt bookkeeping. It is the
//! single structure in the engine mutated by several workers, so all three
//! mutating operations — [`next_batch`](TestExecutionQueue::next_batch),
//! [`handle_results`](TestExecutionQueue::handle_results),
//! [`handle_uncompleted`](TestExecutionQueue::handle_uncompleted) — run
//! under one mutex, and nothing else does.
//!
//! # Policy composition
//!
//! Results flow through two independent stages before becoming terminal:
//!
//! 1. **Flakiness**: a result judged still-unstable is swallowed — the test
//!    is requeued and the result reporter never hears about the attempt.
//! 2. **Retry** (failures only): a granted retry requeues the test and
//!    reports the failure as non-final via the reporter's widened window.
//!
//! Uncompleted attempts (device loss, batch timeout) bypass both stages:
//! they are requeued until the uncompleted retry quota is reached, at which
//! point the test is forced terminal `Failure` no matter what the retry
//! strategy says. This keeps a serially-crashing device from retrying
//! forever without starving legitimately flaky tests of their retries.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use chrono::Utc;
use regex::Regex;
use tokio::sync::futures::Notified;
use tokio::sync::{Mutex, Notify};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::analytics::Tracker;
use crate::device::{DeviceInfo, DevicePoolId};
use crate::discovery::TestCase;
use crate::executor::progress::ProgressReporter;
use crate::executor::reporter::TestResultReporter;
use crate::executor::{TestBatch, TestBatchResults, TestResult, TestShard, TestStatus, TestVerdict};
use crate::strategy::Strategies;

/// Everything a pool needs from its queue after termination.
#[derive(Debug, Clone)]
pub struct QueueReport {
    /// One final verdict per test, in decision order.
    pub verdicts: Vec<TestVerdict>,
    /// Every terminal attempt, in acceptance order.
    pub terminal: Vec<TestResult>,
    /// Every uncompleted attempt observed, terminal or not.
    pub uncompleted: Vec<TestResult>,
}

struct QueueState {
    remaining: VecDeque<TestCase>,
    checked_out: HashMap<Uuid, TestBatch>,
    attempts: HashMap<TestCase, usize>,
    uncompleted_attempts: HashMap<TestCase, usize>,
    terminal: Vec<TestResult>,
    uncompleted_log: Vec<TestResult>,
    reporter: TestResultReporter,
}

/// Work queue for one device pool.
pub struct TestExecutionQueue {
    pool_id: DevicePoolId,
    state: Mutex<QueueState>,
    notify: Notify,
    strategies: Strategies,
    uncompleted_quota: Option<usize>,
    progress: Arc<ProgressReporter>,
}

impl TestExecutionQueue {
    /// Creates the queue for a pool, taking ownership of its shard.
    ///
    /// Tests held to strict-run rules are expanded to `strict_runs` entries
    /// so the reporter windows over real attempts.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        pool_id: DevicePoolId,
        shard: TestShard,
        strategies: Strategies,
        strict_mode: bool,
        strict_filters: Vec<Regex>,
        strict_runs: usize,
        uncompleted_quota: Option<usize>,
        tracker: Arc<dyn Tracker>,
        progress: Arc<ProgressReporter>,
    ) -> Self {
        let mut reporter =
            TestResultReporter::new(pool_id.clone(), strict_mode, strict_filters, tracker);

        let mut expanded = Vec::with_capacity(shard.len());
        for test in shard.tests {
            let runs = if strict_runs > 1 && reporter.is_strict(&test) {
                strict_runs
            } else {
                1
            };
            for _ in 0..runs {
                expanded.push(test.clone());
            }
        }
        let expanded = TestShard::new(expanded);
        reporter.add_shard(&expanded);

        Self {
            pool_id,
            state: Mutex::new(QueueState {
                remaining: expanded.tests.into(),
                checked_out: HashMap::new(),
                attempts: HashMap::new(),
                uncompleted_attempts: HashMap::new(),
                terminal: Vec::new(),
                uncompleted_log: Vec::new(),
                reporter,
            }),
            notify: Notify::new(),
            strategies,
            uncompleted_quota,
            progress,
        }
    }

    /// Hands out the next batch, or `None` when no tests remain queued.
    ///
    /// Every returned batch is disjoint from all previously issued,
    /// not-yet-resolved batches; safe under concurrent calls.
    pub async fn next_batch(&self) -> Option<TestBatch> {
        let mut st = self.state.lock().await;
        if st.remaining.is_empty() {
            return None;
        }

        let drained: Vec<TestCase> = st.remaining.drain(..).collect();
        st.remaining = self.strategies.sorting.sort(drained).into();

        let batch = self.strategies.batching.next_batch(&mut st.remaining)?;
        for _ in &batch.tests {
            self.progress.test_started(&self.pool_id);
        }
        st.checked_out.insert(batch.id, batch.clone());
        debug!(pool = %self.pool_id, batch = %batch.id, tests = batch.tests.len(), "batch checked out");
        Some(batch)
    }

    /// Accepts the results of an executed batch.
    ///
    /// Unknown or already-resolved batch ids are ignored, which makes
    /// result delivery idempotent. Finished and failed attempts route
    /// through the flakiness/retry stages; the batch's uncompleted list is
    /// handled as if passed to [`handle_uncompleted`](Self::handle_uncompleted).
    pub async fn handle_results(&self, results: TestBatchResults) {
        let mut st = self.state.lock().await;
        if st.checked_out.remove(&results.batch_id).is_none() {
            debug!(pool = %self.pool_id, batch = %results.batch_id, "dropping results for unresolved batch id");
            return;
        }

        for result in results.finished {
            self.accept(&mut st, result);
        }
        for result in results.failed {
            self.accept(&mut st, result);
        }
        self.process_uncompleted(&mut st, results.uncompleted);
        drop(st);
        self.notify.notify_waiters();
    }

    /// Accepts uncompleted attempts that never made it into batch results,
    /// e.g. when a batch could not start at all on a lost device.
    pub async fn handle_uncompleted(&self, batch_id: Uuid, uncompleted: Vec<TestResult>) {
        let mut st = self.state.lock().await;
        st.checked_out.remove(&batch_id);
        self.process_uncompleted(&mut st, uncompleted);
        drop(st);
        self.notify.notify_waiters();
    }

    /// `true` once the shard is empty and no batch is checked out.
    pub async fn is_exhausted(&self) -> bool {
        let st = self.state.lock().await;
        st.remaining.is_empty() && st.checked_out.is_empty()
    }

    /// Resolves when the queue's state may have changed.
    ///
    /// Workers that found the queue momentarily empty park on this instead
    /// of exiting: requeued work or exhaustion both wake them. Pin and
    /// `enable` the future *before* re-checking state, or a wakeup landing
    /// in between is lost.
    pub fn changed(&self) -> Notified<'_> {
        self.notify.notified()
    }

    /// Forces every unresolved test terminal with the given failure reason.
    ///
    /// Used when a pool can no longer make progress (all devices lost, or
    /// an external stop). Returns the number of tests failed this way.
    pub async fn terminate_residual(&self, reason: &str, device: Option<DeviceInfo>) -> usize {
        let mut st = self.state.lock().await;
        let mut leftovers: Vec<TestCase> = st.remaining.drain(..).collect();
        let checked_out: Vec<TestBatch> = st.checked_out.drain().map(|(_, b)| b).collect();
        for batch in checked_out {
            leftovers.extend(batch.tests);
        }

        let device = device.unwrap_or_else(unassigned_device);
        let now = Utc::now();
        let count = leftovers.len();
        for test in leftovers {
            let is_strict_run = st.reporter.is_strict(&test);
            let result = TestResult {
                test,
                device: device.clone(),
                status: TestStatus::Failure,
                start_time: now,
                end_time: now,
                batch_id: Uuid::new_v4(),
                is_strict_run,
                from_cache: false,
                trace: Some(reason.to_string()),
            };
            if st.reporter.test_failed(&device, &result) {
                self.progress.test_failed(&self.pool_id);
            }
            st.terminal.push(result);
        }
        drop(st);
        self.notify.notify_waiters();
        count
    }

    /// Consumes the queue's accounting for summary construction.
    pub async fn report(&self) -> QueueReport {
        let st = self.state.lock().await;
        QueueReport {
            verdicts: st.reporter.verdicts().to_vec(),
            terminal: st.terminal.clone(),
            uncompleted: st.uncompleted_log.clone(),
        }
    }

    fn accept(&self, st: &mut QueueState, mut result: TestResult) {
        let attempts = {
            let count = st.attempts.entry(result.test.clone()).or_insert(0);
            *count += 1;
            *count
        };
        result.is_strict_run = st.reporter.is_strict(&result.test);

        if self
            .strategies
            .flakiness
            .is_unstable(&result.test, &result, attempts)
        {
            debug!(pool = %self.pool_id, test = %result.test, attempts, "result still unstable, requeueing");
            st.remaining.push_back(result.test.clone());
            return;
        }

        let device = result.device.clone();
        match result.status {
            TestStatus::Passed => {
                if st.reporter.test_finished(&device, &result) {
                    self.progress.test_passed(&self.pool_id);
                }
                st.terminal.push(result);
            }
            TestStatus::Ignored => {
                if st.reporter.test_ignored(&device, &result) {
                    self.progress.test_ignored(&self.pool_id);
                }
                st.terminal.push(result);
            }
            TestStatus::Failure => {
                if self
                    .strategies
                    .retry
                    .should_retry(&result.test, attempts, result.status)
                {
                    debug!(pool = %self.pool_id, test = %result.test, attempts, "retrying failed test");
                    st.reporter.retry_test(&device, &result);
                    st.remaining.push_back(result.test.clone());
                } else {
                    if st.reporter.test_failed(&device, &result) {
                        self.progress.test_failed(&self.pool_id);
                    }
                    st.terminal.push(result);
                }
            }
            TestStatus::Incomplete => {
                // Incomplete attempts belong in the uncompleted list; a
                // vendor that reports them inline gets the same treatment.
                self.process_uncompleted(st, vec![result]);
            }
        }
    }

    fn process_uncompleted(&self, st: &mut QueueState, uncompleted: Vec<TestResult>) {
        for mut result in uncompleted {
            let count = {
                let count = st
                    .uncompleted_attempts
                    .entry(result.test.clone())
                    .or_insert(0);
                *count += 1;
                *count
            };
            st.uncompleted_log.push(result.clone());

            let quota = self.uncompleted_quota.unwrap_or(usize::MAX);
            if count >= quota {
                warn!(
                    pool = %self.pool_id,
                    test = %result.test,
                    count,
                    quota,
                    "uncompleted retry quota reached, failing test"
                );
                result.status = TestStatus::Failure;
                result.is_strict_run = st.reporter.is_strict(&result.test);
                let device = result.device.clone();
                if st.reporter.test_failed(&device, &result) {
                    self.progress.test_failed(&self.pool_id);
                }
                st.terminal.push(result);
            } else {
                st.remaining.push_back(result.test.clone());
            }
        }
    }
}

fn unassigned_device() -> DeviceInfo {
    DeviceInfo {
        serial: "unassigned".to_string(),
        model: "none".to_string(),
        os_version: "none".to_string(),
        api_level: 0,
        features: Vec::new(),
    }
}
