//! Per-pool result reporting with strict-run windowing.
//!
//! The reporter consumes raw attempt outcomes from the execution queue,
//! decides which event carries each test's authoritative verdict, and
//! forwards every event to the analytics [`Tracker`] in receipt order.
//!
//! A test's *window* is the number of runs it is expected to complete —
//! one for an ordinary test, more when the shard was expanded for strict
//! runs or when retries widen it. Verdict rules:
//!
//! - **non-strict**: the first pass is authoritative; a failure only once
//!   it exhausts the window (every run failed);
//! - **strict**: the first failure is authoritative; a pass only once it
//!   completes an all-green window.
//!
//! Events arriving after a verdict is locked are forwarded as
//! informational (`is_final = false`).

use std::collections::HashMap;
use std::sync::Arc;

use regex::Regex;
use tracing::debug;

use crate::analytics::Tracker;
use crate::device::{DeviceInfo, DevicePoolId};
use crate::executor::{TestResult, TestShard, TestVerdict};
use crate::discovery::TestCase;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Passed,
    Failed,
    Ignored,
}

#[derive(Debug, Clone, Copy)]
enum TestState {
    /// No attempt observed yet; `remaining` runs expected.
    Pending { remaining: usize },
    /// Strict test, all green so far, `remaining` runs to go.
    PassingStreak { remaining: usize },
    /// Non-strict test, all red so far, `remaining` runs to go.
    FailingStreak { remaining: usize },
    Passed,
    Failed,
    Ignored,
}

impl TestState {
    fn is_terminal(&self) -> bool {
        matches!(self, TestState::Passed | TestState::Failed | TestState::Ignored)
    }
}

/// Applies strict-run policy to a pool's outcome stream.
///
/// Owned by the pool's execution queue and driven under its lock, which is
/// what guarantees tracker events are emitted in queue order.
pub struct TestResultReporter {
    pool_id: DevicePoolId,
    strict_mode: bool,
    strict_filters: Vec<Regex>,
    tracker: Arc<dyn Tracker>,
    states: HashMap<TestCase, TestState>,
    verdicts: Vec<TestVerdict>,
}

impl TestResultReporter {
    /// Creates a reporter for one pool.
    ///
    /// `strict_filters` are class-name patterns; a test whose class matches
    /// any of them is held to strict-run rules even when `strict_mode` is
    /// off.
    pub fn new(
        pool_id: DevicePoolId,
        strict_mode: bool,
        strict_filters: Vec<Regex>,
        tracker: Arc<dyn Tracker>,
    ) -> Self {
        Self {
            pool_id,
            strict_mode,
            strict_filters,
            tracker,
            states: HashMap::new(),
            verdicts: Vec::new(),
        }
    }

    /// Seeds the expected run count per test from the pool's shard.
    ///
    /// Each occurrence of a test in the shard is one expected run. May be
    /// called more than once; counts accumulate.
    pub fn add_shard(&mut self, shard: &TestShard) {
        for test in &shard.tests {
            match self
                .states
                .entry(test.clone())
                .or_insert(TestState::Pending { remaining: 0 })
            {
                TestState::Pending { remaining } => *remaining += 1,
                state => debug!(test = %test, ?state, "shard entry for already-started test"),
            }
        }
    }

    /// Whether the given test is subject to strict-run rules.
    pub fn is_strict(&self, test: &TestCase) -> bool {
        self.strict_mode || self.strict_filters.iter().any(|f| f.is_match(&test.class))
    }

    /// Records a passed attempt. Returns `true` if this event decided the
    /// test's verdict.
    pub fn test_finished(&mut self, device: &DeviceInfo, result: &TestResult) -> bool {
        self.process(device, result, Outcome::Passed, false)
    }

    /// Records a failed attempt. Returns `true` if this event decided the
    /// test's verdict.
    pub fn test_failed(&mut self, device: &DeviceInfo, result: &TestResult) -> bool {
        self.process(device, result, Outcome::Failed, false)
    }

    /// Records an ignored test; terminal on first observation.
    pub fn test_ignored(&mut self, device: &DeviceInfo, result: &TestResult) -> bool {
        self.process(device, result, Outcome::Ignored, false)
    }

    /// Records a failed attempt that the queue will retry.
    ///
    /// Widens the test's window by one so the retried failure is reported
    /// non-final and the verdict stays with the last attempt.
    pub fn retry_test(&mut self, device: &DeviceInfo, result: &TestResult) {
        self.process(device, result, Outcome::Failed, true);
    }

    /// Final verdicts recorded so far, in the order they were decided.
    pub fn verdicts(&self) -> &[TestVerdict] {
        &self.verdicts
    }

    fn process(
        &mut self,
        device: &DeviceInfo,
        result: &TestResult,
        outcome: Outcome,
        widen: bool,
    ) -> bool {
        let strict = self.is_strict(&result.test);
        let state = self
            .states
            .entry(result.test.clone())
            .or_insert(TestState::Pending { remaining: 1 });

        if widen && !state.is_terminal() {
            match state {
                TestState::Pending { remaining }
                | TestState::PassingStreak { remaining }
                | TestState::FailingStreak { remaining } => *remaining += 1,
                _ => {}
            }
        }

        let (next, is_final) = match (*state, outcome) {
            // Terminal states absorb everything as informational.
            (s, _) if s.is_terminal() => (s, false),

            (_, Outcome::Ignored) => (TestState::Ignored, true),

            (TestState::Pending { remaining }, Outcome::Passed) if strict => {
                if remaining > 1 {
                    (TestState::PassingStreak { remaining: remaining - 1 }, false)
                } else {
                    (TestState::Passed, true)
                }
            }
            (TestState::Pending { .. }, Outcome::Passed) => (TestState::Passed, true),
            (TestState::Pending { remaining }, Outcome::Failed) => {
                if strict {
                    (TestState::Failed, true)
                } else if remaining > 1 {
                    (TestState::FailingStreak { remaining: remaining - 1 }, false)
                } else {
                    (TestState::Failed, true)
                }
            }

            (TestState::PassingStreak { remaining }, Outcome::Passed) => {
                if remaining > 1 {
                    (TestState::PassingStreak { remaining: remaining - 1 }, false)
                } else {
                    (TestState::Passed, true)
                }
            }
            (TestState::PassingStreak { .. }, Outcome::Failed) => (TestState::Failed, true),

            (TestState::FailingStreak { .. }, Outcome::Passed) => (TestState::Passed, true),
            (TestState::FailingStreak { remaining }, Outcome::Failed) => {
                if remaining > 1 {
                    (TestState::FailingStreak { remaining: remaining - 1 }, false)
                } else {
                    (TestState::Failed, true)
                }
            }

            // Unreachable: terminal states matched above.
            (s, _) => (s, false),
        };

        if is_final {
            self.verdicts.push(TestVerdict {
                test: result.test.clone(),
                is_passed: outcome != Outcome::Failed,
            });
        }

        *state = next;
        self.tracker.test(&self.pool_id, device, result, is_final);
        is_final
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytics::MemoryTracker;
    use crate::discovery::ComponentRef;
    use crate::executor::TestStatus;
    use chrono::Utc;
    use uuid::Uuid;

    fn device() -> DeviceInfo {
        DeviceInfo {
            serial: "sim-1".into(),
            model: "sim".into(),
            os_version: "1".into(),
            api_level: 1,
            features: Vec::new(),
        }
    }

    fn test_case() -> TestCase {
        TestCase::new("com.example", "WindowTest", "m", ComponentRef::new("app"))
    }

    fn result(test: &TestCase, status: TestStatus) -> TestResult {
        TestResult {
            test: test.clone(),
            device: device(),
            status,
            start_time: Utc::now(),
            end_time: Utc::now(),
            batch_id: Uuid::new_v4(),
            is_strict_run: false,
            from_cache: false,
            trace: None,
        }
    }

    fn reporter(
        strict_mode: bool,
        filters: Vec<Regex>,
        tracker: Arc<MemoryTracker>,
    ) -> TestResultReporter {
        let test = test_case();
        let mut reporter = TestResultReporter::new(
            DevicePoolId::new("test"),
            strict_mode,
            filters,
            tracker,
        );
        reporter.add_shard(&TestShard::new(vec![test.clone(), test.clone(), test]));
        reporter
    }

    fn finals(tracker: &MemoryTracker) -> Vec<bool> {
        tracker.events().iter().map(|e| e.is_final).collect()
    }

    #[test]
    fn test_default_pass_fail_fail() {
        let tracker = Arc::new(MemoryTracker::new());
        let mut reporter = reporter(false, Vec::new(), tracker.clone());
        let test = test_case();

        reporter.test_finished(&device(), &result(&test, TestStatus::Passed));
        reporter.test_failed(&device(), &result(&test, TestStatus::Failure));
        reporter.test_failed(&device(), &result(&test, TestStatus::Failure));

        assert_eq!(finals(&tracker), vec![true, false, false]);
        assert!(reporter.verdicts()[0].is_passed);
    }

    #[test]
    fn test_default_fail_fail_pass() {
        let tracker = Arc::new(MemoryTracker::new());
        let mut reporter = reporter(false, Vec::new(), tracker.clone());
        let test = test_case();

        reporter.test_failed(&device(), &result(&test, TestStatus::Failure));
        reporter.test_failed(&device(), &result(&test, TestStatus::Failure));
        reporter.test_finished(&device(), &result(&test, TestStatus::Passed));

        assert_eq!(finals(&tracker), vec![false, false, true]);
        assert!(reporter.verdicts()[0].is_passed);
    }

    #[test]
    fn test_default_all_failures_exhaust_window() {
        let tracker = Arc::new(MemoryTracker::new());
        let mut reporter = reporter(false, Vec::new(), tracker.clone());
        let test = test_case();

        for _ in 0..3 {
            reporter.test_failed(&device(), &result(&test, TestStatus::Failure));
        }

        assert_eq!(finals(&tracker), vec![false, false, true]);
        assert!(!reporter.verdicts()[0].is_passed);
    }

    #[test]
    fn test_strict_pass_fail_fail() {
        let tracker = Arc::new(MemoryTracker::new());
        let mut reporter = reporter(true, Vec::new(), tracker.clone());
        let test = test_case();

        reporter.test_finished(&device(), &result(&test, TestStatus::Passed));
        reporter.test_failed(&device(), &result(&test, TestStatus::Failure));
        reporter.test_failed(&device(), &result(&test, TestStatus::Failure));

        assert_eq!(finals(&tracker), vec![false, true, false]);
        assert!(!reporter.verdicts()[0].is_passed);
    }

    #[test]
    fn test_strict_fail_pass_pass() {
        let tracker = Arc::new(MemoryTracker::new());
        let mut reporter = reporter(true, Vec::new(), tracker.clone());
        let test = test_case();

        reporter.test_failed(&device(), &result(&test, TestStatus::Failure));
        reporter.test_finished(&device(), &result(&test, TestStatus::Passed));
        reporter.test_finished(&device(), &result(&test, TestStatus::Passed));

        assert_eq!(finals(&tracker), vec![true, false, false]);
        assert!(!reporter.verdicts()[0].is_passed);
    }

    #[test]
    fn test_strict_all_green_window_passes() {
        let tracker = Arc::new(MemoryTracker::new());
        let mut reporter = reporter(true, Vec::new(), tracker.clone());
        let test = test_case();

        for _ in 0..3 {
            reporter.test_finished(&device(), &result(&test, TestStatus::Passed));
        }

        assert_eq!(finals(&tracker), vec![false, false, true]);
        assert!(reporter.verdicts()[0].is_passed);
    }

    #[test]
    fn test_matching_filter_applies_strict_rules() {
        let tracker = Arc::new(MemoryTracker::new());
        let filters = vec![Regex::new("^WindowTest$").unwrap()];
        let mut reporter = reporter(false, filters, tracker.clone());
        let test = test_case();

        reporter.test_finished(&device(), &result(&test, TestStatus::Passed));
        reporter.test_failed(&device(), &result(&test, TestStatus::Failure));
        reporter.test_failed(&device(), &result(&test, TestStatus::Failure));

        assert_eq!(finals(&tracker), vec![false, true, false]);
    }

    #[test]
    fn test_non_matching_filter_keeps_default_rules() {
        let tracker = Arc::new(MemoryTracker::new());
        let filters = vec![Regex::new("$^").unwrap()];
        let mut reporter = reporter(false, filters, tracker.clone());
        let test = test_case();

        reporter.test_failed(&device(), &result(&test, TestStatus::Failure));
        reporter.test_finished(&device(), &result(&test, TestStatus::Passed));
        reporter.test_finished(&device(), &result(&test, TestStatus::Passed));

        assert_eq!(finals(&tracker), vec![false, true, false]);
    }

    #[test]
    fn test_retry_widens_the_window() {
        let tracker = Arc::new(MemoryTracker::new());
        let mut reporter = TestResultReporter::new(
            DevicePoolId::new("test"),
            false,
            Vec::new(),
            tracker.clone(),
        );
        let test = test_case();
        reporter.add_shard(&TestShard::new(vec![test.clone()]));

        // first attempt fails and is retried; second attempt decides
        reporter.retry_test(&device(), &result(&test, TestStatus::Failure));
        reporter.test_failed(&device(), &result(&test, TestStatus::Failure));

        assert_eq!(finals(&tracker), vec![false, true]);
        assert!(!reporter.verdicts()[0].is_passed);
    }

    #[test]
    fn test_ignored_is_terminal_and_successful() {
        let tracker = Arc::new(MemoryTracker::new());
        let mut reporter = TestResultReporter::new(
            DevicePoolId::new("test"),
            false,
            Vec::new(),
            tracker.clone(),
        );
        let test = test_case();
        reporter.add_shard(&TestShard::new(vec![test.clone()]));

        reporter.test_ignored(&device(), &result(&test, TestStatus::Ignored));

        assert_eq!(finals(&tracker), vec![true]);
        assert!(reporter.verdicts()[0].is_passed);
    }
}
