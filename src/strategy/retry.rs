//! Retry strategies: whether a failed test gets another attempt.

use std::sync::atomic::{AtomicUsize, Ordering};

use crate::discovery::TestCase;
use crate::executor::TestStatus;

/// Grants or denies a retry for an ordinary failure.
///
/// `attempts` is the number of ordinary attempts completed so far for the
/// test, including the failing one. Uncompleted (device-loss) attempts are
/// not routed through this strategy — they are bounded by the uncompleted
/// retry quota instead.
pub trait RetryStrategy: Send + Sync {
    /// Returns `true` if the test should be requeued after this failure.
    fn should_retry(&self, test: &TestCase, attempts: usize, status: TestStatus) -> bool;
}

/// Never retries.
#[derive(Debug, Default)]
pub struct NoRetry;

impl RetryStrategy for NoRetry {
    fn should_retry(&self, _: &TestCase, _: usize, _: TestStatus) -> bool {
        false
    }
}

/// Retries failures under two quotas: a per-test cap and a shared total
/// budget across the pool.
///
/// The shared budget stops a broadly broken suite from doubling the run
/// time; the per-test cap stops one broken test from eating the budget.
#[derive(Debug)]
pub struct FixedQuotaRetry {
    total_quota: usize,
    retry_per_test_quota: usize,
    used: AtomicUsize,
}

impl FixedQuotaRetry {
    /// Creates a quota retry strategy.
    ///
    /// `total_quota` bounds retries across all tests; `retry_per_test_quota`
    /// bounds retries of any single test.
    pub fn new(total_quota: usize, retry_per_test_quota: usize) -> Self {
        Self {
            total_quota,
            retry_per_test_quota,
            used: AtomicUsize::new(0),
        }
    }
}

impl RetryStrategy for FixedQuotaRetry {
    fn should_retry(&self, _test: &TestCase, attempts: usize, status: TestStatus) -> bool {
        if status != TestStatus::Failure {
            return false;
        }
        // retries used by this test so far = attempts - 1
        if attempts > self.retry_per_test_quota {
            return false;
        }
        self.used
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |used| {
                (used < self.total_quota).then_some(used + 1)
            })
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::ComponentRef;

    fn test_case() -> TestCase {
        TestCase::new("com.example", "RetryTest", "m", ComponentRef::new("app"))
    }

    #[test]
    fn test_no_retry_denies_everything() {
        assert!(!NoRetry.should_retry(&test_case(), 1, TestStatus::Failure));
    }

    #[test]
    fn test_quota_respects_per_test_cap() {
        let strategy = FixedQuotaRetry::new(100, 2);
        let test = test_case();

        assert!(strategy.should_retry(&test, 1, TestStatus::Failure));
        assert!(strategy.should_retry(&test, 2, TestStatus::Failure));
        assert!(!strategy.should_retry(&test, 3, TestStatus::Failure));
    }

    #[test]
    fn test_quota_respects_total_budget() {
        let strategy = FixedQuotaRetry::new(2, 10);
        let test = test_case();

        assert!(strategy.should_retry(&test, 1, TestStatus::Failure));
        assert!(strategy.should_retry(&test, 1, TestStatus::Failure));
        assert!(!strategy.should_retry(&test, 1, TestStatus::Failure));
    }

    #[test]
    fn test_only_failures_are_retried() {
        let strategy = FixedQuotaRetry::new(10, 10);
        assert!(!strategy.should_retry(&test_case(), 1, TestStatus::Passed));
        assert!(!strategy.should_retry(&test_case(), 1, TestStatus::Ignored));
    }
}
