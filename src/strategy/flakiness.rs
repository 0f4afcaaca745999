//! Flakiness strategies: results that need another attempt anyway.

use crate::discovery::TestCase;
use crate::executor::TestResult;

/// Decides whether an otherwise-terminal result is still unstable.
///
/// Consulted by the queue before a result is accepted as terminal. An
/// unstable result is swallowed and the test requeued for another attempt;
/// the result reporter never sees the swallowed attempt. `attempts` is the
/// number of ordinary attempts completed so far, including the one being
/// judged — implementations must return `false` once enough attempts have
/// accumulated, or the test would never terminate.
pub trait FlakinessStrategy: Send + Sync {
    /// Returns `true` if `result` should not be trusted as terminal.
    fn is_unstable(&self, test: &TestCase, result: &TestResult, attempts: usize) -> bool;
}

/// Trusts every result; no flakiness compensation.
#[derive(Debug, Default)]
pub struct IgnoreFlakiness;

impl FlakinessStrategy for IgnoreFlakiness {
    fn is_unstable(&self, _: &TestCase, _: &TestResult, _: usize) -> bool {
        false
    }
}

/// Distrusts the first results of tests carrying a metadata tag.
///
/// A test tagged (for example) `flaky` is re-run until it has accumulated
/// `extra_attempts` additional attempts; the last attempt's outcome is the
/// one that counts.
#[derive(Debug)]
pub struct TaggedFlakiness {
    tag: String,
    extra_attempts: usize,
}

impl TaggedFlakiness {
    /// Creates a tagged-flakiness strategy.
    pub fn new(tag: impl Into<String>, extra_attempts: usize) -> Self {
        Self {
            tag: tag.into(),
            extra_attempts,
        }
    }
}

impl FlakinessStrategy for TaggedFlakiness {
    fn is_unstable(&self, test: &TestCase, _result: &TestResult, attempts: usize) -> bool {
        test.has_metadata(&self.tag) && attempts <= self.extra_attempts
    }
}
