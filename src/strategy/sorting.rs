//! Sorting strategies: the order of a pool's remaining tests.

use crate::discovery::TestCase;

/// Orders the remaining tests before batching.
///
/// Applied by the queue every time a batch is requested, so
/// implementations should be cheap for the common case.
pub trait SortingStrategy: Send + Sync {
    /// Returns the tests in execution order.
    fn sort(&self, tests: Vec<TestCase>) -> Vec<TestCase>;
}

/// Keeps the shard's original order.
#[derive(Debug, Default)]
pub struct NoSorting;

impl SortingStrategy for NoSorting {
    fn sort(&self, tests: Vec<TestCase>) -> Vec<TestCase> {
        tests
    }
}

/// Orders tests by their fully qualified name.
///
/// Gives deterministic execution order regardless of discovery order —
/// useful when comparing runs across machines.
#[derive(Debug, Default)]
pub struct LexicographicSorting;

impl SortingStrategy for LexicographicSorting {
    fn sort(&self, mut tests: Vec<TestCase>) -> Vec<TestCase> {
        tests.sort_by_key(|t| t.fully_qualified_name());
        tests
    }
}
