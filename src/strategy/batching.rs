//! Batching strategies: how ordered tests group into execution batches.

use std::collections::VecDeque;

use crate::discovery::TestCase;
use crate::executor::TestBatch;

/// Cuts the next batch from the front of a pool's remaining tests.
///
/// A batch never mixes components: the installed component is shared batch
/// state on the device. Implementations take tests from the front of the
/// queue and leave the rest untouched.
pub trait BatchingStrategy: Send + Sync {
    /// Removes the next batch from `remaining`, or returns `None` when no
    /// tests are left.
    fn next_batch(&self, remaining: &mut VecDeque<TestCase>) -> Option<TestBatch>;
}

/// One test per batch.
///
/// Maximum isolation: every test gets a fresh execution pass, and a device
/// loss costs at most one test's progress.
#[derive(Debug, Default)]
pub struct IsolateBatching;

impl BatchingStrategy for IsolateBatching {
    fn next_batch(&self, remaining: &mut VecDeque<TestCase>) -> Option<TestBatch> {
        let test = remaining.pop_front()?;
        let component = test.component.clone();
        Some(TestBatch::new(vec![test], component))
    }
}

/// Up to `size` tests per batch, split on component boundaries.
///
/// Takes the longest same-component prefix of the queue, capped at `size`.
/// Larger batches amortize per-batch device overhead at the cost of more
/// rework when a batch is abandoned.
#[derive(Debug)]
pub struct FixedSizeBatching {
    size: usize,
}

impl FixedSizeBatching {
    /// Creates a fixed-size batcher (minimum size 1).
    pub fn new(size: usize) -> Self {
        Self { size: size.max(1) }
    }
}

impl BatchingStrategy for FixedSizeBatching {
    fn next_batch(&self, remaining: &mut VecDeque<TestCase>) -> Option<TestBatch> {
        let first = remaining.pop_front()?;
        let component = first.component.clone();
        let mut tests = vec![first];

        while tests.len() < self.size {
            if !matches!(remaining.front(), Some(next) if next.component == component) {
                break;
            }
            if let Some(next) = remaining.pop_front() {
                tests.push(next);
            }
        }

        Some(TestBatch::new(tests, component))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::ComponentRef;

    fn test_in(component: &str, method: &str) -> TestCase {
        TestCase::new("com.example", "BatchTest", method, ComponentRef::new(component))
    }

    #[test]
    fn test_isolate_cuts_single_test_batches() {
        let strategy = IsolateBatching;
        let mut remaining: VecDeque<_> =
            vec![test_in("app", "a"), test_in("app", "b")].into();

        let batch = strategy.next_batch(&mut remaining).unwrap();
        assert_eq!(batch.tests.len(), 1);
        assert_eq!(batch.tests[0].method, "a");
        assert_eq!(remaining.len(), 1);
    }

    #[test]
    fn test_isolate_empty_queue_yields_none() {
        let mut remaining = VecDeque::new();
        assert!(IsolateBatching.next_batch(&mut remaining).is_none());
    }

    #[test]
    fn test_fixed_size_respects_cap() {
        let strategy = FixedSizeBatching::new(2);
        let mut remaining: VecDeque<_> =
            vec![test_in("app", "a"), test_in("app", "b"), test_in("app", "c")].into();

        let batch = strategy.next_batch(&mut remaining).unwrap();
        assert_eq!(batch.tests.len(), 2);
        assert_eq!(remaining.len(), 1);
    }

    #[test]
    fn test_fixed_size_breaks_on_component_boundary() {
        let strategy = FixedSizeBatching::new(10);
        let mut remaining: VecDeque<_> =
            vec![test_in("app", "a"), test_in("app", "b"), test_in("lib", "c")].into();

        let batch = strategy.next_batch(&mut remaining).unwrap();
        assert_eq!(batch.tests.len(), 2);
        assert_eq!(batch.component, ComponentRef::new("app"));
        assert_eq!(remaining.front().unwrap().component, ComponentRef::new("lib"));
    }
}
