//! Sharding strategies: which tests a pool receives.

use std::sync::atomic::{AtomicUsize, Ordering};

use crate::discovery::TestCase;
use crate::executor::TestShard;

/// Produces the shard for a newly created pool.
///
/// Pools are created lazily as devices appear, so a strategy is consulted
/// once per pool, in creation order, and never knows the final pool count
/// up front. Implementations that split the test set must be internally
/// synchronized.
pub trait ShardingStrategy: Send + Sync {
    /// Returns the shard for the next pool, given all discovered tests.
    fn create_shard(&self, tests: &[TestCase]) -> TestShard;
}

/// Gives every pool the complete test set.
///
/// The right choice when pools represent different platforms or OS
/// versions and every test should run on each of them.
#[derive(Debug, Default)]
pub struct ParallelSharding;

impl ShardingStrategy for ParallelSharding {
    fn create_shard(&self, tests: &[TestCase]) -> TestShard {
        TestShard::new(tests.to_vec())
    }
}

/// Splits the test set round-robin across an expected number of pools.
///
/// Pool `k` (in creation order) receives every `pools`-th test starting at
/// offset `k % pools`. If more pools appear than configured, assignment
/// cycles, duplicating shards rather than dropping tests.
#[derive(Debug)]
pub struct DisjointSharding {
    pools: usize,
    cursor: AtomicUsize,
}

impl DisjointSharding {
    /// Creates a disjoint sharder expecting `pools` pools (minimum 1).
    pub fn new(pools: usize) -> Self {
        Self {
            pools: pools.max(1),
            cursor: AtomicUsize::new(0),
        }
    }
}

impl ShardingStrategy for DisjointSharding {
    fn create_shard(&self, tests: &[TestCase]) -> TestShard {
        let group = self.cursor.fetch_add(1, Ordering::SeqCst) % self.pools;
        TestShard::new(
            tests
                .iter()
                .enumerate()
                .filter(|(i, _)| i % self.pools == group)
                .map(|(_, t)| t.clone())
                .collect(),
        )
    }
}
