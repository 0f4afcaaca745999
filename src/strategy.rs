//! Pluggable scheduling policies.
//!
//! Every decision the engine does not want to hard-code lives behind a
//! small trait here — one per policy, one implementation per named variant,
//! selected by configuration at construction time. The engine depends only
//! on the interfaces, never on a concrete variant.
//!
//! | Policy | Decides | Variants |
//! |--------|---------|----------|
//! | [`pooling::PoolingStrategy`] | which pool a device joins | `omni`, `os-version`, `model` |
//! | [`sharding::ShardingStrategy`] | which tests a pool receives | `parallel`, `disjoint` |
//! | [`sorting::SortingStrategy`] | order of remaining tests | `none`, `lexicographic` |
//! | [`batching::BatchingStrategy`] | how tests group into batches | `isolate`, `fixed-size` |
//! | [`flakiness::FlakinessStrategy`] | whether a result is still unstable | `ignore`, `tagged` |
//! | [`retry::RetryStrategy`] | whether a failure is retried | `none`, `fixed-quota` |
//!
//! Strategies must be stateless or internally synchronized: several workers
//! and pools consult them concurrently.

pub mod batching;
pub mod flakiness;
pub mod pooling;
pub mod retry;
pub mod sharding;
pub mod sorting;

use std::sync::Arc;

use crate::config::StrategyConfig;

pub use batching::BatchingStrategy;
pub use flakiness::FlakinessStrategy;
pub use pooling::PoolingStrategy;
pub use retry::RetryStrategy;
pub use sharding::ShardingStrategy;
pub use sorting::SortingStrategy;

/// The full set of policies driving one run.
#[derive(Clone)]
pub struct Strategies {
    /// Assigns devices to pools.
    pub pooling: Arc<dyn PoolingStrategy>,
    /// Assigns tests to pools.
    pub sharding: Arc<dyn ShardingStrategy>,
    /// Orders a pool's remaining tests.
    pub sorting: Arc<dyn SortingStrategy>,
    /// Groups ordered tests into batches.
    pub batching: Arc<dyn BatchingStrategy>,
    /// Flags results that need another attempt despite a terminal status.
    pub flakiness: Arc<dyn FlakinessStrategy>,
    /// Grants retries for ordinary failures.
    pub retry: Arc<dyn RetryStrategy>,
}

impl Strategies {
    /// Builds the strategy set selected by configuration.
    pub fn from_config(config: &StrategyConfig) -> Self {
        Self {
            pooling: config.pooling.build(),
            sharding: config.sharding.build(),
            sorting: config.sorting.build(),
            batching: config.batching.build(),
            flakiness: config.flakiness.build(),
            retry: config.retry.build(),
        }
    }
}

impl Default for Strategies {
    /// The conservative default set: one omni pool, identical shard per
    /// pool, no sorting, one test per batch, no flakiness compensation,
    /// no retries.
    fn default() -> Self {
        Self {
            pooling: Arc::new(pooling::OmniPooling),
            sharding: Arc::new(sharding::ParallelSharding),
            sorting: Arc::new(sorting::NoSorting),
            batching: Arc::new(batching::IsolateBatching),
            flakiness: Arc::new(flakiness::IgnoreFlakiness),
            retry: Arc::new(retry::NoRetry),
        }
    }
}
