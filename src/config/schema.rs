//! Configuration schema definitions.
//!
//! All types here deserialize from TOML. The schema uses tagged enums for
//! strategy, suite and fleet selection so new variants slot in without
//! breaking existing files.
//!
//! # Schema Overview
//!
//! ```text
//! Config (root)
//! ├── RunConfig        - timeouts, quotas, strict-run policy
//! ├── StrategyConfig   - one tagged enum per scheduling policy
//! ├── SuiteConfig      - tagged enum selecting the test source
//! ├── FleetConfig      - tagged enum selecting the device source
//! └── OutputConfig     - output directory
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::strategy::{
    batching::{FixedSizeBatching, IsolateBatching},
    flakiness::{IgnoreFlakiness, TaggedFlakiness},
    pooling::{ModelPooling, OmniPooling, OsVersionPooling},
    retry::{FixedQuotaRetry, NoRetry},
    sharding::{DisjointSharding, ParallelSharding},
    sorting::{LexicographicSorting, NoSorting},
    BatchingStrategy, FlakinessStrategy, PoolingStrategy, RetryStrategy, ShardingStrategy,
    SortingStrategy,
};

/// Root configuration structure.
///
/// # TOML Structure
///
/// ```toml
/// [run]
/// test_batch_timeout_millis = 900000
/// test_output_timeout_millis = 60000
/// uncompleted_test_retry_quota = 3
///
/// [strategy.batching]
/// type = "fixed-size"
/// size = 5
///
/// [suite]
/// type = "manifest"
/// path = "tests.json"
///
/// [fleet]
/// type = "simulated"
/// devices = 4
///
/// [output]
/// output_dir = "stampede-results"
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Run options: timeouts, quotas, strict-run policy.
    #[serde(default)]
    pub run: RunConfig,

    /// Scheduling policy selection.
    #[serde(default)]
    pub strategy: StrategyConfig,

    /// Where the test list comes from.
    pub suite: SuiteConfig,

    /// Where the devices come from.
    pub fleet: FleetConfig,

    /// Output settings.
    #[serde(default)]
    pub output: OutputConfig,
}

/// Core run options.
///
/// # Defaults
///
/// | Field | Default |
/// |-------|---------|
/// | `test_batch_timeout_millis` | 900000 (15 minutes) |
/// | `test_output_timeout_millis` | 60000 (1 minute) |
/// | `uncompleted_test_retry_quota` | unbounded |
/// | `strict_mode` | false |
/// | `ignore_failures` | false |
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RunConfig {
    /// Hard ceiling on one batch execution, in milliseconds.
    #[serde(default = "default_batch_timeout")]
    pub test_batch_timeout_millis: u64,

    /// Inactivity ceiling: if no test start/finish signal arrives within
    /// this window, the batch is abandoned. Milliseconds.
    #[serde(default = "default_output_timeout")]
    pub test_output_timeout_millis: u64,

    /// How many uncompleted (device-loss) attempts a test may accumulate
    /// before it is forced to a terminal failure. Unbounded if unset.
    #[serde(default)]
    pub uncompleted_test_retry_quota: Option<usize>,

    /// Hold every test to strict-run rules: one failed attempt fails the
    /// test regardless of other attempts.
    #[serde(default)]
    pub strict_mode: bool,

    /// Strict-run rules for tests whose class matches a filter.
    #[serde(default)]
    pub strict_run_filter: Option<StrictRunFilterConfig>,

    /// Report the process as successful even when tests failed.
    ///
    /// Affects only the exit code; every outcome is still recorded.
    #[serde(default)]
    pub ignore_failures: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            test_batch_timeout_millis: default_batch_timeout(),
            test_output_timeout_millis: default_output_timeout(),
            uncompleted_test_retry_quota: None,
            strict_mode: false,
            strict_run_filter: None,
            ignore_failures: false,
        }
    }
}

/// Strict-run windowing for a subset of tests.
///
/// Matching tests are executed `runs` times and count as passed only if
/// every attempt passes.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StrictRunFilterConfig {
    /// Class-name regular expressions selecting the strict tests.
    pub filter: Vec<String>,

    /// Number of runs in the window. Default: 3.
    #[serde(default = "default_strict_runs")]
    pub runs: usize,
}

fn default_batch_timeout() -> u64 {
    900_000 // 15 minutes
}

fn default_output_timeout() -> u64 {
    60_000 // 1 minute
}

fn default_strict_runs() -> usize {
    3
}

/// One tagged enum per scheduling policy.
///
/// Every policy has a conservative default, so an empty `[strategy]` table
/// (or none at all) gives: one omni pool, identical shard per pool, no
/// sorting, one test per batch, no flakiness compensation, no retries.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct StrategyConfig {
    /// Which pool a device joins.
    #[serde(default)]
    pub pooling: PoolingConfig,

    /// Which tests a pool receives.
    #[serde(default)]
    pub sharding: ShardingConfig,

    /// Order of a pool's remaining tests.
    #[serde(default)]
    pub sorting: SortingConfig,

    /// How ordered tests group into batches.
    #[serde(default)]
    pub batching: BatchingConfig,

    /// Whether a result is still unstable.
    #[serde(default)]
    pub flakiness: FlakinessConfig,

    /// Whether a failure is retried.
    #[serde(default)]
    pub retry: RetryConfig,
}

/// Pooling strategy selection.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum PoolingConfig {
    /// Every device in one shared pool.
    #[default]
    Omni,
    /// One pool per OS version.
    OsVersion,
    /// One pool per device model.
    Model,
}

impl PoolingConfig {
    /// Builds the selected strategy.
    pub fn build(&self) -> Arc<dyn PoolingStrategy> {
        match self {
            PoolingConfig::Omni => Arc::new(OmniPooling),
            PoolingConfig::OsVersion => Arc::new(OsVersionPooling),
            PoolingConfig::Model => Arc::new(ModelPooling),
        }
    }
}

/// Sharding strategy selection.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ShardingConfig {
    /// Every pool runs the complete test set.
    #[default]
    Parallel,
    /// Tests split round-robin across an expected number of pools.
    Disjoint {
        /// Expected pool count.
        pools: usize,
    },
}

impl ShardingConfig {
    /// Builds the selected strategy.
    pub fn build(&self) -> Arc<dyn ShardingStrategy> {
        match self {
            ShardingConfig::Parallel => Arc::new(ParallelSharding),
            ShardingConfig::Disjoint { pools } => Arc::new(DisjointSharding::new(*pools)),
        }
    }
}

/// Sorting strategy selection.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum SortingConfig {
    /// Keep discovery order.
    #[default]
    None,
    /// Order by fully qualified test name.
    Lexicographic,
}

impl SortingConfig {
    /// Builds the selected strategy.
    pub fn build(&self) -> Arc<dyn SortingStrategy> {
        match self {
            SortingConfig::None => Arc::new(NoSorting),
            SortingConfig::Lexicographic => Arc::new(LexicographicSorting),
        }
    }
}

/// Batching strategy selection.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum BatchingConfig {
    /// One test per batch.
    #[default]
    Isolate,
    /// Up to `size` same-component tests per batch.
    FixedSize {
        /// Maximum tests per batch.
        size: usize,
    },
}

impl BatchingConfig {
    /// Builds the selected strategy.
    pub fn build(&self) -> Arc<dyn BatchingStrategy> {
        match self {
            BatchingConfig::Isolate => Arc::new(IsolateBatching),
            BatchingConfig::FixedSize { size } => Arc::new(FixedSizeBatching::new(*size)),
        }
    }
}

/// Flakiness strategy selection.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum FlakinessConfig {
    /// Trust every result.
    #[default]
    Ignore,
    /// Re-run tests carrying a metadata tag before trusting them.
    Tagged {
        /// The metadata tag marking known-flaky tests.
        tag: String,
        /// Extra attempts before a result is trusted. Default: 1.
        #[serde(default = "default_extra_attempts")]
        extra_attempts: usize,
    },
}

impl FlakinessConfig {
    /// Builds the selected strategy.
    pub fn build(&self) -> Arc<dyn FlakinessStrategy> {
        match self {
            FlakinessConfig::Ignore => Arc::new(IgnoreFlakiness),
            FlakinessConfig::Tagged {
                tag,
                extra_attempts,
            } => Arc::new(TaggedFlakiness::new(tag.clone(), *extra_attempts)),
        }
    }
}

fn default_extra_attempts() -> usize {
    1
}

/// Retry strategy selection.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum RetryConfig {
    /// Never retry.
    #[default]
    None,
    /// Retry failures under a shared total budget and a per-test cap.
    FixedQuota {
        /// Retries available across all tests. Default: 100.
        #[serde(default = "default_total_quota")]
        total_quota: usize,
        /// Retries available to any single test. Default: 3.
        #[serde(default = "default_retry_per_test")]
        retry_per_test_quota: usize,
    },
}

impl RetryConfig {
    /// Builds the selected strategy.
    pub fn build(&self) -> Arc<dyn RetryStrategy> {
        match self {
            RetryConfig::None => Arc::new(NoRetry),
            RetryConfig::FixedQuota {
                total_quota,
                retry_per_test_quota,
            } => Arc::new(FixedQuotaRetry::new(*total_quota, *retry_per_test_quota)),
        }
    }
}

fn default_total_quota() -> usize {
    100
}

fn default_retry_per_test() -> usize {
    3
}

/// Test source selection.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum SuiteConfig {
    /// Tests listed in a JSON manifest file.
    Manifest {
        /// Path to the manifest.
        path: PathBuf,
    },
}

/// Device source selection.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum FleetConfig {
    /// Simulated in-process devices.
    Simulated(SimFleetConfig),
}

/// Configuration of the simulated device fleet.
///
/// The simulation is deterministic for a given seed; the behavior lists
/// match tests by substring of their fully qualified name.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SimFleetConfig {
    /// Number of devices to bring up. Default: 2.
    #[serde(default = "default_fleet_devices")]
    pub devices: usize,

    /// OS versions assigned round-robin across devices. Default: `["13"]`.
    #[serde(default = "default_os_versions")]
    pub os_versions: Vec<String>,

    /// Delay between device arrivals, in milliseconds.
    #[serde(default)]
    pub arrival_delay_ms: u64,

    /// Base duration of one simulated test, in milliseconds. Default: 5.
    #[serde(default = "default_test_duration")]
    pub test_duration_ms: u64,

    /// Random extra latency per test, in milliseconds.
    #[serde(default)]
    pub jitter_ms: u64,

    /// Seed for the simulation's randomness.
    #[serde(default)]
    pub seed: u64,

    /// Tests that always fail (substring match on the qualified name).
    #[serde(default)]
    pub fail_tests: Vec<String>,

    /// Tests that fail on their first attempt per device, then pass.
    #[serde(default)]
    pub flaky_tests: Vec<String>,

    /// Tests that start but never finish.
    #[serde(default)]
    pub hang_tests: Vec<String>,

    /// Serials of devices that crash after a number of batches.
    #[serde(default)]
    pub crash_serials: Vec<String>,

    /// Batches a crashing device completes before dying. Default: 1.
    #[serde(default = "default_crash_after")]
    pub crash_after_batches: usize,
}

impl Default for SimFleetConfig {
    fn default() -> Self {
        Self {
            devices: default_fleet_devices(),
            os_versions: default_os_versions(),
            arrival_delay_ms: 0,
            test_duration_ms: default_test_duration(),
            jitter_ms: 0,
            seed: 0,
            fail_tests: Vec::new(),
            flaky_tests: Vec::new(),
            hang_tests: Vec::new(),
            crash_serials: Vec::new(),
            crash_after_batches: default_crash_after(),
        }
    }
}

fn default_fleet_devices() -> usize {
    2
}

fn default_os_versions() -> Vec<String> {
    vec!["13".to_string()]
}

fn default_test_duration() -> u64 {
    5
}

fn default_crash_after() -> usize {
    1
}

/// Output settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OutputConfig {
    /// Directory the run summary is written to.
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
        }
    }
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("stampede-results")
}
