//! The top-level run orchestrator.
//!
//! The scheduler consumes the device event stream, routes each device to a
//! pool via the pooling strategy (creating the pool's coordinator and
//! sharded queue on first sight of its id), and waits for every pool to
//! terminate. Pools are isolated from each other: a panic inside one
//! coordinator is caught at join time and recorded as that pool's failure
//! while the others finish normally.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use regex::Regex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::analytics::Tracker;
use crate::config::RunConfig;
use crate::device::DeviceEvent;
use crate::discovery::TestCase;
use crate::executor::pool::{DevicePoolCoordinator, PoolHandle, PoolMessage};
use crate::executor::progress::ProgressReporter;
use crate::executor::queue::TestExecutionQueue;
use crate::executor::worker::ExecutionTimeouts;
use crate::executor::{PoolSummary, RunSummary};
use crate::strategy::Strategies;

/// Orchestrates one run: devices in, per-pool summaries out.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use stampede::analytics::NoopTracker;
/// use stampede::config::RunConfig;
/// use stampede::executor::Scheduler;
/// use stampede::strategy::Strategies;
/// use tokio::sync::mpsc;
/// use tokio_util::sync::CancellationToken;
///
/// # async fn example(tests: Vec<stampede::discovery::TestCase>) -> anyhow::Result<()> {
/// let scheduler = Scheduler::new(
///     &RunConfig::default(),
///     Strategies::default(),
///     Arc::new(NoopTracker),
/// )?;
///
/// let (device_tx, device_rx) = mpsc::unbounded_channel();
/// // ... hand device_tx to a device vendor ...
/// # drop(device_tx);
/// let summary = scheduler
///     .execute(tests, device_rx, CancellationToken::new())
///     .await?;
/// println!("{} passed, {} failed", summary.passed(), summary.failed());
/// # Ok(())
/// # }
/// ```
pub struct Scheduler {
    strategies: Strategies,
    timeouts: ExecutionTimeouts,
    strict_mode: bool,
    strict_filters: Vec<Regex>,
    strict_runs: usize,
    uncompleted_quota: Option<usize>,
    tracker: Arc<dyn Tracker>,
    progress: Arc<ProgressReporter>,
}

impl Scheduler {
    /// Creates a scheduler from run configuration.
    ///
    /// Fails fast on configuration errors (an invalid strict-run filter
    /// pattern) before any scheduling begins.
    pub fn new(
        config: &RunConfig,
        strategies: Strategies,
        tracker: Arc<dyn Tracker>,
    ) -> Result<Self> {
        let (strict_filters, strict_runs) = match &config.strict_run_filter {
            Some(filter_config) => {
                let mut filters = Vec::with_capacity(filter_config.filter.len());
                for pattern in &filter_config.filter {
                    filters.push(
                        Regex::new(pattern)
                            .with_context(|| format!("invalid strict-run filter: {pattern}"))?,
                    );
                }
                (filters, filter_config.runs)
            }
            None => (Vec::new(), 1),
        };

        Ok(Self {
            strategies,
            timeouts: ExecutionTimeouts {
                batch: Duration::from_millis(config.test_batch_timeout_millis),
                output: Duration::from_millis(config.test_output_timeout_millis),
            },
            strict_mode: config.strict_mode,
            strict_filters,
            strict_runs,
            uncompleted_quota: config.uncompleted_test_retry_quota,
            tracker,
            progress: Arc::new(ProgressReporter::new()),
        })
    }

    /// The run's progress counters, for live display.
    pub fn progress(&self) -> Arc<ProgressReporter> {
        self.progress.clone()
    }

    /// Runs all tests on the devices the event stream delivers.
    ///
    /// Returns once the device stream has closed and every pool reached a
    /// terminal state. `stop` terminates all pools early; tests without a
    /// verdict at that point are accounted as failed.
    pub async fn execute(
        &self,
        tests: Vec<TestCase>,
        mut devices: mpsc::UnboundedReceiver<DeviceEvent>,
        stop: CancellationToken,
    ) -> Result<RunSummary> {
        let start = std::time::Instant::now();

        if tests.is_empty() {
            warn!("no tests to run");
            return Ok(RunSummary {
                pools: Vec::new(),
                duration: start.elapsed(),
            });
        }
        info!(tests = tests.len(), "starting run");

        let mut pools: Vec<PoolHandle> = Vec::new();
        let mut device_pools: HashMap<String, usize> = HashMap::new();

        loop {
            tokio::select! {
                _ = stop.cancelled() => {
                    warn!("stop requested, terminating pools");
                    for pool in &pools {
                        pool.send(PoolMessage::Stop);
                    }
                    break;
                }
                event = devices.recv() => match event {
                    Some(DeviceEvent::Added(device)) => {
                        let pool_id = self.strategies.pooling.pool_for(device.info());
                        let pos = match pools.iter().position(|p| p.pool_id == pool_id) {
                            Some(pos) => pos,
                            None => {
                                info!(pool = %pool_id, "creating device pool");
                                let shard = self.strategies.sharding.create_shard(&tests);
                                let queue = Arc::new(TestExecutionQueue::new(
                                    pool_id.clone(),
                                    shard,
                                    self.strategies.clone(),
                                    self.strict_mode,
                                    self.strict_filters.clone(),
                                    self.strict_runs,
                                    self.uncompleted_quota,
                                    self.tracker.clone(),
                                    self.progress.clone(),
                                ));
                                pools.push(DevicePoolCoordinator::spawn(
                                    pool_id.clone(),
                                    queue,
                                    self.timeouts,
                                ));
                                pools.len() - 1
                            }
                        };
                        device_pools.insert(device.serial().to_string(), pos);
                        pools[pos].send(PoolMessage::AddDevice(device));
                    }
                    Some(DeviceEvent::Removed(serial)) => {
                        match device_pools.get(&serial) {
                            Some(&pos) => pools[pos].send(PoolMessage::RemoveDevice(serial)),
                            None => warn!(device = %serial, "removal for unrouted device"),
                        }
                    }
                    None => break,
                }
            }
        }

        // The device stream is done (or the run was stopped); keep the stop
        // signal wired while waiting the pools out.
        let senders: Vec<_> = pools.iter().map(|p| p.sender()).collect();
        let stop_forwarder = {
            let stop = stop.clone();
            tokio::spawn(async move {
                stop.cancelled().await;
                for sender in senders {
                    let _ = sender.send(PoolMessage::Stop);
                }
            })
        };

        let mut summaries = Vec::new();
        for handle in pools {
            let pool_id = handle.pool_id.clone();
            match handle.join().await {
                Ok(summary) => summaries.push(summary),
                Err(join_error) => {
                    error!(pool = %pool_id, %join_error, "pool coordinator failed");
                    summaries.push(PoolSummary {
                        pool_id,
                        error: Some(format!("pool coordinator failed: {join_error}")),
                        verdicts: Vec::new(),
                        devices: Vec::new(),
                    });
                }
            }
        }
        stop_forwarder.abort();

        let summary = RunSummary {
            pools: summaries,
            duration: start.elapsed(),
        };
        info!(
            passed = summary.passed(),
            failed = summary.failed(),
            duration = ?summary.duration,
            "run finished"
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytics::NoopTracker;
    use crate::discovery::{ComponentRef, TestCase};

    #[tokio::test]
    async fn test_no_devices_yields_empty_summary() {
        let scheduler = Scheduler::new(
            &RunConfig::default(),
            Strategies::default(),
            Arc::new(NoopTracker),
        )
        .unwrap();

        let tests = vec![TestCase::new(
            "com.example",
            "SchedulerTest",
            "m",
            ComponentRef::new("app"),
        )];
        let (tx, rx) = mpsc::unbounded_channel();
        drop(tx);

        let summary = scheduler
            .execute(tests, rx, CancellationToken::new())
            .await
            .unwrap();
        assert!(summary.pools.is_empty());
        assert!(summary.is_successful());
    }

    #[test]
    fn test_invalid_strict_filter_fails_fast() {
        let config = RunConfig {
            strict_run_filter: Some(crate::config::StrictRunFilterConfig {
                filter: vec!["[unclosed".to_string()],
                runs: 3,
            }),
            ..RunConfig::default()
        };
        assert!(Scheduler::new(&config, Strategies::default(), Arc::new(NoopTracker)).is_err());
    }
}
