//! The per-device execution loop.
//!
//! One worker task owns one device: prepare, pull a batch, drive it through
//! the device's event stream, hand the results back, repeat. Batches on the
//! same device never overlap. The worker never touches pool state directly;
//! everything it learns flows back through the queue, and its exit value
//! tells the coordinator what happened to the device.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::StreamExt;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::device::{BatchEvent, Device, DeviceError, DeviceInfo};
use crate::discovery::{ComponentRef, TestCase};
use crate::executor::queue::TestExecutionQueue;
use crate::executor::{TestBatch, TestBatchResults, TestResult, TestStatus};

/// The two ceilings on one batch execution.
#[derive(Debug, Clone, Copy)]
pub struct ExecutionTimeouts {
    /// Hard ceiling on a whole batch.
    pub batch: Duration,
    /// Inactivity ceiling, reset on every event from the device.
    pub output: Duration,
}

/// Why a worker's loop ended.
#[derive(Debug)]
pub enum WorkerExit {
    /// The queue is exhausted; the device did all it could.
    Drained {
        /// Serial of the worker's device.
        serial: String,
    },
    /// The coordinator removed the device.
    Removed {
        /// Serial of the worker's device.
        serial: String,
    },
    /// The device failed and cannot continue.
    DeviceLost {
        /// Serial of the worker's device.
        serial: String,
        /// The error that took the device down.
        error: DeviceError,
    },
}

enum BatchDisposition {
    Completed,
    TimedOut,
    Cancelled,
    Lost(DeviceError),
}

/// Runs the worker loop for one device until the queue drains, the device
/// dies, or the coordinator cancels.
///
/// `dispose` runs on every exit path.
pub async fn run_device(
    device: Arc<dyn Device>,
    queue: Arc<TestExecutionQueue>,
    timeouts: ExecutionTimeouts,
    token: CancellationToken,
) -> WorkerExit {
    let serial = device.serial().to_string();

    if !device.healthy().await {
        warn!(device = %serial, "device failed its health check");
        device.dispose().await;
        return WorkerExit::DeviceLost {
            serial,
            error: DeviceError::Unhealthy("failed health check".to_string()),
        };
    }

    debug!(device = %serial, "preparing device");
    let prepared = tokio::select! {
        _ = token.cancelled() => {
            device.dispose().await;
            return WorkerExit::Removed { serial };
        }
        prepared = device.prepare() => prepared,
    };
    if let Err(error) = prepared {
        warn!(device = %serial, %error, "device preparation failed");
        device.dispose().await;
        return WorkerExit::DeviceLost { serial, error };
    }

    let exit = loop {
        if token.is_cancelled() {
            break WorkerExit::Removed {
                serial: serial.clone(),
            };
        }

        // Register for wakeups before checking the queue, so a requeue
        // between the check and the park is never missed.
        let changed = queue.changed();
        tokio::pin!(changed);
        changed.as_mut().enable();
        match queue.next_batch().await {
            Some(batch) => {
                debug!(device = %serial, batch = %batch.id, tests = batch.tests.len(), "executing batch");
                let (results, disposition) =
                    execute_batch(device.as_ref(), &batch, timeouts, &token).await;
                queue.handle_results(results).await;
                match disposition {
                    BatchDisposition::Completed => {}
                    BatchDisposition::TimedOut => {
                        warn!(device = %serial, batch = %batch.id, "batch timed out");
                    }
                    BatchDisposition::Cancelled => {
                        break WorkerExit::Removed {
                            serial: serial.clone(),
                        };
                    }
                    BatchDisposition::Lost(error) => {
                        break WorkerExit::DeviceLost {
                            serial: serial.clone(),
                            error,
                        };
                    }
                }
            }
            None => {
                if queue.is_exhausted().await {
                    break WorkerExit::Drained {
                        serial: serial.clone(),
                    };
                }
                // Other workers still hold batches that may be requeued.
                tokio::select! {
                    _ = &mut changed => {}
                    _ = token.cancelled() => {
                        break WorkerExit::Removed { serial: serial.clone() };
                    }
                }
            }
        }
    };

    device.dispose().await;
    exit
}

async fn execute_batch(
    device: &dyn Device,
    batch: &TestBatch,
    timeouts: ExecutionTimeouts,
    token: &CancellationToken,
) -> (TestBatchResults, BatchDisposition) {
    let mut collector = BatchCollector::new(batch, device.info().clone());

    let mut stream = match device.execute(batch).await {
        Ok(stream) => stream,
        Err(error) => return (collector.finish(), BatchDisposition::Lost(error)),
    };

    let deadline = Instant::now() + timeouts.batch;
    loop {
        let step = tokio::select! {
            _ = token.cancelled() => {
                return (collector.finish(), BatchDisposition::Cancelled);
            }
            _ = time::sleep_until(deadline) => {
                return (collector.finish(), BatchDisposition::TimedOut);
            }
            step = time::timeout(timeouts.output, stream.next()) => step,
        };

        match step {
            // Inactivity: nothing from the device within the output timeout.
            Err(_elapsed) => return (collector.finish(), BatchDisposition::TimedOut),
            Ok(None) => break,
            Ok(Some(Ok(BatchEvent::BatchFinished))) => break,
            Ok(Some(Ok(event))) => collector.on_event(event),
            Ok(Some(Err(error))) => return (collector.finish(), BatchDisposition::Lost(error)),
        }
    }

    (collector.finish(), BatchDisposition::Completed)
}

/// Assembles per-test results from a batch's event stream.
///
/// Instances the device never reports on end up in the uncompleted list,
/// marked `Failure` with the end time of the last completed test (or the
/// collection time if none completed).
struct BatchCollector {
    batch_id: Uuid,
    component: ComponentRef,
    device: DeviceInfo,
    pending: Vec<TestCase>,
    open: Vec<(TestCase, DateTime<Utc>)>,
    finished: Vec<TestResult>,
    failed: Vec<TestResult>,
    last_end: Option<DateTime<Utc>>,
}

impl BatchCollector {
    fn new(batch: &TestBatch, device: DeviceInfo) -> Self {
        Self {
            batch_id: batch.id,
            component: batch.component.clone(),
            device,
            pending: batch.tests.clone(),
            open: Vec::new(),
            finished: Vec::new(),
            failed: Vec::new(),
            last_end: None,
        }
    }

    fn on_event(&mut self, event: BatchEvent) {
        match event {
            BatchEvent::TestStarted { test } => {
                if let Some(pos) = self.pending.iter().position(|t| t == &test) {
                    let test = self.pending.remove(pos);
                    self.open.push((test, Utc::now()));
                } else {
                    debug!(test = %test, "start event for test not in batch");
                }
            }
            BatchEvent::TestEnded { test, status, trace } => {
                let (test, start_time) =
                    if let Some(pos) = self.open.iter().position(|(t, _)| t == &test) {
                        self.open.remove(pos)
                    } else if let Some(pos) = self.pending.iter().position(|t| t == &test) {
                        // End without a start; tolerate and stamp both now.
                        (self.pending.remove(pos), Utc::now())
                    } else {
                        debug!(test = %test, "end event for test not in batch");
                        return;
                    };

                let end_time = Utc::now();
                self.last_end = Some(end_time);
                let result = TestResult {
                    test,
                    device: self.device.clone(),
                    status,
                    start_time,
                    end_time,
                    batch_id: self.batch_id,
                    is_strict_run: false,
                    from_cache: false,
                    trace,
                };
                if result.status.is_success() {
                    self.finished.push(result);
                } else {
                    self.failed.push(result);
                }
            }
            BatchEvent::BatchFinished => {}
        }
    }

    fn finish(mut self) -> TestBatchResults {
        let end_time = self.last_end.unwrap_or_else(Utc::now);
        let mut uncompleted = Vec::new();

        for (test, start_time) in self.open.drain(..) {
            uncompleted.push(TestResult {
                test,
                device: self.device.clone(),
                status: TestStatus::Failure,
                start_time,
                end_time,
                batch_id: self.batch_id,
                is_strict_run: false,
                from_cache: false,
                trace: Some("test started but never finished".to_string()),
            });
        }
        for test in self.pending.drain(..) {
            uncompleted.push(TestResult {
                test,
                device: self.device.clone(),
                status: TestStatus::Failure,
                start_time: end_time,
                end_time,
                batch_id: self.batch_id,
                is_strict_run: false,
                from_cache: false,
                trace: Some("test never started".to_string()),
            });
        }

        TestBatchResults {
            batch_id: self.batch_id,
            device: self.device,
            component: self.component,
            finished: self.finished,
            failed: self.failed,
            uncompleted,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::ComponentRef;

    fn sim_device() -> DeviceInfo {
        DeviceInfo {
            serial: "sim-1".into(),
            model: "sim".into(),
            os_version: "1".into(),
            api_level: 1,
            features: Vec::new(),
        }
    }

    fn batch(methods: &[&str]) -> TestBatch {
        TestBatch::new(
            methods
                .iter()
                .map(|m| TestCase::new("com.example", "WorkerTest", *m, ComponentRef::new("app")))
                .collect(),
            ComponentRef::new("app"),
        )
    }

    #[test]
    fn test_collector_routes_by_status() {
        let batch = batch(&["pass", "fail"]);
        let mut collector = BatchCollector::new(&batch, sim_device());

        for (method, status) in [("pass", TestStatus::Passed), ("fail", TestStatus::Failure)] {
            let test = batch.tests.iter().find(|t| t.method == method).unwrap().clone();
            collector.on_event(BatchEvent::TestStarted { test: test.clone() });
            collector.on_event(BatchEvent::TestEnded {
                test,
                status,
                trace: None,
            });
        }

        let results = collector.finish();
        assert_eq!(results.finished.len(), 1);
        assert_eq!(results.failed.len(), 1);
        assert!(results.uncompleted.is_empty());
    }

    #[test]
    fn test_collector_synthesizes_uncompleted() {
        let batch = batch(&["done", "hung", "never"]);
        let mut collector = BatchCollector::new(&batch, sim_device());

        let done = batch.tests[0].clone();
        collector.on_event(BatchEvent::TestStarted { test: done.clone() });
        collector.on_event(BatchEvent::TestEnded {
            test: done,
            status: TestStatus::Passed,
            trace: None,
        });
        let hung = batch.tests[1].clone();
        collector.on_event(BatchEvent::TestStarted { test: hung });

        let results = collector.finish();
        assert_eq!(results.finished.len(), 1);
        assert_eq!(results.uncompleted.len(), 2);
        assert!(results
            .uncompleted
            .iter()
            .all(|r| r.status == TestStatus::Failure));

        // uncompleted entries carry the last completed end time
        let end = results.finished[0].end_time;
        assert!(results.uncompleted.iter().all(|r| r.end_time == end));
    }

    #[test]
    fn test_collector_tolerates_end_without_start() {
        let batch = batch(&["quick"]);
        let mut collector = BatchCollector::new(&batch, sim_device());

        collector.on_event(BatchEvent::TestEnded {
            test: batch.tests[0].clone(),
            status: TestStatus::Passed,
            trace: None,
        });

        let results = collector.finish();
        assert_eq!(results.finished.len(), 1);
        assert!(results.uncompleted.is_empty());
    }
}
