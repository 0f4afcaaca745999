//! The device pool coordinator.
//!
//! One coordinator task per pool id owns the pool's execution queue and a
//! worker task per device. Devices arrive and leave over a message channel;
//! the coordinator decides when the pool is done:
//!
//! - normally, when the queue is exhausted and the last worker has drained;
//! - degenerately, when every device is gone while work remains — the
//!   residual tests are forced `Failure` ("no devices available") so the
//!   run still accounts for them;
//! - externally, on a `Stop` message.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::device::{Device, DeviceInfo, DevicePoolId};
use crate::executor::queue::TestExecutionQueue;
use crate::executor::worker::{self, ExecutionTimeouts, WorkerExit};
use crate::executor::{DeviceSummary, PoolSummary, TestStatus};

/// Messages a coordinator accepts while running.
pub enum PoolMessage {
    /// A device joined this pool.
    AddDevice(Arc<dyn Device>),
    /// The device with this serial left the pool.
    RemoveDevice(String),
    /// Terminate the pool now, failing whatever has no verdict yet.
    Stop,
}

/// Lifecycle of a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolState {
    /// Created, no device seen yet.
    AwaitingDevices,
    /// At least one worker has been spawned.
    Active,
    /// The pool has produced its summary.
    Terminated,
}

/// Handle the scheduler keeps per spawned pool.
pub struct PoolHandle {
    /// The pool this handle controls.
    pub pool_id: DevicePoolId,
    tx: mpsc::UnboundedSender<PoolMessage>,
    join: JoinHandle<PoolSummary>,
}

impl PoolHandle {
    /// Sends a message to the coordinator; ignored once it terminated.
    pub fn send(&self, message: PoolMessage) {
        if self.tx.send(message).is_err() {
            debug!(pool = %self.pool_id, "message to terminated pool dropped");
        }
    }

    /// A clone of the coordinator's message sender.
    pub fn sender(&self) -> mpsc::UnboundedSender<PoolMessage> {
        self.tx.clone()
    }

    /// Waits for the pool to terminate and returns its summary.
    pub async fn join(self) -> Result<PoolSummary, JoinError> {
        self.join.await
    }
}

/// Coordinates one pool: a queue plus one worker per live device.
pub struct DevicePoolCoordinator {
    pool_id: DevicePoolId,
    queue: Arc<TestExecutionQueue>,
    timeouts: ExecutionTimeouts,
    rx: mpsc::UnboundedReceiver<PoolMessage>,
    workers: HashMap<String, CancellationToken>,
    join_set: JoinSet<WorkerExit>,
    state: PoolState,
    last_device: Option<DeviceInfo>,
}

impl DevicePoolCoordinator {
    /// Spawns a coordinator task for the pool and returns its handle.
    pub fn spawn(
        pool_id: DevicePoolId,
        queue: Arc<TestExecutionQueue>,
        timeouts: ExecutionTimeouts,
    ) -> PoolHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        let coordinator = Self {
            pool_id: pool_id.clone(),
            queue,
            timeouts,
            rx,
            workers: HashMap::new(),
            join_set: JoinSet::new(),
            state: PoolState::AwaitingDevices,
            last_device: None,
        };
        let join = tokio::spawn(coordinator.run());
        PoolHandle { pool_id, tx, join }
    }

    async fn run(mut self) -> PoolSummary {
        info!(pool = %self.pool_id, "pool awaiting devices");

        let error = loop {
            tokio::select! {
                // Pending device arrivals must win over worker exits: an
                // instantly-failing first device must not terminate the
                // pool while a second device sits in the mailbox.
                biased;

                message = self.rx.recv() => match message {
                    Some(PoolMessage::AddDevice(device)) => self.add_device(device),
                    Some(PoolMessage::RemoveDevice(serial)) => self.remove_device(&serial),
                    Some(PoolMessage::Stop) | None => break self.stop().await,
                },
                Some(exit) = self.join_set.join_next(), if !self.join_set.is_empty() => {
                    self.handle_worker_exit(exit);
                    if let Some(outcome) = self.check_done().await {
                        break outcome;
                    }
                }
            }
        };

        self.state = PoolState::Terminated;
        info!(pool = %self.pool_id, error = ?error, "pool terminated");
        self.build_summary(error).await
    }

    fn add_device(&mut self, device: Arc<dyn Device>) {
        let serial = device.serial().to_string();
        if self.workers.contains_key(&serial) {
            warn!(pool = %self.pool_id, device = %serial, "duplicate device ignored");
            return;
        }
        info!(pool = %self.pool_id, device = %serial, "device added");

        self.last_device = Some(device.info().clone());
        let token = CancellationToken::new();
        self.workers.insert(serial, token.clone());
        self.join_set.spawn(worker::run_device(
            device,
            self.queue.clone(),
            self.timeouts,
            token,
        ));

        if self.state == PoolState::AwaitingDevices {
            self.state = PoolState::Active;
        }
    }

    fn remove_device(&mut self, serial: &str) {
        match self.workers.get(serial) {
            Some(token) => {
                info!(pool = %self.pool_id, device = %serial, "device removal requested");
                token.cancel();
            }
            None => debug!(pool = %self.pool_id, device = %serial, "removal for unknown device"),
        }
    }

    fn handle_worker_exit(&mut self, exit: Result<WorkerExit, JoinError>) {
        match exit {
            Ok(WorkerExit::Drained { serial }) => {
                debug!(pool = %self.pool_id, device = %serial, "worker drained the queue");
                self.workers.remove(&serial);
            }
            Ok(WorkerExit::Removed { serial }) => {
                info!(pool = %self.pool_id, device = %serial, "worker stopped after removal");
                self.workers.remove(&serial);
            }
            Ok(WorkerExit::DeviceLost { serial, error }) => {
                warn!(pool = %self.pool_id, device = %serial, %error, "device lost");
                self.workers.remove(&serial);
            }
            Err(join_error) => {
                error!(pool = %self.pool_id, %join_error, "worker task failed");
                if self.join_set.is_empty() {
                    self.workers.clear();
                }
            }
        }
    }

    /// Decides whether the pool is finished after a worker exited.
    async fn check_done(&mut self) -> Option<Option<String>> {
        if self.queue.is_exhausted().await {
            if self.join_set.is_empty() {
                return Some(None);
            }
            // Remaining workers will observe exhaustion and drain.
            return None;
        }
        if self.join_set.is_empty() {
            let failed = self
                .queue
                .terminate_residual("no devices available", self.last_device.clone())
                .await;
            warn!(pool = %self.pool_id, failed, "all devices lost with tests remaining");
            return Some(Some(format!(
                "no devices available; {} tests marked failed",
                failed
            )));
        }
        None
    }

    async fn stop(&mut self) -> Option<String> {
        debug!(pool = %self.pool_id, "pool stop requested");
        for token in self.workers.values() {
            token.cancel();
        }
        while self.join_set.join_next().await.is_some() {}
        self.workers.clear();

        if self.queue.is_exhausted().await {
            None
        } else {
            let failed = self.queue.terminate_residual("run stopped", self.last_device.clone()).await;
            Some(format!("stopped with {} tests unfinished", failed))
        }
    }

    async fn build_summary(self, error: Option<String>) -> PoolSummary {
        let report = self.queue.report().await;

        let mut devices: Vec<DeviceSummary> = Vec::new();
        let mut device_entry = |devices: &mut Vec<DeviceSummary>, info: &DeviceInfo| -> usize {
            match devices.iter().position(|d| d.device.serial == info.serial) {
                Some(pos) => pos,
                None => {
                    devices.push(DeviceSummary {
                        device: info.clone(),
                        passed: Vec::new(),
                        failed: Vec::new(),
                        ignored: Vec::new(),
                        uncompleted: Vec::new(),
                    });
                    devices.len() - 1
                }
            }
        };

        for result in report.terminal {
            let pos = device_entry(&mut devices, &result.device);
            match result.status {
                TestStatus::Passed => devices[pos].passed.push(result),
                TestStatus::Failure => devices[pos].failed.push(result),
                TestStatus::Ignored => devices[pos].ignored.push(result),
                TestStatus::Incomplete => devices[pos].uncompleted.push(result),
            }
        }
        for result in report.uncompleted {
            let pos = device_entry(&mut devices, &result.device);
            devices[pos].uncompleted.push(result);
        }

        PoolSummary {
            pool_id: self.pool_id,
            error,
            verdicts: report.verdicts,
            devices,
        }
    }
}
