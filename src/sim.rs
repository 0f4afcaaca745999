//! Simulated devices.
//!
//! An in-process implementation of the [`Device`] capability interface,
//! standing in for platform vendors. The simulation is deterministic for a
//! given seed and scriptable enough to reproduce the interesting failure
//! modes: always-failing tests, flaky tests that pass on a later attempt,
//! hanging tests that trip the inactivity timeout, and devices that crash
//! mid-run.
//!
//! The CLI builds a fleet from `[fleet]` configuration; the integration
//! tests construct [`SimDeviceSpec`]s directly.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::debug;

use crate::config::SimFleetConfig;
use crate::device::{
    BatchEvent, BatchEventStream, Device, DeviceError, DeviceEvent, DeviceFeature, DeviceInfo,
    DeviceResult,
};
use crate::executor::{TestBatch, TestStatus};

/// Behavior script for one simulated device.
#[derive(Debug, Clone)]
pub struct SimDeviceSpec {
    /// The device's identity.
    pub info: DeviceInfo,

    /// Base duration of one test.
    pub test_duration: Duration,

    /// Maximum random extra latency per test.
    pub jitter: Duration,

    /// Seed for this device's randomness.
    pub seed: u64,

    /// Substrings of qualified names that always fail.
    pub fail_tests: Vec<String>,

    /// Substrings of qualified names that fail on the first attempt on
    /// this device, then pass.
    pub flaky_tests: Vec<String>,

    /// Substrings of qualified names that start but never finish.
    pub hang_tests: Vec<String>,

    /// The device dies after completing this many batches.
    pub crash_after_batches: Option<usize>,

    /// Preparation always fails on this device.
    pub fail_prepare: bool,
}

impl SimDeviceSpec {
    /// A well-behaved device with the given serial.
    pub fn healthy(serial: impl Into<String>) -> Self {
        Self {
            info: DeviceInfo {
                serial: serial.into(),
                model: "sim-device".to_string(),
                os_version: "13".to_string(),
                api_level: 33,
                features: vec![DeviceFeature::Screenshot],
            },
            test_duration: Duration::from_millis(1),
            jitter: Duration::ZERO,
            seed: 0,
            fail_tests: Vec::new(),
            flaky_tests: Vec::new(),
            hang_tests: Vec::new(),
            crash_after_batches: None,
            fail_prepare: false,
        }
    }
}

enum Step {
    Emit(BatchEvent, Duration),
    Die(String),
    Hang,
}

/// A simulated device.
pub struct SimDevice {
    spec: SimDeviceSpec,
    rng: Mutex<StdRng>,
    batches_run: AtomicUsize,
    attempts: Mutex<HashMap<String, usize>>,
}

impl SimDevice {
    /// Creates a device from its behavior script.
    pub fn new(spec: SimDeviceSpec) -> Self {
        let rng = StdRng::seed_from_u64(spec.seed);
        Self {
            spec,
            rng: Mutex::new(rng),
            batches_run: AtomicUsize::new(0),
            attempts: Mutex::new(HashMap::new()),
        }
    }

    fn matches(patterns: &[String], name: &str) -> bool {
        patterns.iter().any(|p| name.contains(p))
    }

    fn latency(&self) -> Duration {
        let jitter_ms = self.spec.jitter.as_millis() as u64;
        let extra = if jitter_ms > 0 {
            self.rng
                .lock()
                .expect("rng lock poisoned")
                .gen_range(0..=jitter_ms)
        } else {
            0
        };
        self.spec.test_duration + Duration::from_millis(extra)
    }

    fn plan(&self, batch: &TestBatch) -> Vec<Step> {
        let completed = self.batches_run.fetch_add(1, Ordering::SeqCst);
        let crash = self
            .spec
            .crash_after_batches
            .is_some_and(|limit| completed >= limit);

        let mut steps = Vec::new();
        for test in &batch.tests {
            let name = test.fully_qualified_name();
            let delay = self.latency();

            if crash {
                steps.push(Step::Emit(
                    BatchEvent::TestStarted { test: test.clone() },
                    delay,
                ));
                steps.push(Step::Die(format!(
                    "simulated crash on {}",
                    self.spec.info.serial
                )));
                return steps;
            }

            steps.push(Step::Emit(
                BatchEvent::TestStarted { test: test.clone() },
                delay,
            ));

            if Self::matches(&self.spec.hang_tests, &name) {
                steps.push(Step::Hang);
                return steps;
            }

            let attempt = {
                let mut attempts = self.attempts.lock().expect("attempts lock poisoned");
                let count = attempts.entry(name.clone()).or_insert(0);
                *count += 1;
                *count
            };

            let status = if test.has_metadata("ignored") {
                TestStatus::Ignored
            } else if Self::matches(&self.spec.fail_tests, &name)
                || (Self::matches(&self.spec.flaky_tests, &name) && attempt == 1)
            {
                TestStatus::Failure
            } else {
                TestStatus::Passed
            };
            let trace = (status == TestStatus::Failure)
                .then(|| format!("simulated assertion failure in {}", name));

            steps.push(Step::Emit(
                BatchEvent::TestEnded {
                    test: test.clone(),
                    status,
                    trace,
                },
                Duration::ZERO,
            ));
        }
        steps.push(Step::Emit(BatchEvent::BatchFinished, Duration::ZERO));
        steps
    }
}

#[async_trait]
impl Device for SimDevice {
    fn info(&self) -> &DeviceInfo {
        &self.spec.info
    }

    async fn healthy(&self) -> bool {
        !self.spec.fail_prepare
    }

    async fn prepare(&self) -> DeviceResult<()> {
        if self.spec.fail_prepare {
            return Err(DeviceError::PrepareFailed(format!(
                "simulated preparation failure on {}",
                self.spec.info.serial
            )));
        }
        Ok(())
    }

    async fn execute(&self, batch: &TestBatch) -> DeviceResult<BatchEventStream> {
        let steps = self.plan(batch);
        let (tx, rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            for step in steps {
                match step {
                    Step::Emit(event, delay) => {
                        if delay > Duration::ZERO {
                            tokio::time::sleep(delay).await;
                        }
                        if tx.send(Ok(event)).is_err() {
                            return;
                        }
                    }
                    Step::Die(reason) => {
                        let _ = tx.send(Err(DeviceError::ConnectionLost(reason)));
                        return;
                    }
                    Step::Hang => {
                        // Keep the stream open without producing anything
                        // until the consumer gives up.
                        tx.closed().await;
                        return;
                    }
                }
            }
        });

        Ok(Box::pin(UnboundedReceiverStream::new(rx)))
    }

    async fn dispose(&self) {
        debug!(device = %self.spec.info.serial, "sim device disposed");
    }
}

/// Brings up the configured fleet and returns the device event stream.
///
/// Devices arrive one by one (with the configured delay between them); the
/// channel closes once the whole fleet has been announced.
pub fn spawn_fleet(config: &SimFleetConfig) -> mpsc::UnboundedReceiver<DeviceEvent> {
    let specs = build_specs(config);
    let arrival_delay = Duration::from_millis(config.arrival_delay_ms);
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        for (i, spec) in specs.into_iter().enumerate() {
            if i > 0 && arrival_delay > Duration::ZERO {
                tokio::time::sleep(arrival_delay).await;
            }
            let device: Arc<dyn Device> = Arc::new(SimDevice::new(spec));
            if tx.send(DeviceEvent::Added(device)).is_err() {
                return;
            }
        }
    });

    rx
}

fn build_specs(config: &SimFleetConfig) -> Vec<SimDeviceSpec> {
    (0..config.devices.max(1))
        .map(|i| {
            let serial = format!("sim-{:03}", i + 1);
            let os_version = if config.os_versions.is_empty() {
                "13".to_string()
            } else {
                config.os_versions[i % config.os_versions.len()].clone()
            };
            SimDeviceSpec {
                info: DeviceInfo {
                    serial: serial.clone(),
                    model: "sim-device".to_string(),
                    os_version,
                    api_level: 33,
                    features: vec![DeviceFeature::Screenshot],
                },
                test_duration: Duration::from_millis(config.test_duration_ms),
                jitter: Duration::from_millis(config.jitter_ms),
                seed: config.seed.wrapping_add(i as u64),
                fail_tests: config.fail_tests.clone(),
                flaky_tests: config.flaky_tests.clone(),
                hang_tests: config.hang_tests.clone(),
                crash_after_batches: config
                    .crash_serials
                    .contains(&serial)
                    .then_some(config.crash_after_batches),
                fail_prepare: false,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::{ComponentRef, TestCase};
    use futures::StreamExt;

    fn batch(methods: &[&str]) -> TestBatch {
        TestBatch::new(
            methods
                .iter()
                .map(|m| TestCase::new("com.example", "SimTest", *m, ComponentRef::new("app")))
                .collect(),
            ComponentRef::new("app"),
        )
    }

    async fn drain(device: &SimDevice, batch: &TestBatch) -> Vec<BatchEvent> {
        let mut stream = device.execute(batch).await.unwrap();
        let mut events = Vec::new();
        while let Some(item) = stream.next().await {
            events.push(item.unwrap());
        }
        events
    }

    #[tokio::test]
    async fn test_healthy_device_passes_everything() {
        let device = SimDevice::new(SimDeviceSpec::healthy("sim-1"));
        let batch = batch(&["a", "b"]);

        let events = drain(&device, &batch).await;
        let ended: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                BatchEvent::TestEnded { status, .. } => Some(*status),
                _ => None,
            })
            .collect();
        assert_eq!(ended, vec![TestStatus::Passed, TestStatus::Passed]);
        assert!(matches!(events.last(), Some(BatchEvent::BatchFinished)));
    }

    #[tokio::test]
    async fn test_flaky_test_fails_then_passes() {
        let mut spec = SimDeviceSpec::healthy("sim-1");
        spec.flaky_tests = vec!["SimTest#wobble".to_string()];
        let device = SimDevice::new(spec);

        let first = drain(&device, &batch(&["wobble"])).await;
        let second = drain(&device, &batch(&["wobble"])).await;

        let status_of = |events: &[BatchEvent]| {
            events.iter().find_map(|e| match e {
                BatchEvent::TestEnded { status, .. } => Some(*status),
                _ => None,
            })
        };
        assert_eq!(status_of(&first), Some(TestStatus::Failure));
        assert_eq!(status_of(&second), Some(TestStatus::Passed));
    }

    #[tokio::test]
    async fn test_crashing_device_errors_mid_stream() {
        let mut spec = SimDeviceSpec::healthy("sim-1");
        spec.crash_after_batches = Some(0);
        let device = SimDevice::new(spec);

        let mut stream = device.execute(&batch(&["a"])).await.unwrap();
        let first = stream.next().await.unwrap();
        assert!(first.is_ok());
        let second = stream.next().await.unwrap();
        assert!(matches!(second, Err(DeviceError::ConnectionLost(_))));
    }

    #[tokio::test]
    async fn test_fleet_announces_configured_devices() {
        let config = SimFleetConfig {
            devices: 3,
            ..SimFleetConfig::default()
        };
        let mut rx = spawn_fleet(&config);

        let mut serials = Vec::new();
        while let Some(event) = rx.recv().await {
            match event {
                DeviceEvent::Added(device) => serials.push(device.serial().to_string()),
                DeviceEvent::Removed(_) => {}
            }
        }
        assert_eq!(serials, vec!["sim-001", "sim-002", "sim-003"]);
    }
}
