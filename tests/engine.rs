//! End-to-end engine scenarios on simulated devices.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use stampede::analytics::MemoryTracker;
use stampede::config::{RunConfig, StrictRunFilterConfig};
use stampede::device::DeviceEvent;
use stampede::discovery::{ComponentRef, TestCase};
use stampede::executor::Scheduler;
use stampede::sim::{SimDevice, SimDeviceSpec};
use stampede::strategy::retry::FixedQuotaRetry;
use stampede::strategy::Strategies;

fn suite(class: &str, methods: &[&str]) -> Vec<TestCase> {
    methods
        .iter()
        .map(|m| TestCase::new("com.example", class, *m, ComponentRef::new("app")))
        .collect()
}

fn device_stream(specs: Vec<SimDeviceSpec>) -> mpsc::UnboundedReceiver<DeviceEvent> {
    let (tx, rx) = mpsc::unbounded_channel();
    for spec in specs {
        tx.send(DeviceEvent::Added(Arc::new(SimDevice::new(spec))))
            .unwrap();
    }
    rx
}

async fn run(
    config: &RunConfig,
    strategies: Strategies,
    tests: Vec<TestCase>,
    devices: mpsc::UnboundedReceiver<DeviceEvent>,
    tracker: Arc<MemoryTracker>,
) -> stampede::RunSummary {
    let scheduler = Scheduler::new(config, strategies, tracker).unwrap();
    scheduler
        .execute(tests, devices, CancellationToken::new())
        .await
        .unwrap()
}

#[tokio::test]
async fn three_tests_one_device_complete_accounting() {
    let tests = suite("SmokeTest", &["a", "b", "c"]);
    let devices = device_stream(vec![SimDeviceSpec::healthy("sim-001")]);
    let tracker = Arc::new(MemoryTracker::new());

    let summary = run(
        &RunConfig::default(),
        Strategies::default(),
        tests.clone(),
        devices,
        tracker,
    )
    .await;

    assert_eq!(summary.pools.len(), 1);
    let pool = &summary.pools[0];
    assert!(pool.error.is_none());

    // exactly one verdict per discovered test, no duplicates, no omissions
    assert_eq!(pool.verdicts.len(), 3);
    let seen: HashSet<_> = pool
        .verdicts
        .iter()
        .map(|v| v.test.fully_qualified_name())
        .collect();
    let expected: HashSet<_> = tests.iter().map(|t| t.fully_qualified_name()).collect();
    assert_eq!(seen, expected);

    assert!(summary.is_successful());
    assert_eq!(summary.passed(), 3);
}

#[tokio::test]
async fn surviving_device_drains_queue_after_device_death() {
    let tests = suite("FailoverTest", &["a", "b", "c", "d"]);

    let mut dying = SimDeviceSpec::healthy("sim-001");
    dying.crash_after_batches = Some(1);
    let devices = device_stream(vec![dying, SimDeviceSpec::healthy("sim-002")]);

    let summary = run(
        &RunConfig::default(),
        Strategies::default(),
        tests.clone(),
        devices,
        Arc::new(MemoryTracker::new()),
    )
    .await;

    let pool = &summary.pools[0];
    assert!(pool.error.is_none(), "pool must survive one device loss");
    assert_eq!(pool.verdicts.len(), 4);
    assert!(summary.is_successful());

    // the batch abandoned in the crash shows up as an uncompleted attempt
    let uncompleted: usize = pool.devices.iter().map(|d| d.uncompleted.len()).sum();
    assert!(uncompleted >= 1);
}

#[tokio::test]
async fn uncompleted_quota_bounds_a_hanging_test() {
    let tests = suite("HangTest", &["stuck"]);

    let mut spec = SimDeviceSpec::healthy("sim-001");
    spec.hang_tests = vec!["HangTest#stuck".to_string()];
    let devices = device_stream(vec![spec]);

    let config = RunConfig {
        test_output_timeout_millis: 50,
        uncompleted_test_retry_quota: Some(2),
        ..RunConfig::default()
    };
    let summary = run(
        &config,
        Strategies::default(),
        tests,
        devices,
        Arc::new(MemoryTracker::new()),
    )
    .await;

    let pool = &summary.pools[0];
    assert!(pool.error.is_none());
    assert_eq!(pool.verdicts.len(), 1);
    assert!(!pool.verdicts[0].is_passed);

    // the attempt count stops at the quota
    let uncompleted: usize = pool.devices.iter().map(|d| d.uncompleted.len()).sum();
    assert_eq!(uncompleted, 2);
}

#[tokio::test]
async fn all_devices_lost_fails_residual_tests() {
    let tests = suite("ResidualTest", &["a", "b", "c"]);

    let mut spec = SimDeviceSpec::healthy("sim-001");
    spec.crash_after_batches = Some(1);
    let devices = device_stream(vec![spec]);

    let summary = run(
        &RunConfig::default(),
        Strategies::default(),
        tests.clone(),
        devices,
        Arc::new(MemoryTracker::new()),
    )
    .await;

    let pool = &summary.pools[0];
    assert!(
        pool.error.as_deref().is_some_and(|e| e.contains("no devices available")),
        "expected residual failure, got {:?}",
        pool.error
    );

    // every test is still accounted for
    assert_eq!(pool.verdicts.len(), 3);
    assert_eq!(pool.verdicts.iter().filter(|v| v.is_passed).count(), 1);
    assert!(!summary.is_successful());
    assert_eq!(summary.exit_code(true), 1);
}

#[tokio::test]
async fn unhealthy_device_does_not_sink_the_pool() {
    let tests = suite("HealthTest", &["a", "b"]);

    let mut sick = SimDeviceSpec::healthy("sim-001");
    sick.fail_prepare = true;
    let devices = device_stream(vec![sick, SimDeviceSpec::healthy("sim-002")]);

    let summary = run(
        &RunConfig::default(),
        Strategies::default(),
        tests,
        devices,
        Arc::new(MemoryTracker::new()),
    )
    .await;

    let pool = &summary.pools[0];
    assert!(pool.error.is_none());
    assert_eq!(pool.verdicts.len(), 2);
    assert!(summary.is_successful());
}

#[tokio::test]
async fn flaky_test_passes_with_retry_policy() {
    let tests = suite("FlakyTest", &["wobble"]);

    let mut spec = SimDeviceSpec::healthy("sim-001");
    spec.flaky_tests = vec!["FlakyTest#wobble".to_string()];
    let devices = device_stream(vec![spec]);

    let tracker = Arc::new(MemoryTracker::new());
    let strategies = Strategies {
        retry: Arc::new(FixedQuotaRetry::new(10, 1)),
        ..Strategies::default()
    };
    let summary = run(&RunConfig::default(), strategies, tests, devices, tracker.clone()).await;

    assert!(summary.is_successful());
    let finals: Vec<bool> = tracker.events().iter().map(|e| e.is_final).collect();
    assert_eq!(finals, vec![false, true]);
}

#[tokio::test]
async fn strict_run_window_executes_and_judges_all_runs() {
    let mut tests = suite("StrictTest", &["pinned"]);
    tests.extend(suite("PlainTest", &["ordinary"]));

    let devices = device_stream(vec![SimDeviceSpec::healthy("sim-001")]);
    let tracker = Arc::new(MemoryTracker::new());

    let config = RunConfig {
        strict_run_filter: Some(StrictRunFilterConfig {
            filter: vec!["^StrictTest$".to_string()],
            runs: 3,
        }),
        ..RunConfig::default()
    };
    let summary = run(
        &config,
        Strategies::default(),
        tests,
        devices,
        tracker.clone(),
    )
    .await;

    let pool = &summary.pools[0];
    assert_eq!(pool.verdicts.len(), 2);
    assert!(summary.is_successful());

    // the strict test ran three times, the plain one once
    let strict_events: Vec<bool> = tracker
        .events()
        .iter()
        .filter(|e| e.result.test.class == "StrictTest")
        .map(|e| e.is_final)
        .collect();
    assert_eq!(strict_events, vec![false, false, true]);
    assert!(tracker
        .events()
        .iter()
        .filter(|e| e.result.test.class == "StrictTest")
        .all(|e| e.result.is_strict_run));

    let plain_events: Vec<bool> = tracker
        .events()
        .iter()
        .filter(|e| e.result.test.class == "PlainTest")
        .map(|e| e.is_final)
        .collect();
    assert_eq!(plain_events, vec![true]);
}

#[tokio::test]
async fn removed_device_is_cancelled_and_pool_accounts_residual() {
    let tests = suite("RemovalTest", &["a", "b"]);

    let mut spec = SimDeviceSpec::healthy("sim-001");
    spec.test_duration = Duration::from_millis(200);
    let (tx, rx) = mpsc::unbounded_channel();
    tx.send(DeviceEvent::Added(Arc::new(SimDevice::new(spec))))
        .unwrap();
    tx.send(DeviceEvent::Removed("sim-001".to_string())).unwrap();
    drop(tx);

    let summary = run(
        &RunConfig::default(),
        Strategies::default(),
        tests,
        rx,
        Arc::new(MemoryTracker::new()),
    )
    .await;

    let pool = &summary.pools[0];
    assert!(pool.error.is_some());
    assert_eq!(pool.verdicts.len(), 2);
    assert!(pool.verdicts.iter().all(|v| !v.is_passed));
}

#[tokio::test]
async fn os_version_pooling_creates_separate_pools() {
    use stampede::strategy::pooling::OsVersionPooling;

    let tests = suite("PoolingTest", &["a", "b"]);

    let mut old = SimDeviceSpec::healthy("sim-001");
    old.info.os_version = "12".to_string();
    let mut new = SimDeviceSpec::healthy("sim-002");
    new.info.os_version = "13".to_string();
    let devices = device_stream(vec![old, new]);

    let strategies = Strategies {
        pooling: Arc::new(OsVersionPooling),
        ..Strategies::default()
    };
    let summary = run(
        &RunConfig::default(),
        strategies,
        tests,
        devices,
        Arc::new(MemoryTracker::new()),
    )
    .await;

    // parallel sharding: both pools run the full suite independently
    assert_eq!(summary.pools.len(), 2);
    for pool in &summary.pools {
        assert!(pool.error.is_none());
        assert_eq!(pool.verdicts.len(), 2);
    }
    assert_eq!(summary.passed(), 4);
}
