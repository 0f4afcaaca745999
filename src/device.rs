//! Device capability traits and types.
//!
//! This module defines the narrow interface through which the engine talks
//! to execution devices — phones, emulators, simulators. Everything
//! platform-specific (connection transports, install/uninstall, log capture,
//! screen recording) lives behind [`Device`]; the engine only sees
//! capabilities.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     device source (vendor)                   │
//! │                                                              │
//! │  DeviceEvent::Added(device) ──► engine                      │
//! │  DeviceEvent::Removed(serial) ─► engine                     │
//! └────────────────────────────────┼────────────────────────────┘
//!                                  ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                          Device                              │
//! │                                                              │
//! │  prepare() ─► execute(batch) ─► BatchEventStream ─► dispose()│
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Error Handling
//!
//! Device operations return [`DeviceResult<T>`] wrapping [`DeviceError`].
//! Transient errors (a flaky install, a dropped shell) are the vendor's
//! concern to retry internally; any error that reaches the engine means the
//! device is treated as lost for the remainder of the run.

use std::fmt;
use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};

use crate::discovery::TestCase;
use crate::executor::{TestBatch, TestStatus};

/// Result type for device operations.
pub type DeviceResult<T> = Result<T, DeviceError>;

/// Errors that can occur while driving a device.
///
/// Any of these surfacing to the engine removes the device from its pool;
/// the distinction exists for logging and for vendors that want to map
/// their transport errors precisely.
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    /// Device preparation (clearing state, starting log capture) failed.
    #[error("Failed to prepare device: {0}")]
    PrepareFailed(String),

    /// A batch could not be started on the device.
    ///
    /// A test that runs and fails is NOT this error — this means the
    /// execution itself could not begin or continue.
    #[error("Failed to execute batch: {0}")]
    ExecFailed(String),

    /// The connection to the device was lost.
    #[error("Device connection lost: {0}")]
    ConnectionLost(String),

    /// A device operation timed out at the transport level.
    #[error("Device timeout: {0}")]
    Timeout(String),

    /// The device reported itself unhealthy.
    #[error("Device unhealthy: {0}")]
    Unhealthy(String),

    /// I/O error talking to the device.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Vendor-specific error not covered by other variants.
    #[error("Device error: {0}")]
    Other(#[from] anyhow::Error),
}

/// Opaque name identifying a device pool; stable for the run's lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DevicePoolId(pub String);

impl DevicePoolId {
    /// Creates a pool id from a name.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }
}

impl fmt::Display for DevicePoolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Optional capabilities a device advertises.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceFeature {
    /// The device can record the screen during test execution.
    Video,
    /// The device can capture screenshots.
    Screenshot,
}

/// Static identity of a device.
///
/// This is the part of a device the engine is allowed to inspect: identity
/// for logging and summaries, platform data for pooling decisions, and the
/// advertised feature set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// Unique serial of the device.
    pub serial: String,

    /// Device model name (e.g. "Pixel 7", "iPhone 15").
    pub model: String,

    /// Operating system version string.
    pub os_version: String,

    /// Numeric API / SDK level.
    pub api_level: u32,

    /// Capabilities this device advertises.
    #[serde(default)]
    pub features: Vec<DeviceFeature>,
}

impl fmt::Display for DeviceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}, {})", self.serial, self.model, self.os_version)
    }
}

/// One observation from a running batch.
///
/// Devices report progress as a stream of events; the worker uses them to
/// assemble per-test results and to reset its inactivity timeout. A test
/// that never produces a `TestEnded` before the stream finishes is treated
/// as uncompleted.
#[derive(Debug, Clone)]
pub enum BatchEvent {
    /// A test began executing.
    TestStarted {
        /// The test that started.
        test: TestCase,
    },

    /// A test finished with the given status.
    TestEnded {
        /// The test that finished.
        test: TestCase,
        /// Terminal status the device observed for this attempt.
        status: TestStatus,
        /// Failure trace, if the device captured one.
        trace: Option<String>,
    },

    /// The batch ran to completion; no further events follow.
    BatchFinished,
}

/// A stream of batch events, ending with [`BatchEvent::BatchFinished`] on a
/// clean run. A mid-stream `Err` means the device was lost.
pub type BatchEventStream = Pin<Box<dyn Stream<Item = DeviceResult<BatchEvent>> + Send>>;

/// Capability interface of one execution device.
///
/// One worker task owns each device for the duration of a run; no two
/// batches execute concurrently on the same device. Implementations may
/// still be shared for read access (`Sync`) because the engine holds them
/// behind `Arc`.
#[async_trait]
pub trait Device: Send + Sync {
    /// Static identity of this device.
    fn info(&self) -> &DeviceInfo;

    /// Serial shorthand, used in logs and summaries.
    fn serial(&self) -> &str {
        &self.info().serial
    }

    /// Returns `true` if the device currently looks operational.
    async fn healthy(&self) -> bool;

    /// Prepares the device for a run: clear remote state, start log
    /// capture, install the component under test.
    ///
    /// Vendors retry transient failures internally; an error here means the
    /// device cannot participate and will be removed from its pool.
    async fn prepare(&self) -> DeviceResult<()>;

    /// Starts executing a batch and returns the event stream for it.
    ///
    /// The stream yields one `TestStarted`/`TestEnded` pair per test the
    /// device actually ran, then `BatchFinished`. The engine enforces batch
    /// and inactivity timeouts on top of this stream.
    async fn execute(&self, batch: &TestBatch) -> DeviceResult<BatchEventStream>;

    /// Releases everything the device holds for this run.
    ///
    /// Called exactly once per worker on every exit path, normal or not.
    /// Must be idempotent and must not fail.
    async fn dispose(&self);
}

/// A change in the set of available devices.
///
/// Vendors feed these into the scheduler as devices come and go; the
/// channel closing means no further devices will appear.
pub enum DeviceEvent {
    /// A device became available.
    Added(std::sync::Arc<dyn Device>),
    /// The device with this serial disappeared.
    Removed(String),
}

impl fmt::Debug for DeviceEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceEvent::Added(d) => write!(f, "Added({})", d.serial()),
            DeviceEvent::Removed(s) => write!(f, "Removed({})", s),
        }
    }
}
