//! stampede: distributes test suites across a dynamic fleet of devices.
//!
//! This crate schedules a discovered set of tests onto a heterogeneous,
//! dynamically changing pool of execution devices, runs them with bounded
//! concurrency, compensates for device loss and test flakiness, and
//! produces a complete accounting of every test's final outcome — even
//! when individual devices die mid-run.
//!
//! # Architecture
//!
//! The main components are:
//!
//! - **Devices**: the capability interface vendors implement ([`device`])
//! - **Discovery**: the test identity model and parsers ([`discovery`])
//! - **Strategies**: pluggable scheduling policies ([`strategy`])
//! - **Executor**: scheduler, pools, queues and workers ([`executor`])
//! - **Analytics**: outcome sinks ([`analytics`])
//! - **Report**: summary output ([`report`])
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use stampede::analytics::LogTracker;
//! use stampede::config::load_config;
//! use stampede::executor::Scheduler;
//! use stampede::strategy::Strategies;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = load_config(std::path::Path::new("stampede.toml"))?;
//!     let strategies = Strategies::from_config(&config.strategy);
//!     let scheduler = Scheduler::new(&config.run, strategies, Arc::new(LogTracker))?;
//!     // ... discover tests, wire a device source, call scheduler.execute ...
//!     Ok(())
//! }
//! ```

pub mod analytics;
pub mod config;
pub mod device;
pub mod discovery;
pub mod executor;
pub mod report;
pub mod sim;
pub mod strategy;

// Re-export commonly used types
pub use analytics::Tracker;
pub use config::{load_config, Config};
pub use device::{Device, DeviceEvent, DeviceInfo, DevicePoolId};
pub use discovery::{TestCase, TestParser};
pub use executor::{RunSummary, Scheduler, TestResult, TestStatus};
pub use strategy::Strategies;
