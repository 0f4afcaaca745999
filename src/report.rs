//! Run summary output.
//!
//! Rendering full reports (HTML, JUnit) is a downstream concern; this
//! module covers what the CLI itself needs: a styled console summary, the
//! machine-readable `summary.json` artifact, and a live progress display
//! driven by the engine's progress counters.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use indicatif::{MultiProgress, ProgressBar};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::device::DevicePoolId;
use crate::executor::progress::ProgressReporter;
use crate::executor::RunSummary;

/// Prints a summary of the run to the console.
///
/// Displays per-pool verdict counts and per-device breakdowns with colored
/// totals at the end.
pub fn print_summary(summary: &RunSummary) {
    println!();
    println!("Run Results:");

    for pool in &summary.pools {
        println!("  pool {}", console::style(&pool.pool_id).bold());
        println!("    Passed:  {}", console::style(pool.passed_count()).green());
        println!("    Failed:  {}", console::style(pool.failed_count()).red());

        for device in &pool.devices {
            println!(
                "    {} — {} passed, {} failed, {} ignored, {} uncompleted",
                device.device,
                device.passed.len(),
                device.failed.len(),
                device.ignored.len(),
                device.uncompleted.len(),
            );
        }

        if let Some(error) = &pool.error {
            println!("    {}", console::style(error).red().bold());
        }
    }

    println!("  Duration: {:?}", summary.duration);
    println!();
    if summary.is_successful() {
        println!("{}", console::style("All tests passed!").green().bold());
    } else if summary.pools.iter().any(|p| p.error.is_some()) {
        println!(
            "{}",
            console::style("Some pools did not complete.").red().bold()
        );
    } else {
        println!("{}", console::style("Some tests failed.").red().bold());
    }
}

/// Writes the machine-readable run summary to `<output_dir>/summary.json`.
///
/// Returns the path written.
pub fn write_json_summary(summary: &RunSummary, output_dir: &Path) -> Result<PathBuf> {
    std::fs::create_dir_all(output_dir)
        .with_context(|| format!("Failed to create output dir: {}", output_dir.display()))?;

    let path = output_dir.join("summary.json");
    let content = serde_json::to_string_pretty(summary).context("Failed to serialize summary")?;
    std::fs::write(&path, content)
        .with_context(|| format!("Failed to write summary: {}", path.display()))?;
    Ok(path)
}

/// A running live progress display; call [`finish`](Self::finish) to stop it.
pub struct ProgressDisplay {
    stop: CancellationToken,
    handle: JoinHandle<()>,
}

impl ProgressDisplay {
    /// Stops the display and clears its bars.
    pub async fn finish(self) {
        self.stop.cancel();
        let _ = self.handle.await;
    }
}

/// Spawns a task rendering one spinner per pool from the progress counters.
pub fn spawn_progress_display(progress: Arc<ProgressReporter>) -> ProgressDisplay {
    let stop = CancellationToken::new();
    let token = stop.clone();

    let handle = tokio::spawn(async move {
        let multi = MultiProgress::new();
        let mut bars: HashMap<DevicePoolId, ProgressBar> = HashMap::new();
        let mut ticker = tokio::time::interval(Duration::from_millis(200));

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {}
            }

            for (pool_id, counters) in progress.snapshot() {
                let bar = bars
                    .entry(pool_id.clone())
                    .or_insert_with(|| multi.add(ProgressBar::new_spinner()));
                bar.set_message(format!(
                    "pool {}: {} started, {} passed, {} failed, {} ignored",
                    pool_id, counters.started, counters.passed, counters.failed, counters.ignored
                ));
                bar.tick();
            }
        }

        for bar in bars.values() {
            bar.finish_and_clear();
        }
    });

    ProgressDisplay { stop, handle }
}
