//! stampede CLI - distributes test suites across a fleet of devices.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use stampede::analytics::LogTracker;
use stampede::config::{self, FleetConfig, SuiteConfig};
use stampede::discovery::manifest::ManifestTestParser;
use stampede::discovery::TestParser;
use stampede::executor::Scheduler;
use stampede::report;
use stampede::sim;
use stampede::strategy::Strategies;

#[derive(Parser)]
#[command(name = "stampede")]
#[command(about = "Distributes test suites across a fleet of devices", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "stampede.toml")]
    config: PathBuf,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the suite
    Run {
        /// Override the test manifest path
        #[arg(long)]
        manifest: Option<PathBuf>,

        /// Disable the live progress display
        #[arg(long)]
        no_progress: bool,
    },

    /// Validate the configuration file
    Validate,

    /// Write a starter configuration and test manifest
    Init,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging; RUST_LOG overrides the verbosity flag.
    let default_filter = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Run {
            manifest,
            no_progress,
        } => run(&cli.config, manifest, no_progress).await,
        Commands::Validate => validate(&cli.config),
        Commands::Init => init(&cli.config),
    }
}

async fn run(
    config_path: &Path,
    manifest_override: Option<PathBuf>,
    no_progress: bool,
) -> Result<()> {
    let config = config::load_config(config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;
    info!("Loaded configuration from {}", config_path.display());

    // Discover tests
    let SuiteConfig::Manifest { path } = &config.suite;
    let manifest_path = manifest_override.unwrap_or_else(|| path.clone());
    let tests = ManifestTestParser::new()
        .extract(&manifest_path)
        .await
        .with_context(|| format!("Failed to read manifest {}", manifest_path.display()))?;
    info!("Discovered {} tests", tests.len());

    // Wire the engine
    let strategies = Strategies::from_config(&config.strategy);
    let scheduler = Scheduler::new(&config.run, strategies, Arc::new(LogTracker))?;

    let FleetConfig::Simulated(fleet) = &config.fleet;
    let devices = sim::spawn_fleet(fleet);

    // Ctrl-C terminates the pools instead of killing the process outright,
    // so the run still produces a complete summary.
    let stop = CancellationToken::new();
    {
        let stop = stop.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                stop.cancel();
            }
        });
    }

    let display = (!no_progress).then(|| report::spawn_progress_display(scheduler.progress()));
    let summary = scheduler.execute(tests, devices, stop).await?;
    if let Some(display) = display {
        display.finish().await;
    }

    let summary_path = report::write_json_summary(&summary, &config.output.output_dir)?;
    info!("Summary written to {}", summary_path.display());
    report::print_summary(&summary);

    std::process::exit(summary.exit_code(config.run.ignore_failures));
}

fn validate(config_path: &Path) -> Result<()> {
    let config = config::load_config(config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    let SuiteConfig::Manifest { path } = &config.suite;
    println!("Configuration OK");
    println!("  suite manifest: {}", path.display());
    let FleetConfig::Simulated(fleet) = &config.fleet;
    println!("  fleet: {} simulated devices", fleet.devices);
    println!("  batch timeout: {}ms", config.run.test_batch_timeout_millis);
    println!("  output timeout: {}ms", config.run.test_output_timeout_millis);
    Ok(())
}

fn init(config_path: &Path) -> Result<()> {
    if config_path.exists() {
        anyhow::bail!("{} already exists", config_path.display());
    }

    let config = r#"[run]
# test_batch_timeout_millis = 900000
# test_output_timeout_millis = 60000
# uncompleted_test_retry_quota = 3

[strategy.retry]
type = "fixed-quota"
retry_per_test_quota = 2

[suite]
type = "manifest"
path = "tests.json"

[fleet]
type = "simulated"
devices = 2

[output]
output_dir = "stampede-results"
"#;
    std::fs::write(config_path, config)
        .with_context(|| format!("Failed to write {}", config_path.display()))?;

    let manifest_path = config_path
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .join("tests.json");
    if !manifest_path.exists() {
        let manifest = r#"{
  "component": "app-debug",
  "tests": [
    { "package": "com.example", "class": "SmokeTest", "method": "launches" },
    { "package": "com.example", "class": "SmokeTest", "method": "rendersHome" },
    { "package": "com.example", "class": "LoginTest", "method": "happyPath" }
  ]
}
"#;
        std::fs::write(&manifest_path, manifest)
            .with_context(|| format!("Failed to write {}", manifest_path.display()))?;
    }

    println!("Wrote {}", config_path.display());
    println!("Wrote {}", manifest_path.display());
    println!("Run tests with: stampede run");
    Ok(())
}
