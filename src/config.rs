//! Configuration loading and schema definitions.
//!
//! Configuration is a single TOML file covering run options (timeouts,
//! quotas, strict-run policy), strategy selection, the test suite source,
//! the device fleet and output settings. Strategy, suite and fleet
//! selection use tagged enums keyed on a `type` field.

pub mod schema;

pub use schema::*;

use std::path::Path;

use anyhow::{Context, Result};

/// Loads configuration from a TOML file.
///
/// # Errors
///
/// Returns an error if the file cannot be read, is not valid TOML, or does
/// not match the configuration schema.
///
/// # Example
///
/// ```no_run
/// use stampede::config::load_config;
/// use std::path::Path;
///
/// let config = load_config(Path::new("stampede.toml"))?;
/// println!("batch timeout: {}ms", config.run.test_batch_timeout_millis);
/// # Ok::<(), anyhow::Error>(())
/// ```
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

    Ok(config)
}

/// Loads configuration from a TOML string.
///
/// Useful for testing and for generating configuration programmatically.
///
/// # Example
///
/// ```
/// use stampede::config::load_config_str;
///
/// let config = load_config_str(r#"
///     [run]
///     strict_mode = true
///
///     [suite]
///     type = "manifest"
///     path = "tests.json"
///
///     [fleet]
///     type = "simulated"
///     devices = 4
/// "#)?;
///
/// assert!(config.run.strict_mode);
/// # Ok::<(), anyhow::Error>(())
/// ```
pub fn load_config_str(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).context("Failed to parse config")?;

    Ok(config)
}
