//! Engine configuration
//!
//! Defines the configurable parameters of the engine: the master switch,
//! the working directory shared by all configurations, scheduling and
//! worker pool settings, and the files read and written at startup.

use anyhow::{Context, Result, bail};
use remotefetch_core::domain::configuration::FetchConfiguration;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_TICK_INTERVAL_SECS: u64 = 5;
const DEFAULT_MAX_PARALLEL_RUNS: usize = 4;
const DEFAULT_RUN_TIMEOUT_SECS: u64 = 300;
const REPORTS_FILE_NAME: &str = "reports.jsonl";

/// Engine configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Master switch; nothing is scheduled while false
    pub enabled: bool,

    /// Root of the per-configuration working directories
    pub working_directory: PathBuf,

    /// How often the scheduler looks for due tasks
    pub tick_interval: Duration,

    /// Number of pipeline runs executing at once
    pub max_parallel_runs: usize,

    /// Wall-clock budget of a single run, `None` for unlimited
    pub run_timeout: Option<Duration>,

    /// JSON array of configurations registered at startup
    pub configurations_file: Option<PathBuf>,

    /// Where run reports are appended
    pub reports_file: PathBuf,
}

impl Config {
    /// Creates a configuration with defaults rooted at `working_directory`
    pub fn new(working_directory: PathBuf) -> Self {
        Self {
            enabled: false,
            reports_file: working_directory.join(REPORTS_FILE_NAME),
            working_directory,
            tick_interval: Duration::from_secs(DEFAULT_TICK_INTERVAL_SECS),
            max_parallel_runs: DEFAULT_MAX_PARALLEL_RUNS,
            run_timeout: Some(Duration::from_secs(DEFAULT_RUN_TIMEOUT_SECS)),
            configurations_file: None,
        }
    }

    /// Creates configuration from environment variables
    ///
    /// Expected environment variables:
    /// - REMOTEFETCH_ENABLED (optional, default: false)
    /// - REMOTEFETCH_WORKING_DIRECTORY (optional, default: <tmp>/remotefetch)
    /// - TICK_INTERVAL (optional, seconds, default: 5)
    /// - MAX_PARALLEL_RUNS (optional, default: 4)
    /// - RUN_TIMEOUT (optional, seconds, 0 disables, default: 300)
    /// - CONFIGURATIONS_FILE (optional)
    /// - REPORTS_FILE (optional, default: <working directory>/reports.jsonl)
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds a configuration from any variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        let working_directory = var("REMOTEFETCH_WORKING_DIRECTORY")
            .map(PathBuf::from)
            .unwrap_or_else(|| std::env::temp_dir().join("remotefetch"));
        let mut config = Self::new(working_directory);

        if let Some(value) = var("REMOTEFETCH_ENABLED") {
            config.enabled = parse_bool("REMOTEFETCH_ENABLED", &value)?;
        }

        if let Some(value) = var("TICK_INTERVAL") {
            config.tick_interval = Duration::from_secs(parse_number("TICK_INTERVAL", &value)?);
        }

        if let Some(value) = var("MAX_PARALLEL_RUNS") {
            config.max_parallel_runs = parse_number("MAX_PARALLEL_RUNS", &value)?;
        }

        if let Some(value) = var("RUN_TIMEOUT") {
            let seconds: u64 = parse_number("RUN_TIMEOUT", &value)?;
            config.run_timeout = (seconds > 0).then(|| Duration::from_secs(seconds));
        }

        config.configurations_file = var("CONFIGURATIONS_FILE").map(PathBuf::from);

        if let Some(value) = var("REPORTS_FILE") {
            config.reports_file = PathBuf::from(value);
        }

        Ok(config)
    }

    /// Validates the configuration
    pub fn validate(&self) -> Result<()> {
        if self.working_directory.as_os_str().is_empty() {
            bail!("working_directory cannot be empty");
        }

        if self.working_directory.exists() && !self.working_directory.is_dir() {
            bail!(
                "working_directory {} is not a directory",
                self.working_directory.display()
            );
        }

        if self.tick_interval.is_zero() {
            bail!("tick_interval must be greater than 0");
        }

        if self.max_parallel_runs == 0 {
            bail!("max_parallel_runs must be greater than 0");
        }

        if self.reports_file.as_os_str().is_empty() {
            bail!("reports_file cannot be empty");
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new(std::env::temp_dir().join("remotefetch"))
    }
}

fn parse_bool(name: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        other => bail!("{} must be a boolean, got '{}'", name, other),
    }
}

fn parse_number<T>(name: &str, value: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value
        .trim()
        .parse()
        .with_context(|| format!("{} must be a non-negative integer, got '{}'", name, value))
}

/// Reads the configurations registered at startup
///
/// The file holds a JSON array of fetch configurations. Identifiers must be
/// unique and every configuration must name its plugins.
pub fn load_configurations(path: &Path) -> Result<Vec<FetchConfiguration>> {
    let content = std::fs::read(path)
        .with_context(|| format!("Failed to read configurations file {}", path.display()))?;
    let configurations: Vec<FetchConfiguration> = serde_json::from_slice(&content)
        .with_context(|| format!("Failed to parse configurations file {}", path.display()))?;

    let mut seen = HashSet::new();
    for configuration in &configurations {
        if !seen.insert(configuration.id) {
            bail!("Duplicate configuration id {}", configuration.id);
        }
        if configuration.repository_manager.identifier.is_empty() {
            bail!(
                "Configuration {} does not name a repository manager",
                configuration.id
            );
        }
        if configuration.config_deployer.identifier.is_empty() {
            bail!(
                "Configuration {} does not name a config deployer",
                configuration.id
            );
        }
    }

    Ok(configurations)
}
