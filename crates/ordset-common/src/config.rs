//! ---
//! ordset_section: "01-core-functionality"
//! ordset_subsection: "module"
//! ordset_type: "source"
//! ordset_scope: "code"
//! ordset_description: "Shared primitives and utilities for the core runtime."
//! ordset_version: "v0.0.0-prealpha"
//! ordset_owner: "tbd"
//! ---
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds};
use tracing::debug;

use crate::logging::LogFormat;

fn default_workers() -> usize {
    2
}

fn default_resync_period() -> Duration {
    Duration::from_secs(30)
}

fn default_cache_sync_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_queue_base_delay() -> Duration {
    Duration::from_millis(5)
}

fn default_queue_max_delay() -> Duration {
    Duration::from_secs(300)
}

fn default_retry_attempts() -> usize {
    5
}

fn default_retry_base_delay() -> Duration {
    Duration::from_millis(10)
}

fn default_retry_jitter() -> Duration {
    Duration::from_millis(5)
}

fn default_logging_directory() -> PathBuf {
    PathBuf::from("target/logs")
}

fn default_log_format() -> LogFormat {
    LogFormat::StructuredJson
}

fn default_metrics_enabled() -> bool {
    true
}

fn default_metrics_listen() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 9898))
}

fn default_namespace() -> String {
    "default".to_owned()
}

fn default_ready_after() -> Duration {
    Duration::from_millis(500)
}

/// Primary configuration object for the ordset runtime.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub controller: ControllerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub simulation: SimulationConfig,
}

/// Metadata describing where an [`AppConfig`] was loaded from.
#[derive(Debug, Clone)]
pub struct LoadedAppConfig {
    pub config: AppConfig,
    pub source: PathBuf,
}

impl AppConfig {
    pub const ENV_CONFIG_PATH: &'static str = "ORDSET_CONFIG";

    /// Load configuration from disk, respecting the `ORDSET_CONFIG` override.
    pub fn load<P: AsRef<Path>>(candidates: &[P]) -> Result<Self> {
        Ok(Self::load_with_source(candidates)?.config)
    }

    /// Load configuration from disk together with the effective source path.
    pub fn load_with_source<P: AsRef<Path>>(candidates: &[P]) -> Result<LoadedAppConfig> {
        if let Ok(env_path) = std::env::var(Self::ENV_CONFIG_PATH) {
            if !env_path.trim().is_empty() {
                let path = PathBuf::from(env_path);
                let config = Self::from_path(&path)?;
                return Ok(LoadedAppConfig {
                    config,
                    source: path,
                });
            }
        }

        for candidate in candidates {
            if candidate.as_ref().exists() {
                let path = candidate.as_ref().to_path_buf();
                let config = Self::from_path(&path)?;
                return Ok(LoadedAppConfig {
                    config,
                    source: path,
                });
            }
        }

        Err(anyhow!(
            "no configuration files found. inspected: {}",
            candidates
                .iter()
                .map(|p| p.as_ref().display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        ))
    }

    fn from_path(path: &Path) -> Result<Self> {
        debug!(config_path = %path.display(), "loading configuration");
        let contents = fs::read_to_string(path)
            .with_context(|| format!("unable to read config file {}", path.display()))?;
        contents
            .parse::<AppConfig>()
            .with_context(|| format!("invalid config file {}", path.display()))
    }

    /// Validate structural invariants.
    pub fn validate(&self) -> Result<()> {
        self.controller.validate()?;
        self.simulation.validate()?;
        Ok(())
    }
}

impl std::str::FromStr for AppConfig {
    type Err = anyhow::Error;

    fn from_str(content: &str) -> std::result::Result<Self, Self::Err> {
        let config: AppConfig =
            toml::from_str(content).with_context(|| "failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }
}

/// Settings for the reconciliation runtime.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// Number of concurrent worker loops pulling keys from the queue.
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Interval between full resyncs that re-enqueue every known workload.
    #[serde(default = "default_resync_period", rename = "resync_period_ms")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub resync_period: Duration,
    /// Upper bound on how long startup waits for the watch caches to fill.
    #[serde(default = "default_cache_sync_timeout", rename = "cache_sync_timeout_ms")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub cache_sync_timeout: Duration,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub conflict_retry: RetryConfig,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            resync_period: default_resync_period(),
            cache_sync_timeout: default_cache_sync_timeout(),
            queue: QueueConfig::default(),
            conflict_retry: RetryConfig::default(),
        }
    }
}

impl ControllerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(anyhow!("controller.workers must be at least 1"));
        }
        if self.resync_period.is_zero() {
            return Err(anyhow!("controller.resync_period_ms must be positive"));
        }
        self.queue.validate()?;
        self.conflict_retry.validate()?;
        Ok(())
    }
}

/// Per-key exponential backoff applied by the work queue on failed passes.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    #[serde(default = "default_queue_base_delay", rename = "base_delay_ms")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub base_delay: Duration,
    #[serde(default = "default_queue_max_delay", rename = "max_delay_ms")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub max_delay: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            base_delay: default_queue_base_delay(),
            max_delay: default_queue_max_delay(),
        }
    }
}

impl QueueConfig {
    pub fn validate(&self) -> Result<()> {
        if self.base_delay > self.max_delay {
            return Err(anyhow!(
                "controller.queue.base_delay_ms ({:?}) exceeds max_delay_ms ({:?})",
                self.base_delay,
                self.max_delay
            ));
        }
        Ok(())
    }
}

/// Bounded retry policy for optimistic-concurrency conflicts inside a single pass.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_retry_attempts")]
    pub max_attempts: usize,
    #[serde(default = "default_retry_base_delay", rename = "base_delay_ms")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub base_delay: Duration,
    #[serde(default = "default_retry_jitter", rename = "jitter_ms")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub jitter: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_retry_attempts(),
            base_delay: default_retry_base_delay(),
            jitter: default_retry_jitter(),
        }
    }
}

impl RetryConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(anyhow!(
                "controller.conflict_retry.max_attempts must be at least 1"
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_logging_directory")]
    pub directory: PathBuf,
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
    #[serde(default)]
    pub file_output: bool,
    #[serde(default)]
    pub file_prefix: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: default_logging_directory(),
            format: default_log_format(),
            file_output: false,
            file_prefix: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,
    #[serde(default = "default_metrics_listen")]
    pub listen: SocketAddr,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_metrics_enabled(),
            listen: default_metrics_listen(),
        }
    }
}

/// Settings for the daemon's in-memory cluster simulation.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// YAML manifests describing workloads seeded into the store at startup.
    #[serde(default)]
    pub manifests: Vec<PathBuf>,
    /// Namespace applied to manifests that omit one.
    #[serde(default = "default_namespace")]
    pub namespace: String,
    /// Delay before the simulated node agent reports a new pod as Running and Ready.
    #[serde(default = "default_ready_after", rename = "ready_after_ms")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub ready_after: Duration,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            manifests: Vec::new(),
            namespace: default_namespace(),
            ready_after: default_ready_after(),
        }
    }
}

impl SimulationConfig {
    pub fn validate(&self) -> Result<()> {
        if self.namespace.trim().is_empty() {
            return Err(anyhow!("simulation.namespace must not be empty"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_to_empty_document() {
        let config: AppConfig = "".parse().expect("empty config is valid");
        assert_eq!(config.controller.workers, 2);
        assert_eq!(config.controller.resync_period, Duration::from_secs(30));
        assert_eq!(config.controller.conflict_retry.max_attempts, 5);
        assert_eq!(config.simulation.namespace, "default");
        assert!(!config.logging.file_output);
    }

    #[test]
    fn durations_are_read_as_milliseconds() {
        let config: AppConfig = r#"
            [controller]
            workers = 4
            resync_period_ms = 1500

            [controller.queue]
            base_delay_ms = 20
            max_delay_ms = 2000

            [simulation]
            ready_after_ms = 50
        "#
        .parse()
        .expect("config parses");
        assert_eq!(config.controller.workers, 4);
        assert_eq!(config.controller.resync_period, Duration::from_millis(1500));
        assert_eq!(config.controller.queue.base_delay, Duration::from_millis(20));
        assert_eq!(config.controller.queue.max_delay, Duration::from_secs(2));
        assert_eq!(config.simulation.ready_after, Duration::from_millis(50));
    }

    #[test]
    fn zero_workers_rejected() {
        let err = "[controller]\nworkers = 0\n"
            .parse::<AppConfig>()
            .expect_err("zero workers must fail validation");
        assert!(err.to_string().contains("workers"));
    }

    #[test]
    fn inverted_backoff_bounds_rejected() {
        let err = "[controller.queue]\nbase_delay_ms = 500\nmax_delay_ms = 10\n"
            .parse::<AppConfig>()
            .expect_err("base delay above max must fail");
        assert!(err.to_string().contains("base_delay_ms"));
    }

    #[test]
    fn load_prefers_first_existing_candidate() {
        let dir = tempfile::tempdir().expect("tempdir");
        let missing = dir.path().join("missing.toml");
        let present = dir.path().join("ordset.toml");
        fs::write(&present, "[controller]\nworkers = 3\n").expect("write config");
        let loaded = AppConfig::load_with_source(&[missing, present.clone()]).expect("load");
        assert_eq!(loaded.source, present);
        assert_eq!(loaded.config.controller.workers, 3);
    }
}
