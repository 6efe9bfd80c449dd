//! Worker configuration (`config.toml`).
//!
//! Every section and field has a default; a missing file yields
//! [`WorkerConfig::default`].
//!
//! ```toml
//! [worker]
//! concurrency = 16
//!
//! [dedup]
//! url = "postgres://vitalflow@db/vitalflow"
//! ttl_secs = 172800
//!
//! [retry]
//! max_retries = 5
//!
//! [output]
//! artifact_root = "/srv/vitalflow/artifacts"
//! ```

use crate::retry::RetryConfig;
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use vitalflow_processors::ProcessorsConfig;
use vitalflow_protocol::defaults::{
    DEFAULT_CLEANUP_INTERVAL_SECS, DEFAULT_CONCURRENCY, DEFAULT_DEDUP_TTL_SECS,
    DEFAULT_HEALTH_BIND_ADDR, DEFAULT_IN_FLIGHT_RECHECK_MS, DEFAULT_MAX_PAYLOAD_BYTES,
};
use vitalflow_protocol::paths::{default_dedup_store_url, default_spool_dir};
use vitalflow_quality::QualityConfig;
use vitalflow_sinks::OutputConfig;

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct WorkerConfig {
    #[serde(default)]
    pub worker: WorkerSection,
    #[serde(default)]
    pub source: SourceSection,
    #[serde(default)]
    pub dedup: DedupSection,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub quality: QualityConfig,
    #[serde(default)]
    pub processors: ProcessorsConfig,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub health: HealthSection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerSection {
    /// Deliveries handled at once
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_max_payload_bytes")]
    pub max_payload_bytes: u64,
    /// Shows up in logs; defaults to `<hostname>-<pid>`
    #[serde(default = "default_worker_id")]
    pub worker_id: String,
}

fn default_concurrency() -> usize {
    DEFAULT_CONCURRENCY
}

fn default_max_payload_bytes() -> u64 {
    DEFAULT_MAX_PAYLOAD_BYTES
}

fn default_worker_id() -> String {
    let host = std::env::var("HOSTNAME").unwrap_or_else(|_| "vitalflow".to_string());
    format!("{}-{}", host, std::process::id())
}

impl Default for WorkerSection {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            max_payload_bytes: default_max_payload_bytes(),
            worker_id: default_worker_id(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceSection {
    /// Root holding `inbox/` and `dead_letter/`
    #[serde(default = "default_spool_dir")]
    pub spool_dir: PathBuf,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Stop once the inbox drains instead of polling forever
    #[serde(default)]
    pub exit_when_empty: bool,
}

fn default_poll_interval_ms() -> u64 {
    500
}

impl Default for SourceSection {
    fn default() -> Self {
        Self {
            spool_dir: default_spool_dir(),
            poll_interval_ms: default_poll_interval_ms(),
            exit_when_empty: false,
        }
    }
}

impl SourceSection {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DedupSection {
    /// `sqlite:<path>`, `sqlite::memory:` or `postgres://...`
    #[serde(default = "default_dedup_store_url")]
    pub url: String,
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
    #[serde(default = "default_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,
    /// Wait before redelivering a message whose claim is held elsewhere
    #[serde(default = "default_in_flight_recheck_ms")]
    pub in_flight_recheck_ms: u64,
}

fn default_ttl_secs() -> u64 {
    DEFAULT_DEDUP_TTL_SECS
}

fn default_cleanup_interval_secs() -> u64 {
    DEFAULT_CLEANUP_INTERVAL_SECS
}

fn default_in_flight_recheck_ms() -> u64 {
    DEFAULT_IN_FLIGHT_RECHECK_MS
}

impl Default for DedupSection {
    fn default() -> Self {
        Self {
            url: default_dedup_store_url(),
            ttl_secs: default_ttl_secs(),
            cleanup_interval_secs: default_cleanup_interval_secs(),
            in_flight_recheck_ms: default_in_flight_recheck_ms(),
        }
    }
}

impl DedupSection {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }

    pub fn in_flight_recheck(&self) -> Duration {
        Duration::from_millis(self.in_flight_recheck_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthSection {
    #[serde(default = "default_health_enabled")]
    pub enabled: bool,
    #[serde(default = "default_health_bind")]
    pub bind: String,
}

fn default_health_enabled() -> bool {
    true
}

fn default_health_bind() -> String {
    DEFAULT_HEALTH_BIND_ADDR.to_string()
}

impl Default for HealthSection {
    fn default() -> Self {
        Self {
            enabled: default_health_enabled(),
            bind: default_health_bind(),
        }
    }
}

impl WorkerConfig {
    /// Load from `path`. A missing file yields defaults; a malformed one is an error.
    pub fn load(path: &Path) -> Result<Self> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "No config file; using defaults");
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read {}", path.display()))
            }
        };
        Self::from_toml(&content).with_context(|| format!("Invalid config {}", path.display()))
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: WorkerConfig = toml::from_str(content).context("Failed to parse TOML")?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the worker cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.worker.concurrency == 0 {
            bail!("worker.concurrency must be at least 1");
        }
        if self.worker.max_payload_bytes == 0 {
            bail!("worker.max_payload_bytes must be positive");
        }
        if self.dedup.ttl_secs == 0 {
            bail!("dedup.ttl_secs must be positive");
        }
        if self.dedup.cleanup_interval_secs == 0 {
            bail!("dedup.cleanup_interval_secs must be positive");
        }
        if self.dedup.in_flight_recheck_ms == 0 {
            bail!("dedup.in_flight_recheck_ms must be positive");
        }
        if self.source.poll_interval_ms == 0 {
            bail!("source.poll_interval_ms must be positive");
        }
        self.retry.validate().context("Invalid [retry] section")?;
        self.quality.validate().context("Invalid [quality] section")?;
        self.processors
            .validate()
            .context("Invalid [processors] section")?;
        self.output.validate().context("Invalid [output] section")?;
        if self.health.enabled {
            self.health
                .bind
                .parse::<std::net::SocketAddr>()
                .with_context(|| format!("Invalid health.bind '{}'", self.health.bind))?;
        }
        Ok(())
    }
}
