//! Failure classification and retry decisions.
//!
//! [`RetryPolicy::decide`] maps `(failure kind, retry_count)` to what the
//! intake loop does next. It never sleeps and never touches the transport;
//! the only state it reads is the jitter RNG.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Mutex;
use std::time::Duration;
use vitalflow_protocol::defaults::{
    DEFAULT_MAX_RETRIES, DEFAULT_RETRY_BASE_DELAY_MS, DEFAULT_RETRY_JITTER_MS,
    DEFAULT_RETRY_MAX_DELAY_MS,
};

/// Internal faults get this many retries before dead-lettering.
const INTERNAL_FAULT_RETRIES: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// Network or storage hiccup; worth retrying
    Transient,
    /// Payload cannot be decoded or is structurally wrong
    MalformedInput,
    /// Payload too large or otherwise over a resource limit
    ResourceExceeded,
    /// Unexpected processor fault (error or panic)
    Internal,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Transient => "transient",
            FailureKind::MalformedInput => "malformed_input",
            FailureKind::ResourceExceeded => "resource_exceeded",
            FailureKind::Internal => "internal",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Dead-letter reasons.
pub mod reasons {
    pub const MAX_RETRIES_EXCEEDED: &str = "max_retries_exceeded";
    pub const RESOURCE_EXCEEDED: &str = "resource_exceeded";
    pub const INTERNAL_FAULT: &str = "internal_fault";
    pub const MALFORMED_MESSAGE: &str = "malformed_message";
    pub const UNQUARANTINABLE: &str = "malformed_input_without_payload";
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Nack and redeliver after `delay`
    Retry { delay: Duration },
    /// Move the payload to quarantine; do not retry
    Quarantine,
    /// Give up on the message
    DeadLetter { reason: &'static str },
}

impl RetryDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            RetryDecision::Retry { .. } => "retry",
            RetryDecision::Quarantine => "quarantine",
            RetryDecision::DeadLetter { .. } => "dead_letter",
        }
    }
}

/// `[retry]` configuration section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Upper bound of the uniform jitter added to every delay
    #[serde(default = "default_jitter_ms")]
    pub jitter_ms: u64,
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

fn default_base_delay_ms() -> u64 {
    DEFAULT_RETRY_BASE_DELAY_MS
}

fn default_max_delay_ms() -> u64 {
    DEFAULT_RETRY_MAX_DELAY_MS
}

fn default_jitter_ms() -> u64 {
    DEFAULT_RETRY_JITTER_MS
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter_ms: default_jitter_ms(),
        }
    }
}

impl RetryConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_delay_ms < self.base_delay_ms {
            anyhow::bail!(
                "retry.max_delay_ms ({}) is below retry.base_delay_ms ({})",
                self.max_delay_ms,
                self.base_delay_ms
            );
        }
        Ok(())
    }
}

pub struct RetryPolicy {
    config: RetryConfig,
    rng: Mutex<StdRng>,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Deterministic jitter for tests.
    pub fn with_seed(config: RetryConfig, seed: u64) -> Self {
        Self {
            config,
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Exponential part of the delay: `min(base * 2^retry_count, max)`.
    pub fn base_backoff(&self, retry_count: u32) -> Duration {
        let factor = 1u64.checked_shl(retry_count).unwrap_or(u64::MAX);
        let millis = self
            .config
            .base_delay_ms
            .saturating_mul(factor)
            .min(self.config.max_delay_ms);
        Duration::from_millis(millis)
    }

    pub fn decide(&self, kind: FailureKind, retry_count: u32) -> RetryDecision {
        let mut rng = self
            .rng
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        self.decide_with(kind, retry_count, &mut *rng)
    }

    /// Same as [`decide`](Self::decide) with a caller-supplied RNG.
    pub fn decide_with<R: Rng + ?Sized>(
        &self,
        kind: FailureKind,
        retry_count: u32,
        rng: &mut R,
    ) -> RetryDecision {
        match kind {
            FailureKind::Transient if retry_count < self.config.max_retries => {
                RetryDecision::Retry {
                    delay: self.delay_with(retry_count, rng),
                }
            }
            FailureKind::Transient => RetryDecision::DeadLetter {
                reason: reasons::MAX_RETRIES_EXCEEDED,
            },
            FailureKind::MalformedInput => RetryDecision::Quarantine,
            FailureKind::ResourceExceeded => RetryDecision::DeadLetter {
                reason: reasons::RESOURCE_EXCEEDED,
            },
            FailureKind::Internal if retry_count < INTERNAL_FAULT_RETRIES => {
                RetryDecision::Retry {
                    delay: self.delay_with(retry_count, rng),
                }
            }
            FailureKind::Internal => RetryDecision::DeadLetter {
                reason: reasons::INTERNAL_FAULT,
            },
        }
    }

    fn delay_with<R: Rng + ?Sized>(&self, retry_count: u32, rng: &mut R) -> Duration {
        let jitter = if self.config.jitter_ms == 0 {
            0
        } else {
            rng.gen_range(0..=self.config.jitter_ms)
        };
        self.base_backoff(retry_count) + Duration::from_millis(jitter)
    }
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("config", &self.config)
            .finish()
    }
}
