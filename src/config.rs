use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::engine::candidate::IdKind;
use crate::errors::ConfigError;

/// How the rate limiter is laid out across workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PacingMode {
    /// One limiter shared by every worker.
    #[default]
    Shared,
    /// One limiter per worker, each at `interval * workers`, so the aggregate stays at the target.
    PerWorkerAggregate,
    /// One limiter per worker at the full interval: N× aggregate throughput.
    PerWorkerIndependent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SamplingStrategy {
    /// Lowest half of the sample taken sequentially from `lo`, the rest uniformly at random.
    #[default]
    SequentialHead,
    /// Uniform random subset without replacement.
    Uniform,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdRange {
    pub lo: u64,
    pub hi: u64,
}

impl IdRange {
    pub fn new(lo: u64, hi: u64) -> Self {
        Self { lo, hi }
    }

    /// Inclusive size of the range.
    pub fn len(&self) -> u64 {
        self.hi.saturating_sub(self.lo).saturating_add(1)
    }

    pub fn is_empty(&self) -> bool {
        self.hi < self.lo
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetbearConfig {
    pub max_depth: usize,
    pub max_pages_per_domain: usize,
    pub max_links_per_page: usize,
    pub max_workers: usize,
    pub queue_capacity: usize,
    pub rate_limit_sec: f64,
    pub jitter_ms: u64,
    pub pacing: PacingMode,
    pub max_attempts: u32,
    pub backoff_factor: f64,
    pub backoff_threshold: u32,
    pub backoff_cooldown_secs: u64,
    pub max_backoff_multiplier: f64,
    pub timeout_secs: u64,
    pub verify_ssl: bool,
    pub sample_size: usize,
    pub sampling: SamplingStrategy,
    pub seed: Option<u64>,
    pub id_ranges: BTreeMap<IdKind, IdRange>,
    pub token_attempts: usize,
    /// Confirmed tokens re-checked for unprotected access.
    pub share_followup_tokens: usize,
    /// Confirmed tokens tried against `share_passwords`.
    pub password_followup_tokens: usize,
    pub share_passwords: Vec<String>,
    pub dangerous_extensions: Vec<String>,
    /// Uploads one byte over this size are expected to be refused.
    pub max_upload_size: usize,
    /// External scripts fetched for analysis per crawled page.
    pub max_scripts_per_page: usize,
    pub max_evidence: usize,
    pub cancel_grace_secs: u64,
}

impl Default for NetbearConfig {
    fn default() -> Self {
        let mut id_ranges = BTreeMap::new();
        id_ranges.insert(IdKind::FileId, IdRange::new(1, 1000));
        id_ranges.insert(IdKind::ShareId, IdRange::new(1, 500));
        id_ranges.insert(IdKind::UserId, IdRange::new(1, 200));

        Self {
            max_depth: 2,
            max_pages_per_domain: 15,
            max_links_per_page: 8,
            max_workers: 5,
            queue_capacity: 64,
            rate_limit_sec: 0.5,
            jitter_ms: 0,
            pacing: PacingMode::Shared,
            max_attempts: 3,
            backoff_factor: 2.0,
            backoff_threshold: 3,
            backoff_cooldown_secs: 60,
            max_backoff_multiplier: 16.0,
            timeout_secs: 30,
            verify_ssl: true,
            sample_size: 50,
            sampling: SamplingStrategy::SequentialHead,
            seed: None,
            id_ranges,
            token_attempts: 200,
            share_followup_tokens: 10,
            password_followup_tokens: 5,
            share_passwords: ["", "123456", "password", "admin", "test"].iter().map(|s| s.to_string()).collect(),
            dangerous_extensions: [".php", ".phtml", ".php3", ".php4", ".php5", ".sh", ".bash", ".exe", ".jar", ".jsp"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            max_upload_size: 5 * 1024 * 1024,
            max_scripts_per_page: 5,
            max_evidence: 20,
            cancel_grace_secs: 5,
        }
    }
}

impl NetbearConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let data = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let cfg: NetbearConfig = serde_json::from_str(&data).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_workers == 0 {
            return Err(ConfigError::Invalid("max_workers must be at least 1".into()));
        }
        if self.queue_capacity == 0 {
            return Err(ConfigError::Invalid("queue_capacity must be at least 1".into()));
        }
        if self.max_attempts == 0 {
            return Err(ConfigError::Invalid("max_attempts must be at least 1".into()));
        }
        if !self.rate_limit_sec.is_finite() || self.rate_limit_sec < 0.0 {
            return Err(ConfigError::Invalid(format!("rate_limit_sec {} is not a valid interval", self.rate_limit_sec)));
        }
        if self.backoff_factor < 1.0 || self.max_backoff_multiplier < 1.0 {
            return Err(ConfigError::Invalid("backoff factors must be >= 1.0".into()));
        }
        for (kind, range) in &self.id_ranges {
            if range.is_empty() {
                return Err(ConfigError::Invalid(format!("id range for {kind} is empty: [{}, {}]", range.lo, range.hi)));
            }
        }
        Ok(())
    }

    pub fn rate_interval(&self) -> Duration {
        Duration::from_secs_f64(self.rate_limit_sec)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn cancel_grace(&self) -> Duration {
        Duration::from_secs(self.cancel_grace_secs)
    }

    pub fn range_for(&self, kind: IdKind) -> Option<IdRange> {
        self.id_ranges.get(&kind).copied()
    }
}
