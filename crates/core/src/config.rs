use std::env;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ForemanError;

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

/// Read a profiled env var: tries {PROFILE}_{KEY} first, falls back to {KEY}.
fn profiled_env_opt(profile: &str, key: &str) -> Option<String> {
    if !profile.is_empty() {
        let prefixed = format!("{}_{}", profile, key);
        if let Some(v) = env_opt(&prefixed) {
            return Some(v);
        }
    }
    env_opt(key)
}

fn profiled_env_or(profile: &str, key: &str, default: &str) -> String {
    profiled_env_opt(profile, key).unwrap_or_else(|| default.to_string())
}

fn profiled_env_u64(profile: &str, key: &str, default: u64) -> u64 {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn profiled_env_usize(profile: &str, key: &str, default: usize) -> usize {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

// ── Top-level config ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Active profile name (empty = default).
    pub profile: String,
    pub storage: StorageConfig,
    pub scheduler: SchedulerConfig,
}

impl Config {
    /// Build config from environment variables (call `load_dotenv()` first).
    /// Profile is read from `FOREMAN_PROFILE`. When set (e.g. `PROD`),
    /// every key is first looked up as `{PROFILE}_{KEY}`, falling back to `{KEY}`.
    pub fn from_env() -> Self {
        let profile = env_or("FOREMAN_PROFILE", "").to_uppercase();
        Self::for_profile(&profile)
    }

    /// Build config for a specific named profile (empty string = default).
    pub fn for_profile(profile: &str) -> Self {
        let p = profile.to_uppercase();
        let p = p.as_str();
        Self {
            profile: p.to_string(),
            storage: StorageConfig::from_env_profiled(p),
            scheduler: SchedulerConfig::from_env_profiled(p),
        }
    }

    pub fn profile_label(&self) -> &str {
        if self.profile.is_empty() { "default" } else { &self.profile }
    }

    /// Reject values the scheduler cannot work with.
    pub fn validate(&self) -> Result<(), ForemanError> {
        self.scheduler.validate()
    }

    /// Print a summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Config loaded (profile: {}):", self.profile_label());
        tracing::info!("  storage:     data_dir={}, queue_file={}", self.storage.data_dir.display(), self.storage.queue_file);
        tracing::info!(
            "  scheduler:   tick={}s, large_fleet>{}, long_job>{}s, quiet_period={}s",
            self.scheduler.maintenance_interval_secs,
            self.scheduler.large_fleet_threshold,
            self.scheduler.long_job_threshold_secs,
            self.scheduler.default_quiet_period_secs,
        );
    }

    /// Return a JSON view of the effective configuration.
    pub fn summary(&self) -> serde_json::Value {
        serde_json::json!({
            "profile": self.profile_label(),
            "storage": { "data_dir": self.storage.data_dir, "queue_file": self.storage.queue_file },
            "scheduler": self.scheduler,
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            profile: String::new(),
            storage: StorageConfig::default(),
            scheduler: SchedulerConfig::default(),
        }
    }
}

// ── Storage ───────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
    /// File name (relative to `data_dir`) holding the persisted queue contents.
    pub queue_file: String,
}

impl StorageConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            data_dir: PathBuf::from(profiled_env_or(p, "FOREMAN_DATA_DIR", "data")),
            queue_file: profiled_env_or(p, "FOREMAN_QUEUE_FILE", "queue.json"),
        }
    }

    pub fn queue_path(&self) -> PathBuf {
        self.data_dir.join(&self.queue_file)
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            queue_file: "queue.json".to_string(),
        }
    }
}

// ── Scheduler policy ──────────────────────────────────────────

/// Scheduling policy knobs. These are heuristics, not protocol, so every
/// one of them can be tuned per deployment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Interval of the background maintenance tick, in seconds.
    #[serde(default = "default_maintenance_interval")]
    pub maintenance_interval_secs: u64,
    /// The fleet counts as "large" when it has more agent nodes than this.
    #[serde(default = "default_large_fleet_threshold")]
    pub large_fleet_threshold: usize,
    /// Tasks estimated to run longer than this (seconds) are steered to agents.
    #[serde(default = "default_long_job_threshold")]
    pub long_job_threshold_secs: u64,
    /// Quiet period applied by `Queue::schedule`, in seconds.
    #[serde(default = "default_quiet_period")]
    pub default_quiet_period_secs: u64,
    /// Lower bound on a timed park, in milliseconds.
    #[serde(default = "default_min_park_timeout")]
    pub min_park_timeout_ms: u64,
    /// A buildable item is stuck after waiting `stuck_multiplier` times its estimate.
    #[serde(default = "default_stuck_multiplier")]
    pub stuck_multiplier: u32,
    /// Estimates shorter than this (seconds) are rounded up for stuck detection.
    #[serde(default = "default_stuck_floor")]
    pub stuck_floor_secs: u64,
    /// Items without an estimate are stuck after this many hours.
    #[serde(default = "default_stuck_unknown_hours")]
    pub stuck_unknown_hours: u64,
}

fn default_maintenance_interval() -> u64 { 5 }
fn default_large_fleet_threshold() -> usize { 10 }
fn default_long_job_threshold() -> u64 { 15 * 60 }
fn default_quiet_period() -> u64 { 5 }
fn default_min_park_timeout() -> u64 { 100 }
fn default_stuck_multiplier() -> u32 { 10 }
fn default_stuck_floor() -> u64 { 60 }
fn default_stuck_unknown_hours() -> u64 { 24 }

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            maintenance_interval_secs: default_maintenance_interval(),
            large_fleet_threshold: default_large_fleet_threshold(),
            long_job_threshold_secs: default_long_job_threshold(),
            default_quiet_period_secs: default_quiet_period(),
            min_park_timeout_ms: default_min_park_timeout(),
            stuck_multiplier: default_stuck_multiplier(),
            stuck_floor_secs: default_stuck_floor(),
            stuck_unknown_hours: default_stuck_unknown_hours(),
        }
    }
}

impl SchedulerConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            maintenance_interval_secs: profiled_env_u64(p, "FOREMAN_MAINTENANCE_INTERVAL_SECS", default_maintenance_interval()),
            large_fleet_threshold: profiled_env_usize(p, "FOREMAN_LARGE_FLEET_THRESHOLD", default_large_fleet_threshold()),
            long_job_threshold_secs: profiled_env_u64(p, "FOREMAN_LONG_JOB_THRESHOLD_SECS", default_long_job_threshold()),
            default_quiet_period_secs: profiled_env_u64(p, "FOREMAN_DEFAULT_QUIET_PERIOD_SECS", default_quiet_period()),
            min_park_timeout_ms: profiled_env_u64(p, "FOREMAN_MIN_PARK_TIMEOUT_MS", default_min_park_timeout()),
            stuck_multiplier: profiled_env_u64(p, "FOREMAN_STUCK_MULTIPLIER", default_stuck_multiplier() as u64) as u32,
            stuck_floor_secs: profiled_env_u64(p, "FOREMAN_STUCK_FLOOR_SECS", default_stuck_floor()),
            stuck_unknown_hours: profiled_env_u64(p, "FOREMAN_STUCK_UNKNOWN_HOURS", default_stuck_unknown_hours()),
        }
    }

    pub fn validate(&self) -> Result<(), ForemanError> {
        if self.maintenance_interval_secs == 0 {
            return Err(ForemanError::InvalidConfig {
                key: "maintenance_interval_secs".into(),
                value: "0".into(),
            });
        }
        if self.min_park_timeout_ms == 0 {
            return Err(ForemanError::InvalidConfig {
                key: "min_park_timeout_ms".into(),
                value: "0".into(),
            });
        }
        if self.stuck_multiplier == 0 {
            return Err(ForemanError::InvalidConfig {
                key: "stuck_multiplier".into(),
                value: "0".into(),
            });
        }
        Ok(())
    }

    pub fn maintenance_interval(&self) -> Duration {
        Duration::from_secs(self.maintenance_interval_secs)
    }

    pub fn long_job_threshold(&self) -> Duration {
        Duration::from_secs(self.long_job_threshold_secs)
    }

    pub fn default_quiet_period(&self) -> Duration {
        Duration::from_secs(self.default_quiet_period_secs)
    }

    pub fn min_park_timeout(&self) -> Duration {
        Duration::from_millis(self.min_park_timeout_ms)
    }

    /// Whether a fleet with `agent_count` agent nodes counts as large.
    pub fn is_large_fleet(&self, agent_count: usize) -> bool {
        agent_count > self.large_fleet_threshold
    }

    /// Whether a task with the given estimate counts as a long job.
    /// Unknown estimates are never long.
    pub fn is_long_job(&self, estimate: Option<Duration>) -> bool {
        estimate.is_some_and(|d| d > self.long_job_threshold())
    }

    /// How long a buildable item with the given estimate may wait before it is stuck.
    pub fn stuck_after(&self, estimate: Option<Duration>) -> Duration {
        match estimate {
            Some(d) => d
                .max(Duration::from_secs(self.stuck_floor_secs))
                .saturating_mul(self.stuck_multiplier),
            None => Duration::from_secs(self.stuck_unknown_hours.saturating_mul(3600)),
        }
    }
}
