use serde::{Deserialize, Serialize};

use crate::node::{Mode, NodeKind};

// ── Top-level config ────────────────────────────────────────────────

/// Everything the coordinator needs to know about its fleet.
///
/// Parsed from `fleet.toml` with support for environment variable overrides.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FleetConfig {
    /// Machines hosting executors. Exactly one must be the coordinator.
    #[serde(default)]
    pub nodes: Vec<NodeConfig>,

    /// Shared resources with a concurrent-write limit above one.
    #[serde(default)]
    pub resources: Vec<ResourceConfig>,

    /// Shell jobs that can be scheduled.
    #[serde(default)]
    pub jobs: Vec<JobConfig>,
}

// ── Section configs ─────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    pub name: String,

    #[serde(default)]
    pub kind: NodeKind,

    #[serde(default)]
    pub mode: Mode,

    #[serde(default = "default_executors")]
    pub executors: usize,

    #[serde(default)]
    pub labels: Vec<String>,
}

fn default_executors() -> usize {
    1
}

/// Write limit for a resource path like `workspace/project-a`.
///
/// Resources not listed here allow a single writer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceConfig {
    pub name: String,

    #[serde(default = "default_concurrent_writes")]
    pub concurrent_writes: usize,
}

fn default_concurrent_writes() -> usize {
    1
}

/// A shell command run as a task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobConfig {
    pub name: String,

    /// Passed to `sh -c`.
    pub command: String,

    /// Only run on nodes carrying this label (or named like it).
    pub label: Option<String>,

    /// Overrides the scheduler's default quiet period.
    pub quiet_period_secs: Option<u64>,

    /// Initial duration estimate; later runs use the last measured duration.
    pub estimated_duration_secs: Option<u64>,

    /// Allow several runs of this job at the same time.
    #[serde(default)]
    pub concurrent: bool,

    /// Resource paths read while running.
    #[serde(default)]
    pub reads: Vec<String>,

    /// Resource paths written while running.
    #[serde(default)]
    pub writes: Vec<String>,
}
