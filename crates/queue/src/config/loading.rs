use std::path::Path;
use std::time::Duration;

use crate::error::FleetConfigError;
use crate::node::{Node, NodeKind};
use crate::resource::{Resource, ResourceList};

use super::types::{FleetConfig, JobConfig, NodeConfig};

impl FleetConfig {
    /// Parse config from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self, FleetConfigError> {
        let mut config: Self = toml::from_str(toml_str)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Load config from a file path.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, FleetConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml(&content)
    }

    /// A coordinator with `executors` slots and nothing else.
    pub fn single_node(executors: usize) -> Self {
        Self {
            nodes: vec![NodeConfig {
                name: "coordinator".into(),
                kind: NodeKind::Coordinator,
                mode: Default::default(),
                executors,
                labels: Vec::new(),
            }],
            resources: Vec::new(),
            jobs: Vec::new(),
        }
    }

    /// Runtime node descriptions, in config order.
    pub fn nodes(&self) -> Vec<Node> {
        self.nodes
            .iter()
            .map(|n| Node {
                name: n.name.clone(),
                kind: n.kind,
                mode: n.mode,
                num_executors: n.executors,
                labels: n.labels.iter().cloned().collect(),
            })
            .collect()
    }

    pub fn job(&self, name: &str) -> Option<&JobConfig> {
        self.jobs.iter().find(|j| j.name == name)
    }

    fn write_limit(&self, path: &str) -> usize {
        self.resources
            .iter()
            .find(|r| r.name == path)
            .map_or(1, |r| r.concurrent_writes)
    }

    /// Build the resource for a slash-separated path, applying configured
    /// write limits at every level.
    pub fn resource(&self, path: &str) -> Resource {
        let mut prefix = String::new();
        let mut current: Option<Resource> = None;
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            if !prefix.is_empty() {
                prefix.push('/');
            }
            prefix.push_str(segment);
            let next = match &current {
                Some(parent) => Resource::child(parent, segment),
                None => Resource::new(segment),
            };
            current = Some(next.with_concurrent_writes(self.write_limit(&prefix)));
        }
        current.unwrap_or_else(|| Resource::new(path))
    }

    /// Declared reads and writes of a job.
    pub fn resource_list(&self, job: &JobConfig) -> ResourceList {
        let list = job
            .reads
            .iter()
            .fold(ResourceList::new(), |list, path| list.r(self.resource(path)));
        job.writes
            .iter()
            .fold(list, |list, path| list.w(self.resource(path)))
    }

    // ── Environment variable overrides ──────────────────────────────

    /// Apply environment variable overrides.
    ///
    /// - `FOREMAN_FLEET_COORDINATOR_EXECUTORS` -> executors of the coordinator node
    /// - `FOREMAN_FLEET_EXTRA_LABELS` -> comma-separated labels added to the coordinator
    pub(crate) fn apply_env_overrides(&mut self) {
        let coordinator = self
            .nodes
            .iter_mut()
            .find(|n| n.kind == NodeKind::Coordinator);
        let Some(coordinator) = coordinator else {
            return;
        };
        if let Ok(v) = std::env::var("FOREMAN_FLEET_COORDINATOR_EXECUTORS") {
            if let Ok(n) = v.parse::<usize>() {
                coordinator.executors = n;
            }
        }
        if let Ok(v) = std::env::var("FOREMAN_FLEET_EXTRA_LABELS") {
            for label in v.split(',').map(str::trim).filter(|l| !l.is_empty()) {
                if !coordinator.labels.iter().any(|l| l == label) {
                    coordinator.labels.push(label.to_string());
                }
            }
        }
    }
}

impl JobConfig {
    pub fn quiet_period(&self) -> Option<Duration> {
        self.quiet_period_secs.map(Duration::from_secs)
    }

    pub fn estimated_duration(&self) -> Option<Duration> {
        self.estimated_duration_secs.map(Duration::from_secs)
    }
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self::single_node(2)
    }
}
