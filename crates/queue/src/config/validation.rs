use std::collections::HashSet;

use super::types::FleetConfig;
use crate::error::FleetConfigError;
use crate::node::NodeKind;

impl FleetConfig {
    /// Validate the config: node and job names, coordinator count, label and
    /// resource references.
    pub fn validate(&self) -> Result<(), FleetConfigError> {
        self.validate_nodes()?;
        self.validate_resources()?;
        self.validate_jobs()?;
        Ok(())
    }

    /// Unique names and exactly one coordinator.
    fn validate_nodes(&self) -> Result<(), FleetConfigError> {
        let mut seen = HashSet::new();
        for node in &self.nodes {
            if node.name.trim().is_empty() {
                return Err(FleetConfigError::Invalid("node with empty name".into()));
            }
            if !seen.insert(node.name.as_str()) {
                return Err(FleetConfigError::Invalid(format!(
                    "duplicate node name '{}'",
                    node.name
                )));
            }
        }
        match self
            .nodes
            .iter()
            .filter(|n| n.kind == NodeKind::Coordinator)
            .count()
        {
            1 => Ok(()),
            n => Err(FleetConfigError::Invalid(format!(
                "expected exactly one coordinator node, found {n}"
            ))),
        }
    }

    fn validate_resources(&self) -> Result<(), FleetConfigError> {
        for resource in &self.resources {
            if resource.name.split('/').all(str::is_empty) {
                return Err(FleetConfigError::Invalid("resource with empty name".into()));
            }
            if resource.concurrent_writes == 0 {
                return Err(FleetConfigError::Invalid(format!(
                    "resource '{}' allows zero concurrent writes",
                    resource.name
                )));
            }
        }
        Ok(())
    }

    /// Unique names, non-empty commands, and labels some node can satisfy.
    fn validate_jobs(&self) -> Result<(), FleetConfigError> {
        let mut seen = HashSet::new();
        for job in &self.jobs {
            if !seen.insert(job.name.as_str()) {
                return Err(FleetConfigError::Invalid(format!(
                    "duplicate job name '{}'",
                    job.name
                )));
            }
            if job.command.trim().is_empty() {
                return Err(FleetConfigError::Invalid(format!(
                    "job '{}' has an empty command",
                    job.name
                )));
            }
            if let Some(label) = &job.label {
                let satisfied = self
                    .nodes
                    .iter()
                    .any(|n| n.name == *label || n.labels.contains(label));
                if !satisfied {
                    return Err(FleetConfigError::Invalid(format!(
                        "job '{}' requires label '{label}' which no node provides",
                        job.name
                    )));
                }
            }
            for path in job.reads.iter().chain(&job.writes) {
                if path.split('/').all(str::is_empty) {
                    return Err(FleetConfigError::Invalid(format!(
                        "job '{}' declares an empty resource path",
                        job.name
                    )));
                }
            }
        }
        Ok(())
    }
}
