//! Tasks that run a shell command.

use std::process::Command;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::config::{FleetConfig, JobConfig};
use crate::error::TaskError;
use crate::node::Label;
use crate::resource::{Resource, ResourceList};
use crate::task::{Executable, ExecutionContext, Task};

#[derive(Debug, Default)]
struct History {
    last_built_on: Option<String>,
    last_duration: Option<Duration>,
}

/// A job that runs `sh -c <command>`.
///
/// Unless `concurrent`, the task writes a resource named after itself, so a
/// second run stays blocked while the first holds it.
#[derive(Debug)]
pub struct ShellTask {
    name: String,
    command: String,
    label: Option<Label>,
    quiet_period: Option<Duration>,
    estimate: Option<Duration>,
    resources: ResourceList,
    history: Arc<RwLock<History>>,
}

impl ShellTask {
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            resources: ResourceList::new().w(Self::self_resource(&name)),
            name,
            command: command.into(),
            label: None,
            quiet_period: None,
            estimate: None,
            history: Arc::new(RwLock::new(History::default())),
        }
    }

    pub fn from_config(job: &JobConfig, fleet: &FleetConfig) -> Self {
        let mut resources = fleet.resource_list(job);
        if !job.concurrent {
            resources = resources.w(Self::self_resource(&job.name));
        }
        Self {
            name: job.name.clone(),
            command: job.command.clone(),
            label: job.label.as_deref().map(Label::from),
            quiet_period: job.quiet_period(),
            estimate: job.estimated_duration(),
            resources,
            history: Arc::new(RwLock::new(History::default())),
        }
    }

    fn self_resource(name: &str) -> Resource {
        Resource::new(format!("job:{name}"))
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(Label::new(label));
        self
    }

    pub fn with_estimate(mut self, estimate: Duration) -> Self {
        self.estimate = Some(estimate);
        self
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    /// Job-specific quiet period, if configured.
    pub fn quiet_period(&self) -> Option<Duration> {
        self.quiet_period
    }
}

impl Task for ShellTask {
    fn name(&self) -> &str {
        &self.name
    }

    fn assigned_label(&self) -> Option<Label> {
        self.label.clone()
    }

    fn last_built_on(&self) -> Option<String> {
        self.history
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .last_built_on
            .clone()
    }

    /// The last measured duration, falling back to the configured estimate.
    fn estimated_duration(&self) -> Option<Duration> {
        self.history
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .last_duration
            .or(self.estimate)
    }

    fn resource_list(&self) -> ResourceList {
        self.resources.clone()
    }

    fn create_executable(&self) -> Result<Box<dyn Executable>, TaskError> {
        Ok(Box::new(ShellRun {
            name: self.name.clone(),
            command: self.command.clone(),
            history: Arc::clone(&self.history),
        }))
    }
}

struct ShellRun {
    name: String,
    command: String,
    history: Arc<RwLock<History>>,
}

impl Executable for ShellRun {
    fn parent(&self) -> &str {
        &self.name
    }

    fn run(&mut self, ctx: &ExecutionContext) -> Result<(), TaskError> {
        debug!(task = %self.name, command = %self.command, node = %ctx.node, "running command");
        let started = Instant::now();
        let output = Command::new("sh")
            .arg("-c")
            .arg(&self.command)
            .env("FOREMAN_TASK", &self.name)
            .env("FOREMAN_NODE", &ctx.node)
            .env("FOREMAN_EXECUTOR", &ctx.executor)
            .env("FOREMAN_EXECUTOR_NUMBER", ctx.executor_number.to_string())
            .output()?;

        {
            let mut history = self.history.write().unwrap_or_else(PoisonError::into_inner);
            history.last_built_on = Some(ctx.node.clone());
            history.last_duration = Some(started.elapsed());
        }

        for line in String::from_utf8_lossy(&output.stdout).lines() {
            info!(task = %self.name, "{line}");
        }
        for line in String::from_utf8_lossy(&output.stderr).lines() {
            warn!(task = %self.name, "{line}");
        }

        if output.status.success() {
            Ok(())
        } else {
            Err(TaskError::Failed(format!("command exited with {}", output.status)))
        }
    }
}
