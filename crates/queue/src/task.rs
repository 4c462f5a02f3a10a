use std::fmt;
use std::time::Duration;

use crate::error::TaskError;
use crate::node::Label;
use crate::resource::ResourceList;

/// A unit of work whose execution is controlled by the queue.
///
/// Two tasks with the same [`name`](Task::name) are the same task: scheduling
/// one while the other is pending collapses into a single queue entry.
pub trait Task: Send + Sync {
    /// Unique name, used as the task's identity.
    fn name(&self) -> &str;

    /// Human-readable name for logging.
    fn display_name(&self) -> &str {
        self.name()
    }

    /// Hard placement constraint. `None` means the task can run anywhere.
    fn assigned_label(&self) -> Option<Label> {
        None
    }

    /// Node the previous execution ran on, preferred for warm workspaces.
    fn last_built_on(&self) -> Option<String> {
        None
    }

    /// Whether execution is blocked for temporary reasons beyond resources.
    fn is_build_blocked(&self) -> bool {
        false
    }

    /// Why [`is_build_blocked`](Task::is_build_blocked) is true.
    fn why_blocked(&self) -> Option<String> {
        None
    }

    /// Estimated execution time, `None` when it cannot be estimated.
    fn estimated_duration(&self) -> Option<Duration> {
        None
    }

    /// Resources needed exclusively (or with bounded sharing) while running.
    fn resource_list(&self) -> ResourceList {
        ResourceList::new()
    }

    /// Create the executable that performs one run of this task.
    fn create_executable(&self) -> Result<Box<dyn Executable>, TaskError>;
}

impl fmt::Debug for dyn Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task").field("name", &self.name()).finish()
    }
}

/// Where an executable is running.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionContext {
    pub node: String,
    pub executor: String,
    pub executor_number: usize,
}

/// One run of a [`Task`], executed by an executor thread.
pub trait Executable: Send {
    /// Name of the task this executable was created from.
    fn parent(&self) -> &str;

    /// Perform the work. Failures are reported here, never through the queue.
    fn run(&mut self, ctx: &ExecutionContext) -> Result<(), TaskError>;
}
