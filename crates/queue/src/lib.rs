pub mod computer;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod event;
pub mod executor;
pub mod metrics;
pub mod node;
pub mod queue;
pub mod resource;
pub mod shell;
pub mod store;
pub mod task;
pub mod timer;

pub use computer::Computer;
pub use config::{FleetConfig, JobConfig, NodeConfig, ResourceConfig};
pub use coordinator::Coordinator;
pub use error::{FleetConfigError, QueueError, TaskError};
pub use event::OneShotEvent;
pub use executor::{run_executor, CurrentRun, Executor, ExecutorId};
pub use metrics::{QueueMetrics, QueueSnapshot};
pub use node::{Label, Mode, Node, NodeKind};
pub use queue::{ItemState, Queue, QueueItem};
pub use resource::{Resource, ResourceController, ResourceList};
pub use shell::ShellTask;
pub use store::{QueueStore, StoreError};
pub use task::{Executable, ExecutionContext, Task};
pub use timer::MaintenanceTimer;
