//! Executor threads: pull tasks from the queue and run them.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::computer::Computer;
use crate::error::{QueueError, TaskError};
use crate::event::OneShotEvent;
use crate::queue::Queue;
use crate::task::{ExecutionContext, Task};

/// Process-unique executor identity, used to key parked offers.
pub type ExecutorId = u64;

/// What an executor is running right now.
#[derive(Debug, Clone, Serialize)]
pub struct CurrentRun {
    pub task: String,
    pub started_at: DateTime<Utc>,
    #[serde(skip)]
    started: Instant,
    pub estimate: Option<Duration>,
}

/// One execution slot on a [`Computer`].
#[derive(Debug)]
pub struct Executor {
    id: ExecutorId,
    number: usize,
    node: String,
    interrupted: AtomicBool,
    /// Event of the current park, if parked.
    wake: Mutex<Option<Arc<OneShotEvent>>>,
    current: RwLock<Option<CurrentRun>>,
    cause_of_death: Mutex<Option<String>>,
}

impl Executor {
    pub(crate) fn new(id: ExecutorId, number: usize, node: impl Into<String>) -> Self {
        Self {
            id,
            number,
            node: node.into(),
            interrupted: AtomicBool::new(false),
            wake: Mutex::new(None),
            current: RwLock::new(None),
            cause_of_death: Mutex::new(None),
        }
    }

    pub fn id(&self) -> ExecutorId {
        self.id
    }

    /// Slot number within the owning computer.
    pub fn number(&self) -> usize {
        self.number
    }

    pub fn node_name(&self) -> &str {
        &self.node
    }

    pub fn display_name(&self) -> String {
        format!("{}#{}", self.node, self.number)
    }

    /// Wake this executor if parked; a parked `pop` returns [`QueueError::Interrupted`].
    ///
    /// Interrupting a running executor only takes effect at its next park.
    pub fn interrupt(&self) {
        self.interrupted.store(true, Ordering::SeqCst);
        if let Some(event) = self.wake.lock().unwrap_or_else(PoisonError::into_inner).as_ref() {
            event.signal();
        }
    }

    pub(crate) fn is_interrupted(&self) -> bool {
        self.interrupted.load(Ordering::SeqCst)
    }

    /// Clear the interrupt flag, returning whether it was set.
    pub(crate) fn take_interrupt(&self) -> bool {
        self.interrupted.swap(false, Ordering::SeqCst)
    }

    /// Register (or clear) the event that [`interrupt`](Self::interrupt) signals.
    pub(crate) fn park_on(&self, event: Option<Arc<OneShotEvent>>) {
        *self.wake.lock().unwrap_or_else(PoisonError::into_inner) = event;
    }

    pub fn is_idle(&self) -> bool {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }

    pub fn is_busy(&self) -> bool {
        !self.is_idle()
    }

    pub fn current_run(&self) -> Option<CurrentRun> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Name of the task being executed, if any.
    pub fn current_task(&self) -> Option<String> {
        self.current_run().map(|run| run.task)
    }

    /// Percentage of the estimated duration elapsed, capped at 99 while running.
    ///
    /// `None` when idle or when the task has no estimate.
    pub fn progress(&self) -> Option<u8> {
        let run = self.current_run()?;
        let estimate = run.estimate?;
        if estimate.is_zero() {
            return Some(99);
        }
        let pct = run.started.elapsed().as_secs_f64() / estimate.as_secs_f64() * 100.0;
        Some(pct.min(99.0) as u8)
    }

    /// Time left according to the estimate. Zero once the estimate is exceeded.
    pub fn estimated_remaining(&self) -> Option<Duration> {
        let run = self.current_run()?;
        let estimate = run.estimate?;
        Some(estimate.saturating_sub(run.started.elapsed()))
    }

    /// Time since the current execution started.
    pub fn elapsed(&self) -> Option<Duration> {
        self.current_run().map(|run| run.started.elapsed())
    }

    /// Panic message if the executor loop died.
    pub fn cause_of_death(&self) -> Option<String> {
        self.cause_of_death
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn record_death(&self, cause: String) {
        *self.cause_of_death.lock().unwrap_or_else(PoisonError::into_inner) = Some(cause);
    }

    fn context(&self) -> ExecutionContext {
        ExecutionContext {
            node: self.node.clone(),
            executor: self.display_name(),
            executor_number: self.number,
        }
    }

    fn set_current(&self, run: Option<CurrentRun>) {
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = run;
    }

    /// Run one task to completion, then return its resources to the queue.
    fn execute(&self, queue: &Queue, task: &Arc<dyn Task>) {
        let started = Instant::now();
        self.set_current(Some(CurrentRun {
            task: task.name().to_string(),
            started_at: Utc::now(),
            started,
            estimate: task.estimated_duration(),
        }));
        info!(executor = %self.display_name(), task = task.name(), "execution started");

        let ctx = self.context();
        let outcome = match task.create_executable() {
            Ok(mut executable) => {
                panic::catch_unwind(AssertUnwindSafe(|| executable.run(&ctx)))
                    .unwrap_or_else(|payload| Err(TaskError::Failed(panic_message(&*payload))))
            }
            Err(e) => Err(e),
        };

        let duration = started.elapsed();
        match &outcome {
            Ok(()) => info!(
                executor = %self.display_name(),
                task = task.name(),
                duration_ms = duration.as_millis() as u64,
                "execution finished"
            ),
            Err(e) => warn!(
                executor = %self.display_name(),
                task = task.name(),
                error = %e,
                "execution failed"
            ),
        }

        queue.execution_finished(task.name(), duration, outcome.is_ok());
        self.set_current(None);
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic with non-string payload".to_string()
    }
}

/// Executor main loop. Returns when the queue shuts down or the executor is retired.
pub fn run_executor(queue: Arc<Queue>, computer: Arc<Computer>, executor: Arc<Executor>) {
    debug!(executor = %executor.display_name(), "executor loop started");
    loop {
        if queue.is_terminating() {
            break;
        }
        if computer.retire_if_surplus(executor.id()) {
            info!(executor = %executor.display_name(), "executor retired");
            return;
        }

        let task = match queue.pop(&computer, &executor) {
            Ok(task) => task,
            Err(QueueError::Interrupted) => continue,
            Err(QueueError::ShuttingDown) => break,
        };
        executor.execute(&queue, &task);
    }
    debug!(executor = %executor.display_name(), "executor loop stopped");
}
