use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Queue operational counters, updated on hand-off and completion.
#[derive(Debug, Clone, Default, Serialize)]
pub struct QueueMetrics {
    /// Items handed to an executor, by task name.
    pub tasks_dispatched: HashMap<String, u64>,
    /// Executions that finished successfully, by task name.
    pub tasks_completed: HashMap<String, u64>,
    /// Executions that failed or panicked, by task name.
    pub tasks_failed: HashMap<String, u64>,
    /// Average time from admission to hand-off, over all dispatches.
    pub avg_queue_wait: Duration,
    /// Average execution time by task name.
    pub avg_execution_time: HashMap<String, Duration>,
    /// Last hand-off time by task name.
    pub last_dispatch: HashMap<String, DateTime<Utc>>,
    /// Total hand-offs across all tasks.
    pub total_dispatched: u64,
}

impl QueueMetrics {
    /// Record that `task_name` was handed to an executor `wait` after it was admitted.
    pub fn record_dispatch(&mut self, task_name: &str, wait: Duration) {
        *self.tasks_dispatched.entry(task_name.to_string()).or_default() += 1;
        self.last_dispatch.insert(task_name.to_string(), Utc::now());
        self.total_dispatched += 1;
        self.avg_queue_wait =
            incremental_mean(self.avg_queue_wait, wait, self.total_dispatched);
    }

    /// Record a finished execution.
    pub fn record_execution(&mut self, task_name: &str, duration: Duration, succeeded: bool) {
        let bucket = if succeeded {
            &mut self.tasks_completed
        } else {
            &mut self.tasks_failed
        };
        *bucket.entry(task_name.to_string()).or_default() += 1;

        let count = self.executions(task_name);
        let prev_avg = self
            .avg_execution_time
            .get(task_name)
            .copied()
            .unwrap_or_default();
        self.avg_execution_time
            .insert(task_name.to_string(), incremental_mean(prev_avg, duration, count));
    }

    /// Completed plus failed executions of `task_name`.
    pub fn executions(&self, task_name: &str) -> u64 {
        self.tasks_completed.get(task_name).copied().unwrap_or(0)
            + self.tasks_failed.get(task_name).copied().unwrap_or(0)
    }
}

// new_avg = prev_avg + (sample - prev_avg) / count
fn incremental_mean(prev_avg: Duration, sample: Duration, count: u64) -> Duration {
    if count <= 1 {
        return sample;
    }
    let prev_nanos = prev_avg.as_nanos() as f64;
    let cur_nanos = sample.as_nanos() as f64;
    let avg_nanos = prev_nanos + (cur_nanos - prev_nanos) / count as f64;
    Duration::from_nanos(avg_nanos as u64)
}

/// Point-in-time partition sizes of the queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueSnapshot {
    pub waiting: usize,
    pub blocked: usize,
    pub buildable: usize,
    /// Executors parked waiting for work.
    pub parked: usize,
    /// Activities currently holding resources.
    pub running_with_resources: usize,
}
