use std::sync::PoisonError;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::task::Task;

use super::placement::Placement;
use super::state::{PendingItem, QueueState};
use super::Queue;

impl Queue {
    /// Whether `task` cannot start now: its own predicate, or a resource conflict
    /// with something already running.
    pub(crate) fn is_build_blocked(&self, task: &dyn Task) -> bool {
        task.is_build_blocked() || !self.resources.can_run(&task.resource_list())
    }

    /// Move items between partitions, then wake an idle executor if anything
    /// is buildable.
    pub fn maintain(&self) {
        let mut st = self.lock_state();
        self.maintain_locked(&mut st, Utc::now());
        if !st.buildable.is_empty() {
            st.wake_one_idle();
        }
    }

    /// Blocked items that became startable move to buildable; due waiting
    /// items move to blocked or buildable. Waiting is scanned in due order and
    /// stops at the first future item.
    pub(super) fn maintain_locked(&self, st: &mut QueueState, now: DateTime<Utc>) {
        let unblocked: Vec<String> = st
            .blocked
            .iter()
            .filter(|(_, item)| !self.is_build_blocked(item.task.as_ref()))
            .map(|(name, _)| name.clone())
            .collect();
        for name in unblocked {
            if let Some(item) = st.blocked.shift_remove(&name) {
                debug!(task = %name, "blocked -> buildable");
                st.buildable.insert(name, item);
            }
        }

        while let Some(((due, _), item)) = st.pop_due(now) {
            let name = item.task.name().to_string();
            let pending = PendingItem {
                id: item.id,
                due,
                enqueued_at: item.enqueued_at,
                buildable_since: now,
                task: item.task,
            };
            if self.is_build_blocked(pending.task.as_ref()) {
                debug!(task = %name, "waiting -> blocked");
                st.blocked.insert(name, pending);
            } else {
                debug!(task = %name, "waiting -> buildable");
                st.buildable.insert(name, pending);
            }
        }
    }

    /// Hand buildable items to parked executors, front to back.
    ///
    /// Items that became blocked since the last maintenance move back to
    /// blocked. Resources are reserved at hand-off so two conflicting items
    /// cannot both be handed out.
    pub(super) fn dispatch_locked(&self, st: &mut QueueState) {
        if st.parked.is_empty() || st.buildable.is_empty() {
            return;
        }
        let placement = Placement {
            config: &self.config,
            quieting_down: self.is_quieting_down(),
            agent_count: self.agent_count(),
        };
        let names: Vec<String> = st.buildable.keys().cloned().collect();
        let now = Utc::now();

        for name in names {
            let Some(task) = st.buildable.get(&name).map(|item| item.task.clone()) else {
                continue;
            };

            if self.is_build_blocked(task.as_ref()) {
                if let Some(item) = st.buildable.shift_remove(&name) {
                    debug!(task = %name, "buildable -> blocked");
                    st.blocked.insert(name, item);
                }
                continue;
            }

            let Some(executor_id) = placement.choose(&st.parked, task.as_ref()) else {
                continue;
            };
            let Some(item) = st.buildable.shift_remove(&name) else {
                continue;
            };
            let Some(offer) = st.parked.get_mut(&executor_id) else {
                st.buildable.insert(name, item);
                continue;
            };

            let wait = (now - item.enqueued_at).to_std().unwrap_or_default();
            self.resources.reserve(&name, task.resource_list());
            debug!(
                task = %name,
                executor = %offer.executor.display_name(),
                wait_ms = wait.as_millis() as u64,
                "handed to executor"
            );
            offer.assign(item);
            self.metrics
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .record_dispatch(&name, wait);
        }
    }

    /// Wake one idle parked executor so it re-runs maintenance and dispatch.
    pub fn schedule_maintenance(&self) {
        self.lock_state().wake_one_idle();
    }

    /// Called by an executor after running `task_name`: release its resources,
    /// record metrics, and let a parked executor pick up newly unblocked work.
    pub(crate) fn execution_finished(&self, task_name: &str, duration: Duration, succeeded: bool) {
        self.resources.release(task_name);
        self.metrics
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .record_execution(task_name, duration, succeeded);
        self.maintain();
    }
}
