//! The build queue: admission, partitions, and views.
//!
//! Every task lives in exactly one partition:
//!
//! - **waiting**: in its quiet period, ordered by due time then admission;
//! - **blocked**: due, but cannot start (resources, or the task's own predicate);
//! - **buildable**: due and startable, in the order it became buildable.
//!
//! Idle executors park in [`Queue::pop`]; the matching pass inside `pop`
//! moves buildable items onto their offers.

mod item;
mod maintenance;
mod placement;
mod pop;
mod state;

#[cfg(test)]
mod tests;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use foreman_core::SchedulerConfig;
use indexmap::IndexMap;
use tracing::{debug, info, warn};

use crate::computer::Computer;
use crate::executor::ExecutorId;
use crate::metrics::{QueueMetrics, QueueSnapshot};
use crate::node::Label;
use crate::resource::ResourceController;
use crate::store::QueueStore;
use crate::task::Task;

pub use item::{format_duration, ItemState, QueueItem};
use state::{QueueState, WaitingItem};

/// Build queue and executor registry.
#[derive(Debug)]
pub struct Queue {
    config: SchedulerConfig,
    state: Mutex<QueueState>,
    computers: RwLock<IndexMap<String, Arc<Computer>>>,
    resources: ResourceController,
    metrics: RwLock<QueueMetrics>,
    quieting_down: AtomicBool,
    terminating: AtomicBool,
    next_executor_id: AtomicU64,
}

/// `now + quiet`, saturating at the end of time.
fn due_after(now: DateTime<Utc>, quiet: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(quiet)
        .ok()
        .and_then(|d| now.checked_add_signed(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

impl Queue {
    pub fn new(config: SchedulerConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            state: Mutex::new(QueueState::default()),
            computers: RwLock::new(IndexMap::new()),
            resources: ResourceController::new(),
            metrics: RwLock::new(QueueMetrics::default()),
            quieting_down: AtomicBool::new(false),
            terminating: AtomicBool::new(false),
            next_executor_id: AtomicU64::new(1),
        })
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    fn lock_state(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ── Admission ─────────────────────────────────────────────

    /// Schedule `task` with the configured default quiet period.
    pub fn schedule(&self, task: Arc<dyn Task>) -> bool {
        self.add(task, self.config.default_quiet_period())
    }

    /// Schedule `task` to become eligible after `quiet_period`.
    ///
    /// Returns true only if a new queue entry was created. If the task is
    /// already waiting, its due time can only move earlier; if it is blocked
    /// or buildable, nothing changes.
    pub fn add(&self, task: Arc<dyn Task>, quiet_period: Duration) -> bool {
        let now = Utc::now();
        let due = due_after(now, quiet_period);
        let mut st = self.lock_state();

        if let Some((key, item)) = st.remove_waiting(task.name()) {
            if due < key.0 {
                debug!(task = task.name(), due = %due, "quiet period pulled in");
                st.insert_waiting((due, key.1), item);
                st.wake_one_idle();
            } else {
                st.insert_waiting(key, item);
            }
            return false;
        }
        if st.blocked.contains_key(task.name()) || st.buildable.contains_key(task.name()) {
            debug!(task = task.name(), "already pending, not re-queued");
            return false;
        }

        let id = st.next_id();
        debug!(task = task.name(), id, due = %due, "task queued");
        st.insert_waiting(
            (due, id),
            WaitingItem {
                id,
                enqueued_at: now,
                task,
            },
        );
        st.wake_one_idle();
        true
    }

    /// Remove the task from whichever partition holds it.
    ///
    /// An item already handed to an executor is not affected.
    pub fn cancel(&self, name: &str) -> bool {
        let mut st = self.lock_state();
        let removed = st.remove_waiting(name).is_some()
            | st.blocked.shift_remove(name).is_some()
            | st.buildable.shift_remove(name).is_some();
        if removed {
            debug!(task = name, "task cancelled");
        }
        removed
    }

    /// Drop every queued item. Items already handed to executors still run.
    pub fn clear(&self) {
        let mut st = self.lock_state();
        let dropped = st.len();
        st.waiting.clear();
        st.waiting_index.clear();
        st.blocked.clear();
        st.buildable.clear();
        info!(dropped, "queue cleared");
    }

    // ── Views ─────────────────────────────────────────────────

    pub fn contains(&self, name: &str) -> bool {
        self.lock_state().contains(name)
    }

    pub fn is_empty(&self) -> bool {
        self.lock_state().len() == 0
    }

    pub fn len(&self) -> usize {
        self.lock_state().len()
    }

    /// Snapshot of the named task's queue entry.
    pub fn get_item(&self, name: &str) -> Option<QueueItem> {
        let now = Utc::now();
        let st = self.lock_state();
        if let Some(key) = st.waiting_index.get(name) {
            return st
                .waiting
                .get(key)
                .map(|item| self.describe_waiting(key, item, now));
        }
        if let Some(item) = st.blocked.get(name) {
            return Some(self.describe_pending(item, ItemState::Blocked, now));
        }
        st.buildable
            .get(name)
            .map(|item| self.describe_pending(item, ItemState::Buildable, now))
    }

    /// All queued items: waiting in due order, then blocked, then buildable.
    pub fn items(&self) -> Vec<QueueItem> {
        let now = Utc::now();
        let st = self.lock_state();
        let mut out = Vec::with_capacity(st.len());
        out.extend(
            st.waiting
                .iter()
                .map(|(key, item)| self.describe_waiting(key, item, now)),
        );
        out.extend(
            st.blocked
                .values()
                .map(|item| self.describe_pending(item, ItemState::Blocked, now)),
        );
        out.extend(
            st.buildable
                .values()
                .map(|item| self.describe_pending(item, ItemState::Buildable, now)),
        );
        out
    }

    /// Buildable items in dispatch order.
    pub fn buildable_items(&self) -> Vec<QueueItem> {
        let now = Utc::now();
        let st = self.lock_state();
        st.buildable
            .values()
            .map(|item| self.describe_pending(item, ItemState::Buildable, now))
            .collect()
    }

    /// Buildable items whose label (if any) the computer's node satisfies.
    pub fn buildable_items_for(&self, computer: &Computer) -> Vec<QueueItem> {
        let node = computer.node();
        self.buildable_items()
            .into_iter()
            .filter(|item| {
                item.task
                    .assigned_label()
                    .map_or(true, |label| label.contains(&node))
            })
            .collect()
    }

    /// Number of buildable items assigned to exactly `label`.
    pub fn count_buildable_for(&self, label: &Label) -> usize {
        self.lock_state()
            .buildable
            .values()
            .filter(|item| item.task.assigned_label().as_ref() == Some(label))
            .count()
    }

    /// Partition sizes, for status reporting.
    pub fn snapshot(&self) -> QueueSnapshot {
        let st = self.lock_state();
        QueueSnapshot {
            waiting: st.waiting.len(),
            blocked: st.blocked.len(),
            buildable: st.buildable.len(),
            parked: st.parked.len(),
            running_with_resources: self.resources.in_progress().len(),
        }
    }

    pub fn metrics(&self) -> QueueMetrics {
        self.metrics
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn resources(&self) -> &ResourceController {
        &self.resources
    }

    // ── Lifecycle ─────────────────────────────────────────────

    /// Stop (or resume) handing out work. Queued items stay queued.
    pub fn set_quieting_down(&self, quiet: bool) {
        if self.quieting_down.swap(quiet, Ordering::SeqCst) != quiet {
            info!(quieting_down = quiet, "quiet-down mode changed");
            if !quiet {
                self.schedule_maintenance();
            }
        }
    }

    pub fn is_quieting_down(&self) -> bool {
        self.quieting_down.load(Ordering::SeqCst)
    }

    /// Make every parked and future `pop` fail with `ShuttingDown`.
    pub fn shutdown(&self) {
        if self.terminating.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("queue shutting down");
        let st = self.lock_state();
        for offer in st.parked.values() {
            offer.event.signal();
        }
    }

    pub fn is_terminating(&self) -> bool {
        self.terminating.load(Ordering::SeqCst)
    }

    // ── Computers ─────────────────────────────────────────────

    /// Add a computer to the registry. Replaces one with the same name.
    pub fn register_computer(&self, computer: Arc<Computer>) {
        let name = computer.name().to_string();
        let previous = self
            .computers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.clone(), computer);
        if let Some(previous) = previous {
            warn!(computer = %name, "computer replaced; retiring old executors");
            previous.set_num_executors(0);
        }
        info!(computer = %name, "computer registered");
        self.schedule_maintenance();
    }

    /// Remove a computer and retire its executors.
    pub fn remove_computer(&self, name: &str) -> Option<Arc<Computer>> {
        let removed = self
            .computers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .shift_remove(name)?;
        removed.set_num_executors(0);
        info!(computer = %name, "computer removed");
        Some(removed)
    }

    pub fn computer(&self, name: &str) -> Option<Arc<Computer>> {
        self.computers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    pub fn computers(&self) -> Vec<Arc<Computer>> {
        self.computers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    /// Number of registered agent computers.
    pub fn agent_count(&self) -> usize {
        self.computers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|c| c.node().is_agent())
            .count()
    }

    /// (computers carrying `label`, how many of those are online).
    fn label_status(&self, label: &Label) -> (usize, usize) {
        let computers = self.computers.read().unwrap_or_else(PoisonError::into_inner);
        computers
            .values()
            .filter(|c| label.contains(&c.node()))
            .fold((0, 0), |(nodes, online), c| {
                (nodes + 1, online + usize::from(c.is_online()))
            })
    }

    pub(crate) fn next_executor_id(&self) -> ExecutorId {
        self.next_executor_id.fetch_add(1, Ordering::SeqCst)
    }

    // ── Persistence ───────────────────────────────────────────

    /// Names of every queued task, in [`items`](Self::items) order.
    pub fn task_names(&self) -> Vec<String> {
        let st = self.lock_state();
        st.waiting
            .values()
            .map(|item| item.task.name().to_string())
            .chain(st.blocked.keys().cloned())
            .chain(st.buildable.keys().cloned())
            .collect()
    }

    /// Persist queued task names. Failures are logged, never raised.
    pub fn save(&self, store: &QueueStore) {
        let names = self.task_names();
        match store.save(&names) {
            Ok(()) => info!(path = %store.path().display(), tasks = names.len(), "queue saved"),
            Err(e) => warn!(path = %store.path().display(), error = %e, "failed to save queue"),
        }
    }

    /// Re-admit persisted tasks with no quiet period. Unknown names are skipped.
    /// Returns how many tasks were restored.
    pub fn load<F>(&self, store: &QueueStore, resolve: F) -> usize
    where
        F: Fn(&str) -> Option<Arc<dyn Task>>,
    {
        let names = match store.load() {
            Ok(names) => names,
            Err(e) => {
                warn!(path = %store.path().display(), error = %e, "failed to load queue");
                return 0;
            }
        };
        let mut restored = 0;
        for name in &names {
            match resolve(name) {
                Some(task) => {
                    if self.add(task, Duration::ZERO) {
                        restored += 1;
                    }
                }
                None => warn!(task = %name, "persisted task no longer exists, skipped"),
            }
        }
        info!(restored, persisted = names.len(), "queue restored");
        restored
    }
}
