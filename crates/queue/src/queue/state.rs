use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;

use crate::computer::Computer;
use crate::event::OneShotEvent;
use crate::executor::{Executor, ExecutorId};
use crate::node::Node;
use crate::task::Task;

/// Ordering key of the waiting partition: due time, then admission order.
pub(crate) type WaitKey = (DateTime<Utc>, u64);

/// A task in its quiet period.
#[derive(Debug, Clone)]
pub(crate) struct WaitingItem {
    pub id: u64,
    pub enqueued_at: DateTime<Utc>,
    pub task: Arc<dyn Task>,
}

/// A blocked or buildable task.
#[derive(Debug, Clone)]
pub(crate) struct PendingItem {
    pub id: u64,
    pub due: DateTime<Utc>,
    pub enqueued_at: DateTime<Utc>,
    /// When the item first left the waiting partition. Kept across blocked/buildable moves.
    pub buildable_since: DateTime<Utc>,
    pub task: Arc<dyn Task>,
}

/// An idle executor's standing request for work.
#[derive(Debug)]
pub(crate) struct JobOffer {
    pub computer: Arc<Computer>,
    pub executor: Arc<Executor>,
    pub event: Arc<OneShotEvent>,
    /// Item handed to this executor, set at most once.
    pub item: Option<PendingItem>,
}

impl JobOffer {
    pub fn new(computer: Arc<Computer>, executor: Arc<Executor>, event: Arc<OneShotEvent>) -> Self {
        Self {
            computer,
            executor,
            event,
            item: None,
        }
    }

    /// Hand `item` to the executor and wake it.
    pub fn assign(&mut self, item: PendingItem) {
        assert!(
            self.item.is_none(),
            "offer for {} already holds {}",
            self.executor.display_name(),
            self.item.as_ref().map(|i| i.task.name()).unwrap_or_default()
        );
        self.item = Some(item);
        self.event.signal();
    }

    pub fn node(&self) -> Arc<Node> {
        self.computer.node()
    }

    /// No item yet, and the computer is online and accepting tasks.
    pub fn is_available(&self) -> bool {
        self.item.is_none() && !self.computer.is_offline() && self.computer.is_accepting_tasks()
    }
}

/// Everything guarded by the queue lock. Each task name lives in exactly one
/// of `waiting`, `blocked` or `buildable`.
#[derive(Debug, Default)]
pub(crate) struct QueueState {
    pub waiting: BTreeMap<WaitKey, WaitingItem>,
    /// Task name to its key in `waiting`.
    pub waiting_index: HashMap<String, WaitKey>,
    pub blocked: IndexMap<String, PendingItem>,
    /// Insertion-ordered; dispatch scans front to back.
    pub buildable: IndexMap<String, PendingItem>,
    pub parked: IndexMap<ExecutorId, JobOffer>,
    pub next_id: u64,
}

impl QueueState {
    pub fn contains(&self, name: &str) -> bool {
        self.waiting_index.contains_key(name)
            || self.blocked.contains_key(name)
            || self.buildable.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.waiting.len() + self.blocked.len() + self.buildable.len()
    }

    pub fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    /// Earliest due time among waiting items.
    pub fn next_due(&self) -> Option<DateTime<Utc>> {
        self.waiting.first_key_value().map(|((due, _), _)| *due)
    }

    pub fn insert_waiting(&mut self, key: WaitKey, item: WaitingItem) {
        self.waiting_index.insert(item.task.name().to_string(), key);
        self.waiting.insert(key, item);
    }

    pub fn remove_waiting(&mut self, name: &str) -> Option<(WaitKey, WaitingItem)> {
        let key = self.waiting_index.remove(name)?;
        self.waiting.remove(&key).map(|item| (key, item))
    }

    /// Remove and return the first waiting item if it is due at `now`.
    pub fn pop_due(&mut self, now: DateTime<Utc>) -> Option<(WaitKey, WaitingItem)> {
        let (&key, _) = self.waiting.first_key_value()?;
        if key.0 > now {
            return None;
        }
        let (key, item) = self.waiting.pop_first()?;
        self.waiting_index.remove(item.task.name());
        Some((key, item))
    }

    /// Wake one idle parked executor that has not been woken yet.
    pub fn wake_one_idle(&self) -> bool {
        match self
            .parked
            .values()
            .find(|o| o.item.is_none() && !o.event.is_signaled())
        {
            Some(offer) => {
                offer.event.signal();
                true
            }
            None => false,
        }
    }
}
