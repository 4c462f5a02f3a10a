use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::node::Label;
use crate::task::Task;

use super::state::{PendingItem, WaitKey, WaitingItem};
use super::Queue;

/// Which partition an item is in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemState {
    Waiting,
    Blocked,
    Buildable,
}

/// Read-only snapshot of one queued task.
#[derive(Debug, Clone, Serialize)]
pub struct QueueItem {
    /// Admission number, unique for the life of the queue.
    pub id: u64,
    pub task_name: String,
    pub state: ItemState,
    pub due: DateTime<Utc>,
    pub enqueued_at: DateTime<Utc>,
    /// When the item became eligible. `None` while waiting.
    pub buildable_since: Option<DateTime<Utc>>,
    /// Human-readable reason the item is not running yet.
    pub why: String,
    /// Buildable for far longer than its estimate.
    pub stuck: bool,
    #[serde(skip)]
    pub task: Arc<dyn Task>,
}

impl QueueItem {
    pub fn is_waiting(&self) -> bool {
        self.state == ItemState::Waiting
    }

    pub fn is_blocked(&self) -> bool {
        self.state == ItemState::Blocked
    }

    pub fn is_buildable(&self) -> bool {
        self.state == ItemState::Buildable
    }
}

impl Queue {
    pub(super) fn describe_waiting(
        &self,
        key: &WaitKey,
        item: &WaitingItem,
        now: DateTime<Utc>,
    ) -> QueueItem {
        let remaining = (key.0 - now).to_std().unwrap_or_default();
        QueueItem {
            id: item.id,
            task_name: item.task.name().to_string(),
            state: ItemState::Waiting,
            due: key.0,
            enqueued_at: item.enqueued_at,
            buildable_since: None,
            why: format!("In the quiet period. Expires in {}", format_duration(remaining)),
            stuck: false,
            task: Arc::clone(&item.task),
        }
    }

    pub(super) fn describe_pending(
        &self,
        item: &PendingItem,
        state: ItemState,
        now: DateTime<Utc>,
    ) -> QueueItem {
        let (why, stuck) = match state {
            ItemState::Blocked => (self.why_blocked(item.task.as_ref()), false),
            _ => (
                self.why_buildable(item.task.as_ref()),
                self.is_stuck(item, now),
            ),
        };
        QueueItem {
            id: item.id,
            task_name: item.task.name().to_string(),
            state,
            due: item.due,
            enqueued_at: item.enqueued_at,
            buildable_since: Some(item.buildable_since),
            why,
            stuck,
            task: Arc::clone(&item.task),
        }
    }

    fn why_blocked(&self, task: &dyn Task) -> String {
        if let Some(reason) = task.assigned_label().and_then(|l| self.label_offline_reason(&l)) {
            return reason;
        }
        let resources = task.resource_list();
        if let Some(activity) = self.resources.blocking_activity(&resources) {
            return if activity == task.name() {
                format!("A previous run of {} is already in progress", task.display_name())
            } else {
                format!("Blocked by {activity}")
            };
        }
        if let Some(resource) = self.resources.missing_resource(&resources) {
            return format!("Waiting for resource {resource}");
        }
        task.why_blocked()
            .unwrap_or_else(|| "Blocked for an unspecified reason".to_string())
    }

    fn why_buildable(&self, task: &dyn Task) -> String {
        if self.is_quieting_down() {
            return "The coordinator is about to shut down".to_string();
        }
        match task.assigned_label() {
            // Single-node setups have nothing useful to say about labels.
            Some(label) if self.agent_count() > 0 => self
                .label_offline_reason(&label)
                .unwrap_or_else(|| format!("Waiting for next available executor on {label}")),
            _ => "Waiting for next available executor".to_string(),
        }
    }

    fn label_offline_reason(&self, label: &Label) -> Option<String> {
        let (nodes, online) = self.label_status(label);
        if online > 0 {
            return None;
        }
        Some(if nodes == 1 {
            format!("{label} is offline")
        } else {
            format!("All nodes of label '{label}' are offline")
        })
    }

    fn is_stuck(&self, item: &PendingItem, now: DateTime<Utc>) -> bool {
        if let Some(label) = item.task.assigned_label() {
            if self.label_offline_reason(&label).is_some() {
                return true;
            }
        }
        let waited = (now - item.buildable_since).to_std().unwrap_or_default();
        waited > self.config.stuck_after(item.task.estimated_duration())
    }
}

/// Coarse human-readable duration: "42 sec", "3 min 5 sec", "2 hr 10 min".
pub fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{secs} sec")
    } else if secs < 3600 {
        format!("{} min {} sec", secs / 60, secs % 60)
    } else {
        format!("{} hr {} min", secs / 3600, (secs % 3600) / 60)
    }
}
