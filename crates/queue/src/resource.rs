//! Resources that tasks need exclusive (or bounded shared) access to.
//!
//! A [`ResourceList`] names the resources a task reads and writes. The
//! [`ResourceController`] tracks the lists of everything currently running
//! and answers whether another list can start without a conflict.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

/// A named resource, optionally nested under a parent.
///
/// Writing a parent collides with any use of its children and vice versa.
/// Equality is by path; the concurrent-write limit is not part of identity.
#[derive(Debug, Clone)]
pub struct Resource {
    parent: Option<Arc<Resource>>,
    name: String,
    /// Number of concurrent writers allowed.
    num_concurrent_write: usize,
}

impl Resource {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            parent: None,
            name: name.into(),
            num_concurrent_write: 1,
        }
    }

    /// Create a child resource of `parent`.
    pub fn child(parent: &Resource, name: impl Into<String>) -> Self {
        Self {
            parent: Some(Arc::new(parent.clone())),
            name: name.into(),
            num_concurrent_write: 1,
        }
    }

    pub fn with_concurrent_writes(mut self, n: usize) -> Self {
        self.num_concurrent_write = n.max(1);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn num_concurrent_write(&self) -> usize {
        self.num_concurrent_write
    }

    /// Slash-separated path from the root resource.
    pub fn path(&self) -> String {
        match &self.parent {
            Some(p) => format!("{}/{}", p.path(), self.name),
            None => self.name.clone(),
        }
    }

    fn ancestors(&self) -> impl Iterator<Item = &Resource> {
        std::iter::successors(Some(self), |r| r.parent.as_deref())
    }

    /// Whether `count` simultaneous users of `self` and `that` exceed the write limit.
    fn is_colliding_with(&self, that: &Resource, count: usize) -> bool {
        that.ancestors()
            .any(|r| r == self && r.num_concurrent_write < count)
            || self
                .ancestors()
                .any(|r| r == that && r.num_concurrent_write < count)
    }
}

impl PartialEq for Resource {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.parent == other.parent
    }
}

impl Eq for Resource {}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path())
    }
}

/// The resources one activity reads and writes.
#[derive(Debug, Clone, Default)]
pub struct ResourceList {
    all: Vec<Resource>,
    write: Vec<(Resource, usize)>,
}

impl ResourceList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a read of `resource`.
    pub fn r(mut self, resource: Resource) -> Self {
        self.add(resource);
        self
    }

    /// Declare a write of `resource`.
    pub fn w(mut self, resource: Resource) -> Self {
        self.add_write(resource, 1);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.all.is_empty()
    }

    pub fn resources(&self) -> &[Resource] {
        &self.all
    }

    fn add(&mut self, resource: Resource) {
        if !self.all.contains(&resource) {
            self.all.push(resource);
        }
    }

    fn add_write(&mut self, resource: Resource, count: usize) {
        match self.write.iter_mut().find(|(r, _)| *r == resource) {
            Some((_, n)) => *n += count,
            None => self.write.push((resource.clone(), count)),
        }
        self.add(resource);
    }

    fn write_count(&self, resource: &Resource) -> Option<usize> {
        self.write
            .iter()
            .find(|(r, _)| r == resource)
            .map(|(_, n)| *n)
    }

    /// Merge several lists, summing write counts.
    pub fn union<'a>(lists: impl IntoIterator<Item = &'a ResourceList>) -> ResourceList {
        let mut out = ResourceList::new();
        for list in lists {
            for r in &list.all {
                out.add(r.clone());
            }
            for (r, n) in &list.write {
                out.add_write(r.clone(), *n);
            }
        }
        out
    }

    /// The first resource that makes `self` and `that` unable to run together.
    pub fn conflict(&self, that: &ResourceList) -> Option<Resource> {
        Self::one_way_conflict(self, that).or_else(|| Self::one_way_conflict(that, self))
    }

    pub fn is_colliding_with(&self, that: &ResourceList) -> bool {
        self.conflict(that).is_some()
    }

    fn one_way_conflict(lhs: &ResourceList, rhs: &ResourceList) -> Option<Resource> {
        for (r, count) in &lhs.write {
            for l in &rhs.all {
                // A read on the other side is a read/write conflict regardless of limits.
                let users = match rhs.write_count(l) {
                    Some(v) => v + count,
                    None => usize::MAX,
                };
                if r.is_colliding_with(l, users) {
                    return Some(r.clone());
                }
            }
        }
        None
    }
}

#[derive(Debug, Default)]
struct ControllerState {
    /// (activity name, resources) for everything currently holding resources.
    in_progress: Vec<(String, ResourceList)>,
    in_use: ResourceList,
}

impl ControllerState {
    fn recompute(&mut self) {
        self.in_use = ResourceList::union(self.in_progress.iter().map(|(_, l)| l));
    }
}

/// Tracks resources held by running activities.
#[derive(Debug, Default)]
pub struct ResourceController {
    state: Mutex<ControllerState>,
}

impl ResourceController {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ControllerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Mark `resources` as held by `activity`.
    pub fn reserve(&self, activity: &str, resources: ResourceList) {
        if resources.is_empty() {
            return;
        }
        let mut state = self.lock();
        state.in_progress.push((activity.to_string(), resources));
        state.recompute();
    }

    /// Release one reservation held by `activity`. Returns false if it held none.
    pub fn release(&self, activity: &str) -> bool {
        let mut state = self.lock();
        match state.in_progress.iter().position(|(a, _)| a == activity) {
            Some(idx) => {
                state.in_progress.remove(idx);
                state.recompute();
                true
            }
            None => false,
        }
    }

    pub fn can_run(&self, resources: &ResourceList) -> bool {
        resources.is_empty() || !self.lock().in_use.is_colliding_with(resources)
    }

    /// The held resource that `resources` conflicts with, if any.
    pub fn missing_resource(&self, resources: &ResourceList) -> Option<Resource> {
        resources.conflict(&self.lock().in_use)
    }

    /// Name of a running activity whose resources conflict with `resources`.
    pub fn blocking_activity(&self, resources: &ResourceList) -> Option<String> {
        if resources.is_empty() {
            return None;
        }
        self.lock()
            .in_progress
            .iter()
            .find(|(_, held)| resources.is_colliding_with(held))
            .map(|(a, _)| a.clone())
    }

    /// Names of all activities currently holding resources.
    pub fn in_progress(&self) -> Vec<String> {
        self.lock().in_progress.iter().map(|(a, _)| a.clone()).collect()
    }
}
