//! Runtime state of a node: its executors and availability flags.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak};
use std::thread::{self, JoinHandle};

use tracing::{debug, error, info, warn};

use crate::executor::{panic_message, run_executor, Executor};
use crate::node::Node;
use crate::queue::Queue;

#[derive(Debug, Default)]
struct Slots {
    executors: Vec<Arc<Executor>>,
    handles: Vec<JoinHandle<()>>,
}

/// A live [`Node`] with a pool of executor threads.
///
/// Holds the queue weakly; the queue owns the registry of computers.
#[derive(Debug)]
pub struct Computer {
    name: String,
    node: RwLock<Arc<Node>>,
    queue: Weak<Queue>,
    slots: Mutex<Slots>,
    num_executors: AtomicUsize,
    online: AtomicBool,
    temporarily_offline: AtomicBool,
    accepting_tasks: AtomicBool,
}

impl Computer {
    /// Create a computer for `node`. Executors start with [`start`](Self::start).
    pub fn new(node: Node, queue: &Arc<Queue>) -> Arc<Self> {
        Arc::new(Self::with_queue(node, Arc::downgrade(queue)))
    }

    fn with_queue(node: Node, queue: Weak<Queue>) -> Self {
        Self {
            name: node.name.clone(),
            num_executors: AtomicUsize::new(node.num_executors),
            node: RwLock::new(Arc::new(node)),
            queue,
            slots: Mutex::new(Slots::default()),
            online: AtomicBool::new(true),
            temporarily_offline: AtomicBool::new(false),
            accepting_tasks: AtomicBool::new(true),
        }
    }

    /// A computer not attached to any queue, for placement tests.
    #[cfg(test)]
    pub(crate) fn detached(node: Node) -> Arc<Self> {
        Arc::new(Self::with_queue(node, Weak::new()))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn node(&self) -> Arc<Node> {
        Arc::clone(&self.node.read().unwrap_or_else(PoisonError::into_inner))
    }

    fn slots(&self) -> MutexGuard<'_, Slots> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Spawn executors up to the node's configured count.
    pub fn start(self: &Arc<Self>) {
        let n = self.node().num_executors;
        self.set_num_executors(n);
    }

    /// Replace the node description (same name), resizing the executor pool.
    pub fn update_node(self: &Arc<Self>, node: Node) {
        if node.name != self.name {
            warn!(computer = %self.name, new_name = %node.name, "node rename ignored");
            return;
        }
        let n = node.num_executors;
        *self.node.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(node);
        self.set_num_executors(n);
    }

    /// Target executor count.
    pub fn num_executors(&self) -> usize {
        self.num_executors.load(Ordering::SeqCst)
    }

    /// Grow or shrink the executor pool to `n`.
    ///
    /// Growth spawns threads immediately. Shrinking interrupts idle executors,
    /// which retire at their next loop iteration; busy ones retire after their
    /// current task.
    pub fn set_num_executors(self: &Arc<Self>, n: usize) {
        self.num_executors.store(n, Ordering::SeqCst);
        let Some(queue) = self.queue.upgrade() else {
            return;
        };

        let mut slots = self.slots();
        slots.handles.retain(|h| !h.is_finished());
        let current = slots.executors.len();
        if n > current {
            let mut used: Vec<usize> = slots.executors.iter().map(|e| e.number()).collect();
            for _ in current..n {
                let number = (0..).find(|i| !used.contains(i)).unwrap_or(used.len());
                used.push(number);
                let executor = Arc::new(Executor::new(queue.next_executor_id(), number, &self.name));
                match self.spawn_executor(&queue, &executor) {
                    Ok(handle) => {
                        slots.executors.push(executor);
                        slots.handles.push(handle);
                    }
                    Err(e) => {
                        error!(computer = %self.name, error = %e, "failed to spawn executor thread");
                        break;
                    }
                }
            }
            info!(computer = %self.name, executors = slots.executors.len(), "executors started");
        } else if n < current {
            for executor in slots.executors.iter().filter(|e| e.is_idle()) {
                executor.interrupt();
            }
            debug!(computer = %self.name, from = current, to = n, "shrinking executor pool");
        }
        drop(slots);
        queue.schedule_maintenance();
    }

    fn spawn_executor(
        self: &Arc<Self>,
        queue: &Arc<Queue>,
        executor: &Arc<Executor>,
    ) -> std::io::Result<JoinHandle<()>> {
        let queue = Arc::clone(queue);
        let computer = Arc::clone(self);
        let executor = Arc::clone(executor);
        thread::Builder::new()
            .name(format!("executor-{}", executor.display_name()))
            .spawn(move || {
                let result = panic::catch_unwind(AssertUnwindSafe(|| {
                    run_executor(Arc::clone(&queue), Arc::clone(&computer), Arc::clone(&executor))
                }));
                if let Err(payload) = result {
                    let cause = panic_message(&*payload);
                    error!(executor = %executor.display_name(), cause = %cause, "executor died");
                    executor.record_death(cause);
                    computer.remove_executor(executor.id());
                    queue.schedule_maintenance();
                }
            })
    }

    /// Remove the executor if the pool is larger than its target. Returns whether it was removed.
    pub(crate) fn retire_if_surplus(&self, id: u64) -> bool {
        let mut slots = self.slots();
        if slots.executors.len() <= self.num_executors() {
            return false;
        }
        match slots.executors.iter().position(|e| e.id() == id) {
            Some(idx) => {
                slots.executors.remove(idx);
                true
            }
            None => false,
        }
    }

    fn remove_executor(&self, id: u64) {
        self.slots().executors.retain(|e| e.id() != id);
    }

    pub fn executors(&self) -> Vec<Arc<Executor>> {
        self.slots().executors.clone()
    }

    pub fn count_executors(&self) -> usize {
        self.slots().executors.len()
    }

    pub fn count_idle(&self) -> usize {
        self.slots().executors.iter().filter(|e| e.is_idle()).count()
    }

    pub fn count_busy(&self) -> usize {
        self.slots().executors.iter().filter(|e| e.is_busy()).count()
    }

    pub fn is_idle(&self) -> bool {
        self.slots().executors.iter().all(|e| e.is_idle())
    }

    /// Offline means disconnected or marked temporarily offline.
    pub fn is_offline(&self) -> bool {
        !self.online.load(Ordering::SeqCst) || self.temporarily_offline.load(Ordering::SeqCst)
    }

    pub fn is_online(&self) -> bool {
        !self.is_offline()
    }

    pub fn is_temporarily_offline(&self) -> bool {
        self.temporarily_offline.load(Ordering::SeqCst)
    }

    pub fn is_accepting_tasks(&self) -> bool {
        self.accepting_tasks.load(Ordering::SeqCst)
    }

    /// Mark the connection up or down.
    pub fn set_online(&self, online: bool) {
        if self.online.swap(online, Ordering::SeqCst) != online {
            info!(computer = %self.name, online, "connection state changed");
            self.notify_queue();
        }
    }

    pub fn set_temporarily_offline(&self, offline: bool) {
        if self.temporarily_offline.swap(offline, Ordering::SeqCst) != offline {
            info!(computer = %self.name, offline, "temporarily offline changed");
            self.notify_queue();
        }
    }

    pub fn set_accepting_tasks(&self, accepting: bool) {
        if self.accepting_tasks.swap(accepting, Ordering::SeqCst) != accepting {
            debug!(computer = %self.name, accepting, "accepting tasks changed");
            self.notify_queue();
        }
    }

    /// Interrupt every executor.
    pub fn interrupt(&self) {
        for executor in self.executors() {
            executor.interrupt();
        }
    }

    /// Wait for all executor threads to exit.
    pub fn join(&self) {
        let handles = std::mem::take(&mut self.slots().handles);
        for handle in handles {
            if handle.join().is_err() {
                warn!(computer = %self.name, "executor thread panicked during join");
            }
        }
    }

    fn notify_queue(&self) {
        if let Some(queue) = self.queue.upgrade() {
            queue.schedule_maintenance();
        }
    }
}
