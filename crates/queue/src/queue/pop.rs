use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, warn};

use crate::computer::Computer;
use crate::error::QueueError;
use crate::event::OneShotEvent;
use crate::executor::Executor;
use crate::task::Task;

use super::state::{JobOffer, QueueState};
use super::Queue;

/// Undoes a park when `pop` exits by any path, including unwinding.
struct ParkGuard<'a> {
    queue: &'a Queue,
    executor: &'a Executor,
}

impl Drop for ParkGuard<'_> {
    fn drop(&mut self) {
        self.executor.park_on(None);
        let mut st = self.queue.lock_state();
        if let Some(offer) = st.parked.shift_remove(&self.executor.id()) {
            self.queue.reclaim(&mut st, offer);
        }
        // This executor may have been the one chosen to run maintenance.
        st.wake_one_idle();
    }
}

impl Queue {
    /// Park `executor` until a task is handed to it.
    ///
    /// Each pass runs maintenance and the matching pass, then waits for the
    /// offer's event: until the next waiting item is due (but at least the
    /// minimum park timeout), or indefinitely if nothing is waiting.
    ///
    /// # Errors
    ///
    /// [`QueueError::Interrupted`] when [`Executor::interrupt`] is called while
    /// parked, [`QueueError::ShuttingDown`] once [`Queue::shutdown`] has run.
    /// In both cases an item already handed to the offer goes back to buildable.
    ///
    /// # Panics
    ///
    /// If `executor` is already parked.
    pub fn pop(
        &self,
        computer: &Arc<Computer>,
        executor: &Arc<Executor>,
    ) -> Result<Arc<dyn Task>, QueueError> {
        let _guard = ParkGuard {
            queue: self,
            executor: executor.as_ref(),
        };

        loop {
            if self.is_terminating() {
                return Err(QueueError::ShuttingDown);
            }

            let event = Arc::new(OneShotEvent::new());
            executor.park_on(Some(Arc::clone(&event)));

            let timeout = {
                let mut st = self.lock_state();
                assert!(
                    !st.parked.contains_key(&executor.id()),
                    "executor {} parked twice",
                    executor.display_name()
                );
                st.parked.insert(
                    executor.id(),
                    JobOffer::new(Arc::clone(computer), Arc::clone(executor), Arc::clone(&event)),
                );

                let now = Utc::now();
                self.maintain_locked(&mut st, now);
                self.dispatch_locked(&mut st);

                st.next_due().map(|due| {
                    (due - now)
                        .to_std()
                        .unwrap_or_default()
                        .max(self.config.min_park_timeout())
                })
            };

            // Interrupts and shutdown that raced the park have already set their flags.
            if !executor.is_interrupted() && !self.is_terminating() {
                match timeout {
                    Some(timeout) => {
                        event.block_timeout(timeout);
                    }
                    None => event.block(),
                }
            }

            let mut st = self.lock_state();
            let offer = st.parked.shift_remove(&executor.id());

            if executor.take_interrupt() {
                if let Some(offer) = offer {
                    self.reclaim(&mut st, offer);
                }
                debug!(executor = %executor.display_name(), "interrupted while parked");
                return Err(QueueError::Interrupted);
            }
            if self.is_terminating() {
                if let Some(offer) = offer {
                    self.reclaim(&mut st, offer);
                }
                return Err(QueueError::ShuttingDown);
            }
            if let Some(item) = offer.and_then(|offer| offer.item) {
                debug!(
                    executor = %executor.display_name(),
                    task = item.task.name(),
                    "pop returned task"
                );
                return Ok(item.task);
            }
        }
    }

    /// Return an offer's unconsumed item to buildable, unless the queue
    /// already holds a newer entry for the same task.
    pub(super) fn reclaim(&self, st: &mut QueueState, offer: JobOffer) {
        let Some(item) = offer.item else {
            return;
        };
        let name = item.task.name().to_string();
        self.resources.release(&name);
        if st.contains(&name) {
            debug!(task = %name, "unconsumed item superseded by a newer entry");
            return;
        }
        warn!(
            task = %name,
            executor = %offer.executor.display_name(),
            "executor did not take its task; returned to buildable"
        );
        st.buildable.insert(name, item);
    }
}
