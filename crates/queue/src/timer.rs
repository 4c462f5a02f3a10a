use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, warn};

use crate::event::OneShotEvent;
use crate::queue::Queue;

/// Background thread that runs [`Queue::maintain`] on a fixed interval.
///
/// Keeps the queue moving when every executor is busy. Holds the queue
/// weakly and exits once the queue is dropped or terminating.
pub struct MaintenanceTimer {
    stop: Arc<OneShotEvent>,
    handle: Option<JoinHandle<()>>,
}

impl MaintenanceTimer {
    pub fn start(queue: &Arc<Queue>, interval: Duration) -> std::io::Result<Self> {
        let stop = Arc::new(OneShotEvent::new());
        let weak: Weak<Queue> = Arc::downgrade(queue);
        let handle = {
            let stop = Arc::clone(&stop);
            thread::Builder::new()
                .name("queue-maintenance".into())
                .spawn(move || {
                    debug!(interval_ms = interval.as_millis() as u64, "maintenance timer started");
                    while !stop.block_timeout(interval) {
                        match weak.upgrade() {
                            Some(queue) if !queue.is_terminating() => queue.maintain(),
                            _ => break,
                        }
                    }
                    debug!("maintenance timer stopped");
                })?
        };
        Ok(Self {
            stop,
            handle: Some(handle),
        })
    }

    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.stop.signal();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("maintenance timer thread panicked");
            }
        }
    }
}

impl Drop for MaintenanceTimer {
    fn drop(&mut self) {
        self.shutdown();
    }
}
