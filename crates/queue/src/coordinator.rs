//! Wires the queue, computers, maintenance timer and persistence together.

use std::sync::Arc;

use foreman_core::{Config, ForemanError};
use tracing::{info, warn};

use crate::computer::Computer;
use crate::node::Node;
use crate::queue::Queue;
use crate::store::QueueStore;
use crate::task::Task;
use crate::timer::MaintenanceTimer;

pub struct Coordinator {
    config: Config,
    queue: Arc<Queue>,
    store: QueueStore,
    timer: Option<MaintenanceTimer>,
}

impl Coordinator {
    /// Build an idle coordinator. Fails on configuration the scheduler cannot run with.
    pub fn new(config: Config) -> Result<Self, ForemanError> {
        config.validate()?;
        let queue = Queue::new(config.scheduler.clone());
        let store = QueueStore::new(config.storage.queue_path());
        Ok(Self {
            config,
            queue,
            store,
            timer: None,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn queue(&self) -> &Arc<Queue> {
        &self.queue
    }

    pub fn store(&self) -> &QueueStore {
        &self.store
    }

    /// Register `node` and start its executors.
    pub fn add_node(&self, node: Node) -> Arc<Computer> {
        let computer = Computer::new(node, &self.queue);
        self.queue.register_computer(Arc::clone(&computer));
        computer.start();
        computer
    }

    /// Retire a node's executors and drop it from the registry.
    pub fn remove_node(&self, name: &str) -> bool {
        self.queue.remove_computer(name).is_some()
    }

    /// Re-admit tasks persisted by a previous [`shutdown`](Self::shutdown).
    pub fn restore<F>(&self, resolve: F) -> usize
    where
        F: Fn(&str) -> Option<Arc<dyn Task>>,
    {
        self.queue.load(&self.store, resolve)
    }

    /// Start the periodic maintenance tick.
    pub fn start(&mut self) -> std::io::Result<()> {
        if self.timer.is_none() {
            let interval = self.config.scheduler.maintenance_interval();
            self.timer = Some(MaintenanceTimer::start(&self.queue, interval)?);
            info!(interval_secs = interval.as_secs(), "coordinator started");
        }
        Ok(())
    }

    /// Stop handing out work, wait for executors to finish, then persist
    /// whatever is still queued.
    pub fn shutdown(&mut self) {
        self.queue.shutdown();
        if let Some(timer) = self.timer.take() {
            timer.stop();
        }
        for computer in self.queue.computers() {
            computer.interrupt();
            computer.join();
            if computer.count_busy() > 0 {
                warn!(computer = %computer.name(), "executors still busy after join");
            }
        }
        self.queue.save(&self.store);
        info!("coordinator stopped");
    }
}
