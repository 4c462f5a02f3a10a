//! Choosing which parked executor receives a buildable task.

use foreman_core::SchedulerConfig;
use indexmap::IndexMap;

use crate::executor::ExecutorId;
use crate::task::Task;

use super::state::JobOffer;

/// Inputs to a placement decision that live outside the parked offers.
pub(crate) struct Placement<'a> {
    pub config: &'a SchedulerConfig,
    pub quieting_down: bool,
    /// Number of registered agent computers.
    pub agent_count: usize,
}

impl Placement<'_> {
    /// Pick an offer for `task`, in rule order:
    ///
    /// 1. nothing while quieting down;
    /// 2. a hard label picks the first available node carrying it, exclusive or not;
    /// 3. the node of the previous run, if in normal mode (agents skipped in a large fleet);
    /// 4. in a large fleet or for a long task, any normal-mode agent;
    /// 5. any normal-mode node.
    pub fn choose(
        &self,
        parked: &IndexMap<ExecutorId, JobOffer>,
        task: &dyn Task,
    ) -> Option<ExecutorId> {
        if self.quieting_down {
            return None;
        }

        let available = || parked.iter().filter(|(_, offer)| offer.is_available());

        if let Some(label) = task.assigned_label() {
            return available()
                .find(|(_, offer)| label.contains(&offer.node()))
                .map(|(id, _)| *id);
        }

        let large = self.config.is_large_fleet(self.agent_count);

        if let Some(last) = task.last_built_on() {
            let warm = available().find(|(_, offer)| {
                let node = offer.node();
                node.name == last && !node.is_exclusive() && !(large && node.is_agent())
            });
            if let Some((id, _)) = warm {
                return Some(*id);
            }
        }

        if large || self.config.is_long_job(task.estimated_duration()) {
            let agent = available().find(|(_, offer)| {
                let node = offer.node();
                node.is_agent() && !node.is_exclusive()
            });
            if let Some((id, _)) = agent {
                return Some(*id);
            }
        }

        available()
            .find(|(_, offer)| !offer.node().is_exclusive())
            .map(|(id, _)| *id)
    }
}
