use std::sync::Arc;

use crate::device::Device;
use crate::sync::Signal;

use super::agent::Agent;
use super::event::AgentEvent;
use super::table::{AgentGroup, AgentTable};

/// Maximum number of completion signals waited on at once.
pub const MAX_WAIT_BATCH: usize = 64;

/// Posts an event to a set of agents and blocks until all of them handled it.
///
/// Agents are split into chunks of at most `batch_limit`; each chunk is
/// posted and fully awaited before the next one starts. Completion signals
/// are pooled and reused across dispatches.
pub struct Dispatcher<D: Device> {
    signals: Vec<Arc<Signal>>,
    scratch: Vec<Arc<Agent<D>>>,
    batch_limit: usize,
}

impl<D: Device> Dispatcher<D> {
    pub fn new(batch_limit: usize) -> Self {
        Self {
            signals: Vec::new(),
            scratch: Vec::new(),
            batch_limit: batch_limit.max(1),
        }
    }

    pub fn batch_limit(&self) -> usize {
        self.batch_limit
    }

    /// Signals allocated so far. Never exceeds the batch limit.
    pub fn pooled_signals(&self) -> usize {
        self.signals.len()
    }

    pub fn dispatch_and_wait(&mut self, event: AgentEvent, agents: impl IntoIterator<Item = Arc<Agent<D>>>) {
        self.scratch.clear();
        self.scratch.extend(agents);
        if self.scratch.is_empty() {
            return;
        }

        let batch = self.scratch.len().min(self.batch_limit);
        while self.signals.len() < batch {
            self.signals.push(Arc::new(Signal::new()));
        }

        for chunk in self.scratch.chunks(batch) {
            let signals = &self.signals[..chunk.len()];
            for (agent, signal) in chunk.iter().zip(signals) {
                signal.reset();
                agent.post_event(event, Some(Arc::clone(signal)));
            }
            Signal::wait_all(signals);
        }

        log::trace!("dispatched {event:?} to {} agents", self.scratch.len());
        self.scratch.clear();
    }

    pub fn dispatch_group(&mut self, event: AgentEvent, group: &AgentGroup<D>) {
        self.dispatch_and_wait(event, group.iter());
    }

    /// Dispatches group by group; a group starts once the previous finished.
    pub fn dispatch_table(&mut self, event: AgentEvent, table: &AgentTable<D>) {
        for group in table.groups() {
            self.dispatch_group(event, group);
        }
    }
}

impl<D: Device> Default for Dispatcher<D> {
    fn default() -> Self {
        Self::new(MAX_WAIT_BATCH)
    }
}
