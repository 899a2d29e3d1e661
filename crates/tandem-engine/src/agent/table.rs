use std::sync::{Arc, Weak};

use crate::device::Device;

use super::agent::Agent;

/// Agents dispatched together behind one barrier.
///
/// Holds weak references: dropped agents are skipped, never kept alive.
pub struct AgentGroup<D: Device> {
    agents: Vec<Weak<Agent<D>>>,
}

impl<D: Device> AgentGroup<D> {
    pub fn new() -> Self {
        Self { agents: Vec::new() }
    }

    pub fn of<'a>(agents: impl IntoIterator<Item = &'a Arc<Agent<D>>>) -> Self {
        Self {
            agents: agents.into_iter().map(Arc::downgrade).collect(),
        }
    }

    pub fn push(&mut self, agent: &Arc<Agent<D>>) {
        self.agents.push(Arc::downgrade(agent));
    }

    /// Number of entries, including agents that were since dropped.
    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    /// Live agents, in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = Arc<Agent<D>>> + '_ {
        self.agents.iter().filter_map(Weak::upgrade)
    }
}

impl<D: Device> Default for AgentGroup<D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D: Device> Clone for AgentGroup<D> {
    fn clone(&self) -> Self {
        Self {
            agents: self.agents.clone(),
        }
    }
}

/// Ordered groups of agents for one frame.
///
/// Groups are built in order; within a frame, command buffers are submitted
/// in table order (group by group, agent by agent).
pub struct AgentTable<D: Device> {
    groups: Vec<AgentGroup<D>>,
}

impl<D: Device> AgentTable<D> {
    pub fn new() -> Self {
        Self { groups: Vec::new() }
    }

    pub fn with_group(mut self, group: AgentGroup<D>) -> Self {
        self.groups.push(group);
        self
    }

    pub fn push_group(&mut self, group: AgentGroup<D>) {
        self.groups.push(group);
    }

    pub fn groups(&self) -> &[AgentGroup<D>] {
        &self.groups
    }

    /// Live agents of every group, in submission order.
    pub fn agents(&self) -> impl Iterator<Item = Arc<Agent<D>>> + '_ {
        self.groups.iter().flat_map(AgentGroup::iter)
    }

    pub fn is_empty(&self) -> bool {
        self.groups.iter().all(AgentGroup::is_empty)
    }
}

impl<D: Device> Default for AgentTable<D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D: Device> Clone for AgentTable<D> {
    fn clone(&self) -> Self {
        Self {
            groups: self.groups.clone(),
        }
    }
}

impl<D: Device> FromIterator<AgentGroup<D>> for AgentTable<D> {
    fn from_iter<I: IntoIterator<Item = AgentGroup<D>>>(iter: I) -> Self {
        Self {
            groups: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{build_fn, AgentConfig, BuildCtx};
    use crate::device::headless::HeadlessDevice;
    use crate::frame::FrameContext;

    fn agent(name: &str, frame: &Arc<FrameContext<HeadlessDevice>>) -> Arc<Agent<HeadlessDevice>> {
        Arc::new(Agent::new(
            name,
            AgentConfig::default(),
            Arc::clone(frame),
            build_fn(|_: &mut BuildCtx<'_, HeadlessDevice>| Ok(())),
        ))
    }

    #[test]
    fn agents_iterate_in_table_order() {
        let frame = Arc::new(FrameContext::new(2));
        let (a, b, c) = (agent("a", &frame), agent("b", &frame), agent("c", &frame));

        let table = AgentTable::new()
            .with_group(AgentGroup::of([&a, &b]))
            .with_group(AgentGroup::of([&c]));

        let names: Vec<_> = table.agents().map(|a| a.name().to_string()).collect();
        assert_eq!(names, ["a", "b", "c"]);
        assert_eq!(table.groups().len(), 2);
    }

    #[test]
    fn dropped_agents_are_skipped() {
        let frame = Arc::new(FrameContext::new(2));
        let a = agent("a", &frame);
        let b = agent("b", &frame);

        let mut group = AgentGroup::new();
        group.push(&a);
        group.push(&b);
        drop(a);

        let names: Vec<_> = group.iter().map(|a| a.name().to_string()).collect();
        assert_eq!(names, ["b"]);
        assert_eq!(group.len(), 2);
    }
}
