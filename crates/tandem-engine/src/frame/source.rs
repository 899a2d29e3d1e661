use crate::agent::AgentTable;
use crate::device::Device;

use super::FrameInfo;

/// Supplies the agents to build for a frame.
pub trait FrameSource<D: Device>: Send {
    /// `None` (or an empty table) submits only the begin and end buffers.
    fn agent_table(&mut self, frame: &FrameInfo) -> Option<&AgentTable<D>>;
}

/// The same table every frame.
pub struct StaticTable<D: Device> {
    table: AgentTable<D>,
}

impl<D: Device> StaticTable<D> {
    pub fn new(table: AgentTable<D>) -> Self {
        Self { table }
    }

    pub fn table_mut(&mut self) -> &mut AgentTable<D> {
        &mut self.table
    }
}

impl<D: Device> FrameSource<D> for StaticTable<D> {
    fn agent_table(&mut self, _frame: &FrameInfo) -> Option<&AgentTable<D>> {
        Some(&self.table)
    }
}
