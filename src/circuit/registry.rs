//! Voltage source registry.
//!
//! Every component that owns a branch-current unknown gets an entry here.
//! The dense position of an entry is the offset of its current in the
//! solution vector, after the node voltages. Components and callers hold
//! the stable [`SourceId`]; the dense index is looked up on demand, so
//! removing one source never leaves another with a stale offset.

use slotmap::{SecondaryMap, SlotMap};

use super::types::{ComponentId, SourceId};

/// Ordered registry of branch-current owners.
#[derive(Debug, Default)]
pub struct VoltageSourceRegistry {
    slots: SlotMap<SourceId, ComponentId>,
    order: Vec<SourceId>,
    positions: SecondaryMap<SourceId, usize>,
}

impl VoltageSourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a component, returning its handle. Its index is the current length.
    pub fn register(&mut self, component: ComponentId) -> SourceId {
        let id = self.slots.insert(component);
        self.positions.insert(id, self.order.len());
        self.order.push(id);
        id
    }

    /// Remove an entry and shift every later index down by one.
    pub fn unregister(&mut self, id: SourceId) -> Option<ComponentId> {
        let component = self.slots.remove(id)?;
        let index = self.positions.remove(id)?;
        self.order.remove(index);
        for later in &self.order[index..] {
            if let Some(pos) = self.positions.get_mut(*later) {
                *pos -= 1;
            }
        }
        Some(component)
    }

    /// Dense index of a source, the offset of its branch current.
    pub fn index_of(&self, id: SourceId) -> Option<usize> {
        self.positions.get(id).copied()
    }

    /// Component owning a source entry.
    pub fn component(&self, id: SourceId) -> Option<ComponentId> {
        self.slots.get(id).copied()
    }

    /// Source at a dense index.
    pub fn at(&self, index: usize) -> Option<SourceId> {
        self.order.get(index).copied()
    }

    /// Number of registered sources (m).
    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Sources in index order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, SourceId, ComponentId)> + '_ {
        self.order
            .iter()
            .enumerate()
            .map(|(i, id)| (i, *id, self.slots[*id]))
    }
}
