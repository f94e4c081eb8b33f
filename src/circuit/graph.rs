//! Circuit graph structure.

use std::any::Any;

use log::debug;
use slotmap::SlotMap;

use super::registry::VoltageSourceRegistry;
use super::types::{Branch, BranchId, ComponentId, Node, NodeId, Port, PortRef, SourceId};
use crate::components::Component;
use crate::error::{Result, SimError};

/// An attached component together with its ports.
#[derive(Debug)]
pub(crate) struct ComponentEntry {
    pub model: Box<dyn Component>,
    pub ports: Vec<Port>,
    pub source: Option<SourceId>,
}

/// A circuit: nodes, branches, attached components and the voltage source registry.
///
/// Structural edits (see the `topology` module) bump [`Circuit::revision`] so a
/// running simulator can notice the change and resize its system.
#[derive(Debug)]
pub struct Circuit {
    /// Nodes by index; node 0 is ground
    pub(crate) nodes: Vec<Node>,

    /// Node-to-port connections
    pub(crate) branches: SlotMap<BranchId, Branch>,

    /// Attached components
    pub(crate) components: SlotMap<ComponentId, ComponentEntry>,

    /// Attachment order, used for deterministic stamping
    pub(crate) order: Vec<ComponentId>,

    /// Branch-current owners
    pub(crate) sources: VoltageSourceRegistry,

    revision: u64,
}

impl Default for Circuit {
    fn default() -> Self {
        Self::new()
    }
}

impl Circuit {
    /// Create an empty circuit containing only the ground node.
    pub fn new() -> Self {
        Self {
            nodes: vec![Node::default()],
            branches: SlotMap::with_key(),
            components: SlotMap::with_key(),
            order: Vec::new(),
            sources: VoltageSourceRegistry::new(),
            revision: 0,
        }
    }

    /// Structural revision, incremented by every topology edit.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub(crate) fn bump(&mut self) {
        self.revision = self.revision.wrapping_add(1);
    }

    /// Attach a component. Its ports start unassigned.
    ///
    /// Components that own a branch current are registered as voltage sources.
    pub fn attach<C: Component>(&mut self, component: C) -> ComponentId {
        self.attach_boxed(Box::new(component))
    }

    /// Attach an already boxed component.
    pub fn attach_boxed(&mut self, model: Box<dyn Component>) -> ComponentId {
        let port_count = model.port_count();
        let needs_branch = model.needs_branch();
        let id = self.components.insert_with_key(|id| ComponentEntry {
            ports: (1..=port_count)
                .map(|number| Port {
                    owner: id,
                    number,
                    node: None,
                    branch: None,
                })
                .collect(),
            model,
            source: None,
        });
        self.order.push(id);

        if needs_branch {
            let source = self.sources.register(id);
            self.components[id].source = Some(source);
        }

        debug!(
            "attached component '{}' ({} ports)",
            self.components[id].model.name(),
            port_count
        );
        self.bump();
        id
    }

    /// Attach a component and connect its ports, in order, to existing nodes.
    pub fn add<C: Component>(&mut self, component: C, nodes: &[NodeId]) -> Result<ComponentId> {
        if nodes.len() != component.port_count() {
            return Err(SimError::topology(format!(
                "component '{}' has {} ports but {} nodes were given",
                component.name(),
                component.port_count(),
                nodes.len()
            )));
        }
        if let Some(missing) = nodes.iter().find(|n| !self.has_node(**n)) {
            return Err(SimError::NodeNotFound { node: *missing });
        }

        let id = self.attach(component);
        for (i, node) in nodes.iter().enumerate() {
            self.add_branch(*node, PortRef::new(id, i + 1))?;
        }
        Ok(id)
    }

    /// Connect one port of an attached component to a node.
    pub fn connect(&mut self, component: ComponentId, port: usize, node: NodeId) -> Result<BranchId> {
        self.add_branch(node, PortRef::new(component, port))
    }

    /// Detach a component: remove its branches and registry entry, and hand it back.
    pub fn detach(&mut self, component: ComponentId) -> Result<Box<dyn Component>> {
        let entry = self
            .components
            .get(component)
            .ok_or(SimError::ComponentNotFound)?;
        let branches: Vec<BranchId> = entry.ports.iter().filter_map(|p| p.branch).collect();

        for branch in branches {
            self.delete_branch(branch)?;
        }
        if self.components[component].source.is_some() {
            self.unregister_voltage_source(component)?;
        }

        self.order.retain(|id| *id != component);
        let entry = self
            .components
            .remove(component)
            .ok_or(SimError::ComponentNotFound)?;
        debug!("detached component '{}'", entry.model.name());
        self.bump();
        Ok(entry.model)
    }

    /// Number of attached components.
    pub fn component_count(&self) -> usize {
        self.order.len()
    }

    /// Get a component by handle.
    pub fn component(&self, id: ComponentId) -> Option<&dyn Component> {
        self.components.get(id).map(|e| e.model.as_ref())
    }

    /// Get a mutable component by handle.
    pub fn component_mut(&mut self, id: ComponentId) -> Option<&mut dyn Component> {
        self.components.get_mut(id).map(|e| e.model.as_mut())
    }

    /// Get a component as its concrete type.
    pub fn component_as<T: Component>(&self, id: ComponentId) -> Option<&T> {
        let model: &dyn Any = self.components.get(id)?.model.as_ref();
        model.downcast_ref::<T>()
    }

    /// Get a mutable component as its concrete type.
    pub fn component_as_mut<T: Component>(&mut self, id: ComponentId) -> Option<&mut T> {
        let model: &mut dyn Any = self.components.get_mut(id)?.model.as_mut();
        model.downcast_mut::<T>()
    }

    /// Components in attachment order.
    pub fn components(&self) -> impl Iterator<Item = (ComponentId, &dyn Component)> + '_ {
        self.order
            .iter()
            .filter_map(|id| self.components.get(*id).map(|e| (*id, e.model.as_ref())))
    }

    /// Visit every component mutably, in attachment order.
    pub fn for_each_component_mut<F>(&mut self, mut f: F)
    where
        F: FnMut(ComponentId, &mut dyn Component),
    {
        for id in &self.order {
            if let Some(entry) = self.components.get_mut(*id) {
                f(*id, entry.model.as_mut());
            }
        }
    }

    /// Ports of a component.
    pub fn ports(&self, id: ComponentId) -> Option<&[Port]> {
        self.components.get(id).map(|e| e.ports.as_slice())
    }

    /// Registry handle of a component that owns a branch current.
    pub fn source_of(&self, id: ComponentId) -> Option<SourceId> {
        self.components.get(id).and_then(|e| e.source)
    }

    /// Dense index of a source (offset of its current after the node voltages).
    pub fn source_index(&self, source: SourceId) -> Option<usize> {
        self.sources.index_of(source)
    }

    /// Number of registered voltage sources (m).
    pub fn source_count(&self) -> usize {
        self.sources.len()
    }

    /// The voltage source registry.
    pub fn sources(&self) -> &VoltageSourceRegistry {
        &self.sources
    }

    /// Whether any attached component needs Newton-Raphson iteration.
    pub fn has_nonlinear(&self) -> bool {
        self.components().any(|(_, c)| c.is_nonlinear())
    }

    /// Size of the MNA system: node voltages (excluding ground) plus branch currents.
    pub fn matrix_size(&self) -> usize {
        (self.nodes.len() - 1) + self.sources.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::{Capacitor, Resistor, VoltageSource};

    #[test]
    fn test_attach_registers_branch_owners() {
        let mut circuit = Circuit::new();
        let r = circuit.attach(Resistor::new("R1", 1000.0));
        let v = circuit.attach(VoltageSource::dc("V1", 5.0));
        let c = circuit.attach(Capacitor::new("C1", 1e-6));

        assert_eq!(circuit.component_count(), 3);
        assert_eq!(circuit.source_count(), 2);
        assert!(circuit.source_of(r).is_none());
        assert_eq!(circuit.source_of(v).and_then(|s| circuit.source_index(s)), Some(0));
        assert_eq!(circuit.source_of(c).and_then(|s| circuit.source_index(s)), Some(1));
        assert!(circuit.ports(r).unwrap().iter().all(|p| p.node.is_none()));
    }

    #[test]
    fn test_add_checks_node_count() {
        let mut circuit = Circuit::new();
        let n1 = circuit.add_node();
        let err = circuit.add(Resistor::new("R1", 1.0), &[n1]).unwrap_err();
        assert!(matches!(err, SimError::InvalidTopology { .. }));
        assert_eq!(circuit.component_count(), 0);

        let err = circuit
            .add(Resistor::new("R1", 1.0), &[n1, NodeId(7)])
            .unwrap_err();
        assert_eq!(err, SimError::NodeNotFound { node: NodeId(7) });
    }

    #[test]
    fn test_detach_keeps_other_sources_valid() {
        let mut circuit = Circuit::new();
        let n1 = circuit.add_node();
        let n2 = circuit.add_node();
        let v1 = circuit
            .add(VoltageSource::dc("V1", 1.0), &[n1, NodeId::GROUND])
            .unwrap();
        let v2 = circuit
            .add(VoltageSource::dc("V2", 2.0), &[n2, NodeId::GROUND])
            .unwrap();
        let s2 = circuit.source_of(v2).unwrap();
        assert_eq!(circuit.source_index(s2), Some(1));

        let model = circuit.detach(v1).unwrap();
        assert_eq!(model.name(), "V1");
        assert_eq!(circuit.source_index(s2), Some(0));
        assert!(circuit.component(v1).is_none());
        // V1 was the only branch on n1, so n1 is gone and n2 moved down
        assert_eq!(circuit.node_count(), 2);
        assert_eq!(circuit.ports(v2).unwrap()[0].node, Some(NodeId(1)));
    }

    #[test]
    fn test_typed_access() {
        let mut circuit = Circuit::new();
        let r = circuit.attach(Resistor::new("R1", 1000.0));
        assert!(circuit.component_as::<Resistor>(r).is_some());
        assert!(circuit.component_as::<Capacitor>(r).is_none());
        circuit
            .component_as_mut::<Resistor>(r)
            .unwrap()
            .set_resistance(2000.0);
        assert_eq!(circuit.component_as::<Resistor>(r).unwrap().resistance, 2000.0);
    }
}
