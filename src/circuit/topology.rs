//! Structural edits: nodes, branches, merging, and source registration.
//!
//! Node indices stay contiguous over `[0, node_count)`. Removing a node
//! shifts every higher node down by one and rewrites the node stored in the
//! affected branches and ports. Ground (node 0) is never removed.

use log::debug;

use super::graph::Circuit;
use super::types::{Branch, BranchId, ComponentId, Node, NodeId, Port, PortRef, SourceId};
use crate::error::{Result, SimError};

impl Circuit {
    /// Add a node with no branches and return its index.
    pub fn add_node(&mut self) -> NodeId {
        self.nodes.push(Node::default());
        self.bump();
        NodeId(self.nodes.len() - 1)
    }

    /// Number of nodes, including ground.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Total number of branches across all nodes.
    pub fn branch_count(&self) -> usize {
        self.branches.len()
    }

    pub fn has_node(&self, node: NodeId) -> bool {
        node.0 < self.nodes.len()
    }

    /// Branches incident to a node.
    pub fn branches_of(&self, node: NodeId) -> Option<&[BranchId]> {
        self.nodes.get(node.0).map(|n| n.branches.as_slice())
    }

    pub fn branch(&self, branch: BranchId) -> Option<&Branch> {
        self.branches.get(branch)
    }

    /// Node a port is connected to, if any.
    pub fn port_node(&self, port: PortRef) -> Option<NodeId> {
        self.components
            .get(port.component)?
            .ports
            .get(port.port.checked_sub(1)?)?
            .node
    }

    /// Delete an empty node.
    pub fn delete_node(&mut self, node: NodeId) -> Result<()> {
        self.check_removable(node)?;
        let branches = self.nodes[node.0].branches.len();
        if branches > 0 {
            return Err(SimError::NodeHasBranches { node, branches });
        }
        self.remove_node_at(node);
        Ok(())
    }

    /// Delete a node after moving all of its branches to `target`.
    ///
    /// Returns the index `target` has once the node is gone.
    pub fn delete_node_rehoming(&mut self, node: NodeId, target: NodeId) -> Result<NodeId> {
        self.check_removable(node)?;
        if !self.has_node(target) {
            return Err(SimError::NodeNotFound { node: target });
        }
        if node == target {
            return Err(SimError::SameNode { node });
        }

        self.move_branches(node, target);
        self.remove_node_at(node);
        Ok(if target > node { NodeId(target.0 - 1) } else { target })
    }

    /// Merge two nodes into the lower-indexed one and delete the higher one.
    pub fn merge_nodes(&mut self, a: NodeId, b: NodeId) -> Result<NodeId> {
        for node in [a, b] {
            if !self.has_node(node) {
                return Err(SimError::NodeNotFound { node });
            }
        }
        if a == b {
            return Err(SimError::SameNode { node: a });
        }

        let (lo, hi) = if a < b { (a, b) } else { (b, a) };
        self.move_branches(hi, lo);
        self.remove_node_at(hi);
        debug!("merged {} into {}", hi, lo);
        Ok(lo)
    }

    /// Connect a component port to a node.
    pub fn add_branch(&mut self, node: NodeId, port: PortRef) -> Result<BranchId> {
        if !self.has_node(node) {
            return Err(SimError::NodeNotFound { node });
        }
        let entry = self
            .components
            .get(port.component)
            .ok_or(SimError::ComponentNotFound)?;
        let name = entry.model.name();
        let slot = port
            .port
            .checked_sub(1)
            .filter(|i| *i < entry.ports.len())
            .ok_or_else(|| SimError::PortOutOfRange {
                component: name.to_string(),
                port: port.port,
                ports: entry.ports.len(),
            })?;
        if entry.ports[slot].branch.is_some() {
            return Err(SimError::PortAlreadyConnected {
                component: name.to_string(),
                port: port.port,
            });
        }

        let id = self.branches.insert(Branch { node, port });
        self.nodes[node.0].branches.push(id);
        let p = &mut self.components[port.component].ports[slot];
        p.node = Some(node);
        p.branch = Some(id);
        self.bump();
        Ok(id)
    }

    /// Remove a branch. A non-ground node left without branches is deleted.
    pub fn delete_branch(&mut self, branch: BranchId) -> Result<()> {
        let Branch { node, port } = self
            .branches
            .remove(branch)
            .ok_or(SimError::BranchNotFound)?;

        self.nodes[node.0].branches.retain(|b| *b != branch);
        if let Some(p) = self.port_mut(port) {
            p.node = None;
            p.branch = None;
        }

        if !node.is_ground() && self.nodes[node.0].branches.is_empty() {
            debug!("{} lost its last branch, removing it", node);
            self.remove_node_at(node);
        }
        self.bump();
        Ok(())
    }

    /// Give a component a branch-current unknown. Idempotent.
    pub fn register_voltage_source(&mut self, component: ComponentId) -> Result<SourceId> {
        let entry = self
            .components
            .get_mut(component)
            .ok_or(SimError::ComponentNotFound)?;
        if let Some(existing) = entry.source {
            return Ok(existing);
        }
        let id = self.sources.register(component);
        entry.source = Some(id);
        self.bump();
        Ok(id)
    }

    /// Remove a component's branch-current unknown; later sources shift down.
    pub fn unregister_voltage_source(&mut self, component: ComponentId) -> Result<()> {
        let entry = self
            .components
            .get_mut(component)
            .ok_or(SimError::ComponentNotFound)?;
        let source = entry.source.take().ok_or_else(|| SimError::SourceNotRegistered {
            component: entry.model.name().to_string(),
        })?;
        self.sources.unregister(source);
        self.bump();
        Ok(())
    }

    fn check_removable(&self, node: NodeId) -> Result<()> {
        if node.is_ground() {
            return Err(SimError::GroundNode);
        }
        if !self.has_node(node) {
            return Err(SimError::NodeNotFound { node });
        }
        Ok(())
    }

    fn port_mut(&mut self, port: PortRef) -> Option<&mut Port> {
        self.components
            .get_mut(port.component)?
            .ports
            .get_mut(port.port.checked_sub(1)?)
    }

    fn move_branches(&mut self, from: NodeId, to: NodeId) {
        let moved = std::mem::take(&mut self.nodes[from.0].branches);
        for id in &moved {
            self.retarget(*id, to);
        }
        self.nodes[to.0].branches.extend(moved);
    }

    fn retarget(&mut self, branch: BranchId, node: NodeId) {
        let Some(b) = self.branches.get_mut(branch) else {
            return;
        };
        b.node = node;
        let port = b.port;
        if let Some(p) = self.port_mut(port) {
            p.node = Some(node);
        }
    }

    /// Remove a node and shift every higher index down by one.
    fn remove_node_at(&mut self, node: NodeId) {
        let removed = self.nodes.remove(node.0);
        debug_assert!(removed.branches.is_empty());

        for index in node.0..self.nodes.len() {
            let branches = self.nodes[index].branches.clone();
            for id in branches {
                self.retarget(id, NodeId(index));
            }
        }
        self.bump();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::{Resistor, VoltageSource};

    /// Ground plus four nodes; R1 n1-n2, R2 n2-n3, R3 n3-n4, V1 n1-gnd.
    fn ladder() -> (Circuit, [NodeId; 4]) {
        let mut circuit = Circuit::new();
        let n = [
            circuit.add_node(),
            circuit.add_node(),
            circuit.add_node(),
            circuit.add_node(),
        ];
        circuit.add(Resistor::new("R1", 1.0), &[n[0], n[1]]).unwrap();
        circuit.add(Resistor::new("R2", 1.0), &[n[1], n[2]]).unwrap();
        circuit.add(Resistor::new("R3", 1.0), &[n[2], n[3]]).unwrap();
        circuit
            .add(VoltageSource::dc("V1", 1.0), &[n[0], NodeId::GROUND])
            .unwrap();
        (circuit, n)
    }

    fn port_set(circuit: &Circuit, node: NodeId) -> Vec<(String, usize)> {
        let mut ports: Vec<_> = circuit
            .branches_of(node)
            .unwrap()
            .iter()
            .map(|b| {
                let port = circuit.branch(*b).unwrap().port;
                let name = circuit.component(port.component).unwrap().name().to_string();
                (name, port.port)
            })
            .collect();
        ports.sort();
        ports
    }

    #[test]
    fn test_add_then_delete_node_restores_counts() {
        let (mut circuit, _) = ladder();
        let nodes = circuit.node_count();
        let branches = circuit.branch_count();

        let extra = circuit.add_node();
        assert_eq!(circuit.node_count(), nodes + 1);
        circuit.delete_node(extra).unwrap();

        assert_eq!(circuit.node_count(), nodes);
        assert_eq!(circuit.branch_count(), branches);
    }

    #[test]
    fn test_delete_node_with_branches_fails() {
        let (mut circuit, n) = ladder();
        let err = circuit.delete_node(n[1]).unwrap_err();
        assert_eq!(
            err,
            SimError::NodeHasBranches {
                node: n[1],
                branches: 2
            }
        );
        assert_eq!(circuit.delete_node(NodeId::GROUND), Err(SimError::GroundNode));
        assert_eq!(
            circuit.delete_node(NodeId(42)),
            Err(SimError::NodeNotFound { node: NodeId(42) })
        );
    }

    #[test]
    fn test_delete_node_reindexes_higher_nodes() {
        let mut circuit = Circuit::new();
        let a = circuit.add_node();
        let empty = circuit.add_node();
        let c = circuit.add_node();
        let r = circuit.add(Resistor::new("R1", 1.0), &[a, c]).unwrap();

        circuit.delete_node(empty).unwrap();

        assert_eq!(circuit.node_count(), 3);
        let ports = circuit.ports(r).unwrap();
        assert_eq!(ports[0].node, Some(NodeId(1)));
        assert_eq!(ports[1].node, Some(NodeId(2)));
        let moved = circuit.branches_of(NodeId(2)).unwrap()[0];
        assert_eq!(circuit.branch(moved).unwrap().node, NodeId(2));
    }

    #[test]
    fn test_rehoming_delete() {
        let (mut circuit, n) = ladder();
        let target = circuit.delete_node_rehoming(n[1], n[3]).unwrap();

        assert_eq!(target, NodeId(3));
        assert_eq!(circuit.node_count(), 4);
        assert_eq!(circuit.branches_of(target).unwrap().len(), 3);
    }

    #[test]
    fn test_merge_keeps_lower_index() {
        let (mut circuit, n) = ladder();
        let branches = circuit.branch_count();
        let merged = circuit.merge_nodes(n[3], n[1]).unwrap();

        assert_eq!(merged, n[1]);
        assert_eq!(circuit.node_count(), 4);
        assert_eq!(circuit.branch_count(), branches);
        assert_eq!(circuit.branches_of(merged).unwrap().len(), 3);
    }

    #[test]
    fn test_merge_is_symmetric() {
        for a in 1..=4 {
            for b in 1..=4 {
                if a == b {
                    continue;
                }
                let (mut left, _) = ladder();
                let (mut right, _) = ladder();
                let l = left.merge_nodes(NodeId(a), NodeId(b)).unwrap();
                let r = right.merge_nodes(NodeId(b), NodeId(a)).unwrap();

                assert_eq!(l, NodeId(a.min(b)));
                assert_eq!(l, r);
                assert_eq!(port_set(&left, l), port_set(&right, r));
                assert_eq!(left.node_count(), right.node_count());
            }
        }
    }

    #[test]
    fn test_merge_rejects_same_node() {
        let (mut circuit, n) = ladder();
        assert_eq!(
            circuit.merge_nodes(n[2], n[2]),
            Err(SimError::SameNode { node: n[2] })
        );
    }

    #[test]
    fn test_last_branch_removal_deletes_node() {
        let mut circuit = Circuit::new();
        let n1 = circuit.add_node();
        let r = circuit
            .add(Resistor::new("R1", 1.0), &[n1, NodeId::GROUND])
            .unwrap();
        let branch = circuit.ports(r).unwrap()[0].branch.unwrap();

        circuit.delete_branch(branch).unwrap();

        assert_eq!(circuit.node_count(), 1);
        assert_eq!(circuit.ports(r).unwrap()[0].node, None);
        assert_eq!(circuit.delete_branch(branch), Err(SimError::BranchNotFound));
    }

    #[test]
    fn test_port_checks() {
        let mut circuit = Circuit::new();
        let n1 = circuit.add_node();
        let r = circuit.attach(Resistor::new("R1", 1.0));

        assert!(matches!(
            circuit.connect(r, 3, n1),
            Err(SimError::PortOutOfRange { port: 3, ports: 2, .. })
        ));
        assert!(matches!(
            circuit.connect(r, 0, n1),
            Err(SimError::PortOutOfRange { .. })
        ));
        circuit.connect(r, 1, n1).unwrap();
        assert!(matches!(
            circuit.connect(r, 1, NodeId::GROUND),
            Err(SimError::PortAlreadyConnected { port: 1, .. })
        ));
        assert_eq!(circuit.port_node(PortRef::new(r, 1)), Some(n1));
        assert_eq!(circuit.port_node(PortRef::new(r, 2)), None);
    }

    #[test]
    fn test_register_and_unregister_source() {
        let mut circuit = Circuit::new();
        let r = circuit.attach(Resistor::new("R1", 1.0));
        let v = circuit.attach(VoltageSource::dc("V1", 1.0));

        let s = circuit.register_voltage_source(r).unwrap();
        assert_eq!(circuit.register_voltage_source(r).unwrap(), s);
        assert_eq!(circuit.source_index(s), Some(1));

        let sv = circuit.source_of(v).unwrap();
        circuit.unregister_voltage_source(v).unwrap();
        assert_eq!(circuit.source_index(sv), None);
        assert_eq!(circuit.source_index(s), Some(0));
        assert!(matches!(
            circuit.unregister_voltage_source(v),
            Err(SimError::SourceNotRegistered { .. })
        ));
    }

    #[test]
    fn test_edits_bump_revision() {
        let mut circuit = Circuit::new();
        let r0 = circuit.revision();
        let n1 = circuit.add_node();
        assert!(circuit.revision() > r0);
        let r1 = circuit.revision();
        circuit.delete_node(n1).unwrap();
        assert!(circuit.revision() > r1);
    }
}
