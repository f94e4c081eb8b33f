//! Core types for circuit representation.

use std::fmt;

use slotmap::new_key_type;

/// Index of a node in the circuit.
/// Node 0 is always ground.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub usize);

impl NodeId {
    /// The ground node (always index 0).
    pub const GROUND: NodeId = NodeId(0);

    /// Check if this is the ground node.
    pub fn is_ground(&self) -> bool {
        self.0 == 0
    }

    /// Row of this node's voltage in the MNA system, `None` for ground.
    pub fn row(&self) -> Option<usize> {
        if self.is_ground() {
            None
        } else {
            Some(self.0 - 1)
        }
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_ground() {
            write!(f, "GND")
        } else {
            write!(f, "N{}", self.0)
        }
    }
}

new_key_type! {
    /// Stable handle to an attached component.
    pub struct ComponentId;

    /// Stable handle to a node-to-port connection.
    pub struct BranchId;

    /// Stable handle to a voltage source registry entry.
    pub struct SourceId;
}

/// A port on a component, numbered from 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PortRef {
    pub component: ComponentId,
    pub port: usize,
}

impl PortRef {
    pub fn new(component: ComponentId, port: usize) -> Self {
        Self { component, port }
    }
}

/// A component port and its node assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Port {
    /// Owning component
    pub owner: ComponentId,
    /// Port number (1-based)
    pub number: usize,
    /// Connected node, `None` while unassigned
    pub node: Option<NodeId>,
    /// Branch that connects this port, if any
    pub branch: Option<BranchId>,
}

/// Connection between exactly one node and one component port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Branch {
    pub node: NodeId,
    pub port: PortRef,
}

/// An electrically common potential.
#[derive(Debug, Clone, Default)]
pub struct Node {
    /// Incident branches, in connection order
    pub branches: Vec<BranchId>,
}
