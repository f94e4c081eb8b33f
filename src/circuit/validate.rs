//! Circuit validation.

use crate::error::{Result, SimError};

use super::Circuit;

/// Validate a circuit for simulation.
///
/// Checks:
/// - At least one node besides ground
/// - At least one component and one voltage source
/// - Every port of every component is connected
pub fn validate_circuit(circuit: &Circuit) -> Result<()> {
    if circuit.node_count() < 2 {
        return Err(SimError::topology("circuit has no nodes besides ground"));
    }

    if circuit.component_count() == 0 {
        return Err(SimError::topology("circuit has no components"));
    }

    if circuit.source_count() == 0 {
        return Err(SimError::topology("circuit has no voltage sources"));
    }

    for (id, component) in circuit.components() {
        let ports = circuit.ports(id).unwrap_or_default();
        if let Some(port) = ports.iter().find(|p| p.node.is_none()) {
            return Err(SimError::topology(format!(
                "port {} of component '{}' is not connected",
                port.number,
                component.name()
            )));
        }
    }

    // TODO: detect floating nodes (no DC path to ground) before the first
    // factorization instead of relying on the singular pivot check.

    Ok(())
}
