//! The simulation context passed explicitly between solver stages.

use log::debug;
use slotmap::SecondaryMap;

use super::history::SolutionHistory;
use super::mna::{MnaSystem, StampBlocks};
use crate::circuit::{BranchId, Circuit, ComponentId, NodeId, SourceId};
use crate::components::Pins;
use crate::error::{Result, SimError};

/// Everything the assembler, solver and controller share for one run:
/// the system, the resolved pins of every component and the solution history.
#[derive(Debug, Clone)]
pub struct SimContext {
    pub system: MnaSystem,
    pub pins: SecondaryMap<ComponentId, Pins>,
    pub history: SolutionHistory,
    /// Union of the blocks components declared
    pub blocks: StampBlocks,
    /// Circuit revision the pins were resolved against
    pub revision: Option<u64>,
    /// Branches incident to each node row, as of the last prepare
    node_branches: Vec<Vec<BranchId>>,
    /// Source owning each branch row, as of the last prepare
    branch_sources: Vec<SourceId>,
}

impl Default for SimContext {
    fn default() -> Self {
        Self::new()
    }
}

impl SimContext {
    pub fn new() -> Self {
        Self {
            system: MnaSystem::new(0, 0),
            pins: SecondaryMap::new(),
            history: SolutionHistory::new(),
            blocks: StampBlocks::NONE,
            revision: None,
            node_branches: Vec::new(),
            branch_sources: Vec::new(),
        }
    }

    /// Whether the context matches the circuit's current topology.
    pub fn is_current(&self, circuit: &Circuit) -> bool {
        self.revision == Some(circuit.revision())
    }

    /// Resolve pins against the circuit and size the system to match it.
    ///
    /// When re-preparing after an edit, the history keeps only its latest
    /// point, remapped to the new layout.
    pub fn prepare(&mut self, circuit: &Circuit) -> Result<()> {
        let node_rows = circuit.node_count() - 1;
        let branches = circuit.source_count();

        self.pins.clear();
        self.blocks = StampBlocks::NONE;
        for (id, component) in circuit.components() {
            let ports = circuit.ports(id).ok_or(SimError::ComponentNotFound)?;
            let branch = match circuit.source_of(id).and_then(|s| circuit.source_index(s)) {
                Some(index) => Some(node_rows + index),
                None if component.needs_branch() => {
                    return Err(SimError::topology(format!(
                        "component '{}' owns a branch current but is not registered",
                        component.name()
                    )));
                }
                None => None,
            };
            self.pins.insert(
                id,
                Pins {
                    nodes: ports.iter().map(|p| p.node.and_then(|n| n.row())).collect(),
                    branch,
                },
            );
            self.blocks = self.blocks.union(component.stamp_blocks());
        }

        // Blocks no current component declares are never cleared by assembly
        self.system = MnaSystem::new(node_rows, branches);
        if self.revision.is_some() {
            let rows = self.row_map(circuit, node_rows);
            self.history.remap(node_rows + branches, &rows);
        }
        self.record_layout(circuit);
        self.revision = Some(circuit.revision());

        debug!(
            "prepared system: {} node rows, {} branch rows (revision {})",
            node_rows,
            branches,
            circuit.revision()
        );
        Ok(())
    }

    /// New row of every unknown recorded at the last prepare.
    ///
    /// A node row follows any of its branches that survived the edit, a
    /// branch row follows its source handle.
    fn row_map(&self, circuit: &Circuit, node_rows: usize) -> Vec<Option<usize>> {
        let voltages = self.node_branches.iter().map(|branches| {
            branches
                .iter()
                .find_map(|b| circuit.branch(*b))
                .and_then(|b| b.node.row())
        });
        let currents = self
            .branch_sources
            .iter()
            .map(|s| circuit.source_index(*s).map(|index| node_rows + index));
        voltages.chain(currents).collect()
    }

    fn record_layout(&mut self, circuit: &Circuit) {
        self.node_branches = (1..circuit.node_count())
            .map(|n| {
                circuit
                    .branches_of(NodeId(n))
                    .map(<[BranchId]>::to_vec)
                    .unwrap_or_default()
            })
            .collect();
        self.branch_sources = circuit.sources().iter().map(|(_, id, _)| id).collect();
    }

    /// Start a fresh run: zero initial solution at t = 0.
    pub fn reset(&mut self) {
        self.history.reset(vec![0.0; self.system.size], 0.0);
    }

    /// Latest accepted solution.
    pub fn solution(&self) -> &[f64] {
        self.history
            .latest()
            .map(|e| e.solution.as_slice())
            .unwrap_or(&[])
    }
}
