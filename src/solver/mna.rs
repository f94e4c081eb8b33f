//! MNA system assembly.

use crate::circuit::Circuit;
use crate::components::StampContext;

use super::context::SimContext;
use super::integration::StepInfo;

/// Matrix regions a component writes to.
///
/// With `v` the node voltages and `j` the branch currents, the system is
/// `[G B; C D] [v; j] = [i; e]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StampBlocks {
    /// Node-to-node block G
    pub conductance: bool,
    /// Node/branch coupling blocks B and C
    pub coupling: bool,
    /// Branch-to-branch block D
    pub branch: bool,
}

impl StampBlocks {
    pub const NONE: StampBlocks = StampBlocks {
        conductance: false,
        coupling: false,
        branch: false,
    };

    pub const ALL: StampBlocks = StampBlocks {
        conductance: true,
        coupling: true,
        branch: true,
    };

    pub const CONDUCTANCE: StampBlocks = StampBlocks {
        conductance: true,
        coupling: false,
        branch: false,
    };

    pub const SOURCE: StampBlocks = StampBlocks {
        conductance: false,
        coupling: true,
        branch: false,
    };

    pub fn union(self, other: StampBlocks) -> StampBlocks {
        StampBlocks {
            conductance: self.conductance || other.conductance,
            coupling: self.coupling || other.coupling,
            branch: self.branch || other.branch,
        }
    }
}

/// MNA system Ax = z.
#[derive(Debug, Clone)]
pub struct MnaSystem {
    /// System matrix A (row-major)
    pub a: Vec<f64>,
    /// Source vector z = [i; e]
    pub z: Vec<f64>,
    /// Matrix dimension
    pub size: usize,
    /// Number of node voltage rows (nodes excluding ground)
    pub node_rows: usize,
}

impl MnaSystem {
    /// Create a zeroed system with `node_rows` voltage rows and `branches` current rows.
    pub fn new(node_rows: usize, branches: usize) -> Self {
        let size = node_rows + branches;
        Self {
            a: vec![0.0; size * size],
            z: vec![0.0; size],
            size,
            node_rows,
        }
    }

    /// Clear the matrix and vectors to zero.
    pub fn clear(&mut self) {
        self.a.fill(0.0);
        self.z.fill(0.0);
    }

    /// Zero only the given blocks of A, and all of z.
    pub fn clear_blocks(&mut self, blocks: StampBlocks) {
        if blocks == StampBlocks::ALL {
            self.clear();
            return;
        }
        let (n, size) = (self.node_rows, self.size);
        for row in 0..size {
            for col in 0..size {
                let zero = match (row < n, col < n) {
                    (true, true) => blocks.conductance,
                    (false, false) => blocks.branch,
                    _ => blocks.coupling,
                };
                if zero {
                    self.a[row * size + col] = 0.0;
                }
            }
        }
        self.z.fill(0.0);
    }

    /// Get matrix element at (row, col).
    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.a[row * self.size + col]
    }

    /// Add to matrix element at (row, col).
    pub fn add(&mut self, row: usize, col: usize, value: f64) {
        self.a[row * self.size + col] += value;
    }

    /// Add to source vector element.
    pub fn add_source(&mut self, row: usize, value: f64) {
        self.z[row] += value;
    }

    /// Row of a branch current by registry index.
    pub fn branch_row(&self, branch: usize) -> usize {
        self.node_rows + branch
    }

    /// Stamp a conductance between two nodes.
    /// For a conductance G between nodes n1 and n2:
    ///   A[n1,n1] += G
    ///   A[n2,n2] += G
    ///   A[n1,n2] -= G
    ///   A[n2,n1] -= G
    pub fn stamp_conductance(&mut self, n1: Option<usize>, n2: Option<usize>, g: f64) {
        if let Some(i) = n1 {
            self.add(i, i, g);
        }
        if let Some(j) = n2 {
            self.add(j, j, g);
        }
        if let (Some(i), Some(j)) = (n1, n2) {
            self.add(i, j, -g);
            self.add(j, i, -g);
        }
    }

    /// Stamp a current source between two nodes.
    /// Current flows from n+ through the source to n-.
    pub fn stamp_current_source(&mut self, n_pos: Option<usize>, n_neg: Option<usize>, current: f64) {
        // Current leaves n+ and enters n-
        if let Some(i) = n_pos {
            self.add_source(i, -current);
        }
        if let Some(j) = n_neg {
            self.add_source(j, current);
        }
    }

    /// Stamp an independent voltage source with branch current at row `br`.
    ///
    /// V[n+] - V[n-] = E. The branch current is the current the source
    /// delivers out of its + terminal.
    pub fn stamp_voltage_source(
        &mut self,
        n_pos: Option<usize>,
        n_neg: Option<usize>,
        br: usize,
        voltage: f64,
    ) {
        if let Some(i) = n_pos {
            self.add(br, i, 1.0);
            self.add(i, br, -1.0);
        }
        if let Some(j) = n_neg {
            self.add(br, j, -1.0);
            self.add(j, br, 1.0);
        }
        self.add_source(br, voltage);
    }

    /// Stamp a Thevenin equivalent V[n+] - V[n-] = v + r * I.
    ///
    /// Passive convention: the branch current flows into n+ through the
    /// element to n-. With `r = 0` this is an ideal voltage constraint.
    pub fn stamp_thevenin(
        &mut self,
        n_pos: Option<usize>,
        n_neg: Option<usize>,
        br: usize,
        v: f64,
        r: f64,
    ) {
        if let Some(i) = n_pos {
            self.add(br, i, 1.0);
            self.add(i, br, 1.0);
        }
        if let Some(j) = n_neg {
            self.add(br, j, -1.0);
            self.add(j, br, -1.0);
        }
        self.add(br, br, -r);
        self.add_source(br, v);
    }

    /// Stamp a branch whose current is fixed to `current` (passive convention).
    pub fn stamp_branch_current(
        &mut self,
        n_pos: Option<usize>,
        n_neg: Option<usize>,
        br: usize,
        current: f64,
    ) {
        if let Some(i) = n_pos {
            self.add(i, br, 1.0);
        }
        if let Some(j) = n_neg {
            self.add(j, br, -1.0);
        }
        self.add(br, br, 1.0);
        self.add_source(br, current);
    }

    /// Stamp a VCCS (Voltage-Controlled Current Source).
    /// I = gm * (V[ctrl+] - V[ctrl-]), flowing from out+ through the source to out-.
    pub fn stamp_vccs(
        &mut self,
        n_out_pos: Option<usize>,
        n_out_neg: Option<usize>,
        n_ctrl_pos: Option<usize>,
        n_ctrl_neg: Option<usize>,
        gm: f64,
    ) {
        if let (Some(i), Some(k)) = (n_out_pos, n_ctrl_pos) {
            self.add(i, k, gm);
        }
        if let (Some(i), Some(l)) = (n_out_pos, n_ctrl_neg) {
            self.add(i, l, -gm);
        }
        if let (Some(j), Some(k)) = (n_out_neg, n_ctrl_pos) {
            self.add(j, k, -gm);
        }
        if let (Some(j), Some(l)) = (n_out_neg, n_ctrl_neg) {
            self.add(j, l, gm);
        }
    }

    /// Infinity norm of A (maximum absolute row sum).
    pub fn norm_inf(&self) -> f64 {
        self.a
            .chunks(self.size.max(1))
            .map(|row| row.iter().map(|v| v.abs()).sum::<f64>())
            .fold(0.0, f64::max)
    }

    /// Compute A * x.
    pub fn multiply(&self, x: &[f64]) -> Vec<f64> {
        self.a
            .chunks(self.size.max(1))
            .map(|row| row.iter().zip(x).map(|(a, b)| a * b).sum())
            .collect()
    }
}

/// Rebuild the system around `iterate` by running every component's `step_iter` hook.
///
/// Returns true if any component damped its controlling voltage.
pub fn assemble(circuit: &mut Circuit, ctx: &mut SimContext, iterate: &[f64], step: &StepInfo) -> bool {
    ctx.system.clear_blocks(ctx.blocks);
    let mut damped = false;
    let system = &mut ctx.system;
    let pins = &ctx.pins;

    circuit.for_each_component_mut(|id, component| {
        if let Some(pins) = pins.get(id) {
            let mut stamp = StampContext::new(system, pins, iterate, step, &mut damped);
            component.step_iter(&mut stamp);
        }
    });

    damped
}
