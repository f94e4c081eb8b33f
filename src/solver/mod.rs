//! MNA (Modified Nodal Analysis) transient solver.
//!
//! This module provides the numerical engine for circuit simulation.
//!
//! ## Modified Nodal Analysis
//!
//! MNA assembles a system of equations Ax = z where:
//! - x contains node voltages and branch currents
//! - A is the conductance/coefficient matrix
//! - z is the source vector
//!
//! The matrix structure is:
//! ```text
//! [ G   B ] [ v ]   [ i ]
//! [ C   D ] [ j ] = [ e ]
//! ```
//!
//! where:
//! - G is the conductance matrix (node equations)
//! - B, C connect branch currents to nodes
//! - D holds the series resistance of Thevenin companions (0 for ideal sources)
//! - v is the vector of node voltages
//! - j is the vector of branch currents, one per registered source
//! - i is the sum of current sources into each node
//! - e is the vector of source voltages
//!
//! ## Per-step sequence
//!
//! The [`Simulator`] runs `step_begin` on every component, hands the system
//! to [`NewtonRaphson`] (assemble, factor with [`LuFactors`], solve, repeat),
//! collects the worst local truncation error and then accepts or rejects the
//! step, adapting the step size.

mod context;
mod handle;
mod history;
mod integration;
mod lu;
mod mna;
mod newton;
mod simulator;

pub use context::SimContext;
pub use handle::SimHandle;
pub use history::{HistoryEntry, SolutionHistory};
pub use integration::{
    truncation_error, Companion, IntegrationMethod, StateHistory, StepInfo, HISTORY_DEPTH,
};
pub use lu::LuFactors;
pub use mna::{assemble, MnaSystem, StampBlocks};
pub use newton::{NewtonOutcome, NewtonRaphson};
pub use simulator::{
    Listener, SimEvent, SimState, SimStats, Simulator, SimulatorConfig, StepReport,
};

/// Default maximum Newton-Raphson iterations per time step.
pub const DEFAULT_MAX_ITERATIONS: usize = 100;

/// Minimum conductance to prevent singular matrix.
pub const MIN_CONDUCTANCE: f64 = 1e-12;

/// Convergence and error-normalization tolerances.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tolerances {
    /// Relative tolerance, applied to the previous value
    pub reltol: f64,
    /// Absolute tolerance for voltage unknowns (V)
    pub vntol: f64,
    /// Absolute tolerance for current unknowns (A)
    pub abstol: f64,
}

impl Default for Tolerances {
    fn default() -> Self {
        Self {
            reltol: 1e-3,
            vntol: 1e-6,
            abstol: 1e-12,
        }
    }
}

impl Tolerances {
    /// Allowed change of an unknown whose previous value is `prev`.
    pub fn allowed(&self, prev: f64, is_voltage: bool) -> f64 {
        let abs = if is_voltage { self.vntol } else { self.abstol };
        abs + self.reltol * prev.abs()
    }
}
