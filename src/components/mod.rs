//! Component models for circuit simulation.
//!
//! This module provides the stamp contract and the models shipped with the core:
//! - Linear: Resistor, Capacitor, Inductor
//! - Sources: Voltage Source, Current Source (with waveforms)
//! - Nonlinear: Diode, BJT
//! - Controls: Switch, Probe
//!
//! Each component implements [`Component`] and contributes to the MNA system
//! through the hooks the simulator calls.

mod bjt;
mod context;
mod controls;
mod diode;
mod linear;
mod sources;

pub use bjt::{Bjt, BjtOperatingPoint, BjtParams, BjtType};
pub use context::{Pins, StampContext, StepContext};
pub use controls::{Probe, Switch};
pub use diode::{Diode, DiodeParams};
pub use linear::{Capacitor, Inductor, Resistor};
pub use sources::{CurrentSource, VoltageSource, Waveform};

use std::any::Any;
use std::fmt::Debug;

use crate::solver::StampBlocks;

/// The stamp contract.
///
/// Hooks are called one at a time, in attachment order, and every stamp adds
/// to the system. The call sequence for a run is:
///
/// 1. `sim_begin` once when the simulation starts (or when the component is
///    first seen by a running simulator)
/// 2. per step attempt: `step_begin`, then `step_iter` once per Newton
///    iteration, then `update_error` on the converged candidate
/// 3. `step_end` once the step is accepted
///
/// A rejected attempt never reaches `step_end`, so state committed there is
/// the only state that survives a rejection.
pub trait Component: Any + Debug + Send {
    fn name(&self) -> &str;

    /// Number of ports, numbered 1..=port_count.
    fn port_count(&self) -> usize;

    /// Whether the component owns a branch-current unknown.
    ///
    /// Such components are registered as voltage sources on attach.
    fn needs_branch(&self) -> bool {
        false
    }

    /// Whether the component must be re-linearized every Newton iteration.
    fn is_nonlinear(&self) -> bool {
        false
    }

    /// Matrix blocks the component writes to.
    fn stamp_blocks(&self) -> StampBlocks {
        StampBlocks::CONDUCTANCE
    }

    /// Reset internal state for a new run; `ctx` holds the initial solution.
    fn sim_begin(&mut self, _ctx: &StepContext) {}

    /// Prepare companion parameters from the last accepted solution.
    fn step_begin(&mut self, _ctx: &StepContext) {}

    /// Stamp around the current Newton iterate.
    fn step_iter(&mut self, ctx: &mut StampContext);

    /// Commit state from the accepted solution.
    fn step_end(&mut self, _ctx: &StepContext) {}

    /// Raise `err` to this component's normalized truncation error, if larger.
    fn update_error(&self, _ctx: &StepContext, _err: &mut f64) {}
}
