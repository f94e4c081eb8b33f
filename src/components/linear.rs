//! Linear passive components: Resistor, Capacitor, Inductor.

use super::{Component, StampContext, StepContext};
use crate::solver::{Companion, StampBlocks, StateHistory};

/// Smallest resistance accepted, to avoid an infinite conductance.
pub const MIN_RESISTANCE: f64 = 1e-12;

/// A resistor component.
#[derive(Debug, Clone)]
pub struct Resistor {
    pub name: String,
    pub resistance: f64,
}

impl Resistor {
    /// Create a new resistor.
    pub fn new(name: impl Into<String>, resistance: f64) -> Self {
        Self {
            name: name.into(),
            resistance: resistance.max(MIN_RESISTANCE),
        }
    }

    /// Change the resistance; takes effect at the next stamp.
    pub fn set_resistance(&mut self, resistance: f64) {
        self.resistance = resistance.max(MIN_RESISTANCE);
    }

    /// Get the conductance (1/R).
    pub fn conductance(&self) -> f64 {
        1.0 / self.resistance
    }
}

impl Component for Resistor {
    fn name(&self) -> &str {
        &self.name
    }

    fn port_count(&self) -> usize {
        2
    }

    fn step_iter(&mut self, ctx: &mut StampContext) {
        ctx.conductance(1, 2, self.conductance());
    }
}

/// A capacitor component.
///
/// Modeled as a Thevenin companion on its own branch. With the integration
/// formula written as `dv/dt = a0 * v + b`, the capacitor current
/// `i = C * dv/dt` gives
///
/// ```text
/// V+ - V- = -b/a0 + i / (C * a0)
/// ```
///
/// i.e. an equivalent source `-b/a0` behind a resistance `1/(C*a0)`.
/// Forward Euler pins the voltage to its prediction (zero resistance).
#[derive(Debug, Clone)]
pub struct Capacitor {
    pub name: String,
    pub capacitance: f64,
    /// Voltage across the capacitor at t = 0
    pub initial_voltage: f64,

    /// Accepted voltage and dv/dt
    history: StateHistory,
    v_eq: f64,
    r_eq: f64,
}

impl Capacitor {
    /// Create a new, uncharged capacitor.
    pub fn new(name: impl Into<String>, capacitance: f64) -> Self {
        Self {
            name: name.into(),
            capacitance,
            initial_voltage: 0.0,
            history: StateHistory::with_initial(0.0, 0.0),
            v_eq: 0.0,
            r_eq: 0.0,
        }
    }

    /// Start the capacitor charged to `volts`.
    pub fn with_initial_voltage(mut self, volts: f64) -> Self {
        self.initial_voltage = volts;
        self.history = StateHistory::with_initial(volts, 0.0);
        self
    }

    /// Voltage at the last accepted point.
    pub fn voltage(&self) -> f64 {
        self.history.x(0)
    }

    /// Current (into the + terminal) at the last accepted point.
    pub fn current(&self) -> f64 {
        self.history.y(0) * self.capacitance
    }

    /// Current companion model as (equivalent voltage, series resistance).
    pub fn companion(&self) -> (f64, f64) {
        (self.v_eq, self.r_eq)
    }
}

impl Component for Capacitor {
    fn name(&self) -> &str {
        &self.name
    }

    fn port_count(&self) -> usize {
        2
    }

    fn needs_branch(&self) -> bool {
        true
    }

    fn stamp_blocks(&self) -> StampBlocks {
        StampBlocks::ALL
    }

    fn sim_begin(&mut self, _ctx: &StepContext) {
        self.history = StateHistory::with_initial(self.initial_voltage, 0.0);
    }

    fn step_begin(&mut self, ctx: &StepContext) {
        (self.v_eq, self.r_eq) = match ctx.companion(&self.history) {
            Companion::Implicit { a0, b } => (-b / a0, 1.0 / (self.capacitance * a0)),
            Companion::Explicit { value } => (value, 0.0),
        };
    }

    fn step_iter(&mut self, ctx: &mut StampContext) {
        ctx.thevenin(1, 2, self.v_eq, self.r_eq);
    }

    fn step_end(&mut self, ctx: &StepContext) {
        let v = ctx.voltage_across(1, 2);
        let i = ctx.branch_current();
        self.history.push(v, i / self.capacitance);
    }

    fn update_error(&self, ctx: &StepContext, err: &mut f64) {
        let candidate = ctx.voltage_across(1, 2);
        let vntol = ctx.step().tolerances.vntol;
        *err = err.max(ctx.truncation_error(&self.history, candidate, vntol));
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum InductorModel {
    /// `V+ - V- = v + r * i`
    Thevenin { v: f64, r: f64 },
    /// `i = value`
    Current(f64),
}

/// An inductor component.
///
/// The branch current is the state: with `di/dt = a0 * i + b` the inductor
/// law `v = L * di/dt` is a Thevenin companion with resistance `L*a0` and
/// source `L*b`. Forward Euler fixes the branch current to its prediction.
#[derive(Debug, Clone)]
pub struct Inductor {
    pub name: String,
    pub inductance: f64,
    /// Current through the inductor at t = 0
    pub initial_current: f64,

    /// Accepted current and di/dt
    history: StateHistory,
    model: InductorModel,
}

impl Inductor {
    /// Create a new inductor.
    pub fn new(name: impl Into<String>, inductance: f64) -> Self {
        Self {
            name: name.into(),
            inductance,
            initial_current: 0.0,
            history: StateHistory::with_initial(0.0, 0.0),
            model: InductorModel::Current(0.0),
        }
    }

    /// Start with `amps` flowing from + to -.
    pub fn with_initial_current(mut self, amps: f64) -> Self {
        self.initial_current = amps;
        self.history = StateHistory::with_initial(amps, 0.0);
        self
    }

    /// Current at the last accepted point.
    pub fn current(&self) -> f64 {
        self.history.x(0)
    }
}

impl Component for Inductor {
    fn name(&self) -> &str {
        &self.name
    }

    fn port_count(&self) -> usize {
        2
    }

    fn needs_branch(&self) -> bool {
        true
    }

    fn stamp_blocks(&self) -> StampBlocks {
        StampBlocks::ALL
    }

    fn sim_begin(&mut self, _ctx: &StepContext) {
        self.history = StateHistory::with_initial(self.initial_current, 0.0);
        self.model = InductorModel::Current(self.initial_current);
    }

    fn step_begin(&mut self, ctx: &StepContext) {
        self.model = match ctx.companion(&self.history) {
            Companion::Implicit { a0, b } => InductorModel::Thevenin {
                v: self.inductance * b,
                r: self.inductance * a0,
            },
            Companion::Explicit { value } => InductorModel::Current(value),
        };
    }

    fn step_iter(&mut self, ctx: &mut StampContext) {
        match self.model {
            InductorModel::Thevenin { v, r } => ctx.thevenin(1, 2, v, r),
            InductorModel::Current(i) => ctx.branch_current_source(1, 2, i),
        }
    }

    fn step_end(&mut self, ctx: &StepContext) {
        let i = ctx.branch_current();
        let v = ctx.voltage_across(1, 2);
        self.history.push(i, v / self.inductance);
    }

    fn update_error(&self, ctx: &StepContext, err: &mut f64) {
        let abstol = ctx.step().tolerances.abstol;
        *err = err.max(ctx.truncation_error(&self.history, ctx.branch_current(), abstol));
    }
}
