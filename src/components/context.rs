//! Views handed to component hooks.
//!
//! Components address their terminals by 1-based port number. [`Pins`]
//! resolves those ports to system rows once per topology revision, so hooks
//! never touch the circuit graph.

use crate::solver::{Companion, MnaSystem, StateHistory, StepInfo};

/// Resolved system rows of one component.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Pins {
    /// Voltage row per port (index `port - 1`), `None` for ground
    pub nodes: Vec<Option<usize>>,
    /// Row of the component's branch current, if it owns one
    pub branch: Option<usize>,
}

impl Pins {
    /// Row of a port's node, `None` for ground or an unknown port.
    pub fn node(&self, port: usize) -> Option<usize> {
        port.checked_sub(1)
            .and_then(|i| self.nodes.get(i))
            .copied()
            .flatten()
    }
}

fn read(solution: &[f64], row: Option<usize>) -> f64 {
    row.and_then(|r| solution.get(r)).copied().unwrap_or(0.0)
}

/// Read-only view of a solution vector from one component's point of view.
///
/// Passed to `sim_begin` (initial point), `step_begin` (last accepted
/// solution), `step_end` (newly accepted solution) and `update_error`
/// (candidate solution).
#[derive(Debug, Clone, Copy)]
pub struct StepContext<'a> {
    pins: &'a Pins,
    solution: &'a [f64],
    step: &'a StepInfo,
}

impl<'a> StepContext<'a> {
    pub fn new(pins: &'a Pins, solution: &'a [f64], step: &'a StepInfo) -> Self {
        Self {
            pins,
            solution,
            step,
        }
    }

    /// Voltage of the node a port is connected to.
    pub fn voltage(&self, port: usize) -> f64 {
        read(self.solution, self.pins.node(port))
    }

    /// Voltage of port `pos` relative to port `neg`.
    pub fn voltage_across(&self, pos: usize, neg: usize) -> f64 {
        self.voltage(pos) - self.voltage(neg)
    }

    /// The component's own branch current (0 if it owns none).
    pub fn branch_current(&self) -> f64 {
        read(self.solution, self.pins.branch)
    }

    pub fn step(&self) -> &StepInfo {
        self.step
    }

    pub fn time(&self) -> f64 {
        self.step.time
    }

    pub fn dt(&self) -> f64 {
        self.step.dt
    }

    /// Companion coefficients for a state with the given history.
    pub fn companion(&self, history: &StateHistory) -> Companion {
        self.step.companion(history)
    }

    /// Normalized truncation error of a candidate state value.
    pub fn truncation_error(&self, history: &StateHistory, candidate: f64, abstol: f64) -> f64 {
        self.step.truncation_error(history, candidate, abstol)
    }
}

/// Mutable stamping view passed to `step_iter`.
///
/// Every primitive adds to the system; nothing is overwritten.
#[derive(Debug)]
pub struct StampContext<'a> {
    system: &'a mut MnaSystem,
    pins: &'a Pins,
    iterate: &'a [f64],
    step: &'a StepInfo,
    damped: &'a mut bool,
}

impl<'a> StampContext<'a> {
    pub fn new(
        system: &'a mut MnaSystem,
        pins: &'a Pins,
        iterate: &'a [f64],
        step: &'a StepInfo,
        damped: &'a mut bool,
    ) -> Self {
        Self {
            system,
            pins,
            iterate,
            step,
            damped,
        }
    }

    /// Read-only view of the current Newton iterate.
    pub fn view(&self) -> StepContext<'_> {
        StepContext::new(self.pins, self.iterate, self.step)
    }

    /// Voltage at a port in the current iterate.
    pub fn voltage(&self, port: usize) -> f64 {
        read(self.iterate, self.pins.node(port))
    }

    pub fn voltage_across(&self, pos: usize, neg: usize) -> f64 {
        self.voltage(pos) - self.voltage(neg)
    }

    pub fn branch_current(&self) -> f64 {
        read(self.iterate, self.pins.branch)
    }

    pub fn step(&self) -> &StepInfo {
        self.step
    }

    /// Flag this iteration as damped so it cannot count as converged.
    pub fn mark_damped(&mut self) {
        *self.damped = true;
    }

    pub fn conductance(&mut self, a: usize, b: usize, g: f64) {
        self.system
            .stamp_conductance(self.pins.node(a), self.pins.node(b), g);
    }

    /// Current `i` flowing from `pos` through the element to `neg`.
    pub fn current_source(&mut self, pos: usize, neg: usize, i: f64) {
        self.system
            .stamp_current_source(self.pins.node(pos), self.pins.node(neg), i);
    }

    /// Ideal source on the component's own branch.
    pub fn voltage_source(&mut self, pos: usize, neg: usize, v: f64) {
        if let Some(br) = self.pins.branch {
            self.system
                .stamp_voltage_source(self.pins.node(pos), self.pins.node(neg), br, v);
        }
    }

    /// Thevenin equivalent `V(pos) - V(neg) = v + r * I` on the component's own branch.
    pub fn thevenin(&mut self, pos: usize, neg: usize, v: f64, r: f64) {
        if let Some(br) = self.pins.branch {
            self.system
                .stamp_thevenin(self.pins.node(pos), self.pins.node(neg), br, v, r);
        }
    }

    /// Fix the component's own branch current to `i`.
    pub fn branch_current_source(&mut self, pos: usize, neg: usize, i: f64) {
        if let Some(br) = self.pins.branch {
            self.system
                .stamp_branch_current(self.pins.node(pos), self.pins.node(neg), br, i);
        }
    }

    /// `gm * (V(ctrl_pos) - V(ctrl_neg))` flowing from `out_pos` to `out_neg`.
    pub fn vccs(&mut self, out_pos: usize, out_neg: usize, ctrl_pos: usize, ctrl_neg: usize, gm: f64) {
        self.system.stamp_vccs(
            self.pins.node(out_pos),
            self.pins.node(out_neg),
            self.pins.node(ctrl_pos),
            self.pins.node(ctrl_neg),
            gm,
        );
    }

    /// Direct access to the system for stamps not covered above.
    pub fn system(&mut self) -> &mut MnaSystem {
        self.system
    }

    pub fn pins(&self) -> &Pins {
        self.pins
    }
}
