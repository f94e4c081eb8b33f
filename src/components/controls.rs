//! Control and display components: Switch and Probe.

use super::{Component, StampContext, StepContext};

/// A switch component.
///
/// Modeled as a resistance:
/// - Closed: very small resistance (0.01 ohms)
/// - Open: very large resistance (1e9 ohms)
#[derive(Debug, Clone)]
pub struct Switch {
    pub name: String,
    pub closed: bool,
}

impl Switch {
    /// Resistance when closed.
    pub const R_CLOSED: f64 = 0.01;
    /// Resistance when open.
    pub const R_OPEN: f64 = 1e9;

    /// Create a new switch.
    pub fn new(name: impl Into<String>, closed: bool) -> Self {
        Self {
            name: name.into(),
            closed,
        }
    }

    /// Get the current resistance.
    pub fn resistance(&self) -> f64 {
        if self.closed {
            Self::R_CLOSED
        } else {
            Self::R_OPEN
        }
    }

    /// Get the current conductance.
    pub fn conductance(&self) -> f64 {
        1.0 / self.resistance()
    }

    /// Set the switch state.
    pub fn set_state(&mut self, closed: bool) {
        self.closed = closed;
    }

    /// Toggle the switch state.
    pub fn toggle(&mut self) {
        self.closed = !self.closed;
    }
}

impl Component for Switch {
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

/// A logic probe across ports 1 (signal) and 2 (reference).
///
/// Draws no current. The displayed level is only updated from accepted
/// steps, with hysteresis between `low_threshold` and `high_threshold`.
#[derive(Debug, Clone)]
pub struct Probe {
    pub name: String,
    pub low_threshold: f64,
    pub high_threshold: f64,
    high: bool,
    voltage: f64,
}

impl Probe {
    /// Create a probe with TTL-like thresholds (0.8 V / 2.0 V).
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_thresholds(name, 0.8, 2.0)
    }

    pub fn with_thresholds(name: impl Into<String>, low: f64, high: f64) -> Self {
        Self {
            name: name.into(),
            low_threshold: low,
            high_threshold: high,
            high: false,
            voltage: 0.0,
        }
    }

    /// Displayed logic level.
    pub fn is_high(&self) -> bool {
        self.high
    }

    /// Voltage at the last accepted step.
    pub fn voltage(&self) -> f64 {
        self.voltage
    }
}

impl Component for Probe {
    fn name(&self) -> &str {
        &self.name
    }

    fn port_count(&self) -> usize {
        2
    }

    fn sim_begin(&mut self, _ctx: &StepContext) {
        self.high = false;
        self.voltage = 0.0;
    }

    fn step_iter(&mut self, _ctx: &mut StampContext) {}

    fn step_end(&mut self, ctx: &StepContext) {
        self.voltage = ctx.voltage_across(1, 2);
        if self.voltage >= self.high_threshold {
            self.high = true;
        } else if self.voltage <= self.low_threshold {
            self.high = false;
        }
    }
}
