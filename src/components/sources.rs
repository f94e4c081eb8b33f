//! Voltage and current sources.

use std::f64::consts::TAU;

use super::{Component, StampContext, StepContext};
use crate::solver::StampBlocks;

/// Time-dependent source value.
#[derive(Debug, Clone, PartialEq)]
pub enum Waveform {
    /// Constant value
    Dc(f64),
    /// `initial` before `at`, `value` from `at` on
    Step { initial: f64, value: f64, at: f64 },
    /// `offset + amplitude * sin(2*pi*frequency*t + phase)`
    Sine {
        offset: f64,
        amplitude: f64,
        frequency: f64,
        phase: f64,
    },
    /// Trapezoidal pulse train between `low` and `high`
    Pulse {
        low: f64,
        high: f64,
        delay: f64,
        rise: f64,
        fall: f64,
        width: f64,
        period: f64,
    },
}

impl Waveform {
    /// Zero-offset, zero-phase sine.
    pub fn sine(amplitude: f64, frequency: f64) -> Self {
        Waveform::Sine {
            offset: 0.0,
            amplitude,
            frequency,
            phase: 0.0,
        }
    }

    /// Value at time `t`.
    pub fn value(&self, t: f64) -> f64 {
        match *self {
            Waveform::Dc(v) => v,
            Waveform::Step { initial, value, at } => {
                if t < at {
                    initial
                } else {
                    value
                }
            }
            Waveform::Sine {
                offset,
                amplitude,
                frequency,
                phase,
            } => offset + amplitude * (TAU * frequency * t + phase).sin(),
            Waveform::Pulse {
                low,
                high,
                delay,
                rise,
                fall,
                width,
                period,
            } => {
                if t < delay {
                    return low;
                }
                let mut local = t - delay;
                if period > 0.0 {
                    local %= period;
                }
                if local < rise {
                    low + (high - low) * local / rise
                } else if local < rise + width {
                    high
                } else if local < rise + width + fall {
                    high - (high - low) * (local - rise - width) / fall
                } else {
                    low
                }
            }
        }
    }
}

/// A voltage source component.
///
/// Voltage sources require an extra row/column in the MNA matrix for the
/// branch current. The source enforces: V+ - V- = V_source, and its branch
/// current is the current delivered out of the + terminal.
#[derive(Debug, Clone)]
pub struct VoltageSource {
    pub name: String,
    pub waveform: Waveform,
    /// Value for the step being solved
    current_value: f64,
}

impl VoltageSource {
    /// Create a new voltage source.
    pub fn new(name: impl Into<String>, waveform: Waveform) -> Self {
        let current_value = waveform.value(0.0);
        Self {
            name: name.into(),
            waveform,
            current_value,
        }
    }

    /// Constant voltage source.
    pub fn dc(name: impl Into<String>, volts: f64) -> Self {
        Self::new(name, Waveform::Dc(volts))
    }

    /// Replace the waveform with a constant value.
    pub fn set_value(&mut self, value: f64) {
        self.waveform = Waveform::Dc(value);
        self.current_value = value;
    }

    /// Get the current source voltage.
    pub fn voltage(&self) -> f64 {
        self.current_value
    }
}

impl Component for VoltageSource {
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
        StampBlocks::SOURCE
    }

    fn sim_begin(&mut self, ctx: &StepContext) {
        self.current_value = self.waveform.value(ctx.time());
    }

    fn step_begin(&mut self, ctx: &StepContext) {
        self.current_value = self.waveform.value(ctx.time());
    }

    fn step_iter(&mut self, ctx: &mut StampContext) {
        ctx.voltage_source(1, 2, self.current_value);
    }
}

/// A current source component.
///
/// Current sources add directly to the RHS vector of the MNA equations.
/// Positive current flows from + through the source to -.
#[derive(Debug, Clone)]
pub struct CurrentSource {
    pub name: String,
    pub waveform: Waveform,
    current_value: f64,
}

impl CurrentSource {
    /// Create a new current source.
    pub fn new(name: impl Into<String>, waveform: Waveform) -> Self {
        let current_value = waveform.value(0.0);
        Self {
            name: name.into(),
            waveform,
            current_value,
        }
    }

    /// Constant current source.
    pub fn dc(name: impl Into<String>, amps: f64) -> Self {
        Self::new(name, Waveform::Dc(amps))
    }

    /// Get the current source value.
    pub fn current(&self) -> f64 {
        self.current_value
    }
}

impl Component for CurrentSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn port_count(&self) -> usize {
        2
    }

    fn stamp_blocks(&self) -> StampBlocks {
        StampBlocks::NONE
    }

    fn sim_begin(&mut self, ctx: &StepContext) {
        self.current_value = self.waveform.value(ctx.time());
    }

    fn step_begin(&mut self, ctx: &StepContext) {
        self.current_value = self.waveform.value(ctx.time());
    }

    fn step_iter(&mut self, ctx: &mut StampContext) {
        ctx.current_source(1, 2, self.current_value);
    }
}
