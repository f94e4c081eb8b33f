//! Diode model.
//!
//! Uses the Shockley diode equation:
//!   I = Is * (exp(V / (n * Vt)) - 1)
//!
//! For Newton-Raphson iteration, we linearize around the current operating point:
//!   I ≈ I0 + G_d * (V - V0)
//!
//! where G_d = dI/dV = Is/(n*Vt) * exp(V0/(n*Vt))

use super::{Component, StampContext, StepContext};
use crate::solver::MIN_CONDUCTANCE;
use crate::THERMAL_VOLTAGE;

/// Parameters for a diode model.
#[derive(Debug, Clone)]
pub struct DiodeParams {
    /// Saturation current (Is), typically 1e-14 to 1e-12 A
    pub is: f64,
    /// Ideality factor (n), typically 1.0 to 2.0
    pub n: f64,
}

impl Default for DiodeParams {
    fn default() -> Self {
        Self { is: 1e-14, n: 1.0 }
    }
}

impl DiodeParams {
    /// Create parameters for a germanium diode (lower forward voltage).
    pub fn germanium() -> Self {
        Self { is: 1e-9, n: 1.5 }
    }

    /// Create parameters for an LED.
    pub fn led() -> Self {
        Self { is: 1e-18, n: 2.0 }
    }

    /// Thermal voltage times ideality factor.
    pub fn n_vt(&self) -> f64 {
        self.n * THERMAL_VOLTAGE
    }

    /// Voltage above which the exponential is limited between iterations.
    pub fn critical_voltage(&self) -> f64 {
        critical_voltage(self.is, self.n_vt())
    }
}

/// `n_vt * ln(n_vt / (sqrt(2) * is))`, where the junction curve bends sharply.
pub fn critical_voltage(is: f64, n_vt: f64) -> f64 {
    n_vt * (n_vt / (std::f64::consts::SQRT_2 * is)).ln()
}

/// Limit the change of a junction voltage between Newton iterations.
///
/// Above `v_crit` a forward step larger than two `n_vt` is compressed
/// logarithmically, so the exponential grows by at most a bounded factor per
/// iteration. Returns the voltage to linearize around and whether it was limited.
pub fn limit_junction(v_new: f64, v_old: f64, n_vt: f64, v_crit: f64) -> (f64, bool) {
    if v_new <= v_crit || (v_new - v_old).abs() <= 2.0 * n_vt {
        return (v_new, false);
    }

    let limited = if v_old > 0.0 {
        let arg = 1.0 + (v_new - v_old) / n_vt;
        if arg > 0.0 {
            v_old + n_vt * arg.ln()
        } else {
            v_crit
        }
    } else {
        n_vt * (v_new / n_vt).ln()
    };
    (limited, true)
}

/// Junction current and conductance at `v`, including the minimum conductance.
pub fn junction(is: f64, n_vt: f64, v: f64) -> (f64, f64) {
    let e = (v / n_vt).exp();
    let i = is * (e - 1.0) + MIN_CONDUCTANCE * v;
    let g = is / n_vt * e + MIN_CONDUCTANCE;
    (i, g)
}

/// A diode component. Port 1 is the anode, port 2 the cathode.
#[derive(Debug, Clone)]
pub struct Diode {
    pub name: String,
    pub params: DiodeParams,
    /// Current operating point voltage (for Newton-Raphson)
    pub v_op: f64,
}

impl Diode {
    const ANODE: usize = 1;
    const CATHODE: usize = 2;

    /// Create a new diode.
    pub fn new(name: impl Into<String>, params: DiodeParams) -> Self {
        Self {
            name: name.into(),
            params,
            v_op: 0.0,
        }
    }

    /// Calculate the diode current at a given voltage.
    pub fn current(&self, v: f64) -> f64 {
        junction(self.params.is, self.params.n_vt(), v).0
    }

    /// Calculate the conductance (dI/dV) at a given voltage.
    pub fn conductance(&self, v: f64) -> f64 {
        junction(self.params.is, self.params.n_vt(), v).1
    }

    /// Get the linearized model parameters at an operating point.
    /// Returns (conductance G, equivalent current source I_eq)
    /// such that I = G * V + I_eq
    pub fn linearize(&self, v_op: f64) -> (f64, f64) {
        let (i, g) = junction(self.params.is, self.params.n_vt(), v_op);
        (g, i - g * v_op)
    }
}

impl Component for Diode {
    fn name(&self) -> &str {
        &self.name
    }

    fn port_count(&self) -> usize {
        2
    }

    fn is_nonlinear(&self) -> bool {
        true
    }

    fn sim_begin(&mut self, _ctx: &StepContext) {
        self.v_op = 0.0;
    }

    fn step_iter(&mut self, ctx: &mut StampContext) {
        let v = ctx.voltage_across(Self::ANODE, Self::CATHODE);
        let n_vt = self.params.n_vt();
        let (v, limited) = limit_junction(v, self.v_op, n_vt, self.params.critical_voltage());
        if limited {
            ctx.mark_damped();
        }
        self.v_op = v;

        let (g, i_eq) = self.linearize(v);
        ctx.conductance(Self::ANODE, Self::CATHODE, g);
        ctx.current_source(Self::ANODE, Self::CATHODE, i_eq);
    }
}
