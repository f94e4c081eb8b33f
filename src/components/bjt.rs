//! BJT (Bipolar Junction Transistor) model.
//!
//! Uses the Ebers-Moll transport model for NPN and PNP transistors:
//!
//! ```text
//! I_F = Is * (exp(Vbe / nVt) - 1)
//! I_R = Is * (exp(Vbc / nVt) - 1)
//! Ic  = I_F - I_R * (1 + 1/beta_R)
//! Ib  = I_F / beta_F + I_R / beta_R
//! ```
//!
//! Each iteration the collector and base currents are linearized in Vbe and
//! Vbc and stamped as voltage-controlled current sources into the emitter.
//! A PNP device evaluates the same equations at negated junction voltages
//! and negates the resulting currents.

use super::diode::{critical_voltage, junction, limit_junction};
use super::{Component, StampContext, StepContext};
use crate::solver::MIN_CONDUCTANCE;
use crate::THERMAL_VOLTAGE;

/// BJT type (NPN or PNP).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BjtType {
    Npn,
    Pnp,
}

impl BjtType {
    fn sign(&self) -> f64 {
        match self {
            BjtType::Npn => 1.0,
            BjtType::Pnp => -1.0,
        }
    }
}

/// Parameters for a BJT model.
#[derive(Debug, Clone)]
pub struct BjtParams {
    /// Forward current gain (β_F)
    pub beta_f: f64,
    /// Reverse current gain (β_R)
    pub beta_r: f64,
    /// Transport saturation current
    pub is: f64,
    /// Ideality factor
    pub n: f64,
}

impl Default for BjtParams {
    fn default() -> Self {
        Self {
            beta_f: 100.0,
            beta_r: 1.0,
            is: 1e-14,
            n: 1.0,
        }
    }
}

impl BjtParams {
    /// Thermal voltage times ideality factor.
    pub fn n_vt(&self) -> f64 {
        self.n * THERMAL_VOLTAGE
    }
}

/// Currents and their partial derivatives at one operating point, in NPN polarity.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BjtOperatingPoint {
    pub ic: f64,
    pub ib: f64,
    /// dIc/dVbe
    pub gc_be: f64,
    /// dIc/dVbc
    pub gc_bc: f64,
    /// dIb/dVbe
    pub gb_be: f64,
    /// dIb/dVbc
    pub gb_bc: f64,
}

/// A BJT component. Ports: 1 collector, 2 base, 3 emitter.
#[derive(Debug, Clone)]
pub struct Bjt {
    pub name: String,
    pub bjt_type: BjtType,
    pub params: BjtParams,
    /// Base-emitter operating point, in NPN polarity
    pub v_be_op: f64,
    /// Base-collector operating point, in NPN polarity
    pub v_bc_op: f64,
}

impl Bjt {
    const COLLECTOR: usize = 1;
    const BASE: usize = 2;
    const EMITTER: usize = 3;

    /// Create a new BJT.
    pub fn new(name: impl Into<String>, bjt_type: BjtType, params: BjtParams) -> Self {
        Self {
            name: name.into(),
            bjt_type,
            params,
            v_be_op: 0.0,
            v_bc_op: 0.0,
        }
    }

    pub fn npn(name: impl Into<String>) -> Self {
        Self::new(name, BjtType::Npn, BjtParams::default())
    }

    pub fn pnp(name: impl Into<String>) -> Self {
        Self::new(name, BjtType::Pnp, BjtParams::default())
    }

    /// Evaluate the transport model at junction voltages given in NPN polarity.
    pub fn evaluate(&self, v_be: f64, v_bc: f64) -> BjtOperatingPoint {
        let p = &self.params;
        let n_vt = p.n_vt();
        let (i_f, g_f) = junction(p.is, n_vt, v_be);
        let (i_r, g_r) = junction(p.is, n_vt, v_bc);

        BjtOperatingPoint {
            ic: i_f - i_r * (1.0 + 1.0 / p.beta_r),
            ib: i_f / p.beta_f + i_r / p.beta_r,
            gc_be: g_f,
            gc_bc: -g_r * (1.0 + 1.0 / p.beta_r),
            gb_be: g_f / p.beta_f,
            gb_bc: g_r / p.beta_r,
        }
    }

    /// Collector current (into the collector) for terminal voltages.
    pub fn i_c(&self, v_be: f64, v_bc: f64) -> f64 {
        let s = self.bjt_type.sign();
        s * self.evaluate(s * v_be, s * v_bc).ic
    }

    /// Base current (into the base) for terminal voltages.
    pub fn i_b(&self, v_be: f64, v_bc: f64) -> f64 {
        let s = self.bjt_type.sign();
        s * self.evaluate(s * v_be, s * v_bc).ib
    }

    /// Calculate the emitter current (Ie = Ic + Ib, out of the emitter).
    pub fn i_e(&self, v_be: f64, v_bc: f64) -> f64 {
        self.i_c(v_be, v_bc) + self.i_b(v_be, v_bc)
    }
}

impl Component for Bjt {
    fn name(&self) -> &str {
        &self.name
    }

    fn port_count(&self) -> usize {
        3
    }

    fn is_nonlinear(&self) -> bool {
        true
    }

    fn sim_begin(&mut self, _ctx: &StepContext) {
        self.v_be_op = 0.0;
        self.v_bc_op = 0.0;
    }

    fn step_iter(&mut self, ctx: &mut StampContext) {
        let s = self.bjt_type.sign();
        let n_vt = self.params.n_vt();
        let v_crit = critical_voltage(self.params.is, n_vt);

        let v_be = s * ctx.voltage_across(Self::BASE, Self::EMITTER);
        let v_bc = s * ctx.voltage_across(Self::BASE, Self::COLLECTOR);
        let (v_be, limited_be) = limit_junction(v_be, self.v_be_op, n_vt, v_crit);
        let (v_bc, limited_bc) = limit_junction(v_bc, self.v_bc_op, n_vt, v_crit);
        if limited_be || limited_bc {
            ctx.mark_damped();
        }
        self.v_be_op = v_be;
        self.v_bc_op = v_bc;

        // Derivatives are polarity invariant; only the constant terms flip.
        let op = self.evaluate(v_be, v_bc);
        let ic_eq = s * (op.ic - op.gc_be * v_be - op.gc_bc * v_bc);
        let ib_eq = s * (op.ib - op.gb_be * v_be - op.gb_bc * v_bc);

        let (c, b, e) = (Self::COLLECTOR, Self::BASE, Self::EMITTER);

        // Collector current, C -> E
        ctx.vccs(c, e, b, e, op.gc_be);
        ctx.vccs(c, e, b, c, op.gc_bc);
        ctx.current_source(c, e, ic_eq);

        // Base current, B -> E
        ctx.vccs(b, e, b, e, op.gb_be);
        ctx.vccs(b, e, b, c, op.gb_bc);
        ctx.current_source(b, e, ib_eq);

        ctx.conductance(b, e, MIN_CONDUCTANCE);
        ctx.conductance(b, c, MIN_CONDUCTANCE);
    }
}
