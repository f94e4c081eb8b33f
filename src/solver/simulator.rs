//! Main simulator interface: the timestep controller.

use log::{debug, info, warn};
use slotmap::SecondaryMap;

use crate::circuit::{validate_circuit, Circuit, ComponentId, NodeId, SourceId};
use crate::components::{Component, Pins, StepContext};
use crate::error::{Result, SimError};

use super::context::SimContext;
use super::history::SolutionHistory;
use super::integration::{IntegrationMethod, StepInfo, HISTORY_DEPTH};
use super::newton::{NewtonOutcome, NewtonRaphson};
use super::{Tolerances, DEFAULT_MAX_ITERATIONS};

/// Configuration for the simulator.
#[derive(Debug, Clone, PartialEq)]
pub struct SimulatorConfig {
    /// Integration formula for energy-storage elements.
    pub method: IntegrationMethod,
    /// Step size tried first (s).
    pub initial_step: f64,
    /// Smallest step the controller halves down to (s).
    pub min_step: f64,
    /// Largest step the controller grows up to (s).
    pub max_step: f64,
    /// Normalized LTE above which a step is rejected.
    pub lte_upper: f64,
    /// Normalized LTE below which the next step grows.
    pub lte_lower: f64,
    /// Step multiplier applied when the error is below `lte_lower`.
    pub growth_factor: f64,
    /// Rejections tolerated within one tick before giving up.
    pub max_retries: usize,
    /// Maximum Newton-Raphson iterations per step attempt.
    pub max_iterations: usize,
    /// Convergence and error tolerances.
    pub tolerances: Tolerances,
    /// Whether LTE control accepts, rejects and resizes steps.
    pub adaptive: bool,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            method: IntegrationMethod::Trapezoidal,
            initial_step: 1e-6,
            min_step: 1e-15,
            max_step: 1e-3,
            lte_upper: 1.0,
            lte_lower: 0.1,
            growth_factor: 2.0,
            max_retries: 20,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            tolerances: Tolerances::default(),
            adaptive: true,
        }
    }
}

impl SimulatorConfig {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_method(mut self, method: IntegrationMethod) -> Self {
        self.method = method;
        self
    }

    pub fn with_initial_step(mut self, dt: f64) -> Self {
        self.initial_step = dt;
        self
    }

    /// Set the smallest and largest allowed step.
    pub fn with_step_bounds(mut self, min_step: f64, max_step: f64) -> Self {
        self.min_step = min_step;
        self.max_step = max_step;
        self
    }

    /// Set the normalized LTE bounds for growing (`lower`) and rejecting (`upper`).
    pub fn with_lte_bounds(mut self, lower: f64, upper: f64) -> Self {
        self.lte_lower = lower;
        self.lte_upper = upper;
        self
    }

    pub fn with_growth_factor(mut self, factor: f64) -> Self {
        self.growth_factor = factor;
        self
    }

    pub fn with_max_retries(mut self, retries: usize) -> Self {
        self.max_retries = retries;
        self
    }

    /// Set the maximum Newton-Raphson iterations.
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_tolerances(mut self, tolerances: Tolerances) -> Self {
        self.tolerances = tolerances;
        self
    }

    /// Run at a constant step `dt` with LTE control disabled.
    pub fn fixed_step(mut self, dt: f64) -> Self {
        self.initial_step = dt;
        self.min_step = dt;
        self.max_step = dt;
        self.adaptive = false;
        self
    }

    /// Check the configuration for inconsistent values.
    pub fn validate(&self) -> Result<()> {
        let positive = |v: f64| v.is_finite() && v > 0.0;

        if !positive(self.min_step) || !positive(self.max_step) || !positive(self.initial_step) {
            return Err(SimError::param("step sizes must be positive and finite"));
        }
        if self.min_step > self.max_step {
            return Err(SimError::param(format!(
                "min step {:e} exceeds max step {:e}",
                self.min_step, self.max_step
            )));
        }
        if self.initial_step < self.min_step || self.initial_step > self.max_step {
            return Err(SimError::param(format!(
                "initial step {:e} outside [{:e}, {:e}]",
                self.initial_step, self.min_step, self.max_step
            )));
        }
        if !(self.lte_lower >= 0.0 && self.lte_lower < self.lte_upper) {
            return Err(SimError::param("LTE bounds must satisfy 0 <= lower < upper"));
        }
        if !(self.growth_factor >= 1.0) {
            return Err(SimError::param("growth factor must be at least 1"));
        }
        if self.max_iterations == 0 {
            return Err(SimError::param("at least one Newton iteration is required"));
        }
        let tol = &self.tolerances;
        if !(tol.reltol >= 0.0 && positive(tol.vntol) && positive(tol.abstol)) {
            return Err(SimError::param("tolerances must be positive"));
        }
        Ok(())
    }
}

/// Controller state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimState {
    Idle,
    Running,
    /// Inside `advance`; only observable from event listeners
    Stepping,
}

/// Lifecycle notifications.
#[derive(Debug, Clone, PartialEq)]
pub enum SimEvent {
    Started,
    /// An attempt of `dt` from `time` is about to be solved
    StepBegin { time: f64, dt: f64 },
    /// A step of `dt` was accepted, reaching `time`
    StepEnd {
        time: f64,
        dt: f64,
        iterations: usize,
    },
    /// The run ended; `reason` describes the failure, if any
    Stopped { reason: Option<String> },
}

/// Event listener.
pub type Listener = Box<dyn FnMut(&SimEvent) + Send>;

/// Running diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SimStats {
    pub accepted: usize,
    pub rejected: usize,
    /// Newton iterations summed over accepted steps
    pub total_iterations: usize,
    pub min_iterations: usize,
    pub max_iterations: usize,
    pub min_step: f64,
    pub max_step: f64,
}

impl SimStats {
    fn record(&mut self, iterations: usize, dt: f64) {
        if self.accepted == 0 {
            self.min_iterations = iterations;
            self.max_iterations = iterations;
            self.min_step = dt;
            self.max_step = dt;
        } else {
            self.min_iterations = self.min_iterations.min(iterations);
            self.max_iterations = self.max_iterations.max(iterations);
            self.min_step = self.min_step.min(dt);
            self.max_step = self.max_step.max(dt);
        }
        self.accepted += 1;
        self.total_iterations += iterations;
    }
}

/// Outcome of one accepted tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepReport {
    /// Simulated time after the step
    pub time: f64,
    /// Accepted step size
    pub dt: f64,
    pub iterations: usize,
    /// Attempts rejected before this one was accepted
    pub rejections: usize,
    /// Normalized LTE of the accepted step
    pub error: f64,
}

/// The main circuit simulator.
///
/// Owns the circuit and advances it one step per call to [`Simulator::advance`].
/// Structural edits made through [`Simulator::circuit_mut`] between ticks are
/// picked up at the next tick.
pub struct Simulator {
    /// The circuit being simulated
    circuit: Circuit,
    config: SimulatorConfig,
    ctx: SimContext,
    /// Newton-Raphson solver
    newton: NewtonRaphson,
    state: SimState,
    /// Simulated elapsed time
    time: f64,
    /// Step size for the next attempt
    dt: f64,
    stats: SimStats,
    listeners: Vec<Listener>,
    /// Components whose `sim_begin` ran in this run
    begun: SecondaryMap<ComponentId, ()>,
}

impl Simulator {
    /// Create a new simulator for the given circuit with default configuration.
    pub fn new(circuit: Circuit) -> Self {
        Self::with_config(circuit, SimulatorConfig::default())
    }

    /// Create a new simulator for the given circuit with custom configuration.
    ///
    /// The configuration is validated by [`Simulator::start`].
    pub fn with_config(circuit: Circuit, config: SimulatorConfig) -> Self {
        Self {
            circuit,
            newton: NewtonRaphson::new(config.max_iterations, config.tolerances),
            dt: config.initial_step,
            config,
            ctx: SimContext::new(),
            state: SimState::Idle,
            time: 0.0,
            stats: SimStats::default(),
            listeners: Vec::new(),
            begun: SecondaryMap::new(),
        }
    }

    pub fn config(&self) -> &SimulatorConfig {
        &self.config
    }

    /// Replace the configuration; only allowed while idle.
    pub fn set_config(&mut self, config: SimulatorConfig) -> Result<()> {
        if self.state != SimState::Idle {
            return Err(SimError::param("configuration cannot change while running"));
        }
        config.validate()?;
        self.config = config;
        Ok(())
    }

    /// Get a reference to the circuit.
    pub fn circuit(&self) -> &Circuit {
        &self.circuit
    }

    /// Mutable access to the circuit for edits between ticks.
    pub fn circuit_mut(&mut self) -> &mut Circuit {
        &mut self.circuit
    }

    pub fn into_circuit(self) -> Circuit {
        self.circuit
    }

    /// Register a listener for lifecycle events.
    pub fn subscribe<F>(&mut self, listener: F)
    where
        F: FnMut(&SimEvent) + Send + 'static,
    {
        self.listeners.push(Box::new(listener));
    }

    fn emit(&mut self, event: SimEvent) {
        for listener in &mut self.listeners {
            listener(&event);
        }
    }

    /// Validate the circuit, size the system and begin a new run at t = 0.
    ///
    /// Does nothing if a run is already in progress.
    pub fn start(&mut self) -> Result<()> {
        if self.state != SimState::Idle {
            return Ok(());
        }
        self.config.validate()?;
        validate_circuit(&self.circuit)?;
        self.ctx.prepare(&self.circuit)?;
        self.ctx.reset();

        self.newton = NewtonRaphson::new(self.config.max_iterations, self.config.tolerances);
        self.time = 0.0;
        self.dt = self.config.initial_step;
        self.stats = SimStats::default();
        self.begun.clear();
        self.begin_components();

        self.state = SimState::Running;
        info!(
            "simulation started: {} nodes, {} sources, method {}",
            self.circuit.node_count(),
            self.circuit.source_count(),
            self.config.method.name()
        );
        self.emit(SimEvent::Started);
        Ok(())
    }

    /// End the run. Takes effect between ticks only.
    pub fn stop(&mut self) {
        if self.state == SimState::Idle {
            return;
        }
        self.state = SimState::Idle;
        info!(
            "simulation stopped at t={:.6e} after {} steps",
            self.time, self.stats.accepted
        );
        self.emit(SimEvent::Stopped { reason: None });
    }

    /// Halt the run on an unrecoverable error and hand the error back.
    fn fail(&mut self, error: SimError) -> SimError {
        warn!("simulation halted at t={:.6e}: {}", self.time, error);
        self.state = SimState::Idle;
        self.emit(SimEvent::Stopped {
            reason: Some(error.to_string()),
        });
        error
    }

    /// Advance by one accepted step.
    ///
    /// Rejected attempts (LTE above the upper bound, or a NaN/Inf solution)
    /// are retried with half the step, at most `max_retries` times.
    pub fn advance(&mut self) -> Result<StepReport> {
        if self.state == SimState::Idle {
            return Err(SimError::NotRunning);
        }
        if !self.ctx.is_current(&self.circuit) {
            if let Err(e) = self.reprepare() {
                return Err(self.fail(e));
            }
        }

        self.state = SimState::Stepping;
        let mut rejections = 0;

        loop {
            let h = self.dt;
            let step = self.step_info(h);
            self.emit(SimEvent::StepBegin {
                time: self.time,
                dt: h,
            });

            let guess = self.ctx.solution().to_vec();
            visit(&mut self.circuit, &self.ctx.pins, &guess, &step, |c, ctx| {
                c.step_begin(ctx)
            });

            let cause = match self
                .newton
                .solve(&mut self.circuit, &mut self.ctx, &guess, &step)
            {
                Ok(outcome) => {
                    let error = self.estimate_error(&outcome.solution, &step);
                    if error <= self.config.lte_upper {
                        return Ok(self.accept(outcome, &step, error, rejections));
                    }
                    debug!(
                        "rejected step at t={:.6e}: dt={:.3e}, error {:.3}",
                        self.time, h, error
                    );
                    None
                }
                Err(e @ SimError::NumericOverflow { .. }) => {
                    debug!("rejected step at t={:.6e}: dt={:.3e}, {}", self.time, h, e);
                    Some(e)
                }
                Err(e) => return Err(self.fail(e)),
            };

            rejections += 1;
            self.stats.rejected += 1;
            if rejections > self.config.max_retries {
                let error = cause.unwrap_or(SimError::NoStableSolution {
                    retries: self.config.max_retries,
                    time: self.time,
                    dt: h,
                });
                return Err(self.fail(error));
            }
            self.dt = (h / 2.0).max(self.config.min_step);
        }
    }

    /// Advance `n` steps.
    pub fn run_steps(&mut self, n: usize) -> Result<()> {
        for _ in 0..n {
            self.advance()?;
        }
        Ok(())
    }

    /// Advance until the simulated time reaches `end`, shortening the last step to land on it.
    pub fn run_until(&mut self, end: f64) -> Result<()> {
        while !self.reached(end) {
            self.advance_toward(end)?;
        }
        Ok(())
    }

    /// Advance one step, shortened if needed so it does not pass `end`.
    ///
    /// A shortened step accepted on the first attempt hands the planned step
    /// size back to the next tick.
    pub fn advance_toward(&mut self, end: f64) -> Result<StepReport> {
        let planned = self.dt;
        let remaining = end - self.time;
        if planned <= remaining {
            return self.advance();
        }

        self.dt = remaining.max(self.config.min_step);
        let report = self.advance()?;
        if report.rejections == 0 {
            self.dt = self.dt.max(planned.min(self.config.max_step));
        }
        Ok(report)
    }

    /// Whether the simulated time is within half a minimum step of `time`.
    pub fn reached(&self, time: f64) -> bool {
        time - self.time < 0.5 * self.config.min_step
    }

    fn step_info(&self, dt: f64) -> StepInfo {
        let available = self.ctx.history.len();
        StepInfo {
            time: self.time + dt,
            dt,
            past_steps: self.ctx.history.past_steps(),
            method: self.config.method.effective(available),
            tolerances: self.config.tolerances,
        }
    }

    /// Worst normalized LTE over all components, 0 when LTE control is off.
    fn estimate_error(&mut self, solution: &[f64], step: &StepInfo) -> f64 {
        if !self.config.adaptive {
            return 0.0;
        }
        let mut error = 0.0f64;
        visit(&mut self.circuit, &self.ctx.pins, solution, step, |c, ctx| {
            c.update_error(ctx, &mut error)
        });
        error
    }

    fn accept(
        &mut self,
        outcome: NewtonOutcome,
        step: &StepInfo,
        error: f64,
        rejections: usize,
    ) -> StepReport {
        let h = step.dt;
        self.time += h;

        visit(&mut self.circuit, &self.ctx.pins, &outcome.solution, step, |c, ctx| {
            c.step_end(ctx)
        });
        self.ctx.history.push(outcome.solution, h, self.time);
        self.stats.record(outcome.iterations, h);

        self.dt = if self.config.adaptive && error < self.config.lte_lower {
            (h * self.config.growth_factor).min(self.config.max_step)
        } else {
            h.min(self.config.max_step)
        };

        self.state = SimState::Running;
        debug!(
            "accepted step: t={:.6e} dt={:.3e} iterations={} error={:.3}",
            self.time, h, outcome.iterations, error
        );
        self.emit(SimEvent::StepEnd {
            time: self.time,
            dt: h,
            iterations: outcome.iterations,
        });

        StepReport {
            time: self.time,
            dt: h,
            iterations: outcome.iterations,
            rejections,
            error,
        }
    }

    /// Pick up a topology edit made while running.
    fn reprepare(&mut self) -> Result<()> {
        validate_circuit(&self.circuit)?;
        self.ctx.prepare(&self.circuit)?;
        let circuit = &self.circuit;
        self.begun.retain(|id, _| circuit.component(id).is_some());
        self.begin_components();
        debug!(
            "topology changed at t={:.6e}: system is now {}x{}",
            self.time, self.ctx.system.size, self.ctx.system.size
        );
        Ok(())
    }

    /// Run `sim_begin` on every component that has not seen it in this run.
    fn begin_components(&mut self) {
        let step = StepInfo {
            time: self.time,
            dt: self.dt,
            past_steps: [0.0; HISTORY_DEPTH],
            method: self.config.method.effective(1),
            tolerances: self.config.tolerances,
        };
        let solution = self.ctx.solution();
        let pins = &self.ctx.pins;
        let begun = &mut self.begun;
        self.circuit.for_each_component_mut(|id, component| {
            if begun.contains_key(id) {
                return;
            }
            if let Some(pins) = pins.get(id) {
                component.sim_begin(&StepContext::new(pins, solution, &step));
                begun.insert(id, ());
            }
        });
    }

    pub fn state(&self) -> SimState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.state != SimState::Idle
    }

    /// Simulated elapsed time.
    pub fn time(&self) -> f64 {
        self.time
    }

    /// Step size the next attempt will use.
    pub fn step_size(&self) -> f64 {
        self.dt
    }

    pub fn stats(&self) -> &SimStats {
        &self.stats
    }

    /// Latest accepted solution vector x = [v; j].
    pub fn solution(&self) -> &[f64] {
        self.ctx.solution()
    }

    pub fn history(&self) -> &SolutionHistory {
        &self.ctx.history
    }

    /// Voltage of a node at the latest accepted point (0 for ground or an unknown node).
    pub fn node_voltage(&self, node: NodeId) -> f64 {
        self.node_voltage_prev(node, 0)
    }

    /// Voltage of a node `steps_back` accepted steps ago.
    pub fn node_voltage_prev(&self, node: NodeId, steps_back: usize) -> f64 {
        match node.row() {
            Some(row) if row < self.ctx.system.node_rows => self.value_at(row, steps_back),
            _ => 0.0,
        }
    }

    /// Current of the branch with registry index `index` at the latest point.
    ///
    /// For voltage sources this is the current delivered out of the + terminal.
    pub fn branch_current(&self, index: usize) -> f64 {
        self.branch_current_prev(index, 0)
    }

    /// Branch current `steps_back` accepted steps ago.
    pub fn branch_current_prev(&self, index: usize, steps_back: usize) -> f64 {
        let rows = &self.ctx.system;
        if index < rows.size - rows.node_rows {
            self.value_at(rows.node_rows + index, steps_back)
        } else {
            0.0
        }
    }

    /// Branch current of a registered source, looked up by its stable handle.
    pub fn source_current(&self, source: SourceId) -> Option<f64> {
        self.circuit
            .source_index(source)
            .map(|index| self.branch_current(index))
    }

    fn value_at(&self, row: usize, steps_back: usize) -> f64 {
        self.ctx
            .history
            .get(steps_back)
            .and_then(|entry| entry.solution.get(row))
            .copied()
            .unwrap_or(0.0)
    }
}

/// Call `f` for every component with its view of `solution`.
fn visit<F>(
    circuit: &mut Circuit,
    pins: &SecondaryMap<ComponentId, Pins>,
    solution: &[f64],
    step: &StepInfo,
    mut f: F,
) where
    F: FnMut(&mut dyn Component, &StepContext),
{
    circuit.for_each_component_mut(|id, component| {
        if let Some(pins) = pins.get(id) {
            f(component, &StepContext::new(pins, solution, step));
        }
    });
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::components::{Capacitor, CurrentSource, Resistor, VoltageSource};
    use crate::demo;
    use approx::assert_relative_eq;

    fn recorder(sim: &mut Simulator) -> Arc<Mutex<Vec<SimEvent>>> {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        sim.subscribe(move |event| sink.lock().unwrap().push(event.clone()));
        events
    }

    #[test]
    fn test_config_builder_and_validation() {
        let config = SimulatorConfig::new()
            .with_method(IntegrationMethod::Gear2)
            .with_step_bounds(1e-9, 1e-4)
            .with_initial_step(1e-7)
            .with_max_retries(5);
        assert_eq!(config.method, IntegrationMethod::Gear2);
        assert!(config.validate().is_ok());

        let bad = SimulatorConfig::new().with_step_bounds(1e-3, 1e-6);
        assert!(matches!(
            bad.validate(),
            Err(SimError::InvalidSimulationParam { .. })
        ));
        let bad = SimulatorConfig::new().with_lte_bounds(1.0, 0.5);
        assert!(bad.validate().is_err());

        let fixed = SimulatorConfig::new().fixed_step(1e-5);
        assert!(!fixed.adaptive);
        assert_eq!(fixed.min_step, fixed.max_step);
        assert!(fixed.validate().is_ok());
    }

    #[test]
    fn test_start_rejects_invalid_setup() {
        let mut sim = Simulator::new(Circuit::new());
        assert!(matches!(sim.start(), Err(SimError::InvalidTopology { .. })));
        assert_eq!(sim.state(), SimState::Idle);

        let demo = demo::voltage_divider(5.0, 1000.0, 1000.0).unwrap();
        let config = SimulatorConfig::new().with_initial_step(1.0);
        let mut sim = Simulator::with_config(demo.circuit, config);
        assert!(matches!(
            sim.start(),
            Err(SimError::InvalidSimulationParam { .. })
        ));
        assert_eq!(sim.state(), SimState::Idle);
    }

    #[test]
    fn test_advance_requires_start() {
        let demo = demo::voltage_divider(5.0, 1000.0, 1000.0).unwrap();
        let mut sim = Simulator::new(demo.circuit);
        assert_eq!(sim.advance(), Err(SimError::NotRunning));
    }

    #[test]
    fn test_voltage_divider() {
        let demo = demo::voltage_divider(5.0, 1000.0, 1000.0).unwrap();
        let mid = demo.node("mid").unwrap();
        let source = demo
            .source
            .and_then(|id| demo.circuit.source_of(id))
            .unwrap();

        let mut sim = Simulator::new(demo.circuit);
        sim.start().unwrap();
        let report = sim.advance().unwrap();

        assert_eq!(report.iterations, 1);
        assert_eq!(report.rejections, 0);
        assert_relative_eq!(sim.node_voltage(mid), 2.5, epsilon = 1e-9);
        assert_relative_eq!(sim.node_voltage(NodeId(1)), 5.0, epsilon = 1e-9);
        assert_eq!(sim.node_voltage(NodeId::GROUND), 0.0);
        assert_eq!(sim.node_voltage(NodeId(42)), 0.0);
        assert_relative_eq!(sim.branch_current(0), 2.5e-3, epsilon = 1e-12);
        assert_relative_eq!(sim.source_current(source).unwrap(), 2.5e-3, epsilon = 1e-12);
        assert_relative_eq!(sim.time(), 1e-6, epsilon = 1e-18);
    }

    #[test]
    fn test_rc_discharge_backward_euler_fixed_step() {
        let (v0, r, c, h) = (1.0, 1_000.0, 1e-6, 1e-5);
        let demo = demo::rc_discharge(v0, r, c).unwrap();
        let cap = demo.node("cap").unwrap();
        let config = SimulatorConfig::new()
            .with_method(IntegrationMethod::BackwardEuler)
            .fixed_step(h);
        let tol = config.tolerances;

        let mut sim = Simulator::with_config(demo.circuit, config);
        sim.start().unwrap();

        let ratio = 1.0 / (1.0 + h / (r * c));
        for n in 1..=60 {
            let report = sim.advance().unwrap();
            assert_eq!(report.dt, h);
            let expected = v0 * ratio.powi(n);
            let v = sim.node_voltage(cap);
            assert!(
                (v - expected).abs() <= tol.vntol + tol.reltol * expected.abs(),
                "step {n}: {v} vs {expected}"
            );
        }

        let prev = sim.node_voltage_prev(cap, 1);
        assert_relative_eq!(prev, v0 * ratio.powi(59), max_relative = 1e-6);
        assert_eq!(sim.stats().accepted, 60);
        assert_eq!(sim.stats().rejected, 0);
    }

    #[test]
    fn test_rc_discharge_adaptive_tracks_exponential() {
        for method in [IntegrationMethod::Trapezoidal, IntegrationMethod::Gear2] {
            let demo = demo::rc_discharge(1.0, 1_000.0, 1e-6).unwrap();
            let cap = demo.node("cap").unwrap();
            let mut sim =
                Simulator::with_config(demo.circuit, SimulatorConfig::new().with_method(method));
            sim.start().unwrap();
            sim.run_until(5e-3).unwrap();

            assert_relative_eq!(sim.time(), 5e-3, epsilon = 1e-12);
            assert_relative_eq!(sim.node_voltage(cap), (-5.0f64).exp(), epsilon = 1e-3);
            let stats = sim.stats();
            assert!(stats.max_step > stats.min_step, "{method:?} never grew the step");
        }
    }

    #[test]
    fn test_step_rejection_halves_until_accepted() {
        // The capacitor follows the 1 kHz source almost exactly, so its
        // curvature forces steps far below the initial 100 us.
        let build = |retries| {
            let demo = demo::rc_sine(1.0, 1_000.0, 1_000.0, 1e-15).unwrap();
            let config = SimulatorConfig::new()
                .with_method(IntegrationMethod::BackwardEuler)
                .with_step_bounds(1e-12, 1e-3)
                .with_initial_step(1e-4)
                .with_max_retries(retries);
            let mut sim = Simulator::with_config(demo.circuit, config);
            sim.start().unwrap();
            sim
        };

        let mut sim = build(10);
        sim.run_steps(20).unwrap();
        assert!(sim.stats().rejected > 0);
        assert!(sim.stats().min_step < 1e-4);

        let mut sim = build(2);
        let events = recorder(&mut sim);
        let err = (0..20)
            .map(|_| sim.advance())
            .find_map(|r| r.err())
            .unwrap();
        assert!(matches!(err, SimError::NoStableSolution { retries: 2, .. }));
        assert_eq!(sim.state(), SimState::Idle);
        assert!(matches!(
            events.lock().unwrap().last(),
            Some(SimEvent::Stopped { reason: Some(_) })
        ));
    }

    #[test]
    fn test_parallel_sources_are_singular() {
        let mut circuit = Circuit::new();
        let n1 = circuit.add_node();
        circuit
            .add(VoltageSource::dc("V1", 5.0), &[n1, NodeId::GROUND])
            .unwrap();
        circuit
            .add(VoltageSource::dc("V2", 3.0), &[n1, NodeId::GROUND])
            .unwrap();

        let mut sim = Simulator::new(circuit);
        let events = recorder(&mut sim);
        sim.start().unwrap();

        assert!(matches!(
            sim.advance(),
            Err(SimError::SingularMatrix { .. })
        ));
        assert_eq!(sim.state(), SimState::Idle);
        assert_eq!(sim.stats().accepted, 0);
        assert!(matches!(
            events.lock().unwrap().last(),
            Some(SimEvent::Stopped { reason: Some(_) })
        ));
        assert_eq!(sim.advance(), Err(SimError::NotRunning));
    }

    #[test]
    fn test_event_order() {
        let demo = demo::voltage_divider(5.0, 1000.0, 1000.0).unwrap();
        let mut sim = Simulator::new(demo.circuit);
        let events = recorder(&mut sim);

        sim.start().unwrap();
        sim.advance().unwrap();
        sim.stop();
        sim.stop();

        let events = events.lock().unwrap();
        assert_eq!(events.len(), 4);
        assert_eq!(events[0], SimEvent::Started);
        assert_eq!(
            events[1],
            SimEvent::StepBegin {
                time: 0.0,
                dt: 1e-6
            }
        );
        assert!(matches!(events[2], SimEvent::StepEnd { iterations: 1, .. }));
        assert_eq!(events[3], SimEvent::Stopped { reason: None });
    }

    #[test]
    fn test_topology_edit_between_ticks() {
        let demo = demo::voltage_divider(5.0, 1000.0, 1000.0).unwrap();
        let mid = demo.node("mid").unwrap();
        let mut sim = Simulator::new(demo.circuit);
        sim.start().unwrap();
        sim.advance().unwrap();
        assert_relative_eq!(sim.node_voltage(mid), 2.5, epsilon = 1e-9);

        // A second resistor to ground halves the lower leg
        let extra = sim
            .circuit_mut()
            .add(Resistor::new("R3", 1000.0), &[mid, NodeId::GROUND])
            .unwrap();
        sim.advance().unwrap();
        assert_relative_eq!(sim.node_voltage(mid), 5.0 / 3.0, epsilon = 1e-9);

        // A new node and branch grow the system
        let tap = sim.circuit_mut().add_node();
        sim.circuit_mut()
            .add(Resistor::new("R4", 1000.0), &[mid, tap])
            .unwrap();
        sim.circuit_mut()
            .add(Resistor::new("R5", 1000.0), &[tap, NodeId::GROUND])
            .unwrap();
        sim.circuit_mut().detach(extra).unwrap();
        sim.advance().unwrap();

        // Lower leg: 1k || 2k
        let lower = 2000.0 / 3.0;
        let expected = 5.0 * lower / (1000.0 + lower);
        assert_relative_eq!(sim.node_voltage(mid), expected, epsilon = 1e-9);
        assert_relative_eq!(sim.node_voltage(tap), expected / 2.0, epsilon = 1e-9);
        assert_eq!(sim.solution().len(), 4);
    }

    #[test]
    fn test_same_size_swap_between_ticks() {
        let mut circuit = Circuit::new();
        let n1 = circuit.add_node();
        let n2 = circuit.add_node();
        circuit
            .add(VoltageSource::dc("V1", 1.0), &[n1, NodeId::GROUND])
            .unwrap();
        circuit.add(Resistor::new("R1", 1000.0), &[n1, n2]).unwrap();
        let c1 = circuit
            .add(Capacitor::new("C1", 1e-6), &[n2, NodeId::GROUND])
            .unwrap();

        let mut sim = Simulator::new(circuit);
        sim.start().unwrap();
        sim.advance().unwrap();
        let size = sim.solution().len();

        // Same number of unknowns, but nothing stamps storage blocks any more
        sim.circuit_mut().detach(c1).unwrap();
        sim.circuit_mut()
            .add(VoltageSource::dc("V2", 2.0), &[n2, NodeId::GROUND])
            .unwrap();
        sim.advance().unwrap();

        assert_eq!(sim.solution().len(), size);
        assert_relative_eq!(sim.node_voltage(n1), 1.0, epsilon = 1e-9);
        assert_relative_eq!(sim.node_voltage(n2), 2.0, epsilon = 1e-9);
        assert_relative_eq!(sim.branch_current(0), -1e-3, epsilon = 1e-12);
        assert_relative_eq!(sim.branch_current(1), 1e-3, epsilon = 1e-12);
    }

    #[test]
    fn test_history_follows_shifted_node_and_source() {
        let mut circuit = Circuit::new();
        let n1 = circuit.add_node();
        let n2 = circuit.add_node();
        let v1 = circuit
            .add(VoltageSource::dc("V1", 1.0), &[n1, NodeId::GROUND])
            .unwrap();
        let r1 = circuit
            .add(Resistor::new("R1", 1000.0), &[n1, NodeId::GROUND])
            .unwrap();
        circuit
            .add(VoltageSource::dc("V2", 2.0), &[n2, NodeId::GROUND])
            .unwrap();
        circuit
            .add(Resistor::new("R2", 1000.0), &[n2, NodeId::GROUND])
            .unwrap();

        let mut sim = Simulator::new(circuit);
        sim.start().unwrap();
        sim.advance().unwrap();
        assert_relative_eq!(sim.branch_current(1), 2e-3, epsilon = 1e-12);

        // n1 loses its last branch, so n2 becomes node 1 and V2 index 0
        sim.circuit_mut().detach(v1).unwrap();
        sim.circuit_mut().detach(r1).unwrap();
        assert_eq!(sim.circuit().node_count(), 2);
        sim.advance().unwrap();

        let n2 = NodeId(1);
        assert_relative_eq!(sim.node_voltage(n2), 2.0, epsilon = 1e-9);
        assert_relative_eq!(sim.node_voltage_prev(n2, 1), 2.0, epsilon = 1e-9);
        assert_relative_eq!(sim.branch_current(0), 2e-3, epsilon = 1e-12);
        assert_relative_eq!(sim.branch_current_prev(0, 1), 2e-3, epsilon = 1e-12);
        assert_eq!(sim.solution().len(), 2);
    }

    #[test]
    fn test_non_finite_solution_exhausts_retries() {
        let mut circuit = Circuit::new();
        let n1 = circuit.add_node();
        let n2 = circuit.add_node();
        circuit
            .add(VoltageSource::dc("V1", 1.0), &[n1, NodeId::GROUND])
            .unwrap();
        circuit
            .add(Resistor::new("R1", 1000.0), &[n1, NodeId::GROUND])
            .unwrap();
        circuit
            .add(CurrentSource::dc("I1", f64::NAN), &[NodeId::GROUND, n2])
            .unwrap();
        circuit
            .add(Resistor::new("R2", 1000.0), &[n2, NodeId::GROUND])
            .unwrap();

        let config = SimulatorConfig::new().with_max_retries(3);
        let mut sim = Simulator::with_config(circuit, config);
        let events = recorder(&mut sim);
        sim.start().unwrap();

        let err = sim.advance().unwrap_err();
        assert!(matches!(err, SimError::NumericOverflow { .. }));
        assert_eq!(sim.stats().rejected, 4);
        assert_eq!(sim.stats().accepted, 0);
        assert_eq!(sim.state(), SimState::Idle);
        assert!(matches!(
            events.lock().unwrap().last(),
            Some(SimEvent::Stopped { reason: Some(_) })
        ));
    }

    #[test]
    fn test_landing_step_keeps_planned_step_size() {
        let demo = demo::voltage_divider(5.0, 1000.0, 1000.0).unwrap();
        let config = SimulatorConfig::new().with_step_bounds(1e-12, 1e-4);
        let mut sim = Simulator::with_config(demo.circuit, config);
        sim.start().unwrap();
        while sim.step_size() < 1e-4 {
            sim.advance().unwrap();
        }

        let target = sim.time() + 1e-5;
        sim.run_until(target).unwrap();
        assert_relative_eq!(sim.time(), target, epsilon = 1e-15);
        assert_eq!(sim.step_size(), 1e-4);

        let report = sim.advance().unwrap();
        assert_eq!(report.dt, 1e-4);
    }

    #[test]
    fn test_rc_discharge_forward_euler_fixed_step() {
        let (v0, r, c, h) = (1.0, 1_000.0, 1e-6, 1e-5);
        let demo = demo::rc_discharge(v0, r, c).unwrap();
        let cap = demo.node("cap").unwrap();
        let config = SimulatorConfig::new()
            .with_method(IntegrationMethod::ForwardEuler)
            .fixed_step(h);
        let tol = config.tolerances;

        let mut sim = Simulator::with_config(demo.circuit, config);
        sim.start().unwrap();

        // The first step has no derivative history and runs as Backward Euler
        let a = h / (r * c);
        let first = v0 / (1.0 + a);
        for n in 1..=60 {
            let report = sim.advance().unwrap();
            assert_eq!(report.dt, h);
            let expected = first * (1.0 - a).powi(n - 1);
            let v = sim.node_voltage(cap);
            assert!(
                (v - expected).abs() <= tol.vntol + tol.reltol * expected.abs(),
                "step {n}: {v} vs {expected}"
            );
        }
        assert_eq!(sim.stats().rejected, 0);
    }

    #[test]
    fn test_diode_clipper_limits_output() {
        let demo = demo::diode_clipper(5.0, 1_000.0).unwrap();
        let out = demo.node("out").unwrap();
        let config = SimulatorConfig::new().with_step_bounds(1e-12, 2e-5);
        let mut sim = Simulator::with_config(demo.circuit, config);
        sim.start().unwrap();

        let mut peak = 0.0f64;
        while sim.time() < 1e-3 {
            sim.advance().unwrap();
            let v = sim.node_voltage(out);
            assert!(v.abs() < 0.9, "clipper output {v} at t={}", sim.time());
            peak = peak.max(v.abs());
        }
        assert!(peak > 0.5);
        assert!(sim.stats().max_iterations > 1);
    }

    #[test]
    fn test_common_emitter_bias() {
        let demo = demo::common_emitter(0.01, 1_000.0).unwrap();
        let collector = demo.node("collector").unwrap();
        let base = demo.node("base").unwrap();
        let config = SimulatorConfig::new().with_step_bounds(1e-12, 1e-5);
        let mut sim = Simulator::with_config(demo.circuit, config);
        sim.start().unwrap();
        sim.run_until(1e-3).unwrap();

        let vb = sim.node_voltage(base);
        let vc = sim.node_voltage(collector);
        assert!(vb > 1.3 && vb < 1.7, "base at {vb}");
        assert!(vc > 3.0 && vc < 7.0, "collector at {vc}");
    }

    #[test]
    fn test_restart_resets_run() {
        let demo = demo::rc_discharge(1.0, 1_000.0, 1e-6).unwrap();
        let cap = demo.node("cap").unwrap();
        let config = SimulatorConfig::new()
            .with_method(IntegrationMethod::BackwardEuler)
            .fixed_step(1e-5);
        let mut sim = Simulator::with_config(demo.circuit, config);

        sim.start().unwrap();
        sim.run_steps(10).unwrap();
        let first = sim.node_voltage(cap);
        sim.stop();

        sim.start().unwrap();
        assert_eq!(sim.time(), 0.0);
        assert_eq!(sim.stats().accepted, 0);
        sim.run_steps(10).unwrap();
        assert_relative_eq!(sim.node_voltage(cap), first, epsilon = 1e-12);
    }
}
