//! Integration formulas, companion coefficients and local truncation error.
//!
//! Energy-storage elements track a state `x` (capacitor voltage, inductor
//! current) and its time derivative `y`. Every implicit formula is written as
//!
//! ```text
//! y[n+1] = a0 * x[n+1] + b
//! ```
//!
//! so a component only needs `a0` and `b` to build its Thevenin companion.
//! Forward Euler predicts `x[n+1] = x[n] + h * y[n]` directly.

use super::Tolerances;

/// Number of accepted points kept for multi-step formulas and LTE estimates.
pub const HISTORY_DEPTH: usize = 4;

/// Integration formula used for energy-storage companions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "cli", derive(clap::ValueEnum))]
pub enum IntegrationMethod {
    BackwardEuler,
    ForwardEuler,
    #[default]
    Trapezoidal,
    Gear2,
}

impl IntegrationMethod {
    /// Order of accuracy p.
    pub fn order(&self) -> usize {
        match self {
            Self::BackwardEuler | Self::ForwardEuler => 1,
            Self::Trapezoidal | Self::Gear2 => 2,
        }
    }

    /// Leading coefficient C of the truncation error `C * h^(p+1) * x^(p+1)`.
    pub fn error_constant(&self) -> f64 {
        match self {
            Self::BackwardEuler | Self::ForwardEuler => 0.5,
            Self::Trapezoidal => 1.0 / 12.0,
            Self::Gear2 => 2.0 / 9.0,
        }
    }

    /// Accepted points (including the initial one) needed before the formula can run.
    pub fn history_required(&self) -> usize {
        match self {
            Self::BackwardEuler => 1,
            Self::ForwardEuler | Self::Trapezoidal | Self::Gear2 => 2,
        }
    }

    /// Whether the formula is explicit in the new state.
    pub fn is_explicit(&self) -> bool {
        matches!(self, Self::ForwardEuler)
    }

    /// The formula to use when only `available` accepted points exist.
    ///
    /// Falls back to Backward Euler until enough history has been built up.
    pub fn effective(&self, available: usize) -> Self {
        if available >= self.history_required() {
            *self
        } else {
            Self::BackwardEuler
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::BackwardEuler => "backward-euler",
            Self::ForwardEuler => "forward-euler",
            Self::Trapezoidal => "trapezoidal",
            Self::Gear2 => "gear2",
        }
    }
}

/// Companion coefficients for one state variable.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Companion {
    /// `y[n+1] = a0 * x[n+1] + b`
    Implicit { a0: f64, b: f64 },
    /// `x[n+1] = value`
    Explicit { value: f64 },
}

/// Accepted values of a state and its derivative, most recent first.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StateHistory {
    x: [f64; HISTORY_DEPTH],
    y: [f64; HISTORY_DEPTH],
    len: usize,
}

impl StateHistory {
    /// History holding only the initial point.
    pub fn with_initial(x: f64, y: f64) -> Self {
        let mut history = Self::default();
        history.push(x, y);
        history
    }

    /// Record an accepted point, dropping the oldest one when full.
    pub fn push(&mut self, x: f64, y: f64) {
        self.x.copy_within(0..HISTORY_DEPTH - 1, 1);
        self.y.copy_within(0..HISTORY_DEPTH - 1, 1);
        self.x[0] = x;
        self.y[0] = y;
        self.len = (self.len + 1).min(HISTORY_DEPTH);
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// State `back` accepted points ago (0 = latest).
    pub fn x(&self, back: usize) -> f64 {
        if back < self.len {
            self.x[back]
        } else {
            0.0
        }
    }

    /// Derivative `back` accepted points ago (0 = latest).
    pub fn y(&self, back: usize) -> f64 {
        if back < self.len {
            self.y[back]
        } else {
            0.0
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Parameters of the step being solved.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepInfo {
    /// Time at the end of the step
    pub time: f64,
    /// Step size h
    pub dt: f64,
    /// Previously accepted step sizes, most recent first; 0 where unknown
    pub past_steps: [f64; HISTORY_DEPTH],
    /// Formula in effect for this step (already reduced for missing history)
    pub method: IntegrationMethod,
    pub tolerances: Tolerances,
}

impl StepInfo {
    /// Step info for the initial point at `t = 0`.
    pub fn initial(method: IntegrationMethod, dt: f64, tolerances: Tolerances) -> Self {
        Self {
            time: 0.0,
            dt,
            past_steps: [0.0; HISTORY_DEPTH],
            method: method.effective(1),
            tolerances,
        }
    }

    /// Companion coefficients for a state with the given history.
    pub fn companion(&self, history: &StateHistory) -> Companion {
        let h = self.dt;
        let mut method = self.method.effective(history.len());
        if method == IntegrationMethod::Gear2 && self.past_steps[0] <= 0.0 {
            method = IntegrationMethod::BackwardEuler;
        }

        let x0 = history.x(0);
        match method {
            IntegrationMethod::BackwardEuler => Companion::Implicit {
                a0: 1.0 / h,
                b: -x0 / h,
            },
            IntegrationMethod::Trapezoidal => Companion::Implicit {
                a0: 2.0 / h,
                b: -2.0 * x0 / h - history.y(0),
            },
            IntegrationMethod::Gear2 => {
                let rho = h / self.past_steps[0];
                let x1 = history.x(1);
                Companion::Implicit {
                    a0: (1.0 + 2.0 * rho) / ((1.0 + rho) * h),
                    b: (-(1.0 + rho) * x0 + rho * rho / (1.0 + rho) * x1) / h,
                }
            }
            IntegrationMethod::ForwardEuler => Companion::Explicit {
                value: x0 + h * history.y(0),
            },
        }
    }

    /// Normalized truncation error of `candidate` against the state history.
    ///
    /// `abstol` is the absolute tolerance of the state's unit (vntol for
    /// voltages, abstol for currents).
    pub fn truncation_error(&self, history: &StateHistory, candidate: f64, abstol: f64) -> f64 {
        let lte = truncation_error(self.method, history, candidate, self.dt, &self.past_steps);
        let scale = abstol + self.tolerances.reltol * candidate.abs().max(history.x(0).abs());
        lte / scale
    }
}

/// Estimated local truncation error of `candidate`, in the state's unit.
///
/// Uses the divided difference of order p+1 over the candidate point and the
/// last p+1 accepted points. Returns 0 when the history is too short or the
/// step spacing is unknown.
pub fn truncation_error(
    method: IntegrationMethod,
    history: &StateHistory,
    candidate: f64,
    dt: f64,
    past_steps: &[f64; HISTORY_DEPTH],
) -> f64 {
    let p = method.order();
    let points = p + 2;
    if history.len() < p + 1 || dt <= 0.0 {
        return 0.0;
    }

    // Times relative to the candidate, decreasing
    let mut times = [0.0; HISTORY_DEPTH + 1];
    times[1] = -dt;
    for k in 2..points {
        let spacing = past_steps[k - 2];
        if spacing <= 0.0 {
            return 0.0;
        }
        times[k] = times[k - 1] - spacing;
    }

    let mut values = [0.0; HISTORY_DEPTH + 1];
    values[0] = candidate;
    for (k, value) in values.iter_mut().enumerate().take(points).skip(1) {
        *value = history.x(k - 1);
    }

    for level in 1..points {
        for i in 0..points - level {
            values[i] = (values[i] - values[i + 1]) / (times[i] - times[i + level]);
        }
    }

    let factorial: f64 = (1..=p + 1).map(|k| k as f64).product();
    method.error_constant() * dt.powi(p as i32 + 1) * factorial * values[0].abs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn step(method: IntegrationMethod, dt: f64, past: f64) -> StepInfo {
        StepInfo {
            time: 0.0,
            dt,
            past_steps: [past; HISTORY_DEPTH],
            method,
            tolerances: Tolerances::default(),
        }
    }

    #[test]
    fn test_method_properties() {
        use IntegrationMethod::*;
        assert_eq!(BackwardEuler.order(), 1);
        assert_eq!(Gear2.order(), 2);
        assert_relative_eq!(Trapezoidal.error_constant(), 1.0 / 12.0);
        assert_eq!(Gear2.effective(1), BackwardEuler);
        assert_eq!(Gear2.effective(2), Gear2);
        assert_eq!(ForwardEuler.effective(1), BackwardEuler);
        assert!(ForwardEuler.is_explicit());
    }

    #[test]
    fn test_state_history_shifts() {
        let mut h = StateHistory::with_initial(1.0, 10.0);
        for k in 2..=6 {
            h.push(k as f64, 10.0 * k as f64);
        }
        assert_eq!(h.len(), HISTORY_DEPTH);
        assert_eq!(h.x(0), 6.0);
        assert_eq!(h.x(3), 3.0);
        assert_eq!(h.y(1), 50.0);
        assert_eq!(h.x(4), 0.0);
    }

    #[test]
    fn test_companion_coefficients() {
        let mut hist = StateHistory::with_initial(1.0, 2.0);
        hist.push(3.0, 4.0);

        match step(IntegrationMethod::BackwardEuler, 0.5, 0.5).companion(&hist) {
            Companion::Implicit { a0, b } => {
                assert_relative_eq!(a0, 2.0);
                assert_relative_eq!(b, -6.0);
            }
            other => panic!("unexpected companion {other:?}"),
        }

        match step(IntegrationMethod::Trapezoidal, 0.5, 0.5).companion(&hist) {
            Companion::Implicit { a0, b } => {
                assert_relative_eq!(a0, 4.0);
                assert_relative_eq!(b, -12.0 - 4.0);
            }
            other => panic!("unexpected companion {other:?}"),
        }

        // Equal steps: y = (3/2 x[n+1] - 2 x[n] + 1/2 x[n-1]) / h
        match step(IntegrationMethod::Gear2, 0.5, 0.5).companion(&hist) {
            Companion::Implicit { a0, b } => {
                assert_relative_eq!(a0, 3.0);
                assert_relative_eq!(b, (-2.0 * 3.0 + 0.5 * 1.0) / 0.5);
            }
            other => panic!("unexpected companion {other:?}"),
        }

        assert_eq!(
            step(IntegrationMethod::ForwardEuler, 0.5, 0.5).companion(&hist),
            Companion::Explicit { value: 3.0 + 0.5 * 4.0 }
        );
    }

    #[test]
    fn test_companion_falls_back_without_history() {
        let hist = StateHistory::with_initial(1.0, 5.0);
        let be = step(IntegrationMethod::BackwardEuler, 0.1, 0.0).companion(&hist);
        for method in [IntegrationMethod::Trapezoidal, IntegrationMethod::Gear2] {
            assert_eq!(step(method, 0.1, 0.0).companion(&hist), be);
        }
    }

    #[test]
    fn test_lte_vanishes_for_polynomials_of_low_degree() {
        // x(t) = 2t + 1 sampled at t = 0, 0.1, 0.2 and candidate at 0.3
        let mut hist = StateHistory::with_initial(1.0, 2.0);
        hist.push(1.2, 2.0);
        hist.push(1.4, 2.0);
        let past = [0.1; HISTORY_DEPTH];
        let lte = truncation_error(IntegrationMethod::BackwardEuler, &hist, 1.6, 0.1, &past);
        assert!(lte.abs() < 1e-12);
    }

    #[test]
    fn test_lte_matches_second_derivative() {
        // x(t) = t^2: second divided difference is 1, so BE gives
        // 1/2 * h^2 * 2! * 1 = h^2
        let h = 0.1;
        let mut hist = StateHistory::with_initial(0.0, 0.0);
        hist.push(h * h, 2.0 * h);
        let past = [h; HISTORY_DEPTH];
        let lte = truncation_error(
            IntegrationMethod::BackwardEuler,
            &hist,
            4.0 * h * h,
            h,
            &past,
        );
        assert_relative_eq!(lte, h * h, epsilon = 1e-12);
    }

    #[test]
    fn test_lte_needs_history() {
        let hist = StateHistory::with_initial(0.0, 0.0);
        let past = [0.0; HISTORY_DEPTH];
        assert_eq!(
            truncation_error(IntegrationMethod::Trapezoidal, &hist, 5.0, 1e-3, &past),
            0.0
        );

        let s = step(IntegrationMethod::Trapezoidal, 1e-3, 0.0);
        assert_eq!(s.truncation_error(&hist, 5.0, 1e-6), 0.0);
    }
}
