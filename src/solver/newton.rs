//! Newton-Raphson iteration for nonlinear components.

use log::{trace, warn};

use super::context::SimContext;
use super::integration::StepInfo;
use super::lu::LuFactors;
use super::mna::assemble;
use super::{Tolerances, DEFAULT_MAX_ITERATIONS};
use crate::circuit::Circuit;
use crate::error::{Result, SimError};

/// A converged solution for one step attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct NewtonOutcome {
    pub solution: Vec<f64>,
    pub iterations: usize,
}

/// Newton-Raphson solver for nonlinear circuits.
#[derive(Debug, Clone)]
pub struct NewtonRaphson {
    /// Maximum iterations
    pub max_iterations: usize,
    /// Convergence tolerances
    pub tolerances: Tolerances,
    lu: LuFactors,
}

impl Default for NewtonRaphson {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ITERATIONS, Tolerances::default())
    }
}

impl NewtonRaphson {
    /// Create a new Newton-Raphson solver.
    pub fn new(max_iterations: usize, tolerances: Tolerances) -> Self {
        Self {
            max_iterations,
            tolerances,
            lu: LuFactors::default(),
        }
    }

    /// Solve the step described by `step`, starting from `guess`.
    ///
    /// A purely linear circuit is solved once and reported as one iteration.
    /// Nothing outside `ctx.system` is written, so a failed attempt leaves
    /// the accepted history untouched.
    pub fn solve(
        &mut self,
        circuit: &mut Circuit,
        ctx: &mut SimContext,
        guess: &[f64],
        step: &StepInfo,
    ) -> Result<NewtonOutcome> {
        let nonlinear = circuit.has_nonlinear();
        let size = ctx.system.size;
        let node_rows = ctx.system.node_rows;

        let mut x_prev = guess.to_vec();
        x_prev.resize(size, 0.0);
        let mut x = vec![0.0; size];
        let mut residual = f64::INFINITY;

        for iter in 1..=self.max_iterations {
            // Clear and rebuild matrix around the previous iterate
            let damped = assemble(circuit, ctx, &x_prev, step);

            self.lu.factor(&ctx.system.a, size)?;
            self.lu.solve_into(&ctx.system.z, &mut x);
            check_finite(&x)?;

            if !nonlinear {
                return Ok(NewtonOutcome {
                    solution: x,
                    iterations: 1,
                });
            }

            // Check convergence
            let mut converged = !damped;
            residual = 0.0;
            for (i, (new, old)) in x.iter().zip(&x_prev).enumerate() {
                let diff = (new - old).abs();
                residual = residual.max(diff);
                if diff > self.tolerances.allowed(*old, i < node_rows) {
                    converged = false;
                }
            }
            trace!(
                "t={:.6e} iteration {}: max change {:.3e}{}",
                step.time,
                iter,
                residual,
                if damped { " (damped)" } else { "" }
            );

            if converged {
                return Ok(NewtonOutcome {
                    solution: x,
                    iterations: iter,
                });
            }

            // Save current solution for next iteration
            std::mem::swap(&mut x, &mut x_prev);
        }

        warn!(
            "Newton-Raphson did not converge at t={:.6e} after {} iterations",
            step.time, self.max_iterations
        );
        Err(SimError::non_convergence(self.max_iterations, residual))
    }
}

/// Report the first NaN or infinite unknown.
fn check_finite(x: &[f64]) -> Result<()> {
    match x.iter().position(|v| !v.is_finite()) {
        Some(index) => Err(SimError::NumericOverflow {
            index,
            value: x[index],
        }),
        None => Ok(()),
    }
}
