//! Error types for the transient simulator.
//!
//! This module provides a unified error type [`SimError`] that covers
//! topology editing mistakes, invalid configuration, and the failures that
//! halt a running simulation.

use thiserror::Error;

use crate::circuit::NodeId;

/// Result type alias using [`SimError`].
pub type Result<T> = std::result::Result<T, SimError>;

/// Unified error type for all simulator operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SimError {
    // ============ Topology Editing Errors ============
    /// Node index is outside `[0, node_count)`
    #[error("Node {node} not found in circuit")]
    NodeNotFound { node: NodeId },

    /// Node still has branches and no rehoming target was given
    #[error("Node {node} still has {branches} branch(es) attached")]
    NodeHasBranches { node: NodeId, branches: usize },

    /// The reference node cannot be deleted or merged away
    #[error("The ground node cannot be removed")]
    GroundNode,

    /// Merge of a node with itself
    #[error("Cannot merge node {node} with itself")]
    SameNode { node: NodeId },

    /// Stale or unknown branch handle
    #[error("Branch not found in circuit")]
    BranchNotFound,

    /// Stale or unknown component handle
    #[error("Component not found in circuit")]
    ComponentNotFound,

    /// Port number outside `1..=port_count`
    #[error("Port {port} out of range for component '{component}' ({ports} ports)")]
    PortOutOfRange {
        component: String,
        port: usize,
        ports: usize,
    },

    /// Port already has a branch to some node
    #[error("Port {port} of component '{component}' is already connected")]
    PortAlreadyConnected { component: String, port: usize },

    /// Component is not in the voltage source registry
    #[error("Component '{component}' is not a registered voltage source")]
    SourceNotRegistered { component: String },

    // ============ Simulation Errors ============
    /// Invalid circuit topology at simulation start
    #[error("Invalid circuit topology: {message}")]
    InvalidTopology { message: String },

    /// Zero or degenerate pivot during LU factorization
    #[error("Singular matrix at row {row} - circuit may have a floating node or shorted sources")]
    SingularMatrix { row: usize },

    /// Newton-Raphson iteration did not converge
    #[error("Newton-Raphson did not converge after {iterations} iterations (residual: {residual:.2e})")]
    NonConvergence { iterations: usize, residual: f64 },

    /// Step rejection retry cap exceeded
    #[error("No stable solution after {retries} step rejections at t={time:.3e} (dt={dt:.3e})")]
    NoStableSolution { retries: usize, time: f64, dt: f64 },

    /// NaN or Inf in the solution vector
    #[error("Numerical overflow detected in unknown {index} (value: {value:.2e})")]
    NumericOverflow { index: usize, value: f64 },

    // ============ Controller Errors ============
    /// Advance requested while the simulator is idle
    #[error("Simulator is not running")]
    NotRunning,

    /// Invalid simulation parameter
    #[error("Invalid simulation parameter: {message}")]
    InvalidSimulationParam { message: String },

    // ============ I/O Errors ============
    /// Error writing simulation results
    #[error("Output error: {message}")]
    OutputError { message: String },
}

impl SimError {
    /// Create an invalid topology error
    pub fn topology(message: impl Into<String>) -> Self {
        Self::InvalidTopology {
            message: message.into(),
        }
    }

    /// Create an invalid parameter error
    pub fn param(message: impl Into<String>) -> Self {
        Self::InvalidSimulationParam {
            message: message.into(),
        }
    }

    /// Create a Newton-Raphson convergence failure error
    pub fn non_convergence(iterations: usize, residual: f64) -> Self {
        Self::NonConvergence {
            iterations,
            residual,
        }
    }

    /// Create an output error from a failed write
    pub fn output(err: std::io::Error) -> Self {
        Self::OutputError {
            message: err.to_string(),
        }
    }

    /// Whether this error halts a running simulation.
    ///
    /// Editing and configuration errors leave the simulator untouched.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::InvalidTopology { .. }
                | Self::SingularMatrix { .. }
                | Self::NonConvergence { .. }
                | Self::NoStableSolution { .. }
                | Self::NumericOverflow { .. }
        )
    }
}

impl From<std::io::Error> for SimError {
    fn from(err: std::io::Error) -> Self {
        Self::output(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_io_error_maps_to_output_error() {
        let err: SimError = io::Error::new(io::ErrorKind::BrokenPipe, "pipe closed").into();
        assert!(matches!(err, SimError::OutputError { ref message } if message.contains("pipe closed")));
        assert!(!err.is_fatal());
    }
}
