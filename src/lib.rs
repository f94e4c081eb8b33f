//! # Transim Core
//!
//! A transient circuit simulator built on Modified Nodal Analysis.
//!
//! This library provides:
//! - An editable circuit graph (nodes, branches, components, voltage source registry)
//! - A component stamp contract with a small built-in component library
//! - MNA assembly, LU factorization and Newton-Raphson iteration
//! - An adaptive timestep controller with local truncation error control
//!
//! ## Architecture
//!
//! The library is organized into several modules:
//!
//! - [`circuit`] - Circuit graph representation, topology editing and validation
//! - [`components`] - Component models (resistors, capacitors, diodes, BJTs, etc.)
//! - [`solver`] - MNA assembly, numerical solving and the timestep controller
//! - [`demo`] - Ready-made circuits
//! - [`output`] - CSV output of a run
//!
//! ## Usage
//!
//! ```no_run
//! use transim_core::circuit::NodeId;
//! use transim_core::components::{Resistor, VoltageSource};
//! use transim_core::{Circuit, Simulator};
//!
//! # fn main() -> transim_core::Result<()> {
//! let mut circuit = Circuit::new();
//! let top = circuit.add_node();
//! let mid = circuit.add_node();
//! circuit.add(VoltageSource::dc("V1", 5.0), &[top, NodeId::GROUND])?;
//! circuit.add(Resistor::new("R1", 1_000.0), &[top, mid])?;
//! circuit.add(Resistor::new("R2", 1_000.0), &[mid, NodeId::GROUND])?;
//!
//! let mut sim = Simulator::new(circuit);
//! sim.start()?;
//! sim.run_until(1e-3)?;
//! println!("{} V", sim.node_voltage(mid));
//! # Ok(())
//! # }
//! ```
//!
//! ## Circuit Simulation Method
//!
//! For each time step of size h:
//!
//! 1. Energy-storage elements build companion models for the chosen integration formula
//! 2. Assemble the system matrix A and source vector z
//! 3. Solve Ax = z for node voltages and branch currents
//! 4. For nonlinear elements, iterate using Newton-Raphson until convergence
//! 5. Estimate the local truncation error and accept or reject the step

pub mod circuit;
pub mod components;
pub mod demo;
pub mod error;
pub mod output;
pub mod solver;

// Re-export main types for convenience
pub use circuit::Circuit;
pub use error::{Result, SimError};
pub use solver::{SimHandle, Simulator, SimulatorConfig};

/// Thermal voltage at room temperature (approximately 26mV)
pub const THERMAL_VOLTAGE: f64 = 0.0258;
