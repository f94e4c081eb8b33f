//! Circuit topology model.
//!
//! This module provides the node/branch/port graph that the simulator
//! assembles from. The [`Circuit`] struct holds nodes, the branches joining
//! them to component ports, the attached components, and the registry of
//! components that own a branch-current unknown.

mod graph;
mod registry;
mod topology;
mod types;
mod validate;

pub use graph::Circuit;
pub use registry::VoltageSourceRegistry;
pub use types::*;
pub use validate::validate_circuit;
