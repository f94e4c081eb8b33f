//! Ready-made circuits for exercising the engine.
//!
//! Each builder returns the circuit together with the named nodes worth
//! plotting, in the order a CSV writer should print them.

use crate::circuit::{Circuit, ComponentId, NodeId};
use crate::components::{
    Bjt, BjtParams, BjtType, Capacitor, Diode, DiodeParams, Resistor, VoltageSource, Waveform,
};
use crate::error::Result;

/// A built demo circuit.
#[derive(Debug)]
pub struct DemoCircuit {
    pub circuit: Circuit,
    /// Nodes of interest with display names
    pub probes: Vec<(&'static str, NodeId)>,
    /// The driving source, if the circuit has one
    pub source: Option<ComponentId>,
}

impl DemoCircuit {
    /// Look up a probed node by name.
    pub fn node(&self, name: &str) -> Option<NodeId> {
        self.probes
            .iter()
            .find(|(probe, _)| *probe == name)
            .map(|(_, node)| *node)
    }
}

/// `volts` across two resistors in series; probes `top` and `mid`.
pub fn voltage_divider(volts: f64, r1: f64, r2: f64) -> Result<DemoCircuit> {
    let mut circuit = Circuit::new();
    let top = circuit.add_node();
    let mid = circuit.add_node();

    let source = circuit.add(VoltageSource::dc("V1", volts), &[top, NodeId::GROUND])?;
    circuit.add(Resistor::new("R1", r1), &[top, mid])?;
    circuit.add(Resistor::new("R2", r2), &[mid, NodeId::GROUND])?;

    Ok(DemoCircuit {
        circuit,
        probes: vec![("top", top), ("mid", mid)],
        source: Some(source),
    })
}

/// A capacitor charged to `v0` discharging through `r`; probes `cap`.
pub fn rc_discharge(v0: f64, r: f64, c: f64) -> Result<DemoCircuit> {
    let mut circuit = Circuit::new();
    let cap = circuit.add_node();

    circuit.add(
        Capacitor::new("C1", c).with_initial_voltage(v0),
        &[cap, NodeId::GROUND],
    )?;
    circuit.add(Resistor::new("R1", r), &[cap, NodeId::GROUND])?;

    Ok(DemoCircuit {
        circuit,
        probes: vec![("cap", cap)],
        source: None,
    })
}

/// A sine source driving an RC low-pass; probes `in` and `cap`.
pub fn rc_sine(amplitude: f64, frequency: f64, r: f64, c: f64) -> Result<DemoCircuit> {
    let mut circuit = Circuit::new();
    let input = circuit.add_node();
    let cap = circuit.add_node();

    let source = circuit.add(
        VoltageSource::new("Vin", Waveform::sine(amplitude, frequency)),
        &[input, NodeId::GROUND],
    )?;
    circuit.add(Resistor::new("R1", r), &[input, cap])?;
    circuit.add(Capacitor::new("C1", c), &[cap, NodeId::GROUND])?;

    Ok(DemoCircuit {
        circuit,
        probes: vec![("in", input), ("cap", cap)],
        source: Some(source),
    })
}

/// Symmetric hard clipper: a series resistor into anti-parallel silicon diodes.
///
/// Probes `in` and `out`.
pub fn diode_clipper(amplitude: f64, frequency: f64) -> Result<DemoCircuit> {
    let mut circuit = Circuit::new();
    let input = circuit.add_node();
    let out = circuit.add_node();

    let source = circuit.add(
        VoltageSource::new("Vin", Waveform::sine(amplitude, frequency)),
        &[input, NodeId::GROUND],
    )?;
    circuit.add(Resistor::new("R1", 1_000.0), &[input, out])?;
    circuit.add(Diode::new("D1", DiodeParams::default()), &[out, NodeId::GROUND])?;
    circuit.add(Diode::new("D2", DiodeParams::default()), &[NodeId::GROUND, out])?;

    Ok(DemoCircuit {
        circuit,
        probes: vec![("in", input), ("out", out)],
        source: Some(source),
    })
}

/// Voltage-divider biased NPN common-emitter stage on a 9 V supply.
///
/// The coupling capacitor starts at the bias point so the stage is in its
/// active region from t = 0. Probes `in`, `base` and `collector`.
pub fn common_emitter(amplitude: f64, frequency: f64) -> Result<DemoCircuit> {
    let mut circuit = Circuit::new();
    let vcc = circuit.add_node();
    let input = circuit.add_node();
    let base = circuit.add_node();
    let collector = circuit.add_node();
    let emitter = circuit.add_node();

    circuit.add(VoltageSource::dc("Vcc", 9.0), &[vcc, NodeId::GROUND])?;
    let source = circuit.add(
        VoltageSource::new("Vin", Waveform::sine(amplitude, frequency)),
        &[input, NodeId::GROUND],
    )?;
    circuit.add(
        Capacitor::new("Cin", 10e-6).with_initial_voltage(-1.5),
        &[input, base],
    )?;
    circuit.add(Resistor::new("R1", 47_000.0), &[vcc, base])?;
    circuit.add(Resistor::new("R2", 10_000.0), &[base, NodeId::GROUND])?;
    circuit.add(Resistor::new("Rc", 4_700.0), &[vcc, collector])?;
    circuit.add(Resistor::new("Re", 1_000.0), &[emitter, NodeId::GROUND])?;
    circuit.add(
        Bjt::new("Q1", BjtType::Npn, BjtParams::default()),
        &[collector, base, emitter],
    )?;

    Ok(DemoCircuit {
        circuit,
        probes: vec![("in", input), ("base", base), ("collector", collector)],
        source: Some(source),
    })
}
