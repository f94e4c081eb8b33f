//! CSV output of node voltages over a run.

use std::io::Write;

use crate::circuit::NodeId;
use crate::error::Result;
use crate::solver::Simulator;

/// Advance a started simulator until `stop`, writing one CSV row per accepted step.
///
/// The header is `time` followed by the probe names. Write failures end the
/// run with [`crate::SimError::OutputError`].
pub fn write_csv<W: Write>(
    simulator: &mut Simulator,
    probes: &[(&str, NodeId)],
    stop: f64,
    out: &mut W,
) -> Result<()> {
    let header: Vec<&str> = probes.iter().map(|(name, _)| *name).collect();
    writeln!(out, "time,{}", header.join(","))?;

    while !simulator.reached(stop) {
        simulator.advance_toward(stop)?;
        write!(out, "{:.9e}", simulator.time())?;
        for (_, node) in probes {
            write!(out, ",{:.9e}", simulator.node_voltage(*node))?;
        }
        writeln!(out)?;
    }
    out.flush()?;
    Ok(())
}
