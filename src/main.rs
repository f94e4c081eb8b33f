//! Transim - transient circuit simulator
//!
//! Runs one of the built-in demo circuits and prints a CSV of time and
//! node voltages to stdout.
//!
//! # Usage
//!
//! ```bash
//! RUST_LOG=debug transim rc-sine --method gear2 --stop 5e-3 > rc.csv
//! ```

use std::io::{self, BufWriter};
use std::process::ExitCode;

use clap::{Parser, ValueEnum};
use log::error;
use transim_core::{
    demo::{self, DemoCircuit},
    error::Result,
    output::write_csv,
    solver::IntegrationMethod,
    Simulator, SimulatorConfig,
};

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Demo {
    /// 5 V across two 1k resistors
    Divider,
    /// 1 uF charged to 5 V discharging through 1k
    RcDischarge,
    /// 1 kHz sine into a 1k/100n low-pass
    RcSine,
    /// 1 kHz, 5 V sine into anti-parallel silicon diodes
    Clipper,
    /// NPN common-emitter stage driven by a 10 mV sine
    CommonEmitter,
}

impl Demo {
    fn build(self) -> Result<DemoCircuit> {
        match self {
            Demo::Divider => demo::voltage_divider(5.0, 1_000.0, 1_000.0),
            Demo::RcDischarge => demo::rc_discharge(5.0, 1_000.0, 1e-6),
            Demo::RcSine => demo::rc_sine(1.0, 1_000.0, 1_000.0, 100e-9),
            Demo::Clipper => demo::diode_clipper(5.0, 1_000.0),
            Demo::CommonEmitter => demo::common_emitter(0.01, 1_000.0),
        }
    }
}

/// Transient circuit simulator
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Demo circuit to simulate
    #[arg(value_enum)]
    demo: Demo,

    /// Integration method
    #[arg(short, long, value_enum, default_value_t = IntegrationMethod::Trapezoidal)]
    method: IntegrationMethod,

    /// Simulated stop time in seconds
    #[arg(short, long, default_value_t = 5e-3)]
    stop: f64,

    /// Initial step size in seconds
    #[arg(long, default_value_t = 1e-6)]
    initial_step: f64,

    /// Smallest step size in seconds
    #[arg(long, default_value_t = 1e-15)]
    min_step: f64,

    /// Largest step size in seconds
    #[arg(long, default_value_t = 1e-5)]
    max_step: f64,

    /// Run at a constant step of this size, without error control
    #[arg(long, conflicts_with_all = ["initial_step", "min_step", "max_step"])]
    fixed_step: Option<f64>,

    /// Maximum Newton-Raphson iterations per step
    #[arg(long, default_value_t = 100)]
    max_iterations: usize,
}

impl Args {
    fn config(&self) -> SimulatorConfig {
        let config = SimulatorConfig::new()
            .with_method(self.method)
            .with_max_iterations(self.max_iterations);
        match self.fixed_step {
            Some(dt) => config.fixed_step(dt),
            None => config
                .with_step_bounds(self.min_step, self.max_step)
                .with_initial_step(self.initial_step),
        }
    }
}

fn run(args: &Args) -> Result<()> {
    let DemoCircuit {
        circuit, probes, ..
    } = args.demo.build()?;

    let mut simulator = Simulator::with_config(circuit, args.config());
    simulator.start()?;

    let mut out = BufWriter::new(io::stdout().lock());
    write_csv(&mut simulator, &probes, args.stop, &mut out)?;
    simulator.stop();

    let stats = simulator.stats();
    log::info!(
        "{} steps accepted, {} rejected, {} Newton iterations",
        stats.accepted,
        stats.rejected,
        stats.total_iterations
    );
    Ok(())
}

fn main() -> ExitCode {
    env_logger::init();
    let args = Args::parse();

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}
