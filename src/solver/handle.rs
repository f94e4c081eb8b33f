//! Shared access to a simulator from several threads.

use std::sync::{Arc, Mutex, MutexGuard};

use super::simulator::{Simulator, StepReport};
use crate::circuit::Circuit;
use crate::error::Result;

/// A cloneable handle serializing every access to one [`Simulator`].
///
/// A tick and a topology edit never interleave: both hold the same lock for
/// their whole duration. A `stop` issued from another thread therefore takes
/// effect between ticks.
#[derive(Clone)]
pub struct SimHandle {
    inner: Arc<Mutex<Simulator>>,
}

impl SimHandle {
    pub fn new(simulator: Simulator) -> Self {
        Self {
            inner: Arc::new(Mutex::new(simulator)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Simulator> {
        // A listener that panicked mid-tick leaves the simulator in a
        // consistent state between ticks, so the poison flag is ignored.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Edit the circuit; the change is picked up by the next tick.
    pub fn edit<R>(&self, f: impl FnOnce(&mut Circuit) -> R) -> R {
        f(self.lock().circuit_mut())
    }

    /// Read the simulator state.
    pub fn with<R>(&self, f: impl FnOnce(&Simulator) -> R) -> R {
        f(&self.lock())
    }

    /// Run `f` with exclusive access to the simulator.
    pub fn with_mut<R>(&self, f: impl FnOnce(&mut Simulator) -> R) -> R {
        f(&mut self.lock())
    }

    pub fn start(&self) -> Result<()> {
        self.lock().start()
    }

    /// Advance one tick.
    pub fn advance(&self) -> Result<StepReport> {
        self.lock().advance()
    }

    pub fn stop(&self) {
        self.lock().stop()
    }
}
