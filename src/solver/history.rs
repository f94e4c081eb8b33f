//! Ring of accepted solution vectors.

use std::collections::VecDeque;

use super::integration::HISTORY_DEPTH;

/// One accepted solution.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryEntry {
    /// Unknowns x = [v; j]
    pub solution: Vec<f64>,
    /// Step that led to this point (0 for the initial point)
    pub dt: f64,
    /// Simulated time of this point
    pub time: f64,
}

/// The last [`HISTORY_DEPTH`] accepted solutions, most recent first.
#[derive(Debug, Clone, Default)]
pub struct SolutionHistory {
    entries: VecDeque<HistoryEntry>,
}

impl SolutionHistory {
    pub fn new() -> Self {
        Self {
            entries: VecDeque::with_capacity(HISTORY_DEPTH),
        }
    }

    /// Drop everything and start over from a single point.
    pub fn reset(&mut self, solution: Vec<f64>, time: f64) {
        self.entries.clear();
        self.entries.push_front(HistoryEntry {
            solution,
            dt: 0.0,
            time,
        });
    }

    /// Record an accepted solution, dropping the oldest entry when full.
    pub fn push(&mut self, solution: Vec<f64>, dt: f64, time: f64) {
        if self.entries.len() == HISTORY_DEPTH {
            self.entries.pop_back();
        }
        self.entries.push_front(HistoryEntry { solution, dt, time });
    }

    /// Entry `back` accepted steps ago (0 = latest).
    pub fn get(&self, back: usize) -> Option<&HistoryEntry> {
        self.entries.get(back)
    }

    pub fn latest(&self) -> Option<&HistoryEntry> {
        self.entries.front()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Accepted step sizes, most recent first, 0 where unknown.
    pub fn past_steps(&self) -> [f64; HISTORY_DEPTH] {
        let mut steps = [0.0; HISTORY_DEPTH];
        for (slot, entry) in steps.iter_mut().zip(&self.entries) {
            *slot = entry.dt;
        }
        steps
    }

    /// Keep only the latest solution, moved into a new unknown layout.
    ///
    /// `rows[k]` is the new row of old unknown `k`, or `None` if it no longer
    /// exists. Unknowns nothing maps to start at 0. Older points are dropped
    /// since they no longer line up with the new layout.
    pub fn remap(&mut self, size: usize, rows: &[Option<usize>]) {
        let (old, time) = match self.entries.front() {
            Some(entry) => (entry.solution.clone(), entry.time),
            None => (Vec::new(), 0.0),
        };

        let mut solution = vec![0.0; size];
        for (value, row) in old.iter().zip(rows) {
            if let Some(slot) = row.and_then(|r| solution.get_mut(r)) {
                *slot = *value;
            }
        }
        self.reset(solution, time);
    }
}
