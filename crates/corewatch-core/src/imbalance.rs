//! Rolling per-core imbalance.
//!
//! For each per-core usage vector in a fixed window, take the busiest and
//! the idlest core. The imbalance is the mean of the maxima minus the mean of
//! the minima. A single-threaded workload pinning one core while the rest
//! idle drives this toward 100.

use std::collections::VecDeque;

use crate::rate::CORE_COUNT;

/// Default number of ticks in the window.
pub const DEFAULT_WINDOW: usize = 10;

/// Sliding window of per-core usage vectors.
#[derive(Debug, Clone)]
pub struct ImbalanceTracker {
    window: VecDeque<[f64; CORE_COUNT]>,
    capacity: usize,
    imbalance: f64,
}

impl Default for ImbalanceTracker {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW)
    }
}

impl ImbalanceTracker {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            window: VecDeque::with_capacity(capacity),
            capacity,
            imbalance: 0.0,
        }
    }

    /// Push one tick's core usages and return the current imbalance.
    ///
    /// Below capacity the previously held value is returned unchanged.
    /// Once full, every push recomputes over the whole window.
    pub fn push(&mut self, cores: [f64; CORE_COUNT]) -> f64 {
        if self.window.len() == self.capacity {
            self.window.pop_front();
        }
        self.window.push_back(cores);

        if self.window.len() == self.capacity {
            self.imbalance = spread(&self.window);
        }
        self.imbalance
    }

    /// Clear the window and the held value.
    pub fn reset(&mut self) {
        self.window.clear();
        self.imbalance = 0.0;
    }

    pub fn imbalance(&self) -> f64 {
        self.imbalance
    }

    pub fn is_full(&self) -> bool {
        self.window.len() == self.capacity
    }

    pub fn len(&self) -> usize {
        self.window.len()
    }

    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

fn spread(window: &VecDeque<[f64; CORE_COUNT]>) -> f64 {
    let n = window.len() as f64;
    let (sum_max, sum_min) = window.iter().fold((0.0, 0.0), |(hi, lo), cores| {
        let max = cores.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let min = cores.iter().copied().fold(f64::INFINITY, f64::min);
        (hi + max, lo + min)
    });
    sum_max / n - sum_min / n
}
