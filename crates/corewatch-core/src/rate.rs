//! Jiffy counter to utilization conversion.
//!
//! `/proc/stat` exposes cumulative tick counts per CPU line. Utilization is
//! only defined over the delta between two samples, so each tracked line
//! keeps the previous `(total, idle)` pair.

use crate::error::ParseError;

/// Number of per-core counter lines tracked alongside the aggregate line.
pub const CORE_COUNT: usize = 4;

/// One `(total, idle)` reading of a CPU counter line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CounterSample {
    pub total: u64,
    pub idle: u64,
}

impl CounterSample {
    /// Parse a line shaped like `cpu0 <user> <nice> <system> <idle> <iowait> ...`.
    ///
    /// `total` is the sum of every numeric field. `idle` is `idle + iowait`
    /// when the line carries five or more fields, `idle` alone with exactly four.
    pub fn parse(line: &str, field: &'static str) -> Result<Self, ParseError> {
        let line = line.trim();
        if line.is_empty() {
            return Err(ParseError::Missing { field });
        }

        let values = line
            .split_whitespace()
            .skip(1)
            .map(|token| {
                token.parse::<u64>().map_err(|_| ParseError::InvalidNumber {
                    field,
                    token: token.to_string(),
                })
            })
            .collect::<Result<Vec<u64>, _>>()?;

        if values.len() < 4 {
            return Err(ParseError::TooFewFields {
                field,
                expected: 4,
                got: values.len(),
            });
        }

        let total = values.iter().fold(0u64, |acc, v| acc.saturating_add(*v));
        let idle = if values.len() >= 5 {
            values[3].saturating_add(values[4])
        } else {
            values[3]
        };

        Ok(Self { total, idle })
    }
}

/// Advance one counter: returns the utilization percentage and the new state.
///
/// The first sample (no previous state) always yields 0.0. A non-positive
/// total delta (counter reset, wrap, or a duplicated sample) also yields 0.0.
pub fn advance(previous: Option<CounterSample>, current: CounterSample) -> (f64, CounterSample) {
    let Some(prev) = previous else {
        return (0.0, current);
    };

    let total_diff = i128::from(current.total) - i128::from(prev.total);
    if total_diff <= 0 {
        return (0.0, current);
    }
    let idle_diff = i128::from(current.idle) - i128::from(prev.idle);

    let usage = (total_diff - idle_diff) as f64 / total_diff as f64 * 100.0;
    (usage.clamp(0.0, 100.0), current)
}

/// Stateful wrapper around [`advance`] for one tracked counter line.
#[derive(Debug, Clone)]
pub struct RateCounter {
    label: &'static str,
    previous: Option<CounterSample>,
}

impl RateCounter {
    pub fn new(label: &'static str) -> Self {
        Self {
            label,
            previous: None,
        }
    }

    /// Feed an already-parsed sample.
    pub fn update(&mut self, current: CounterSample) -> f64 {
        let (usage, next) = advance(self.previous, current);
        self.previous = Some(next);
        usage
    }

    /// Parse and feed one raw counter line.
    ///
    /// Unparseable input is logged and reported as 0.0; the stored state is
    /// left untouched so the next good line still produces a real delta.
    pub fn update_line(&mut self, line: &str) -> f64 {
        match CounterSample::parse(line, self.label) {
            Ok(sample) => self.update(sample),
            Err(e) => {
                log::error!("counter line rejected: {e}");
                0.0
            }
        }
    }

    /// Forget the previous sample (after a reconnection).
    pub fn reset(&mut self) {
        self.previous = None;
    }

    pub fn previous(&self) -> Option<CounterSample> {
        self.previous
    }

    pub fn label(&self) -> &'static str {
        self.label
    }
}
