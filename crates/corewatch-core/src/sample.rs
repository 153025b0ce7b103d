//! Wire layout of one metrics fetch and the values derived from it.
//!
//! A fetch is a single shell round trip. [`METRICS_COMMAND`] prints nine
//! fields, one per line, in a fixed order:
//!
//! | line | content                                        |
//! |------|------------------------------------------------|
//! | 0    | aggregate `cpu ...` line from `/proc/stat`     |
//! | 1-4  | `cpu0` .. `cpu3` lines                         |
//! | 5    | `free -m` memory row (`Mem: total used ...`)   |
//! | 6    | SoC temperature, decimal degrees               |
//! | 7    | engine token (`*_libretro`) or `none`          |
//! | 8    | emulator argument list (may be empty)          |

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use crate::error::ParseError;
use crate::rate::CORE_COUNT;
use crate::workload::NO_ENGINE;

/// Composite remote command. Every optional field prints a placeholder so the
/// line layout never shifts.
pub const METRICS_COMMAND: &str = concat!(
    "grep '^cpu ' /proc/stat; ",
    "for c in 0 1 2 3; do l=$(grep \"^cpu$c \" /proc/stat); echo \"$l\"; done; ",
    "free -m | grep Mem:; ",
    "t=$(vcgencmd measure_temp 2>/dev/null | grep -o '[0-9]*\\.[0-9]*'); ",
    "[ -n \"$t\" ] || t=$(awk '{printf \"%.1f\", $1/1000}' /sys/class/thermal/thermal_zone0/temp 2>/dev/null); ",
    "echo \"${t:-0.0}\"; ",
    "e=$(ps aux | grep '[r]etroarch' | grep -Eo '([a-zA-Z0-9_]+)_libretro' | head -n 1); ",
    "echo \"${e:-none}\"; ",
    "ps aux | grep '[r]etroarch' | awk '{for(i=11;i<=NF;i++) printf \"%s \", $i; print \"\"}' | head -n 1"
);

/// One tick's unprocessed fields. Consumed immediately by the poller.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RawSample {
    pub cpu_line: String,
    pub core_lines: [String; CORE_COUNT],
    pub memory_line: String,
    pub temperature_line: String,
    pub engine_line: String,
    pub workload_line: String,
}

impl RawSample {
    /// Split a fetch response into fields.
    ///
    /// Returns `None` for a blank response. Missing trailing lines fall back to
    /// per-field defaults rather than rejecting the whole response.
    pub fn from_response(response: &str) -> Option<Self> {
        if response.trim().is_empty() {
            return None;
        }
        let lines: Vec<&str> = response.lines().collect();
        let line = |i: usize, default: &str| -> String {
            lines
                .get(i)
                .map(|l| l.trim().to_string())
                .unwrap_or_else(|| default.to_string())
        };

        Some(Self {
            cpu_line: line(0, ""),
            core_lines: std::array::from_fn(|i| line(i + 1, "")),
            memory_line: line(5, ""),
            temperature_line: line(6, "0.0"),
            engine_line: line(7, NO_ENGINE),
            workload_line: line(8, ""),
        })
    }
}

/// Memory utilization from a `Mem: <total> <used> ...` row.
pub fn parse_memory(line: &str) -> Result<f64, ParseError> {
    let parts: Vec<&str> = line.split_whitespace().collect();
    if parts.is_empty() {
        return Err(ParseError::Missing { field: "memory" });
    }
    if parts.len() < 3 {
        return Err(ParseError::TooFewFields {
            field: "memory",
            expected: 3,
            got: parts.len(),
        });
    }
    let number = |token: &str| match token.parse::<f64>() {
        Ok(v) if v.is_finite() => Ok(v),
        _ => Err(ParseError::InvalidNumber {
            field: "memory",
            token: token.to_string(),
        }),
    };
    let total = number(parts[1])?;
    let used = number(parts[2])?;
    if total == 0.0 {
        return Ok(0.0);
    }
    Ok(used / total * 100.0)
}

/// Temperature in degrees from a bare decimal line.
pub fn parse_temperature(line: &str) -> Result<f64, ParseError> {
    let token = line.trim();
    if token.is_empty() {
        return Err(ParseError::Missing {
            field: "temperature",
        });
    }
    match token.parse::<f64>() {
        Ok(v) if v.is_finite() => Ok(v),
        _ => Err(ParseError::InvalidNumber {
            field: "temperature",
            token: token.to_string(),
        }),
    }
}

/// One value per tracked metric.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Readings {
    pub cpu: f64,
    pub ram: f64,
    pub temperature: f64,
    pub cores: [f64; CORE_COUNT],
}

impl Readings {
    /// Usage of the busiest core.
    pub fn max_core(&self) -> f64 {
        self.cores.iter().copied().fold(0.0, f64::max)
    }
}

/// Per-tick output of the poller.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct DerivedMetrics {
    /// Values smoothed for display; carry memory across ticks.
    pub smoothed: Readings,
    /// Values as computed this tick.
    pub raw: Readings,
    /// Rolling imbalance over the core window.
    pub imbalance: f64,
}

/// One entry in a session's sample buffer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionSample {
    pub timestamp: DateTime<Local>,
    pub readings: Readings,
    pub imbalance: f64,
}
