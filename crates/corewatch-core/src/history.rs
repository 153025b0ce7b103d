//! Session aggregation and the persisted history log.
//!
//! A finished session is reduced to avg/min/max per metric and appended as
//! one CSV row. The log is append-only: rows are never rewritten, the only
//! destructive operation is [`HistoryLog::clear`].
//!
//! # Storage Format
//!
//! `session_history.csv`, header written once when the file is created:
//!
//! ```text
//! game,emulator,session_start,session_end,avg_cpu,min_cpu,max_cpu,...,core_imbalance,core_killer
//! ```
//!
//! Timestamps are local `YYYY-MM-DD HH:MM:SS`, numbers carry one decimal,
//! `core_killer` is `yes` or `no`.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::error::HistoryError;
use crate::rate::CORE_COUNT;
use crate::session::FinishedSession;
use crate::workload::NO_ENGINE;

/// Timestamp layout used in the log.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Column order of the log.
pub const COLUMNS: [&str; 27] = [
    "game",
    "emulator",
    "session_start",
    "session_end",
    "avg_cpu",
    "min_cpu",
    "max_cpu",
    "avg_ram",
    "min_ram",
    "max_ram",
    "avg_cpu_temp",
    "min_cpu_temp",
    "max_cpu_temp",
    "avg_core1",
    "min_core1",
    "max_core1",
    "avg_core2",
    "min_core2",
    "max_core2",
    "avg_core3",
    "min_core3",
    "max_core3",
    "avg_core4",
    "min_core4",
    "max_core4",
    "core_imbalance",
    "core_killer",
];

const FLAG_YES: &str = "yes";
const FLAG_NO: &str = "no";

// ---------------------------------------------------------------------------
// Aggregation
// ---------------------------------------------------------------------------

/// Population mean, minimum and maximum of one metric.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct MetricSummary {
    pub avg: f64,
    pub min: f64,
    pub max: f64,
}

impl MetricSummary {
    /// Summarize a series; `None` when it is empty.
    pub fn from_values(values: impl IntoIterator<Item = f64>) -> Option<Self> {
        let mut count = 0usize;
        let mut sum = 0.0;
        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;
        for v in values {
            count += 1;
            sum += v;
            min = min.min(v);
            max = max.max(v);
        }
        (count > 0).then(|| Self {
            avg: sum / count as f64,
            min,
            max,
        })
    }
}

/// One persisted row: the summary of a completed session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub workload: String,
    pub engine: String,
    pub started_at: NaiveDateTime,
    pub ended_at: NaiveDateTime,
    pub cpu: MetricSummary,
    pub ram: MetricSummary,
    pub temperature: MetricSummary,
    pub cores: [MetricSummary; CORE_COUNT],
    pub imbalance: f64,
    pub core_killer: bool,
}

/// Reduce a finished session to its record. `None` when it has no samples.
pub fn aggregate(session: &FinishedSession) -> Option<SessionRecord> {
    let samples = &session.samples;
    let summary = |f: &dyn Fn(&crate::sample::SessionSample) -> f64| {
        MetricSummary::from_values(samples.iter().map(f))
    };

    let cpu = summary(&|s| s.readings.cpu)?;
    let ram = summary(&|s| s.readings.ram)?;
    let temperature = summary(&|s| s.readings.temperature)?;
    let mut cores = [MetricSummary::default(); CORE_COUNT];
    for (i, core) in cores.iter_mut().enumerate() {
        *core = summary(&|s| s.readings.cores[i])?;
    }
    let imbalance = summary(&|s| s.imbalance)?.avg;

    Some(SessionRecord {
        workload: session.workload.clone(),
        engine: session
            .engine
            .clone()
            .unwrap_or_else(|| NO_ENGINE.to_string()),
        started_at: session.started_at.naive_local(),
        ended_at: session.ended_at.naive_local(),
        cpu,
        ram,
        temperature,
        cores,
        imbalance,
        core_killer: session.anomaly_fired,
    })
}

impl SessionRecord {
    /// Render in [`COLUMNS`] order.
    pub fn to_row(&self) -> Vec<String> {
        let mut row = Vec::with_capacity(COLUMNS.len());
        row.push(self.workload.clone());
        row.push(self.engine.clone());
        row.push(self.started_at.format(TIMESTAMP_FORMAT).to_string());
        row.push(self.ended_at.format(TIMESTAMP_FORMAT).to_string());
        for m in [&self.cpu, &self.ram, &self.temperature]
            .into_iter()
            .chain(self.cores.iter())
        {
            row.push(format!("{:.1}", m.avg));
            row.push(format!("{:.1}", m.min));
            row.push(format!("{:.1}", m.max));
        }
        row.push(format!("{:.1}", self.imbalance));
        row.push(if self.core_killer { FLAG_YES } else { FLAG_NO }.to_string());
        row
    }

    /// Parse a row using a header-name index, so column order may differ.
    fn from_fields(
        index: &HashMap<String, usize>,
        fields: &csv::StringRecord,
    ) -> Result<Self, String> {
        let get = |name: &str| -> Result<&str, String> {
            index
                .get(name)
                .and_then(|&i| fields.get(i))
                .ok_or_else(|| format!("missing column {name}"))
        };
        let number = |name: &str| -> Result<f64, String> {
            let raw = get(name)?;
            raw.trim()
                .parse::<f64>()
                .map_err(|_| format!("{name}: invalid number {raw:?}"))
        };
        let summary = |suffix: &str| -> Result<MetricSummary, String> {
            Ok(MetricSummary {
                avg: number(&format!("avg_{suffix}"))?,
                min: number(&format!("min_{suffix}"))?,
                max: number(&format!("max_{suffix}"))?,
            })
        };
        let timestamp = |name: &str| -> Result<NaiveDateTime, String> {
            let raw = get(name)?;
            NaiveDateTime::parse_from_str(raw.trim(), TIMESTAMP_FORMAT)
                .map_err(|e| format!("{name}: {e}"))
        };

        let mut cores = [MetricSummary::default(); CORE_COUNT];
        for (i, core) in cores.iter_mut().enumerate() {
            *core = summary(&format!("core{}", i + 1))?;
        }

        let core_killer = match get("core_killer")?.trim() {
            FLAG_YES => true,
            FLAG_NO => false,
            other => return Err(format!("core_killer: unexpected value {other:?}")),
        };

        Ok(Self {
            workload: get("game")?.to_string(),
            engine: get("emulator")?.to_string(),
            started_at: timestamp("session_start")?,
            ended_at: timestamp("session_end")?,
            cpu: summary("cpu")?,
            ram: summary("ram")?,
            temperature: summary("cpu_temp")?,
            cores,
            imbalance: number("core_imbalance")?,
            core_killer,
        })
    }
}

// ---------------------------------------------------------------------------
// Log file
// ---------------------------------------------------------------------------

/// Append-only CSV log of session records.
#[derive(Debug, Clone)]
pub struct HistoryLog {
    path: PathBuf,
}

impl HistoryLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one record, writing the header first if the log is new.
    pub fn append(&self, record: &SessionRecord) -> Result<(), HistoryError> {
        let needs_header = fs::metadata(&self.path)
            .map(|m| m.len() == 0)
            .unwrap_or(true);

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| self.io_error(e))?;
        let mut writer = csv::WriterBuilder::new().has_headers(false).from_writer(file);

        if needs_header {
            writer.write_record(COLUMNS).map_err(|e| self.csv_error(e))?;
        }
        writer
            .write_record(record.to_row())
            .map_err(|e| self.csv_error(e))?;
        writer.flush().map_err(|e| self.io_error(e))?;

        log::info!(
            "session for {:?} exported to {}",
            record.workload,
            self.path.display()
        );
        Ok(())
    }

    /// Read every well-formed record. A missing log reads as empty; bad rows
    /// are logged and skipped.
    pub fn read_all(&self) -> Result<Vec<SessionRecord>, HistoryError> {
        let file = match File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(self.io_error(e)),
        };

        let mut reader = csv::ReaderBuilder::new().flexible(true).from_reader(file);
        let index: HashMap<String, usize> = reader
            .headers()
            .map_err(|e| self.csv_error(e))?
            .iter()
            .enumerate()
            .map(|(i, name)| (name.trim().to_string(), i))
            .collect();
        if index.is_empty() {
            return Ok(Vec::new());
        }

        let mut records = Vec::new();
        for row in reader.records() {
            let row = match row {
                Ok(row) => row,
                Err(e) if e.is_io_error() => return Err(self.csv_error(e)),
                Err(e) => {
                    let line = e.position().map_or(0, |p| p.line() as usize);
                    log::warn!(
                        "skipping history row: {}",
                        HistoryError::Malformed {
                            line,
                            reason: e.to_string(),
                        }
                    );
                    continue;
                }
            };
            match SessionRecord::from_fields(&index, &row) {
                Ok(record) => records.push(record),
                Err(reason) => {
                    let err = HistoryError::Malformed {
                        line: row.position().map_or(0, |p| p.line() as usize),
                        reason,
                    };
                    log::warn!("skipping history row: {err}");
                }
            }
        }
        Ok(records)
    }

    /// Delete the log. Returns whether a file was removed.
    pub fn clear(&self) -> Result<bool, HistoryError> {
        match fs::remove_file(&self.path) {
            Ok(()) => {
                log::info!("history cleared: {}", self.path.display());
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(self.io_error(e)),
        }
    }

    fn io_error(&self, source: std::io::Error) -> HistoryError {
        HistoryError::Io {
            path: self.path.clone(),
            source,
        }
    }

    fn csv_error(&self, source: csv::Error) -> HistoryError {
        self.io_error(std::io::Error::from(source))
    }
}
