//! The polling loop.
//!
//! One [`Poller::tick_at`] call is one fetch: a single composite command round
//! trip, followed synchronously by rate conversion, smoothing, session
//! bookkeeping and (on rotation) export. Ticks never overlap, so none of the
//! state here is shared or locked.
//!
//! Fetch failures are counted. Every [`FAILURE_THRESHOLD`]-th consecutive
//! failure triggers one reconnection attempt through the [`Connector`], and
//! the counter starts over whatever the attempt's outcome.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use chrono::{DateTime, Local};
use serde::Serialize;

use crate::config::Config;
use crate::discovery::{Connector, NetworkConnector};
use crate::error::ExecError;
use crate::executor::CommandExecutor;
use crate::history::{HistoryLog, SessionRecord, aggregate};
use crate::rate::{CORE_COUNT, RateCounter};
use crate::sample::{
    DerivedMetrics, METRICS_COMMAND, RawSample, Readings, SessionSample, parse_memory,
    parse_temperature,
};
use crate::session::{FinishedSession, SessionTracker, Transition};
use crate::smoothing::Smoother;
use crate::workload::{normalize_engine, normalize_workload};

/// Consecutive failures that trigger a reconnection attempt.
pub const FAILURE_THRESHOLD: u32 = 3;
/// Entries kept per rolling metric history.
pub const HISTORY_LEN: usize = 60;

const CORE_LABELS: [&str; CORE_COUNT] = ["cpu0", "cpu1", "cpu2", "cpu3"];

/// Link state as seen by the loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkState {
    Connected,
    Disconnected,
}

// ---------------------------------------------------------------------------
// Rolling histories
// ---------------------------------------------------------------------------

/// Fixed-length FIFO rings of recent raw values, oldest first.
#[derive(Debug, Clone)]
pub struct MetricHistory {
    pub cpu: VecDeque<f64>,
    pub ram: VecDeque<f64>,
    pub temperature: VecDeque<f64>,
    pub imbalance: VecDeque<f64>,
    pub cores: [VecDeque<f64>; CORE_COUNT],
    capacity: usize,
}

impl MetricHistory {
    pub fn new(capacity: usize) -> Self {
        let ring = || VecDeque::with_capacity(capacity);
        Self {
            cpu: ring(),
            ram: ring(),
            temperature: ring(),
            imbalance: ring(),
            cores: std::array::from_fn(|_| ring()),
            capacity: capacity.max(1),
        }
    }

    fn push(&mut self, readings: &Readings, imbalance: f64) {
        let cap = self.capacity;
        let push = |ring: &mut VecDeque<f64>, v: f64| {
            if ring.len() == cap {
                ring.pop_front();
            }
            ring.push_back(v);
        };
        push(&mut self.cpu, readings.cpu);
        push(&mut self.ram, readings.ram);
        push(&mut self.temperature, readings.temperature);
        push(&mut self.imbalance, imbalance);
        for (ring, &v) in self.cores.iter_mut().zip(readings.cores.iter()) {
            push(ring, v);
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for MetricHistory {
    fn default() -> Self {
        Self::new(HISTORY_LEN)
    }
}

// ---------------------------------------------------------------------------
// Tick outcomes
// ---------------------------------------------------------------------------

/// Result of one reconnection attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reconnect {
    /// Executor rebuilt against `host`.
    Connected { host: String },
    /// Discovery found nothing.
    NotFound,
    /// A host was found but the handshake failed.
    ConnectFailed { host: String },
}

/// Session-level effect of a tick.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Unchanged,
    Started {
        workload: String,
    },
    /// The workload changed. `record` is the summary of the outgoing session,
    /// absent when it collected no samples.
    Rotated {
        workload: String,
        record: Option<SessionRecord>,
    },
}

/// What one tick produced.
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    Sampled {
        metrics: DerivedMetrics,
        workload: String,
        engine: Option<String>,
        event: SessionEvent,
        /// Core killer fired on this tick.
        anomaly: bool,
        /// Sample was appended to the active session.
        recorded: bool,
    },
    Failed {
        error: String,
        consecutive_failures: u32,
        reconnect: Option<Reconnect>,
    },
}

impl TickOutcome {
    pub fn is_sampled(&self) -> bool {
        matches!(self, TickOutcome::Sampled { .. })
    }
}

// ---------------------------------------------------------------------------
// Poller
// ---------------------------------------------------------------------------

pub struct Poller {
    connector: Box<dyn Connector>,
    executor: Option<Box<dyn CommandExecutor>>,
    state: LinkState,
    consecutive_failures: u32,
    reconnect_attempts: u64,
    cpu: RateCounter,
    cores: [RateCounter; CORE_COUNT],
    smoother: Smoother,
    metrics: DerivedMetrics,
    history: MetricHistory,
    sessions: SessionTracker,
    log: HistoryLog,
    pending: VecDeque<SessionRecord>,
    interval: Duration,
}

impl Poller {
    /// A disconnected poller. Call [`Poller::connect`] or
    /// [`Poller::with_executor`] before the first tick, or let the failure
    /// path reconnect.
    pub fn new(connector: Box<dyn Connector>, log: HistoryLog, interval: Duration) -> Self {
        Self {
            connector,
            executor: None,
            state: LinkState::Disconnected,
            consecutive_failures: 0,
            reconnect_attempts: 0,
            cpu: RateCounter::new("cpu"),
            cores: CORE_LABELS.map(RateCounter::new),
            smoother: Smoother::default(),
            metrics: DerivedMetrics::default(),
            history: MetricHistory::default(),
            sessions: SessionTracker::default(),
            log,
            pending: VecDeque::new(),
            interval: interval.max(Duration::from_millis(1)),
        }
    }

    /// Network connector, history log and cadence taken from `config`.
    pub fn from_config(config: &Config) -> Self {
        Self::new(
            Box::new(NetworkConnector::new(config.clone())),
            HistoryLog::new(config.history_file.clone()),
            config.refresh(),
        )
    }

    /// Install an already-open executor.
    pub fn with_executor(mut self, executor: Box<dyn CommandExecutor>) -> Self {
        self.executor = Some(executor);
        self.state = LinkState::Connected;
        self
    }

    /// Discover the host and open an executor. An executor that does not
    /// report itself connected is discarded. Does not touch the failure
    /// counter.
    pub fn connect(&mut self) -> Reconnect {
        let Some(host) = self.connector.discover() else {
            log::error!("no host found");
            return Reconnect::NotFound;
        };
        match self.connector.connect(&host).filter(|e| e.is_connected()) {
            Some(executor) => {
                self.executor = Some(executor);
                self.reset_counters();
                self.state = LinkState::Connected;
                Reconnect::Connected { host }
            }
            None => {
                log::error!("could not open a session to {host}");
                Reconnect::ConnectFailed { host }
            }
        }
    }

    /// Run one tick stamped with the current local time.
    pub fn tick(&mut self) -> TickOutcome {
        self.tick_at(Local::now())
    }

    /// Run one tick stamped `now`.
    pub fn tick_at(&mut self, now: DateTime<Local>) -> TickOutcome {
        let response = match self.fetch() {
            Ok(r) => r,
            Err(e) => return self.fail(e),
        };
        let Some(raw) = RawSample::from_response(&response) else {
            return self.fail(ExecError::Empty);
        };
        self.consecutive_failures = 0;
        self.state = LinkState::Connected;

        let readings = self.convert(&raw);
        let smoothed = self.smooth(&readings);

        let workload = normalize_workload(&raw.workload_line);
        let event = match self.sessions.observe(&workload, now) {
            Transition::Unchanged => SessionEvent::Unchanged,
            Transition::Started { workload } => SessionEvent::Started { workload },
            Transition::Rotated { finished, workload } => {
                self.history.imbalance.clear();
                let record = finished.and_then(|f| self.export(&f));
                SessionEvent::Rotated { workload, record }
            }
        };
        self.sessions.set_engine(normalize_engine(&raw.engine_line));

        let imbalance = self.sessions.push_cores(readings.cores);
        // Only a running workload can be a core killer.
        let anomaly = self.sessions.current().is_some()
            && self.sessions.check_anomaly(readings.max_core(), imbalance);
        if !self.sessions.in_quarantine(now) {
            log::debug!("rolling core imbalance: {imbalance:.1}%");
        }

        let recorded = self.sessions.record(SessionSample {
            timestamp: now,
            readings,
            imbalance,
        });
        self.history.push(&readings, imbalance);
        self.metrics = DerivedMetrics {
            smoothed,
            raw: readings,
            imbalance,
        };

        TickOutcome::Sampled {
            metrics: self.metrics,
            workload,
            engine: self.sessions.engine().map(str::to_string),
            event,
            anomaly,
            recorded,
        }
    }

    /// Drive ticks until `stop` is set, then shut down.
    ///
    /// Deadlines advance by the interval from the previous deadline; ticks
    /// that would already be late are skipped rather than queued. Returns the
    /// number of records still unwritten after shutdown.
    pub fn run<F>(&mut self, stop: &AtomicBool, mut on_tick: F) -> usize
    where
        F: FnMut(&TickOutcome),
    {
        let mut next = Instant::now();
        while !stop.load(Ordering::Relaxed) {
            let outcome = self.tick();
            on_tick(&outcome);

            next += self.interval;
            let now = Instant::now();
            let mut skipped = 0u32;
            while next <= now {
                next += self.interval;
                skipped += 1;
            }
            if skipped > 0 {
                log::debug!("tick overran; skipped {skipped} deadline(s)");
            }

            while !stop.load(Ordering::Relaxed) {
                let remaining = next.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    break;
                }
                std::thread::sleep(remaining.min(Duration::from_millis(10)));
            }
        }
        self.shutdown(Local::now())
    }

    /// Export the active session (if it has samples) and retry anything still
    /// queued. Returns the number of records left unwritten.
    pub fn shutdown(&mut self, now: DateTime<Local>) -> usize {
        if let Some(finished) = self.sessions.finish(now) {
            self.export(&finished);
        } else {
            self.flush_pending();
        }
        if !self.pending.is_empty() {
            log::error!(
                "{} session record(s) could not be written to {}",
                self.pending.len(),
                self.log.path().display()
            );
        }
        self.pending.len()
    }

    /// Retry queued records in order. Stops at the first failure; returns how
    /// many were written.
    pub fn flush_pending(&mut self) -> usize {
        let mut written = 0;
        while let Some(record) = self.pending.front() {
            match self.log.append(record) {
                Ok(()) => {
                    self.pending.pop_front();
                    written += 1;
                }
                Err(e) => {
                    log::error!(
                        "export failed, {} record(s) kept for retry: {e}",
                        self.pending.len()
                    );
                    break;
                }
            }
        }
        written
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn reconnect_attempts(&self) -> u64 {
        self.reconnect_attempts
    }

    /// Last successfully derived metrics.
    pub fn metrics(&self) -> &DerivedMetrics {
        &self.metrics
    }

    pub fn history(&self) -> &MetricHistory {
        &self.history
    }

    pub fn sessions(&self) -> &SessionTracker {
        &self.sessions
    }

    pub fn history_log(&self) -> &HistoryLog {
        &self.log
    }

    /// Records whose export failed, oldest first.
    pub fn pending_exports(&self) -> &VecDeque<SessionRecord> {
        &self.pending
    }

    pub fn host(&self) -> Option<&str> {
        self.executor.as_ref().map(|e| e.host())
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    fn fetch(&mut self) -> Result<String, ExecError> {
        match self.executor.as_mut() {
            Some(executor) => executor.execute(METRICS_COMMAND),
            None => Err(ExecError::Disconnected("no host".to_string())),
        }
    }

    fn fail(&mut self, error: ExecError) -> TickOutcome {
        self.consecutive_failures += 1;
        self.state = LinkState::Disconnected;
        let failures = self.consecutive_failures;
        log::warn!("fetch failed ({failures}/{FAILURE_THRESHOLD}): {error}");

        let reconnect = if failures >= FAILURE_THRESHOLD {
            self.reconnect_attempts += 1;
            log::info!("reconnection attempt {}", self.reconnect_attempts);
            let result = self.connect();
            if let Reconnect::Connected { host } = &result {
                log::info!("reconnected to {host}");
            }
            self.consecutive_failures = 0;
            Some(result)
        } else {
            None
        };

        TickOutcome::Failed {
            error: error.to_string(),
            consecutive_failures: failures,
            reconnect,
        }
    }

    fn convert(&mut self, raw: &RawSample) -> Readings {
        let cpu = self.cpu.update_line(&raw.cpu_line);
        let counters = &mut self.cores;
        let cores = std::array::from_fn(|i| counters[i].update_line(&raw.core_lines[i]));
        let ram = parse_memory(&raw.memory_line).unwrap_or_else(|e| {
            log::error!("{e}");
            0.0
        });
        let temperature = parse_temperature(&raw.temperature_line).unwrap_or_else(|e| {
            log::error!("{e}");
            0.0
        });
        Readings {
            cpu,
            ram,
            temperature,
            cores,
        }
    }

    fn smooth(&self, target: &Readings) -> Readings {
        let current = &self.metrics.smoothed;
        let s = &self.smoother;
        Readings {
            cpu: s.apply(current.cpu, target.cpu),
            ram: s.apply(current.ram, target.ram),
            temperature: s.apply(current.temperature, target.temperature),
            cores: std::array::from_fn(|i| s.apply(current.cores[i], target.cores[i])),
        }
    }

    fn export(&mut self, finished: &FinishedSession) -> Option<SessionRecord> {
        let record = aggregate(finished)?;
        self.pending.push_back(record.clone());
        self.flush_pending();
        Some(record)
    }

    fn reset_counters(&mut self) {
        self.cpu.reset();
        for counter in &mut self.cores {
            counter.reset();
        }
    }
}
