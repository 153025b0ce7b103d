//! Per-workload session tracking.
//!
//! A session is one continuous observation of a single workload (game). The
//! tracker owns the current session's bounded sample buffer, the rolling core
//! window and the core-killer latch, and rotates all three together when the
//! observed workload changes.
//!
//! # States
//!
//! - **No session**: no workload is running. Nothing is buffered.
//! - **Active(id)**: samples are appended unless the post-rotation quarantine
//!   is still running.
//!
//! A change of workload while active finishes the outgoing session (handed
//! back to the caller for export) and opens the next one. Changing to the
//! empty workload finishes the session and returns to *no session*.

use std::collections::VecDeque;

use chrono::{DateTime, Local, TimeDelta};
use uuid::Uuid;

use crate::anomaly::AnomalyDetector;
use crate::imbalance::ImbalanceTracker;
use crate::rate::CORE_COUNT;
use crate::sample::SessionSample;

/// Samples kept per session (one hour at a one second cadence).
pub const SESSION_CAPACITY: usize = 3600;
/// Samples are dropped for this long after a rotation.
pub const QUARANTINE_SECS: i64 = 5;

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// The session currently being observed.
#[derive(Debug, Clone)]
pub struct Session {
    id: Uuid,
    workload: String,
    engine: Option<String>,
    started_at: DateTime<Local>,
    samples: VecDeque<SessionSample>,
    capacity: usize,
}

impl Session {
    fn new(
        workload: String,
        engine: Option<String>,
        started_at: DateTime<Local>,
        capacity: usize,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            workload,
            engine,
            started_at,
            samples: VecDeque::with_capacity(capacity.min(SESSION_CAPACITY)),
            capacity: capacity.max(1),
        }
    }

    fn push(&mut self, sample: SessionSample) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    fn finish(self, ended_at: DateTime<Local>, anomaly_fired: bool) -> FinishedSession {
        FinishedSession {
            id: self.id,
            workload: self.workload,
            engine: self.engine,
            started_at: self.started_at,
            ended_at,
            samples: self.samples.into(),
            anomaly_fired,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn workload(&self) -> &str {
        &self.workload
    }

    pub fn engine(&self) -> Option<&str> {
        self.engine.as_deref()
    }

    pub fn started_at(&self) -> DateTime<Local> {
        self.started_at
    }

    pub fn samples(&self) -> &VecDeque<SessionSample> {
        &self.samples
    }

    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }
}

/// A session that has ended and is ready for aggregation.
#[derive(Debug, Clone)]
pub struct FinishedSession {
    pub id: Uuid,
    pub workload: String,
    pub engine: Option<String>,
    pub started_at: DateTime<Local>,
    pub ended_at: DateTime<Local>,
    pub samples: Vec<SessionSample>,
    pub anomaly_fired: bool,
}

// ---------------------------------------------------------------------------
// Transitions
// ---------------------------------------------------------------------------

/// What a call to [`SessionTracker::observe`] did.
#[derive(Debug)]
pub enum Transition {
    /// Same workload as before (or still none).
    Unchanged,
    /// First workload seen after a period with none.
    Started { workload: String },
    /// Workload changed while a session was active. `finished` is `None` when
    /// the outgoing session never collected a sample.
    Rotated {
        finished: Option<FinishedSession>,
        workload: String,
    },
}

// ---------------------------------------------------------------------------
// Tracker
// ---------------------------------------------------------------------------

/// Session state machine plus the per-session signal state it resets.
#[derive(Debug)]
pub struct SessionTracker {
    current: Option<Session>,
    imbalance: ImbalanceTracker,
    anomaly: AnomalyDetector,
    engine: Option<String>,
    quarantine_until: Option<DateTime<Local>>,
    quarantine: TimeDelta,
    capacity: usize,
}

impl Default for SessionTracker {
    fn default() -> Self {
        Self::new(SESSION_CAPACITY, TimeDelta::seconds(QUARANTINE_SECS))
    }
}

impl SessionTracker {
    pub fn new(capacity: usize, quarantine: TimeDelta) -> Self {
        Self {
            current: None,
            imbalance: ImbalanceTracker::default(),
            anomaly: AnomalyDetector::new(),
            engine: None,
            quarantine_until: None,
            quarantine,
            capacity,
        }
    }

    /// Feed the normalized workload identifier seen this tick.
    pub fn observe(&mut self, workload: &str, now: DateTime<Local>) -> Transition {
        match self.current.take() {
            Some(session) if session.workload == workload => {
                self.current = Some(session);
                Transition::Unchanged
            }
            None if workload.is_empty() => Transition::Unchanged,
            None => {
                self.reset_signals();
                self.open(workload, now);
                Transition::Started {
                    workload: workload.to_string(),
                }
            }
            Some(session) => {
                let finished = self.close(session, now);
                self.reset_signals();
                self.quarantine_until = Some(now + self.quarantine);
                if !workload.is_empty() {
                    self.open(workload, now);
                }
                Transition::Rotated {
                    finished,
                    workload: workload.to_string(),
                }
            }
        }
    }

    /// Remember the engine in use; `None` keeps the last known one.
    pub fn set_engine(&mut self, engine: Option<String>) {
        let Some(engine) = engine else {
            return;
        };
        if let Some(session) = self.current.as_mut() {
            session.engine = Some(engine.clone());
        }
        self.engine = Some(engine);
    }

    /// Push this tick's core usages into the rolling window.
    pub fn push_cores(&mut self, cores: [f64; CORE_COUNT]) -> f64 {
        self.imbalance.push(cores)
    }

    /// Evaluate the core-killer condition; `true` on the single firing tick.
    pub fn check_anomaly(&mut self, max_core_usage: f64, imbalance: f64) -> bool {
        self.anomaly.observe(max_core_usage, imbalance)
    }

    /// Append a sample to the active session.
    ///
    /// Returns `false` when there is no active session or the sample falls
    /// inside the quarantine window.
    pub fn record(&mut self, sample: SessionSample) -> bool {
        if self.in_quarantine(sample.timestamp) {
            return false;
        }
        match self.current.as_mut() {
            Some(session) => {
                session.push(sample);
                true
            }
            None => false,
        }
    }

    /// Whether `at` falls before the post-rotation quarantine deadline.
    pub fn in_quarantine(&self, at: DateTime<Local>) -> bool {
        self.quarantine_until.is_some_and(|until| at < until)
    }

    /// End the active session without starting another (shutdown).
    pub fn finish(&mut self, now: DateTime<Local>) -> Option<FinishedSession> {
        let session = self.current.take()?;
        self.close(session, now)
    }

    pub fn current(&self) -> Option<&Session> {
        self.current.as_ref()
    }

    pub fn engine(&self) -> Option<&str> {
        self.engine.as_deref()
    }

    pub fn imbalance(&self) -> f64 {
        self.imbalance.imbalance()
    }

    pub fn anomaly_latched(&self) -> bool {
        self.anomaly.is_latched()
    }

    pub fn quarantine_until(&self) -> Option<DateTime<Local>> {
        self.quarantine_until
    }

    fn open(&mut self, workload: &str, now: DateTime<Local>) {
        let session = Session::new(workload.to_string(), self.engine.clone(), now, self.capacity);
        log::info!("session {} started for {workload:?}", session.id);
        self.current = Some(session);
    }

    fn close(&mut self, session: Session, now: DateTime<Local>) -> Option<FinishedSession> {
        if session.samples.is_empty() {
            log::info!(
                "session {} for {:?} ended without samples; nothing to export",
                session.id,
                session.workload
            );
            return None;
        }
        log::info!(
            "session {} for {:?} ended with {} samples",
            session.id,
            session.workload,
            session.samples.len()
        );
        Some(session.finish(now, self.anomaly.is_latched()))
    }

    fn reset_signals(&mut self) {
        self.imbalance.reset();
        self.anomaly.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sample::Readings;
    use chrono::TimeZone;

    fn t0() -> DateTime<Local> {
        Local.with_ymd_and_hms(2026, 3, 14, 20, 0, 0).unwrap()
    }

    fn at(secs: i64) -> DateTime<Local> {
        t0() + TimeDelta::seconds(secs)
    }

    fn sample(secs: i64, cpu: f64) -> SessionSample {
        SessionSample {
            timestamp: at(secs),
            readings: Readings {
                cpu,
                ..Default::default()
            },
            imbalance: 0.0,
        }
    }

    // -----------------------------------------------------------------------
    // State machine
    // -----------------------------------------------------------------------

    #[test]
    fn test_empty_workload_never_starts_a_session() {
        let mut tracker = SessionTracker::default();
        for s in 0..5 {
            assert!(matches!(tracker.observe("", at(s)), Transition::Unchanged));
            assert!(!tracker.record(sample(s, 10.0)));
        }
        assert!(tracker.current().is_none());
        assert!(tracker.finish(at(10)).is_none());
    }

    #[test]
    fn test_first_workload_starts_without_quarantine() {
        let mut tracker = SessionTracker::default();
        let t = tracker.observe("Mario", at(0));
        assert!(matches!(t, Transition::Started { ref workload } if workload == "Mario"));
        assert!(tracker.record(sample(0, 10.0)));
        assert_eq!(tracker.current().unwrap().sample_count(), 1);
        assert_eq!(tracker.current().unwrap().started_at(), at(0));
    }

    #[test]
    fn test_rotation_finishes_outgoing_session() {
        let mut tracker = SessionTracker::default();
        tracker.observe("Mario", at(0));
        for s in 0..10 {
            tracker.observe("Mario", at(s));
            tracker.record(sample(s, s as f64 * 10.0));
        }
        let t = tracker.observe("Zelda", at(10));
        let Transition::Rotated { finished, workload } = t else {
            panic!("expected rotation");
        };
        assert_eq!(workload, "Zelda");
        let finished = finished.unwrap();
        assert_eq!(finished.workload, "Mario");
        assert_eq!(finished.samples.len(), 10);
        assert_eq!(finished.started_at, at(0));
        assert_eq!(finished.ended_at, at(10));

        let current = tracker.current().unwrap();
        assert_eq!(current.workload(), "Zelda");
        assert_eq!(current.sample_count(), 0);
        assert_eq!(current.started_at(), at(10));
    }

    #[test]
    fn test_quarantine_drops_samples_after_rotation() {
        let mut tracker = SessionTracker::default();
        tracker.observe("A", at(0));
        tracker.record(sample(0, 1.0));
        tracker.observe("B", at(1));

        let mut kept = 0;
        for s in 1..=10 {
            if tracker.record(sample(s, 1.0)) {
                kept += 1;
            }
        }
        // Deadline is t=6; ticks 6..=10 are kept.
        assert_eq!(kept, 5);
        assert!(tracker.in_quarantine(at(5)));
        assert!(!tracker.in_quarantine(at(6)));

        let Transition::Rotated { finished, .. } = tracker.observe("C", at(11)) else {
            panic!("expected rotation");
        };
        assert_eq!(finished.unwrap().samples.len(), 5);
    }

    #[test]
    fn test_rotation_of_empty_session_exports_nothing() {
        let mut tracker = SessionTracker::default();
        tracker.observe("A", at(0));
        let Transition::Rotated { finished, .. } = tracker.observe("B", at(1)) else {
            panic!("expected rotation");
        };
        assert!(finished.is_none());
    }

    #[test]
    fn test_workload_ending_exports_and_goes_idle() {
        let mut tracker = SessionTracker::default();
        tracker.observe("A", at(0));
        tracker.record(sample(0, 5.0));
        let Transition::Rotated { finished, workload } = tracker.observe("", at(1)) else {
            panic!("expected rotation");
        };
        assert!(workload.is_empty());
        assert_eq!(finished.unwrap().workload, "A");
        assert!(tracker.current().is_none());
        assert!(!tracker.record(sample(20, 5.0)));
    }

    #[test]
    fn test_buffer_evicts_oldest() {
        let mut tracker = SessionTracker::new(3, TimeDelta::seconds(QUARANTINE_SECS));
        tracker.observe("A", at(0));
        for s in 0..5 {
            tracker.record(sample(s, s as f64));
        }
        let session = tracker.current().unwrap();
        let cpus: Vec<f64> = session.samples().iter().map(|s| s.readings.cpu).collect();
        assert_eq!(cpus, vec![2.0, 3.0, 4.0]);
    }

    // -----------------------------------------------------------------------
    // Signal resets
    // -----------------------------------------------------------------------

    #[test]
    fn test_rotation_resets_latch_and_window() {
        let mut tracker = SessionTracker::default();
        tracker.observe("A", at(0));
        let mut imbalance = 0.0;
        for _ in 0..10 {
            imbalance = tracker.push_cores([100.0, 0.0, 0.0, 0.0]);
        }
        assert!(tracker.check_anomaly(100.0, imbalance));
        tracker.record(sample(0, 1.0));

        let Transition::Rotated { finished, .. } = tracker.observe("B", at(1)) else {
            panic!("expected rotation");
        };
        assert!(finished.unwrap().anomaly_fired);
        assert!(!tracker.anomaly_latched());
        assert_eq!(tracker.imbalance(), 0.0);
        assert_eq!(tracker.push_cores([100.0, 0.0, 0.0, 0.0]), 0.0);
    }

    #[test]
    fn test_engine_is_sticky() {
        let mut tracker = SessionTracker::default();
        tracker.set_engine(Some("snes9x".into()));
        tracker.observe("A", at(0));
        assert_eq!(tracker.current().unwrap().engine(), Some("snes9x"));
        tracker.set_engine(None);
        assert_eq!(tracker.engine(), Some("snes9x"));
        tracker.set_engine(Some("mgba".into()));
        assert_eq!(tracker.current().unwrap().engine(), Some("mgba"));
    }

    #[test]
    fn test_finish_on_shutdown() {
        let mut tracker = SessionTracker::default();
        tracker.observe("A", at(0));
        tracker.record(sample(0, 1.0));
        let finished = tracker.finish(at(3)).unwrap();
        assert_eq!(finished.ended_at, at(3));
        assert!(tracker.current().is_none());
    }
}
