//! Integration tests for corewatch-core.
//!
//! These drive the full loop against a scripted remote:
//! fetch → rate conversion → session tracking → export → history log.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Local, TimeDelta, TimeZone};
use corewatch_core::{
    CommandExecutor, Connector, ExecError, HistoryLog, LinkState, Poller, Reconnect,
    SessionEvent, TickOutcome,
};

// ---------------------------------------------------------------------------
// Scripted remote
// ---------------------------------------------------------------------------

/// Replies shared between the test and every executor built for it.
#[derive(Clone, Default)]
struct Script(Arc<Mutex<VecDeque<Option<String>>>>);

impl Script {
    fn reply(&self, response: String) {
        self.0.lock().unwrap().push_back(Some(response));
    }

    fn fail(&self, times: usize) {
        let mut q = self.0.lock().unwrap();
        for _ in 0..times {
            q.push_back(None);
        }
    }
}

struct ScriptedExecutor {
    script: Script,
    host: String,
}

impl CommandExecutor for ScriptedExecutor {
    fn execute(&mut self, _command: &str) -> Result<String, ExecError> {
        match self.script.0.lock().unwrap().pop_front().flatten() {
            Some(r) => Ok(r),
            None => Err(ExecError::Timeout(2000)),
        }
    }

    fn is_connected(&self) -> bool {
        true
    }

    fn host(&self) -> &str {
        &self.host
    }
}

struct ScriptedConnector {
    script: Script,
    host: Option<String>,
    discoveries: Arc<AtomicUsize>,
}

impl Connector for ScriptedConnector {
    fn discover(&self) -> Option<String> {
        self.discoveries.fetch_add(1, Ordering::SeqCst);
        self.host.clone()
    }

    fn connect(&self, host: &str) -> Option<Box<dyn CommandExecutor>> {
        Some(Box::new(ScriptedExecutor {
            script: self.script.clone(),
            host: host.to_string(),
        }))
    }
}

/// Cumulative `/proc/stat` counters of a simulated four-core box.
#[derive(Default)]
struct Board {
    busy: [u64; 5],
    idle: [u64; 5],
}

impl Board {
    /// Advance every core by 100 jiffies at the given busy percentages.
    fn step(&mut self, cores: [u64; 4]) {
        for (i, &busy) in cores.iter().enumerate() {
            self.busy[i + 1] += busy;
            self.idle[i + 1] += 100 - busy;
            self.busy[0] += busy;
            self.idle[0] += 100 - busy;
        }
    }

    fn response(&self, workload: &str, engine: &str) -> String {
        let names = ["cpu", "cpu0", "cpu1", "cpu2", "cpu3"];
        let mut out: Vec<String> = names
            .iter()
            .enumerate()
            .map(|(i, name)| format!("{name} {} 0 0 {} 0", self.busy[i], self.idle[i]))
            .collect();
        out.push("Mem:            922         461         300".to_string());
        out.push("55.5".to_string());
        out.push(engine.to_string());
        out.push(workload.to_string());
        out.join("\n")
    }
}

fn rom(name: &str) -> String {
    format!(
        "/usr/bin/retroarch -L /usr/lib/libretro/snes9x_libretro.so /recalbox/share/roms/snes/{name}"
    )
}

fn t0() -> DateTime<Local> {
    Local.with_ymd_and_hms(2026, 3, 14, 20, 0, 0).unwrap()
}

fn at(secs: i64) -> DateTime<Local> {
    t0() + TimeDelta::seconds(secs)
}

struct Harness {
    poller: Poller,
    script: Script,
    discoveries: Arc<AtomicUsize>,
    _dir: tempfile::TempDir,
    log_path: std::path::PathBuf,
}

fn harness(reconnect_host: Option<&str>) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let log_path = dir.path().join("session_history.csv");
    harness_with_log(dir, log_path, reconnect_host)
}

fn harness_with_log(
    dir: tempfile::TempDir,
    log_path: std::path::PathBuf,
    reconnect_host: Option<&str>,
) -> Harness {
    let script = Script::default();
    let discoveries = Arc::new(AtomicUsize::new(0));
    let connector = ScriptedConnector {
        script: script.clone(),
        host: reconnect_host.map(str::to_string),
        discoveries: Arc::clone(&discoveries),
    };
    let poller = Poller::new(
        Box::new(connector),
        HistoryLog::new(&log_path),
        Duration::from_millis(1000),
    )
    .with_executor(Box::new(ScriptedExecutor {
        script: script.clone(),
        host: "192.168.1.20".to_string(),
    }));
    Harness {
        poller,
        script,
        discoveries,
        _dir: dir,
        log_path,
    }
}

// ---------------------------------------------------------------------------
// Sessions and export
// ---------------------------------------------------------------------------

#[test]
fn workload_switch_exports_one_record() {
    let mut h = harness(None);
    let mut board = Board::default();

    for i in 0..10u64 {
        board.step([i * 10; 4]);
        h.script.reply(board.response(&rom("Mario.sfc"), "snes9x_libretro"));
        let out = h.poller.tick_at(at(i as i64));
        assert!(out.is_sampled());
    }
    assert!(!h.log_path.exists(), "nothing exported while Mario runs");

    board.step([50; 4]);
    h.script.reply(board.response(&rom("Zelda (USA).sfc"), "snes9x_libretro"));
    let TickOutcome::Sampled { event, recorded, .. } = h.poller.tick_at(at(10)) else {
        panic!("expected a sample");
    };
    let SessionEvent::Rotated { workload, record } = event else {
        panic!("expected rotation, got {event:?}");
    };
    assert_eq!(workload, "Zelda");
    assert!(!recorded, "rotation tick falls in quarantine");

    let record = record.expect("Mario had samples");
    assert_eq!(record.workload, "Mario");
    assert_eq!(record.engine, "snes9x");
    assert!((record.cpu.max - 90.0).abs() < 1e-9);
    assert!((record.cpu.min - 0.0).abs() < 1e-9);
    assert!((record.cpu.avg - 45.0).abs() < 1e-9);

    let rows = h.poller.history_log().read_all().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].workload, "Mario");

    let text = std::fs::read_to_string(&h.log_path).unwrap();
    let mut lines = text.lines();
    let header: Vec<&str> = lines.next().unwrap().split(',').collect();
    let row: Vec<&str> = lines.next().unwrap().split(',').collect();
    assert!(lines.next().is_none());
    let col = |name: &str| header.iter().position(|c| *c == name).unwrap();
    assert_eq!(row[col("max_cpu")], "90.0");
    assert_eq!(row[col("avg_cpu")], "45.0");
    assert_eq!(row[col("session_start")], "2026-03-14 20:00:00");
    assert_eq!(row[col("session_end")], "2026-03-14 20:00:10");
    assert_eq!(row[col("core_killer")], "no");

    let zelda = h.poller.sessions().current().unwrap();
    assert_eq!(zelda.workload(), "Zelda");
    assert_eq!(zelda.sample_count(), 0);
}

#[test]
fn new_session_stays_empty_until_quarantine_expires() {
    let mut h = harness(None);
    let mut board = Board::default();

    board.step([20; 4]);
    h.script.reply(board.response(&rom("A.sfc"), "none"));
    h.poller.tick_at(at(0));

    let mut recorded_ticks = Vec::new();
    for s in 1..=8 {
        board.step([20; 4]);
        h.script.reply(board.response(&rom("B.sfc"), "none"));
        if let TickOutcome::Sampled { recorded: true, .. } = h.poller.tick_at(at(s)) {
            recorded_ticks.push(s);
        }
    }
    // Rotation at t=1, quarantine until t=6.
    assert_eq!(recorded_ticks, vec![6, 7, 8]);
    assert_eq!(h.poller.sessions().current().unwrap().sample_count(), 3);
}

#[test]
fn empty_workload_never_exports() {
    let mut h = harness(None);
    let mut board = Board::default();
    for s in 0..5 {
        board.step([30; 4]);
        h.script.reply(board.response("", "none"));
        h.poller.tick_at(at(s));
    }
    assert!(h.poller.sessions().current().is_none());
    assert_eq!(h.poller.shutdown(at(6)), 0);
    assert!(!h.log_path.exists());
}

#[test]
fn shutdown_exports_active_session() {
    let mut h = harness(None);
    let mut board = Board::default();
    for s in 0..3 {
        board.step([40; 4]);
        h.script.reply(board.response(&rom("Metroid.nes"), "fceumm_libretro"));
        h.poller.tick_at(at(s));
    }
    assert_eq!(h.poller.shutdown(at(3)), 0);
    let rows = h.poller.history_log().read_all().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].workload, "Metroid");
    assert_eq!(rows[0].engine, "fceumm");
}

#[test]
fn failed_export_is_kept_and_retried_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let log_dir = dir.path().join("not-yet");
    let log_path = log_dir.join("session_history.csv");
    let mut h = harness_with_log(dir, log_path, None);
    let mut board = Board::default();

    let games = ["A.sfc", "B.sfc", "C.sfc"];
    let mut t = 0;
    for game in games {
        for _ in 0..7 {
            board.step([25; 4]);
            h.script.reply(board.response(&rom(game), "none"));
            h.poller.tick_at(at(t));
            t += 1;
        }
    }
    // A and B rotated out, neither could be written.
    assert_eq!(h.poller.pending_exports().len(), 2);

    std::fs::create_dir_all(&log_dir).unwrap();
    assert_eq!(h.poller.shutdown(at(t)), 0);
    let names: Vec<String> = h
        .poller
        .history_log()
        .read_all()
        .unwrap()
        .into_iter()
        .map(|r| r.workload)
        .collect();
    assert_eq!(names, vec!["A", "B", "C"]);
}

// ---------------------------------------------------------------------------
// Core killer
// ---------------------------------------------------------------------------

#[test]
fn single_saturated_core_latches_core_killer() {
    let mut h = harness(None);
    let mut board = Board::default();
    let mut fired = 0;
    for s in 0..15 {
        board.step([100, 5, 5, 5]);
        h.script.reply(board.response(&rom("Doom.wad"), "prboom_libretro"));
        if let TickOutcome::Sampled { anomaly: true, .. } = h.poller.tick_at(at(s)) {
            fired += 1;
        }
    }
    assert_eq!(fired, 1);
    assert!(h.poller.sessions().anomaly_latched());
    assert!(h.poller.metrics().imbalance > 50.0);

    board.step([10; 4]);
    h.script.reply(board.response(&rom("Tetris.gb"), "none"));
    let TickOutcome::Sampled {
        event: SessionEvent::Rotated { record: Some(record), .. },
        ..
    } = h.poller.tick_at(at(15))
    else {
        panic!("expected rotation with a record");
    };
    assert!(record.core_killer);
    assert!(!h.poller.sessions().anomaly_latched());
    // Imbalance history restarts with the new session.
    assert_eq!(h.poller.history().imbalance.len(), 1);
    assert_eq!(h.poller.metrics().imbalance, 0.0);
}

// ---------------------------------------------------------------------------
// Failures and reconnection
// ---------------------------------------------------------------------------

#[test]
fn three_failures_trigger_one_reconnection() {
    let mut h = harness(None);
    h.script.fail(3);
    for _ in 0..3 {
        h.poller.tick_at(at(0));
    }
    assert_eq!(h.discoveries.load(Ordering::SeqCst), 1);
    assert_eq!(h.poller.consecutive_failures(), 0);
    assert_eq!(h.poller.state(), LinkState::Disconnected);
}

#[test]
fn failure_streak_keeps_retrying_every_third_tick() {
    let mut h = harness(None);
    h.script.fail(6);
    let mut outcomes = Vec::new();
    for s in 0..6 {
        if let TickOutcome::Failed {
            reconnect: Some(r), ..
        } = h.poller.tick_at(at(s))
        {
            outcomes.push(r);
        }
    }
    assert_eq!(outcomes, vec![Reconnect::NotFound, Reconnect::NotFound]);
    assert_eq!(h.discoveries.load(Ordering::SeqCst), 2);
}

#[test]
fn reconnection_resets_counters() {
    let mut h = harness(Some("192.168.1.77"));
    let mut board = Board::default();

    board.step([60; 4]);
    h.script.reply(board.response("", "none"));
    h.poller.tick_at(at(0));
    board.step([60; 4]);
    h.script.reply(board.response("", "none"));
    let TickOutcome::Sampled { metrics, .. } = h.poller.tick_at(at(1)) else {
        panic!("expected a sample");
    };
    assert!((metrics.raw.cpu - 60.0).abs() < 1e-9);

    h.script.fail(3);
    let mut last = None;
    for s in 2..5 {
        last = Some(h.poller.tick_at(at(s)));
    }
    assert!(matches!(
        last,
        Some(TickOutcome::Failed {
            reconnect: Some(Reconnect::Connected { .. }),
            ..
        })
    ));
    assert_eq!(h.poller.host(), Some("192.168.1.77"));
    assert_eq!(h.poller.state(), LinkState::Connected);

    board.step([60; 4]);
    h.script.reply(board.response("", "none"));
    let TickOutcome::Sampled { metrics, .. } = h.poller.tick_at(at(5)) else {
        panic!("expected a sample");
    };
    assert_eq!(metrics.raw.cpu, 0.0, "first fetch after reconnect has no baseline");
}

#[test]
fn failures_do_not_touch_session_state() {
    let mut h = harness(None);
    let mut board = Board::default();
    for s in 0..2 {
        board.step([30; 4]);
        h.script.reply(board.response(&rom("Sonic.md"), "none"));
        h.poller.tick_at(at(s));
    }
    let samples = h.poller.sessions().current().unwrap().sample_count();
    let history = h.poller.history().cpu.len();

    h.script.fail(2);
    h.poller.tick_at(at(2));
    h.poller.tick_at(at(3));

    assert_eq!(h.poller.sessions().current().unwrap().sample_count(), samples);
    assert_eq!(h.poller.history().cpu.len(), history);
    assert_eq!(h.poller.consecutive_failures(), 2);
}

// ---------------------------------------------------------------------------
// Degraded responses
// ---------------------------------------------------------------------------

#[test]
fn malformed_memory_row_keeps_cpu_readings() {
    let mut h = harness(None);
    let mut board = Board::default();
    let healthy_mem = "Mem:            922         461         300";

    board.step([10; 4]);
    h.script.reply(board.response(&rom("Mario.sfc"), "snes9x_libretro"));
    h.poller.tick_at(at(0));

    for (i, mem) in ["Mem: NaN 461 300", "Mem: lots", ""].into_iter().enumerate() {
        board.step([90, 50, 50, 50]);
        let response = board
            .response(&rom("Mario.sfc"), "snes9x_libretro")
            .replace(healthy_mem, mem);
        h.script.reply(response);

        let TickOutcome::Sampled { metrics, workload, .. } = h.poller.tick_at(at(i as i64 + 1))
        else {
            panic!("a bad memory row must not fail the tick");
        };
        let raw = metrics.raw;
        assert!((raw.cpu - 60.0).abs() < 1e-9, "cpu for {mem:?}");
        assert!((raw.cores[0] - 90.0).abs() < 1e-9);
        assert!((raw.cores[3] - 50.0).abs() < 1e-9);
        assert_eq!(raw.ram, 0.0);
        assert_eq!(raw.temperature, 55.5);
        assert!(metrics.smoothed.ram.is_finite());
        assert_eq!(workload, "Mario");
    }
    assert_eq!(h.poller.consecutive_failures(), 0);
}
