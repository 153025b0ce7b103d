//! `corewatch history`: list or clear recorded sessions.

use std::path::PathBuf;

use corewatch_core::{HistoryLog, SessionRecord};

use super::load_config;

/// Run the history command.
pub fn run(config_path: &str, history: Option<&str>, clear: bool, json: bool) {
    let config = load_config(config_path);
    let path = history.map_or(config.history_file, PathBuf::from);
    let log = HistoryLog::new(path);

    if clear {
        match log.clear() {
            Ok(true) => println!("Cleared {}", log.path().display()),
            Ok(false) => println!("No history at {}", log.path().display()),
            Err(e) => {
                eprintln!("Error: {e}");
                std::process::exit(1);
            }
        }
        return;
    }

    let mut records = match log.read_all() {
        Ok(r) => r,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };
    records.sort_by(|a, b| b.started_at.cmp(&a.started_at));

    if json {
        match serde_json::to_string_pretty(&records) {
            Ok(s) => println!("{s}"),
            Err(e) => {
                eprintln!("Error: {e}");
                std::process::exit(1);
            }
        }
        return;
    }

    if records.is_empty() {
        println!("No sessions recorded in {}", log.path().display());
        println!("Start one with: corewatch watch");
        return;
    }

    println!("{} session(s) in {}", records.len(), log.path().display());
    println!();
    println!(
        "  {:<28} {:<12} {:<19} {:>8} {:>8} {:>8} {:>8} {:>7}  {}",
        "Game", "Emulator", "Started", "Length", "Avg CPU", "Max CPU", "Max Temp", "Imbal", "Killer"
    );
    println!("  {}", "-".repeat(112));
    for record in &records {
        println!("  {}", format_row(record));
    }
}

fn format_row(r: &SessionRecord) -> String {
    format!(
        "{:<28} {:<12} {:<19} {:>8} {:>7.1}% {:>7.1}% {:>7.1}C {:>7.1}  {}",
        truncate(&r.workload, 28),
        truncate(&r.engine, 12),
        r.started_at.format("%Y-%m-%d %H:%M:%S"),
        format_length((r.ended_at - r.started_at).num_seconds()),
        r.cpu.avg,
        r.cpu.max,
        r.temperature.max,
        r.imbalance,
        if r.core_killer { "yes" } else { "no" }
    )
}

/// `1h02m`, `4m05s` or `12s`.
fn format_length(secs: i64) -> String {
    let secs = secs.max(0);
    let (h, m, s) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    if h > 0 {
        format!("{h}h{m:02}m")
    } else if m > 0 {
        format!("{m}m{s:02}s")
    } else {
        format!("{s}s")
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max.saturating_sub(1)).collect();
    out.push('~');
    out
}
