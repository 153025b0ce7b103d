//! `corewatch watch`: poll the host until Ctrl+C.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Local;
use serde::Serialize;

use corewatch_core::{Config, DerivedMetrics, Poller, Reconnect, SessionEvent, TickOutcome};

use super::{alert_marker, load_config};

/// Run the watch command.
pub fn run(
    config_path: &str,
    host: Option<String>,
    interval: Option<u64>,
    history: Option<&str>,
    json: bool,
) {
    let mut config = load_config(config_path);
    if host.is_some() {
        config.host = host;
    }
    if let Some(ms) = interval {
        config.refresh_interval = ms;
    }
    if let Some(path) = history {
        config.history_file = PathBuf::from(path);
    }

    let mut poller = Poller::from_config(&config);
    let host = match poller.connect() {
        Reconnect::Connected { host } => host,
        Reconnect::NotFound => {
            eprintln!("Error: no host found (tried {} and {}.0/24)", config.host_name, config.subnet);
            eprintln!("Set \"host\" in {config_path} or pass --host.");
            std::process::exit(1);
        }
        Reconnect::ConnectFailed { host } => {
            eprintln!("Error: could not open an SSH session to {}@{host}", config.ssh_user);
            std::process::exit(1);
        }
    };

    let stop = Arc::new(AtomicBool::new(false));
    let s = stop.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        s.store(true, Ordering::SeqCst);
    }) {
        eprintln!("Error setting Ctrl+C handler: {e}");
        std::process::exit(1);
    }

    if !json {
        println!("Watching {}@{host}", config.ssh_user);
        println!("  Interval:  {}ms", config.refresh().as_millis());
        println!("  History:   {}", config.history_file.display());
        println!("  Stop with Ctrl+C");
        println!();
    }

    let unwritten = poller.run(&stop, |outcome| {
        if json {
            match serde_json::to_string(&TickLine::from_outcome(outcome)) {
                Ok(line) => println!("{line}"),
                Err(e) => log::error!("cannot encode tick: {e}"),
            }
        } else {
            for line in format_outcome(outcome, &config) {
                println!("{line}");
            }
        }
    });

    if !json {
        println!();
        println!("Stopped.");
    }
    if unwritten > 0 {
        eprintln!(
            "Warning: {unwritten} session record(s) could not be written to {}",
            config.history_file.display()
        );
        std::process::exit(1);
    }
}

/// Render one tick as human-readable lines: events first, then status.
fn format_outcome(outcome: &TickOutcome, config: &Config) -> Vec<String> {
    let time = Local::now().format("%H:%M:%S");
    let mut lines = Vec::new();
    match outcome {
        TickOutcome::Sampled {
            metrics,
            workload,
            engine,
            event,
            anomaly,
            ..
        } => {
            match event {
                SessionEvent::Unchanged => {}
                SessionEvent::Started { workload } => {
                    lines.push(format!("{time} >> session started: {workload}"));
                }
                SessionEvent::Rotated { workload, record } => {
                    if let Some(r) = record {
                        lines.push(format!(
                            "{time} << session ended: {} (avg cpu {:.1}%, max {:.1}%, core killer {})",
                            r.workload,
                            r.cpu.avg,
                            r.cpu.max,
                            if r.core_killer { "yes" } else { "no" }
                        ));
                    }
                    if !workload.is_empty() {
                        lines.push(format!("{time} >> session started: {workload}"));
                    }
                }
            }
            if *anomaly {
                lines.push(format!(
                    "{time} !! core killer: one core at {:.0}% with imbalance {:.1}%",
                    metrics.raw.max_core(),
                    metrics.imbalance
                ));
            }
            lines.push(format!(
                "{time} {}",
                status_line(metrics, workload, engine.as_deref(), config)
            ));
        }
        TickOutcome::Failed {
            error,
            consecutive_failures,
            reconnect,
        } => {
            lines.push(format!(
                "{time} -- no data ({consecutive_failures} in a row): {error}"
            ));
            match reconnect {
                Some(Reconnect::Connected { host }) => {
                    lines.push(format!("{time} -- reconnected to {host}"));
                }
                Some(Reconnect::NotFound) => lines.push(format!("{time} -- host not found")),
                Some(Reconnect::ConnectFailed { host }) => {
                    lines.push(format!("{time} -- reconnection to {host} failed"));
                }
                None => {}
            }
        }
    }
    lines
}

fn status_line(
    metrics: &DerivedMetrics,
    workload: &str,
    engine: Option<&str>,
    config: &Config,
) -> String {
    let m = &metrics.smoothed;
    let cores: Vec<String> = m.cores.iter().map(|c| format!("{c:5.1}")).collect();
    let game = if workload.is_empty() {
        "-".to_string()
    } else {
        match engine {
            Some(e) => format!("{workload} [{e}]"),
            None => workload.to_string(),
        }
    };
    format!(
        "cpu {:5.1}%{} ram {:5.1}% temp {:4.1}C{} cores [{}] imb {:5.1}  {game}",
        m.cpu,
        alert_marker(m.cpu, config.cpu_alert_threshold),
        m.ram,
        m.temperature,
        alert_marker(m.temperature, config.temp_alert_threshold),
        cores.join(" "),
        metrics.imbalance,
    )
}

/// One `--json` output line.
#[derive(Debug, Serialize)]
struct TickLine<'a> {
    timestamp: String,
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    metrics: Option<&'a DerivedMetrics>,
    #[serde(skip_serializing_if = "Option::is_none")]
    workload: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    engine: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    session: Option<&'static str>,
    core_killer: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    failures: Option<u32>,
}

impl<'a> TickLine<'a> {
    fn from_outcome(outcome: &'a TickOutcome) -> Self {
        let timestamp = Local::now().to_rfc3339();
        match outcome {
            TickOutcome::Sampled {
                metrics,
                workload,
                engine,
                event,
                anomaly,
                ..
            } => Self {
                timestamp,
                ok: true,
                metrics: Some(metrics),
                workload: Some(workload.as_str()),
                engine: engine.as_deref(),
                session: match event {
                    SessionEvent::Unchanged => None,
                    SessionEvent::Started { .. } => Some("started"),
                    SessionEvent::Rotated { .. } => Some("rotated"),
                },
                core_killer: *anomaly,
                error: None,
                failures: None,
            },
            TickOutcome::Failed {
                error,
                consecutive_failures,
                ..
            } => Self {
                timestamp,
                ok: false,
                metrics: None,
                workload: None,
                engine: None,
                session: None,
                core_killer: false,
                error: Some(error.as_str()),
                failures: Some(*consecutive_failures),
            },
        }
    }
}
