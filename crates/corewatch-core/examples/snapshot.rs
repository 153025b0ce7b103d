//! One-off snapshot of the remote host.
//!
//! Locates the host, takes two ticks one interval apart (the first only
//! primes the jiffy counters) and prints the derived metrics.
//!
//! Run: `cargo run --example snapshot -- [config.json]`

use std::path::PathBuf;

use corewatch_core::{Config, Poller, Reconnect, TickOutcome};

fn main() {
    let path = std::env::args()
        .nth(1)
        .map_or_else(|| PathBuf::from(corewatch_core::DEFAULT_CONFIG_FILE), PathBuf::from);
    let config = Config::load(&path);
    let mut poller = Poller::from_config(&config);

    match poller.connect() {
        Reconnect::Connected { host } => println!("Connected to {host}"),
        other => {
            eprintln!("Could not reach the host: {other:?}");
            std::process::exit(1);
        }
    }

    poller.tick();
    std::thread::sleep(poller.interval());

    match poller.tick() {
        TickOutcome::Sampled {
            metrics, workload, ..
        } => {
            let r = metrics.raw;
            println!("CPU:      {:.1}%", r.cpu);
            for (i, core) in r.cores.iter().enumerate() {
                println!("  core{}:  {core:.1}%", i + 1);
            }
            println!("RAM:      {:.1}%", r.ram);
            println!("Temp:     {:.1}C", r.temperature);
            println!(
                "Workload: {}",
                if workload.is_empty() { "-" } else { workload.as_str() }
            );
        }
        TickOutcome::Failed { error, .. } => {
            eprintln!("Fetch failed: {error}");
            std::process::exit(1);
        }
    }
}
