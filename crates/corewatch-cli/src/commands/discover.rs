//! `corewatch discover`: locate the host once.

use std::time::Instant;

use corewatch_core::{Connector, NetworkConnector};

use super::load_config;

/// Run the discover command.
pub fn run(config_path: &str, connect: bool) {
    let config = load_config(config_path);
    let connector = NetworkConnector::new(config.clone());

    match &config.host {
        Some(host) => println!("Using fixed host {host}"),
        None => println!(
            "Looking for {} ({}.0/24, port {})...",
            config.host_name, config.subnet, config.ssh_port
        ),
    }

    let start = Instant::now();
    let Some(host) = connector.discover() else {
        eprintln!(
            "No host found after {:.1}s",
            start.elapsed().as_secs_f64()
        );
        std::process::exit(1);
    };
    println!("  Host:  {host}  ({:.1}s)", start.elapsed().as_secs_f64());

    if !connect {
        return;
    }
    match connector.connect(&host) {
        Some(_) => println!("  SSH:   ok ({}@{host})", config.ssh_user),
        None => {
            println!("  SSH:   failed ({}@{host})", config.ssh_user);
            std::process::exit(1);
        }
    }
}
