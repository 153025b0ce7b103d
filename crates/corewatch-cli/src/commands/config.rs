//! `corewatch config`: show (and optionally write) the effective configuration.

use std::path::Path;

use corewatch_core::Config;

use super::load_config;

/// Run the config command.
pub fn run(config_path: &str, write: bool) {
    let config = load_config(config_path);

    match render(&config) {
        Ok(json) => println!("{json}"),
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    }

    if write {
        if let Err(e) = config.save(Path::new(config_path)) {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
        eprintln!("Wrote {config_path}");
    }
}

fn render(config: &Config) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(config)
}
