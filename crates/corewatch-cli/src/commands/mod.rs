pub mod config;
pub mod discover;
pub mod history;
pub mod watch;

use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

use corewatch_core::Config;

/// Log line timestamp layout.
const LOG_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Install the logger: `RUST_LOG` filter (default `info`), one
/// `timestamp [LEVEL] message` line per record. With `log_file`, records are
/// appended to that file instead of stderr.
pub fn init_logging(log_file: Option<&str>) {
    let env = env_logger::Env::default().default_filter_or("info");
    let mut builder = env_logger::Builder::from_env(env);
    builder.format(|buf, record| {
        writeln!(
            buf,
            "{} [{}] {}",
            chrono::Local::now().format(LOG_TIME_FORMAT),
            record.level(),
            record.args()
        )
    });

    if let Some(path) = log_file {
        match OpenOptions::new().create(true).append(true).open(path) {
            Ok(file) => {
                builder.target(env_logger::Target::Pipe(Box::new(file)));
            }
            Err(e) => eprintln!("Warning: cannot open log file {path}: {e}; logging to stderr"),
        }
    }

    let _ = builder.try_init();
}

/// Load the configuration, applying defaults for anything missing.
pub fn load_config(path: &str) -> Config {
    Config::load(Path::new(path))
}

/// `!` when `value` exceeds `threshold`, blank otherwise.
pub fn alert_marker(value: f64, threshold: f64) -> &'static str {
    if value > threshold { "!" } else { " " }
}
