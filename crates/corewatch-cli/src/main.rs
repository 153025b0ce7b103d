//! CLI for corewatch: live telemetry and session history of a remote box.

mod commands;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "corewatch")]
#[command(about = "corewatch: per-core load, imbalance and per-game session history over SSH")]
#[command(version = corewatch_core::VERSION)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Poll the host until Ctrl+C, printing one status line per tick.
    /// Session summaries are appended to the history log on every game change.
    Watch {
        /// Configuration file (missing keys fall back to defaults)
        #[arg(long, default_value = corewatch_core::DEFAULT_CONFIG_FILE)]
        config: String,

        /// Fixed host address; skips discovery
        #[arg(long)]
        host: Option<String>,

        /// Tick interval in milliseconds (overrides refresh_interval)
        #[arg(long)]
        interval: Option<u64>,

        /// Session history CSV (overrides history_file)
        #[arg(long)]
        history: Option<String>,

        /// Print one JSON object per tick instead of a status line
        #[arg(long)]
        json: bool,

        /// Append log output to this file instead of stderr
        #[arg(long)]
        log_file: Option<String>,
    },

    /// List recorded sessions, newest first
    History {
        #[arg(long, default_value = corewatch_core::DEFAULT_CONFIG_FILE)]
        config: String,

        /// Session history CSV (overrides history_file)
        #[arg(long)]
        history: Option<String>,

        /// Delete the history log
        #[arg(long)]
        clear: bool,

        /// Print records as JSON
        #[arg(long)]
        json: bool,
    },

    /// Locate the host once (DNS, then subnet scan) and test an SSH session
    Discover {
        #[arg(long, default_value = corewatch_core::DEFAULT_CONFIG_FILE)]
        config: String,

        /// Only locate the host; skip the SSH handshake
        #[arg(long)]
        no_connect: bool,
    },

    /// Print the effective configuration as JSON
    Config {
        #[arg(long, default_value = corewatch_core::DEFAULT_CONFIG_FILE)]
        config: String,

        /// Write the effective configuration back to the file
        #[arg(long)]
        write: bool,
    },
}

fn main() {
    let cli = Cli::parse();

    match cli.command {
        Commands::Watch {
            config,
            host,
            interval,
            history,
            json,
            log_file,
        } => {
            commands::init_logging(log_file.as_deref());
            commands::watch::run(&config, host, interval, history.as_deref(), json);
        }
        Commands::History {
            config,
            history,
            clear,
            json,
        } => {
            commands::init_logging(None);
            commands::history::run(&config, history.as_deref(), clear, json);
        }
        Commands::Discover { config, no_connect } => {
            commands::init_logging(None);
            commands::discover::run(&config, !no_connect);
        }
        Commands::Config { config, write } => {
            commands::init_logging(None);
            commands::config::run(&config, write);
        }
    }
}
