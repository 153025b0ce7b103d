//! # corewatch-core
//!
//! **Live telemetry for a small remote box, one SSH round trip per second.**
//!
//! `corewatch-core` samples CPU, per-core usage, RAM, SoC temperature and the
//! running workload on a remote Linux host, turns the raw `/proc/stat` jiffy
//! counters into usage rates, and keeps a per-workload session history with a
//! summary row appended to a CSV log whenever the workload changes.
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::path::Path;
//! use corewatch_core::{Config, Poller, TickOutcome};
//!
//! let config = Config::load(Path::new("config.json"));
//! let mut poller = Poller::from_config(&config);
//! poller.connect();
//!
//! if let TickOutcome::Sampled { metrics, workload, .. } = poller.tick() {
//!     println!("{workload}: cpu {:.1}%", metrics.smoothed.cpu);
//! }
//! poller.shutdown(chrono::Local::now());
//! ```
//!
//! ## Architecture
//!
//! Executor → RawSample → RateCounter / Smoother → ImbalanceTracker →
//! AnomalyDetector → SessionTracker → HistoryLog
//!
//! - Counter lines become usage through [`RateCounter`]; the first sample of
//!   any counter (and the first after a reconnection) reads 0%.
//! - Display values go through [`Smoother`]; jumps larger than the snap
//!   threshold are taken immediately.
//! - Raw per-core usage feeds a 10-sample [`ImbalanceTracker`]. The core
//!   killer latch ([`AnomalyDetector`]) fires once per session when one core
//!   is saturated while the spread stays high.
//! - [`SessionTracker`] rotates on workload change, quarantines the first
//!   seconds of the new session and hands back the outgoing one, which the
//!   [`Poller`] aggregates and appends to the [`HistoryLog`].
//!
//! The remote side is reached through the [`CommandExecutor`] and
//! [`Connector`] traits, so the whole loop runs against scripted fakes in
//! tests.

pub mod anomaly;
pub mod config;
pub mod discovery;
pub mod error;
pub mod executor;
pub mod history;
pub mod imbalance;
pub mod poller;
pub mod rate;
pub mod sample;
pub mod session;
pub mod smoothing;
pub mod workload;

pub use anomaly::AnomalyDetector;
pub use config::{Config, DEFAULT_CONFIG_FILE};
pub use discovery::{Connector, NetworkConnector};
pub use error::{ConfigError, ExecError, HistoryError, ParseError};
pub use executor::{CommandExecutor, SshExecutor};
pub use history::{HistoryLog, MetricSummary, SessionRecord, aggregate};
pub use imbalance::ImbalanceTracker;
pub use poller::{
    FAILURE_THRESHOLD, LinkState, MetricHistory, Poller, Reconnect, SessionEvent, TickOutcome,
};
pub use rate::{CORE_COUNT, CounterSample, RateCounter};
pub use sample::{DerivedMetrics, METRICS_COMMAND, RawSample, Readings, SessionSample};
pub use session::{FinishedSession, Session, SessionTracker, Transition};
pub use smoothing::Smoother;
pub use workload::{normalize_engine, normalize_workload};

/// Library version (from Cargo.toml).
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
