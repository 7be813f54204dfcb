//! fastpath-log: diagnostic sink for the forwarding stack
//!
//! Keeps the most recent log records in a fixed-size ring so a console can
//! display them, optionally mirrors every record into a file, and prints
//! records above a threshold to stdout.
//!
//! # Example
//! ```ignore
//! use fastpath_log::{LogConfig, LogLevel};
//!
//! let sink = fastpath_log::init(&LogConfig::default())?;
//! sink.set_screen_level(LogLevel::Warning);
//! tracing::info!(node = "ipfwd", "route table ready");
//! for record in sink.history() {
//!     println!("{record}");
//! }
//! ```

mod history;
mod layer;

use std::path::PathBuf;
use std::sync::Arc;

use tracing_subscriber::filter::{EnvFilter, filter_fn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::Layer as _;

pub use history::{LOG_HISTORY, LOG_MAX_LINE, LogHistory, LogLevel, LogRecord};
pub use layer::{HistoryLayer, LogSink};

/// Target used by per-packet diagnostics. Events with this target prefix never
/// reach the history ring, so its lock stays off the forwarding path.
pub const DATAPATH_TARGET: &str = "fastpath::datapath";

/// Logging setup.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Number of slots in the scrollback ring.
    pub history: usize,
    /// Optional file every record is mirrored into.
    pub file: Option<PathBuf>,
    /// Minimum level printed by the history sink on screen.
    pub screen_level: LogLevel,
    /// Whether to also install a `fmt` layer governed by `RUST_LOG`.
    pub fmt: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            history: LOG_HISTORY,
            file: None,
            screen_level: LogLevel::Warning,
            fmt: true,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LogError {
    #[error("global subscriber already installed: {0}")]
    AlreadyInstalled(#[from] tracing_subscriber::util::TryInitError),
}

/// Build the sink described by `config` without installing anything.
pub fn sink(config: &LogConfig) -> Arc<LogSink> {
    let sink = Arc::new(LogSink::new(config.history));
    sink.set_screen_level(config.screen_level);
    sink.set_file(config.file.as_deref());
    sink
}

/// Install the global subscriber: history layer plus an optional `fmt` layer.
pub fn init(config: &LogConfig) -> Result<Arc<LogSink>, LogError> {
    let sink = sink(config);

    let history = HistoryLayer::new(Arc::clone(&sink))
        .with_filter(filter_fn(|meta| !meta.target().starts_with(DATAPATH_TARGET)));

    let fmt = config.fmt.then(|| {
        tracing_subscriber::fmt::layer().with_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
    });

    tracing_subscriber::registry()
        .with(history)
        .with(fmt)
        .try_init()?;

    Ok(sink)
}
