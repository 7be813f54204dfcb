//! `tracing` layer that feeds the scrollback ring, an optional log file and
//! the screen.

use std::fmt::Write as _;
use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber, warn};
use tracing_subscriber::layer::{Context, Layer};

use crate::history::{LogHistory, LogLevel, LogRecord};

/// Shared log state: scrollback, file sink and screen threshold.
///
/// The history is the only multi-writer structure; every record is appended
/// under its write lock.
pub struct LogSink {
    history: RwLock<LogHistory>,
    file: Mutex<Option<File>>,
    file_errors: AtomicU64,
    screen_level: AtomicU8,
}

impl LogSink {
    pub fn new(capacity: usize) -> Self {
        Self {
            history: RwLock::new(LogHistory::with_capacity(capacity)),
            file: Mutex::new(None),
            file_errors: AtomicU64::new(0),
            screen_level: AtomicU8::new(LogLevel::Info as u8),
        }
    }

    /// Set minimum level for printing to screen.
    pub fn set_screen_level(&self, level: LogLevel) {
        self.screen_level.store(level as u8, Ordering::Relaxed);
    }

    pub fn screen_level(&self) -> LogLevel {
        LogLevel::from_u8(self.screen_level.load(Ordering::Relaxed))
    }

    /// Mirror records into `path`, truncating it. `None` disables the file.
    ///
    /// An open failure leaves file logging disabled and is reported as a warning.
    pub fn set_file(&self, path: Option<&Path>) {
        let mut file = self.file.lock().unwrap_or_else(|e| e.into_inner());
        *file = None;

        let Some(path) = path else {
            return;
        };

        match File::create(path) {
            Ok(f) => *file = Some(f),
            Err(e) => {
                drop(file);
                warn!(path = %path.display(), error = %e, "Unable to open log file for writing");
            }
        }
    }

    /// Whether records are currently mirrored into a file.
    pub fn file_enabled(&self) -> bool {
        self.file.lock().unwrap_or_else(|e| e.into_inner()).is_some()
    }

    /// Failed writes to the log file. The first one disables the file.
    pub fn file_errors(&self) -> u64 {
        self.file_errors.load(Ordering::Relaxed)
    }

    pub fn log(&self, record: LogRecord) {
        let mut history = self.history.write().unwrap_or_else(|e| e.into_inner());

        let mut file = self.file.lock().unwrap_or_else(|e| e.into_inner());
        let failed = match file.as_mut() {
            Some(f) => writeln!(f, "{}", record.format_file()).err(),
            None => None,
        };
        if let Some(e) = failed {
            // no tracing here: the history lock is held
            *file = None;
            self.file_errors.fetch_add(1, Ordering::Relaxed);
            history.push(LogRecord::new(
                LogLevel::Error,
                file!(),
                line!(),
                module_path!(),
                format!("Log file write failed, file logging disabled: {e}"),
            ));
        }
        drop(file);

        if record.level >= self.screen_level() {
            println!("{}", record.format_screen());
        }

        history.push(record);
    }

    /// Records currently in the scrollback, oldest first.
    pub fn history(&self) -> Vec<LogRecord> {
        self.history
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .snapshot()
    }

    /// Whether records arrived since the display last refreshed.
    pub fn take_refresh(&self) -> bool {
        self.history
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .take_refresh()
    }
}

impl Default for LogSink {
    fn default() -> Self {
        Self::new(crate::LOG_HISTORY)
    }
}

/// Bridges `tracing` events into a [`LogSink`].
///
/// Error events carrying `fatal = true` are recorded at [`LogLevel::Panic`].
#[derive(Clone)]
pub struct HistoryLayer {
    sink: Arc<LogSink>,
}

impl HistoryLayer {
    pub fn new(sink: Arc<LogSink>) -> Self {
        Self { sink }
    }

    pub fn sink(&self) -> &Arc<LogSink> {
        &self.sink
    }
}

impl<S: Subscriber> Layer<S> for HistoryLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let meta = event.metadata();
        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);

        let mut level = LogLevel::from(*meta.level());
        if visitor.fatal && level == LogLevel::Error {
            level = LogLevel::Panic;
        }

        let record = LogRecord::new(
            level,
            meta.file().unwrap_or("?"),
            meta.line().unwrap_or(0),
            meta.module_path().unwrap_or_else(|| meta.target()),
            visitor.finish(),
        );
        self.sink.log(record);
    }
}

#[derive(Default)]
struct MessageVisitor {
    message: String,
    fields: String,
    fatal: bool,
}

impl MessageVisitor {
    fn finish(self) -> String {
        if self.fields.is_empty() {
            self.message
        } else if self.message.is_empty() {
            self.fields.trim_start().to_string()
        } else {
            format!("{}{}", self.message, self.fields)
        }
    }
}

impl Visit for MessageVisitor {
    fn record_bool(&mut self, field: &Field, value: bool) {
        if field.name() == "fatal" {
            self.fatal = value;
            return;
        }
        let _ = write!(self.fields, " {}={}", field.name(), value);
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message.push_str(value);
        } else {
            let _ = write!(self.fields, " {}={}", field.name(), value);
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            let _ = write!(self.message, "{:?}", value);
        } else {
            let _ = write!(self.fields, " {}={:?}", field.name(), value);
        }
    }
}
