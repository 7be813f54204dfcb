//! Log records and the fixed-size scrollback ring.

use chrono::{DateTime, Local};
use std::fmt;
use std::path::Path;

/// Default number of records kept in the scrollback ring.
pub const LOG_HISTORY: usize = 64;

/// Maximum length of a single log message, in bytes.
pub const LOG_MAX_LINE: usize = 1024;

/// Severity of a log record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum LogLevel {
    Trace = 0,
    Debug = 1,
    Info = 2,
    Warning = 3,
    Error = 4,
    Panic = 5,
}

impl LogLevel {
    /// Two-letter tag used in the file format.
    pub fn tag(&self) -> &'static str {
        match self {
            LogLevel::Trace => "tt",
            LogLevel::Debug => "dd",
            LogLevel::Info => "II",
            LogLevel::Warning => "WW",
            LogLevel::Error => "EE",
            LogLevel::Panic => "PP",
        }
    }

    /// Label printed in front of a message on screen.
    pub fn screen_prefix(&self) -> &'static str {
        match self {
            LogLevel::Trace | LogLevel::Debug | LogLevel::Info => "",
            LogLevel::Warning => "WARNING: ",
            LogLevel::Error => "!ERROR!: ",
            LogLevel::Panic => "!PANIC!: ",
        }
    }

    pub(crate) fn from_u8(raw: u8) -> Self {
        match raw {
            0 => LogLevel::Trace,
            1 => LogLevel::Debug,
            2 => LogLevel::Info,
            3 => LogLevel::Warning,
            4 => LogLevel::Error,
            _ => LogLevel::Panic,
        }
    }
}

impl From<tracing::Level> for LogLevel {
    fn from(level: tracing::Level) -> Self {
        match level {
            tracing::Level::TRACE => LogLevel::Trace,
            tracing::Level::DEBUG => LogLevel::Debug,
            tracing::Level::INFO => LogLevel::Info,
            tracing::Level::WARN => LogLevel::Warning,
            tracing::Level::ERROR => LogLevel::Error,
        }
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "trace" => Ok(LogLevel::Trace),
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warning" | "warn" => Ok(LogLevel::Warning),
            "error" => Ok(LogLevel::Error),
            "panic" => Ok(LogLevel::Panic),
            other => Err(format!("unknown log level '{other}'")),
        }
    }
}

/// A single log message with its caller context.
#[derive(Debug, Clone)]
pub struct LogRecord {
    pub timestamp: DateTime<Local>,
    pub level: LogLevel,
    /// Source file of the caller
    pub file: String,
    /// Line number of the caller
    pub line: u32,
    /// Module path of the caller (function context)
    pub module: String,
    pub message: String,
}

impl LogRecord {
    pub fn new(
        level: LogLevel,
        file: impl Into<String>,
        line: u32,
        module: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        let mut message = message.into();
        truncate_utf8(&mut message, LOG_MAX_LINE - 1);
        Self {
            timestamp: Local::now(),
            level,
            file: file.into(),
            line,
            module: module.into(),
            message,
        }
    }

    /// Verbose representation written to the log file.
    ///
    /// `II 2014-03-14 13:37:05.123 [route.rs:42(fastpath::routing)] message`
    pub fn format_file(&self) -> String {
        let file = Path::new(&self.file)
            .file_name()
            .map(|f| f.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.file.clone());
        format!(
            "{} {} [{}:{}({})] {}",
            self.level.tag(),
            self.timestamp.format("%Y-%m-%d %H:%M:%S%.3f"),
            file,
            self.line,
            self.module,
            self.message
        )
    }

    /// Short representation printed on screen.
    pub fn format_screen(&self) -> String {
        format!("{}{}", self.level.screen_prefix(), self.message)
    }
}

impl fmt::Display for LogRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.format_file())
    }
}

fn truncate_utf8(s: &mut String, max: usize) {
    if s.len() <= max {
        return;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    s.truncate(end);
}

/// Circular scrollback buffer.
///
/// `head` points one past the most recent record, `tail` at the oldest. When
/// `head` catches up with `tail` the oldest record is overwritten.
#[derive(Debug)]
pub struct LogHistory {
    msgs: Vec<Option<LogRecord>>,
    head: usize,
    tail: usize,
    need_refresh: bool,
}

impl LogHistory {
    pub fn new() -> Self {
        Self::with_capacity(LOG_HISTORY)
    }

    /// A ring with `capacity` slots keeps at most `capacity - 1` records.
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(2);
        Self {
            msgs: vec![None; capacity],
            head: 0,
            tail: 0,
            need_refresh: false,
        }
    }

    pub fn push(&mut self, record: LogRecord) {
        let cap = self.msgs.len();
        self.msgs[self.head] = Some(record);
        self.head = (self.head + 1) % cap;
        if self.head == self.tail {
            self.tail = (self.tail + 1) % cap;
        }
        self.need_refresh = true;
    }

    pub fn len(&self) -> usize {
        let cap = self.msgs.len();
        (self.head + cap - self.tail) % cap
    }

    pub fn is_empty(&self) -> bool {
        self.head == self.tail
    }

    /// Records from oldest to newest.
    pub fn snapshot(&self) -> Vec<LogRecord> {
        let cap = self.msgs.len();
        let mut out = Vec::with_capacity(self.len());
        let mut idx = self.tail;
        while idx != self.head {
            if let Some(record) = &self.msgs[idx] {
                out.push(record.clone());
            }
            idx = (idx + 1) % cap;
        }
        out
    }

    /// Returns whether new records arrived since the last call.
    pub fn take_refresh(&mut self) -> bool {
        std::mem::replace(&mut self.need_refresh, false)
    }
}

impl Default for LogHistory {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(msg: &str) -> LogRecord {
        LogRecord::new(LogLevel::Info, "src/route.rs", 7, "fastpath::routing", msg)
    }

    #[test]
    fn test_history_wraps_and_drops_oldest() {
        let mut history = LogHistory::with_capacity(4);
        for i in 0..6 {
            history.push(record(&format!("msg {i}")));
        }

        let msgs: Vec<_> = history.snapshot().into_iter().map(|r| r.message).collect();
        assert_eq!(msgs, vec!["msg 3", "msg 4", "msg 5"]);
        assert_eq!(history.len(), 3);
    }

    #[test]
    fn test_refresh_flag() {
        let mut history = LogHistory::new();
        assert!(!history.take_refresh());
        history.push(record("hello"));
        assert!(history.take_refresh());
        assert!(!history.take_refresh());
    }

    #[test]
    fn test_format_file_uses_basename() {
        let r = record("lpm miss");
        let line = r.format_file();
        assert!(line.starts_with("II "));
        assert!(line.ends_with("[route.rs:7(fastpath::routing)] lpm miss"));
    }

    #[test]
    fn test_screen_prefix() {
        let mut r = record("boom");
        assert_eq!(r.format_screen(), "boom");
        r.level = LogLevel::Error;
        assert_eq!(r.format_screen(), "!ERROR!: boom");
        r.level = LogLevel::Panic;
        assert_eq!(r.format_screen(), "!PANIC!: boom");
    }

    #[test]
    fn test_long_message_truncated() {
        let r = record(&"x".repeat(4000));
        assert_eq!(r.message.len(), LOG_MAX_LINE - 1);
    }

    #[test]
    fn test_level_parse() {
        assert_eq!("warn".parse::<LogLevel>().unwrap(), LogLevel::Warning);
        assert_eq!("ERROR".parse::<LogLevel>().unwrap(), LogLevel::Error);
        assert!("loud".parse::<LogLevel>().is_err());
    }
}
