//! Structured Logging
//!
//! Leveled, structured logging for the runtime itself: executor startup,
//! signal handling, teardown progress, and unobserved fiber failures all
//! report through here. Entries carry key-value fields and render as plain
//! text or JSON, to stderr by default.
//!
//! Level and enablement checks are atomic reads, so disabled logging stays
//! off the interpreter's hot path.
//!
//! # Example
//!
//! ```rust,ignore
//! use ichor::log::{self, LogBuilder, LogLevel};
//!
//! log::info("runtime started");
//!
//! LogBuilder::new(LogLevel::Warn)
//!     .message("fiber failed without observer")
//!     .fiber(fiber_id)
//!     .field_str("cause", cause.pretty())
//!     .emit();
//! ```

use std::fmt;
use std::io::Write;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::OnceLock;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;

use crate::fiber::FiberId;

/// Log severity, ordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum LogLevel {
    /// Most verbose.
    Trace = 0,
    Debug = 1,
    Info = 2,
    Warn = 3,
    Error = 4,
    /// No logging.
    Off = 5,
}

impl LogLevel {
    /// The level name.
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "TRACE",
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
            LogLevel::Off => "OFF",
        }
    }

    fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(LogLevel::Trace),
            1 => Some(LogLevel::Debug),
            2 => Some(LogLevel::Info),
            3 => Some(LogLevel::Warn),
            4 => Some(LogLevel::Error),
            5 => Some(LogLevel::Off),
            _ => None,
        }
    }

    /// Parse a level name, case-insensitive.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "TRACE" => Some(LogLevel::Trace),
            "DEBUG" => Some(LogLevel::Debug),
            "INFO" => Some(LogLevel::Info),
            "WARN" | "WARNING" => Some(LogLevel::Warn),
            "ERROR" => Some(LogLevel::Error),
            "OFF" | "NONE" => Some(LogLevel::Off),
            _ => None,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Default for LogLevel {
    fn default() -> Self {
        LogLevel::Info
    }
}

/// Output rendering for log entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable single line.
    #[default]
    Plain,
    /// One JSON object per line.
    Json,
}

impl LogFormat {
    /// Parse a format name, case-insensitive.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "plain" | "text" => Some(LogFormat::Plain),
            "json" => Some(LogFormat::Json),
            _ => None,
        }
    }
}

/// A value attached to a log field.
#[derive(Debug, Clone)]
pub enum LogValue {
    /// Text value.
    String(String),
    /// Integer value.
    Int(i64),
    /// Boolean value.
    Bool(bool),
}

impl fmt::Display for LogValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogValue::String(s) => f.write_str(s),
            LogValue::Int(i) => write!(f, "{i}"),
            LogValue::Bool(b) => write!(f, "{b}"),
        }
    }
}

impl LogValue {
    fn to_json(&self) -> String {
        match self {
            LogValue::String(s) => format!("\"{}\"", escape_json(s)),
            LogValue::Int(i) => i.to_string(),
            LogValue::Bool(b) => b.to_string(),
        }
    }
}

/// One structured log entry.
#[derive(Debug, Clone)]
pub struct LogEntry {
    /// Severity.
    pub level: LogLevel,
    /// Free-form message.
    pub message: String,
    /// Structured key-value fields, in insertion order.
    pub fields: Vec<(String, LogValue)>,
    /// Unix milliseconds.
    pub timestamp: u64,
    /// Name of the emitting thread, when it has one.
    pub thread_name: Option<String>,
}

impl LogEntry {
    /// A new entry stamped with the current time and thread.
    pub fn new(level: LogLevel, message: impl Into<String>) -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        Self {
            level,
            message: message.into(),
            fields: Vec::new(),
            timestamp,
            thread_name: std::thread::current().name().map(str::to_string),
        }
    }

    /// Render as a single human-readable line.
    pub fn format_plain(&self) -> String {
        let mut out = String::new();
        let secs = self.timestamp / 1000;
        let millis = self.timestamp % 1000;
        out.push_str(&format!("[{secs}.{millis:03}] {:<5} ", self.level.as_str()));
        if let Some(thread) = &self.thread_name {
            out.push_str(&format!("({thread}) "));
        }
        out.push_str(&self.message);
        if !self.fields.is_empty() {
            out.push_str(" {");
            for (i, (key, value)) in self.fields.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                out.push_str(&format!("{key}={value}"));
            }
            out.push('}');
        }
        out
    }

    /// Render as one JSON object.
    pub fn format_json(&self) -> String {
        let mut out = String::from("{");
        out.push_str(&format!("\"timestamp\":{}", self.timestamp));
        out.push_str(&format!(",\"level\":\"{}\"", self.level.as_str()));
        if let Some(thread) = &self.thread_name {
            out.push_str(&format!(",\"thread\":\"{}\"", escape_json(thread)));
        }
        out.push_str(&format!(",\"message\":\"{}\"", escape_json(&self.message)));
        if !self.fields.is_empty() {
            out.push_str(",\"fields\":{");
            for (i, (key, value)) in self.fields.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&format!("\"{}\":{}", escape_json(key), value.to_json()));
            }
            out.push('}');
        }
        out.push('}');
        out
    }

    fn format(&self, format: LogFormat) -> String {
        match format {
            LogFormat::Plain => self.format_plain(),
            LogFormat::Json => self.format_json(),
        }
    }
}

fn escape_json(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c.is_control() => out.push_str(&format!("\\u{:04x}", c as u32)),
            c => out.push(c),
        }
    }
    out
}

// ============================================================================
// GLOBAL LOGGER
// ============================================================================

static MIN_LEVEL: AtomicU8 = AtomicU8::new(LogLevel::Info as u8);
static ENABLED: AtomicBool = AtomicBool::new(true);

struct SinkConfig {
    format: LogFormat,
    use_stderr: bool,
}

fn sink() -> &'static Mutex<SinkConfig> {
    static SINK: OnceLock<Mutex<SinkConfig>> = OnceLock::new();
    SINK.get_or_init(|| {
        Mutex::new(SinkConfig {
            format: LogFormat::Plain,
            use_stderr: true,
        })
    })
}

/// Set the minimum level.
pub fn set_level(level: LogLevel) {
    MIN_LEVEL.store(level as u8, Ordering::SeqCst);
}

/// The current minimum level.
pub fn level() -> LogLevel {
    LogLevel::from_u8(MIN_LEVEL.load(Ordering::SeqCst)).unwrap_or(LogLevel::Info)
}

/// Set the output format.
pub fn set_format(format: LogFormat) {
    sink().lock().format = format;
}

/// Route output to stderr (default) or stdout.
pub fn set_use_stderr(use_stderr: bool) {
    sink().lock().use_stderr = use_stderr;
}

/// Enable or disable logging entirely.
pub fn set_enabled(enabled: bool) {
    ENABLED.store(enabled, Ordering::SeqCst);
}

/// Whether an entry at `level` would be written.
pub fn would_log(level: LogLevel) -> bool {
    ENABLED.load(Ordering::SeqCst) && level >= self::level()
}

/// Write an entry, subject to the level gate.
pub fn emit(entry: &LogEntry) {
    if !would_log(entry.level) {
        return;
    }
    let (line, use_stderr) = {
        let config = sink().lock();
        (entry.format(config.format), config.use_stderr)
    };
    if use_stderr {
        let _ = writeln!(std::io::stderr(), "{line}");
    } else {
        let _ = writeln!(std::io::stdout(), "{line}");
    }
}

/// Builder for structured entries.
#[derive(Debug)]
pub struct LogBuilder {
    entry: LogEntry,
}

impl LogBuilder {
    /// Start an entry at `level`.
    pub fn new(level: LogLevel) -> Self {
        Self {
            entry: LogEntry::new(level, ""),
        }
    }

    /// Set the message.
    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.entry.message = message.into();
        self
    }

    /// Attribute the entry to a fiber.
    pub fn fiber(self, id: FiberId) -> Self {
        self.field_int("fiber", id.seq as i64)
    }

    /// Add a text field.
    pub fn field_str(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.entry
            .fields
            .push((key.into(), LogValue::String(value.into())));
        self
    }

    /// Add an integer field.
    pub fn field_int(mut self, key: impl Into<String>, value: i64) -> Self {
        self.entry.fields.push((key.into(), LogValue::Int(value)));
        self
    }

    /// Add a boolean field.
    pub fn field_bool(mut self, key: impl Into<String>, value: bool) -> Self {
        self.entry.fields.push((key.into(), LogValue::Bool(value)));
        self
    }

    /// Write the entry, subject to the level gate.
    pub fn emit(self) {
        emit(&self.entry);
    }
}

/// Log a bare message at `level`.
pub fn log(level: LogLevel, message: impl Into<String>) {
    if !would_log(level) {
        return;
    }
    emit(&LogEntry::new(level, message));
}

/// Log at trace level.
pub fn trace(message: impl Into<String>) {
    log(LogLevel::Trace, message);
}

/// Log at debug level.
pub fn debug(message: impl Into<String>) {
    log(LogLevel::Debug, message);
}

/// Log at info level.
pub fn info(message: impl Into<String>) {
    log(LogLevel::Info, message);
}

/// Log at warn level.
pub fn warn(message: impl Into<String>) {
    log(LogLevel::Warn, message);
}

/// Log at error level.
pub fn error(message: impl Into<String>) {
    log(LogLevel::Error, message);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_ordering() {
        assert!(LogLevel::Trace < LogLevel::Debug);
        assert!(LogLevel::Debug < LogLevel::Info);
        assert!(LogLevel::Info < LogLevel::Warn);
        assert!(LogLevel::Warn < LogLevel::Error);
        assert!(LogLevel::Error < LogLevel::Off);
    }

    #[test]
    fn test_level_parse() {
        assert_eq!(LogLevel::parse("debug"), Some(LogLevel::Debug));
        assert_eq!(LogLevel::parse("WARNING"), Some(LogLevel::Warn));
        assert_eq!(LogLevel::parse("none"), Some(LogLevel::Off));
        assert_eq!(LogLevel::parse("loud"), None);
    }

    #[test]
    fn test_format_parse() {
        assert_eq!(LogFormat::parse("text"), Some(LogFormat::Plain));
        assert_eq!(LogFormat::parse("JSON"), Some(LogFormat::Json));
        assert_eq!(LogFormat::parse("xml"), None);
    }

    #[test]
    fn test_plain_rendering() {
        let entry = LogEntry::new(LogLevel::Info, "fiber done");
        let entry = LogBuilder { entry }
            .fiber(FiberId::for_test(9))
            .field_str("outcome", "success")
            .entry;
        let plain = entry.format_plain();
        assert!(plain.contains("INFO"));
        assert!(plain.contains("fiber done"));
        assert!(plain.contains("fiber=9"));
        assert!(plain.contains("outcome=success"));
    }

    #[test]
    fn test_json_rendering_escapes() {
        let entry = LogEntry::new(LogLevel::Error, "line1\nline2 \"quoted\"");
        let json = entry.format_json();
        assert!(json.contains("\"level\":\"ERROR\""));
        assert!(json.contains("line1\\nline2 \\\"quoted\\\""));
    }

    #[test]
    fn test_would_log_respects_level() {
        let original = level();
        set_level(LogLevel::Warn);
        assert!(!would_log(LogLevel::Info));
        assert!(would_log(LogLevel::Error));
        set_level(original);
    }
}
