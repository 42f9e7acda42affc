//! Minimal stderr logging.
//!
//! Secrets never reach a log line: call sites log public material only
//! (networks, slot names, counts) and shorten identifiers such as
//! addresses with [`abbrev`]. Debug lines are dropped unless verbose
//! logging is switched on at runtime.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

static VERBOSE: AtomicBool = AtomicBool::new(false);

pub fn set_verbose(enabled: bool) {
    VERBOSE.store(enabled, Ordering::SeqCst);
}

pub fn is_verbose() -> bool {
    VERBOSE.load(Ordering::SeqCst)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // f.pad so `{:5}` in `emit` aligns the level column.
        f.pad(match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
        })
    }
}

/// Print one timestamped line to stderr. Called through the `log_*`
/// macros.
pub fn emit(level: LogLevel, module: &str, args: fmt::Arguments<'_>) {
    if level == LogLevel::Debug && !is_verbose() {
        return;
    }
    let timestamp = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ");
    eprintln!("[{}] {:5} [{}] {}", timestamp, level, module, args);
}

/// Shorten an identifier to a recognizable prefix/suffix pair.
///
/// For addresses, txids and slot names in log lines. Not a redaction
/// mechanism: secrets are never passed to the logger in the first place.
pub fn abbrev(s: &str) -> String {
    let s = s.trim();
    if s.len() <= 12 {
        s.to_string()
    } else {
        format!("{}..{}", &s[..6], &s[s.len() - 4..])
    }
}

#[macro_export]
macro_rules! log_debug {
    ($module:expr, $($arg:tt)+) => {
        $crate::logging::emit($crate::logging::LogLevel::Debug, $module, format_args!($($arg)+))
    };
}

#[macro_export]
macro_rules! log_info {
    ($module:expr, $($arg:tt)+) => {
        $crate::logging::emit($crate::logging::LogLevel::Info, $module, format_args!($($arg)+))
    };
}

#[macro_export]
macro_rules! log_warn {
    ($module:expr, $($arg:tt)+) => {
        $crate::logging::emit($crate::logging::LogLevel::Warn, $module, format_args!($($arg)+))
    };
}
