//! File logging for ripple runs.
//!
//! Log levels:
//! - ERROR: Sink failures and other run-fatal conditions
//! - WARN: Task failures, exhausted retries, degraded results
//! - INFO: Run lifecycle (start, spawn, completion, aggregate handoff)
//! - DEBUG: Per-attempt retry traces and extraction strategies
//! - TRACE: Raw backend output previews
//!
//! The level comes from `--debug`, then `RIPPLE_DEBUG=1`, then
//! `RIPPLE_LOG=<level>`, and is INFO otherwise. Lines go to
//! `~/.ripple/ripple.log`, or to the file named by `RIPPLE_LOG_FILE`.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::OnceLock;

static LOG_PATH: OnceLock<PathBuf> = OnceLock::new();
static LOG_LEVEL: AtomicU8 = AtomicU8::new(LogLevel::Info as u8);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum LogLevel {
    Error = 0,
    Warn = 1,
    Info = 2,
    Debug = 3,
    Trace = 4,
}

impl LogLevel {
    const ALL: [LogLevel; 5] = [
        LogLevel::Error,
        LogLevel::Warn,
        LogLevel::Info,
        LogLevel::Debug,
        LogLevel::Trace,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Error => "ERROR",
            LogLevel::Warn => "WARN",
            LogLevel::Info => "INFO",
            LogLevel::Debug => "DEBUG",
            LogLevel::Trace => "TRACE",
        }
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        LogLevel::ALL
            .into_iter()
            .find(|level| level.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown log level '{}'", s))
    }
}

fn env_flag(value: Option<&str>) -> bool {
    value.is_some_and(|v| v == "1" || v.eq_ignore_ascii_case("true"))
}

/// Pick the run's level from the CLI flag and the two environment variables.
/// An unparseable `RIPPLE_LOG` falls back to INFO.
fn resolve_level(debug: bool, env_debug: Option<&str>, env_level: Option<&str>) -> LogLevel {
    if debug || env_flag(env_debug) {
        return LogLevel::Debug;
    }
    env_level
        .and_then(|v| v.parse().ok())
        .unwrap_or(LogLevel::Info)
}

fn log_path() -> Option<PathBuf> {
    if let Some(path) = std::env::var_os("RIPPLE_LOG_FILE") {
        return Some(PathBuf::from(path));
    }
    dirs::home_dir().map(|h| h.join(".ripple").join("ripple.log"))
}

/// Set the level and open a fresh log file for this run.
pub fn init_with_debug(debug: bool) {
    let level = resolve_level(
        debug,
        std::env::var("RIPPLE_DEBUG").ok().as_deref(),
        std::env::var("RIPPLE_LOG").ok().as_deref(),
    );
    LOG_LEVEL.store(level as u8, Ordering::SeqCst);

    if let Some(path) = log_path() {
        if let Some(dir) = path.parent() {
            let _ = std::fs::create_dir_all(dir);
        }
        // Truncate file on startup
        let _ = std::fs::write(&path, "");
        LOG_PATH.set(path).ok();
    }
}

pub fn get_level() -> LogLevel {
    LogLevel::ALL
        .get(LOG_LEVEL.load(Ordering::Relaxed) as usize)
        .copied()
        .unwrap_or(LogLevel::Trace)
}

/// Messages are dropped silently until [`init_with_debug`] has set a path.
pub fn log_at(level: LogLevel, msg: &str) {
    if level > get_level() {
        return;
    }

    if let Some(path) = LOG_PATH.get() {
        if let Ok(mut file) = OpenOptions::new().create(true).append(true).open(path) {
            let timestamp = chrono::Local::now().format("%H:%M:%S%.3f");
            let _ = writeln!(file, "[{}] [{}] {}", timestamp, level.as_str(), msg);
        }
    }
}

pub fn error(msg: &str) {
    log_at(LogLevel::Error, msg);
}

pub fn warn(msg: &str) {
    log_at(LogLevel::Warn, msg);
}

pub fn info(msg: &str) {
    log_at(LogLevel::Info, msg);
}

pub fn debug(msg: &str) {
    log_at(LogLevel::Debug, msg);
}

pub fn trace(msg: &str) {
    log_at(LogLevel::Trace, msg);
}

#[macro_export]
macro_rules! rlog {
    ($($arg:tt)*) => {
        $crate::log::info(&format!($($arg)*))
    };
}

#[macro_export]
macro_rules! rlog_error {
    ($($arg:tt)*) => {
        $crate::log::error(&format!($($arg)*))
    };
}

#[macro_export]
macro_rules! rlog_warn {
    ($($arg:tt)*) => {
        $crate::log::warn(&format!($($arg)*))
    };
}

/// Only written when the level is DEBUG or TRACE.
#[macro_export]
macro_rules! rlog_debug {
    ($($arg:tt)*) => {
        $crate::log::debug(&format!($($arg)*))
    };
}

#[macro_export]
macro_rules! rlog_trace {
    ($($arg:tt)*) => {
        $crate::log::trace(&format!($($arg)*))
    };
}

/// Shorten backend output for log lines without splitting a UTF-8 character.
pub fn preview(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}
