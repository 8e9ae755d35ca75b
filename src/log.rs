//! File logging for compile and dispatch runs.
//!
//! Every line is tagged with the pipeline stage that emitted it, derived from
//! the calling module:
//!
//! ```text
//! [2026-02-28 06:22:10.592] [WARN] [reconcile] request t-9 has no task in the DAG
//! ```
//!
//! Levels:
//! - ERROR: a command failed and nothing further was written
//! - WARN: dropped dependencies, requests without a DAG task, invalid DAGs
//! - INFO: one line per command and per completed dispatch run
//! - DEBUG: per-stage counts, artifact reads and writes
//! - TRACE: per-task detail
//!
//! Nothing is written until `init_with_debug` (or `init_at`) has been called,
//! so library callers and tests stay silent. `--debug` or `COGNITION_DEBUG=1`
//! raises the level to DEBUG; `COGNITION_LOG=<level>` picks one explicitly.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
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
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Error => "ERROR",
            LogLevel::Warn => "WARN",
            LogLevel::Info => "INFO",
            LogLevel::Debug => "DEBUG",
            LogLevel::Trace => "TRACE",
        }
    }

    /// Parse a `COGNITION_LOG` value, case-insensitively.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "error" => Some(LogLevel::Error),
            "warn" | "warning" => Some(LogLevel::Warn),
            "info" => Some(LogLevel::Info),
            "debug" => Some(LogLevel::Debug),
            "trace" => Some(LogLevel::Trace),
            _ => None,
        }
    }

    fn from_u8(v: u8) -> Self {
        match v {
            0 => LogLevel::Error,
            1 => LogLevel::Warn,
            2 => LogLevel::Info,
            3 => LogLevel::Debug,
            _ => LogLevel::Trace,
        }
    }
}

/// Pipeline stage a log line belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Cli,
    Config,
    Normalize,
    Compile,
    Dag,
    Reconcile,
    FollowUp,
    Journal,
    Report,
    Run,
    Other,
}

impl Stage {
    /// Map a `module_path!()` to its stage.
    pub fn from_module(module: &str) -> Self {
        match module.rsplit("::").next().unwrap_or(module) {
            "cognition_dispatch" | "cognition-dispatch" => Stage::Cli,
            "config" => Stage::Config,
            "recommendation" => Stage::Normalize,
            "compiler" => Stage::Compile,
            "dag" => Stage::Dag,
            "reconciler" | "gate" => Stage::Reconcile,
            "follow_up" => Stage::FollowUp,
            "journal" => Stage::Journal,
            "report" => Stage::Report,
            "run" => Stage::Run,
            _ => Stage::Other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Cli => "cli",
            Stage::Config => "config",
            Stage::Normalize => "normalize",
            Stage::Compile => "compile",
            Stage::Dag => "dag",
            Stage::Reconcile => "reconcile",
            Stage::FollowUp => "follow-up",
            Stage::Journal => "journal",
            Stage::Report => "report",
            Stage::Run => "run",
            Stage::Other => "-",
        }
    }
}

/// Default log location: `~/.cognition/dispatch.log`.
pub fn default_log_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".cognition").join("dispatch.log"))
}

/// Initialize logging to the default location.
pub fn init_with_debug(debug: bool) {
    if let Some(path) = default_log_path() {
        init_at(path, debug);
    }
}

/// Initialize logging to an explicit file.
///
/// The file is appended to, never truncated: successive runs share one log.
pub fn init_at(path: PathBuf, debug: bool) {
    let env_debug = std::env::var("COGNITION_DEBUG")
        .map(|v| v == "1" || v.to_lowercase() == "true")
        .unwrap_or(false);
    let env_level = std::env::var("COGNITION_LOG").ok();

    LOG_LEVEL.store(
        resolve_level(debug || env_debug, env_level.as_deref()) as u8,
        Ordering::SeqCst,
    );

    if let Some(parent) = path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    LOG_PATH.set(path).ok();
}

/// An explicit, parseable `COGNITION_LOG` wins over the debug switch.
fn resolve_level(debug: bool, explicit: Option<&str>) -> LogLevel {
    match explicit.and_then(LogLevel::parse) {
        Some(level) => level,
        None if debug => LogLevel::Debug,
        None => LogLevel::Info,
    }
}

pub fn get_level() -> LogLevel {
    LogLevel::from_u8(LOG_LEVEL.load(Ordering::Relaxed))
}

fn format_line(timestamp: &str, level: LogLevel, stage: Stage, msg: &str) -> String {
    format!("[{}] [{}] [{}] {}", timestamp, level.as_str(), stage.as_str(), msg)
}

/// Log a message at the given level, tagged with the stage of `module`.
pub fn log_at(level: LogLevel, module: &str, msg: &str) {
    if level > get_level() {
        return;
    }

    if let Some(path) = LOG_PATH.get() {
        if let Ok(mut file) = OpenOptions::new().create(true).append(true).open(path) {
            let timestamp = chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f").to_string();
            let line = format_line(&timestamp, level, Stage::from_module(module), msg);
            let _ = writeln!(file, "{}", line);
        }
    }
}

/// Log macro for INFO level.
#[macro_export]
macro_rules! clog {
    ($($arg:tt)*) => {
        $crate::log::log_at($crate::log::LogLevel::Info, module_path!(), &format!($($arg)*))
    };
}

#[macro_export]
macro_rules! clog_error {
    ($($arg:tt)*) => {
        $crate::log::log_at($crate::log::LogLevel::Error, module_path!(), &format!($($arg)*))
    };
}

#[macro_export]
macro_rules! clog_warn {
    ($($arg:tt)*) => {
        $crate::log::log_at($crate::log::LogLevel::Warn, module_path!(), &format!($($arg)*))
    };
}

/// Log macro for DEBUG level (only logs when debug mode is enabled).
#[macro_export]
macro_rules! clog_debug {
    ($($arg:tt)*) => {
        $crate::log::log_at($crate::log::LogLevel::Debug, module_path!(), &format!($($arg)*))
    };
}

#[macro_export]
macro_rules! clog_trace {
    ($($arg:tt)*) => {
        $crate::log::log_at($crate::log::LogLevel::Trace, module_path!(), &format!($($arg)*))
    };
}
