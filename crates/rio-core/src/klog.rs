//! Leveled stderr logging for the RIO crates.
//!
//! # Environment Variables
//!
//! - `RIO_LOG_LEVEL=<level>` - off, error, warn, info, debug, trace (or 0-5).
//!   Default: warn.
//! - `RIO_FLUSH_EPRINT=1` - flush stderr after every line.
//!
//! ```ignore
//! use rio_core::{rio_debug, rio_error};
//!
//! rio_debug!("cq {:#x} created, capacity {}", raw, capacity);
//! rio_error!("completion queue {:#x} corrupt", raw);
//! ```
//!
//! The submit/dequeue hot paths only use `rio_trace!`, which costs one
//! relaxed load when disabled.

use std::io::Write;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

use crate::env::env_flag;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Off = 0,
    Error = 1,
    Warn = 2,
    Info = 3,
    Debug = 4,
    Trace = 5,
}

impl LogLevel {
    pub fn from_u8(v: u8) -> Self {
        match v {
            0 => LogLevel::Off,
            1 => LogLevel::Error,
            2 => LogLevel::Warn,
            3 => LogLevel::Info,
            4 => LogLevel::Debug,
            _ => LogLevel::Trace,
        }
    }

    /// Parse a `RIO_LOG_LEVEL` value.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "off" | "0" => Some(LogLevel::Off),
            "error" | "1" => Some(LogLevel::Error),
            "warn" | "2" => Some(LogLevel::Warn),
            "info" | "3" => Some(LogLevel::Info),
            "debug" | "4" => Some(LogLevel::Debug),
            "trace" | "5" => Some(LogLevel::Trace),
            _ => None,
        }
    }

    fn tag(self) -> &'static str {
        match self {
            LogLevel::Off => "",
            LogLevel::Error => "rio: [ERROR]",
            LogLevel::Warn => "rio: [WARN] ",
            LogLevel::Info => "rio: [INFO] ",
            LogLevel::Debug => "rio: [DEBUG]",
            LogLevel::Trace => "rio: [TRACE]",
        }
    }
}

static INITIALIZED: AtomicBool = AtomicBool::new(false);
static LEVEL: AtomicU8 = AtomicU8::new(LogLevel::Warn as u8);
static FLUSH: AtomicBool = AtomicBool::new(false);

/// Read the environment once. Safe to call repeatedly.
pub fn init() {
    if INITIALIZED.swap(true, Ordering::SeqCst) {
        return;
    }
    if let Some(level) = std::env::var("RIO_LOG_LEVEL").ok().as_deref().and_then(LogLevel::parse) {
        LEVEL.store(level as u8, Ordering::Relaxed);
    }
    FLUSH.store(env_flag("RIO_FLUSH_EPRINT", false), Ordering::Relaxed);
}

#[inline]
pub fn log_level() -> LogLevel {
    if !INITIALIZED.load(Ordering::Relaxed) {
        init();
    }
    LogLevel::from_u8(LEVEL.load(Ordering::Relaxed))
}

/// Override the level programmatically (wins over the environment).
pub fn set_log_level(level: LogLevel) {
    INITIALIZED.store(true, Ordering::SeqCst);
    LEVEL.store(level as u8, Ordering::Relaxed);
}

#[inline]
pub fn level_enabled(level: LogLevel) -> bool {
    level != LogLevel::Off && level <= log_level()
}

#[doc(hidden)]
pub fn _log_impl(level: LogLevel, args: std::fmt::Arguments<'_>) {
    if !level_enabled(level) {
        return;
    }
    let stderr = std::io::stderr();
    let mut handle = stderr.lock();
    let _ = write!(handle, "{} ", level.tag());
    let _ = handle.write_fmt(args);
    let _ = handle.write_all(b"\n");
    if FLUSH.load(Ordering::Relaxed) {
        let _ = handle.flush();
    }
}

#[macro_export]
macro_rules! rio_error {
    ($($arg:tt)*) => {{
        $crate::klog::_log_impl($crate::klog::LogLevel::Error, format_args!($($arg)*));
    }};
}

#[macro_export]
macro_rules! rio_warn {
    ($($arg:tt)*) => {{
        $crate::klog::_log_impl($crate::klog::LogLevel::Warn, format_args!($($arg)*));
    }};
}

#[macro_export]
macro_rules! rio_info {
    ($($arg:tt)*) => {{
        $crate::klog::_log_impl($crate::klog::LogLevel::Info, format_args!($($arg)*));
    }};
}

#[macro_export]
macro_rules! rio_debug {
    ($($arg:tt)*) => {{
        $crate::klog::_log_impl($crate::klog::LogLevel::Debug, format_args!($($arg)*));
    }};
}

/// Hot-path logging. The level check happens before formatting.
#[macro_export]
macro_rules! rio_trace {
    ($($arg:tt)*) => {{
        if $crate::klog::level_enabled($crate::klog::LogLevel::Trace) {
            $crate::klog::_log_impl($crate::klog::LogLevel::Trace, format_args!($($arg)*));
        }
    }};
}
