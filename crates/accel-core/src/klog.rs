//! Kernel-style log macros with a pluggable sink.
//!
//! Severity is a bitmask (`LogFlags`) identical to the flags the native
//! driver passes to its log callback, so driver messages and dispatcher
//! messages flow through one sink.
//!
//! # Environment Variables
//!
//! - `ACCEL_FLUSH_EPRINT=1` - Flush stderr after each line (default sink only)
//! - `ACCEL_LOG_LEVEL=<level>` - off|fatal|error|warn|info|verbose|debug or 0-6
//!
//! # Usage
//!
//! ```ignore
//! use accel_core::{kdebug, kinfo, kwarn, kerror};
//!
//! kinfo!("device open: {} slots", n);
//! kwarn!("teardown: close failed: {}", e);
//! ```

use std::ffi::c_char;
use std::io::Write;
use std::ops::BitOr;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, RwLock};

use crate::driver::c_str_lossy;

/// Severity bitmask shared with the native driver's log callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(transparent)]
pub struct LogFlags(pub u32);

impl LogFlags {
    pub const NONE: Self = Self(0);
    pub const DEBUG: Self = Self(1 << 0);
    pub const VERBOSE: Self = Self(1 << 1);
    pub const INFO: Self = Self(1 << 2);
    pub const WARN: Self = Self(1 << 3);
    pub const ERROR: Self = Self(1 << 4);
    pub const FATAL: Self = Self(1 << 5);

    #[inline]
    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// The most severe level named in the mask.
    pub fn level(self) -> LogLevel {
        if self.contains(Self::FATAL) {
            LogLevel::Fatal
        } else if self.contains(Self::ERROR) {
            LogLevel::Error
        } else if self.contains(Self::WARN) {
            LogLevel::Warn
        } else if self.contains(Self::INFO) {
            LogLevel::Info
        } else if self.contains(Self::VERBOSE) {
            LogLevel::Verbose
        } else if self.contains(Self::DEBUG) {
            LogLevel::Debug
        } else {
            // Untagged driver messages are informational.
            LogLevel::Info
        }
    }
}

impl BitOr for LogFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Threshold ordering; lower is more severe.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Off = 0,
    Fatal = 1,
    Error = 2,
    Warn = 3,
    Info = 4,
    Verbose = 5,
    Debug = 6,
}

impl LogLevel {
    pub fn from_u8(v: u8) -> Self {
        match v {
            0 => LogLevel::Off,
            1 => LogLevel::Fatal,
            2 => LogLevel::Error,
            3 => LogLevel::Warn,
            4 => LogLevel::Info,
            5 => LogLevel::Verbose,
            _ => LogLevel::Debug,
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s.to_lowercase().as_str() {
            "off" | "0" => LogLevel::Off,
            "fatal" | "1" => LogLevel::Fatal,
            "error" | "2" => LogLevel::Error,
            "warn" | "3" => LogLevel::Warn,
            "info" | "4" => LogLevel::Info,
            "verbose" | "5" => LogLevel::Verbose,
            "debug" | "6" => LogLevel::Debug,
            _ => return None,
        })
    }

    pub fn flags(self) -> LogFlags {
        match self {
            LogLevel::Off => LogFlags::NONE,
            LogLevel::Fatal => LogFlags::FATAL,
            LogLevel::Error => LogFlags::ERROR,
            LogLevel::Warn => LogFlags::WARN,
            LogLevel::Info => LogFlags::INFO,
            LogLevel::Verbose => LogFlags::VERBOSE,
            LogLevel::Debug => LogFlags::DEBUG,
        }
    }

    pub fn prefix(&self) -> &'static str {
        match self {
            LogLevel::Off => "",
            LogLevel::Fatal => "[FATAL]",
            LogLevel::Error => "[ERROR]",
            LogLevel::Warn => "[WARN] ",
            LogLevel::Info => "[INFO] ",
            LogLevel::Verbose => "[VERB] ",
            LogLevel::Debug => "[DEBUG]",
        }
    }
}

/// Receives every log line that passes the level filter.
pub trait LogSink: Send + Sync {
    fn log(&self, flags: LogFlags, message: &str);
}

impl<F> LogSink for F
where
    F: Fn(LogFlags, &str) + Send + Sync,
{
    fn log(&self, flags: LogFlags, message: &str) {
        self(flags, message)
    }
}

/// Default sink: one locked, prefixed line per message on stderr.
pub struct StderrSink;

impl LogSink for StderrSink {
    fn log(&self, flags: LogFlags, message: &str) {
        let stderr = std::io::stderr();
        let mut handle = stderr.lock();
        let _ = writeln!(handle, "{} {}", flags.level().prefix(), message);
        if flush_enabled() {
            let _ = handle.flush();
        }
    }
}

// Global configuration (initialized once)
static FLUSH_ENABLED: AtomicBool = AtomicBool::new(false);
static LOG_LEVEL: AtomicU8 = AtomicU8::new(LogLevel::Info as u8);
static INITIALIZED: AtomicBool = AtomicBool::new(false);
static SINK: RwLock<Option<Arc<dyn LogSink>>> = RwLock::new(None);

/// Initialize logging from environment variables.
///
/// Called automatically on first log, but can be called explicitly for
/// deterministic initialization.
pub fn init() {
    if INITIALIZED.swap(true, Ordering::SeqCst) {
        return;
    }

    if let Ok(val) = std::env::var("ACCEL_FLUSH_EPRINT") {
        let flush = matches!(val.as_str(), "1" | "true" | "yes" | "on");
        FLUSH_ENABLED.store(flush, Ordering::Relaxed);
    }

    if let Ok(val) = std::env::var("ACCEL_LOG_LEVEL") {
        let level = LogLevel::parse(&val).unwrap_or(LogLevel::Info);
        LOG_LEVEL.store(level as u8, Ordering::Relaxed);
    }
}

#[inline]
pub fn flush_enabled() -> bool {
    if !INITIALIZED.load(Ordering::Relaxed) {
        init();
    }
    FLUSH_ENABLED.load(Ordering::Relaxed)
}

#[inline]
pub fn log_level() -> LogLevel {
    if !INITIALIZED.load(Ordering::Relaxed) {
        init();
    }
    LogLevel::from_u8(LOG_LEVEL.load(Ordering::Relaxed))
}

pub fn set_log_level(level: LogLevel) {
    init();
    LOG_LEVEL.store(level as u8, Ordering::Relaxed);
}

pub fn set_flush_enabled(enabled: bool) {
    init();
    FLUSH_ENABLED.store(enabled, Ordering::Relaxed);
}

/// Install (or with `None`, remove) the process-wide sink.
pub fn set_sink(sink: Option<Arc<dyn LogSink>>) {
    let mut slot = SINK.write().unwrap_or_else(|e| e.into_inner());
    *slot = sink;
}

/// Remove `sink` if it is still the installed one.
///
/// A sink installed later by someone else stays in place.
pub fn remove_sink(sink: &Arc<dyn LogSink>) -> bool {
    let mut slot = SINK.write().unwrap_or_else(|e| e.into_inner());
    let installed = matches!(
        slot.as_ref(),
        Some(current) if Arc::as_ptr(current) as *const () == Arc::as_ptr(sink) as *const ()
    );
    if installed {
        *slot = None;
    }
    installed
}

#[inline]
pub fn level_enabled(level: LogLevel) -> bool {
    level != LogLevel::Off && level <= log_level()
}

/// Deliver an already-formatted message, applying the level filter.
pub fn emit(flags: LogFlags, message: &str) {
    if !level_enabled(flags.level()) {
        return;
    }
    let sink = SINK.read().unwrap_or_else(|e| e.into_inner()).clone();
    match sink {
        Some(sink) => sink.log(flags, message),
        None => StderrSink.log(flags, message),
    }
}

/// Log callback handed to the native driver.
///
/// # Safety
/// `message` must be null or a NUL-terminated string valid for the call.
pub unsafe extern "C" fn native_log(flags: u32, message: *const c_char) {
    let text = c_str_lossy(message);
    emit(LogFlags(flags), text.trim_end());
}

/// Internal: leveled print
#[doc(hidden)]
pub fn _klog_impl(level: LogLevel, args: std::fmt::Arguments<'_>) {
    if !level_enabled(level) {
        return;
    }
    emit(level.flags(), &args.to_string());
}

// ============================================================================
// Public Macros
// ============================================================================

/// Fatal level log
#[macro_export]
macro_rules! kfatal {
    ($($arg:tt)*) => {{
        $crate::klog::_klog_impl(
            $crate::klog::LogLevel::Fatal,
            format_args!($($arg)*)
        );
    }};
}

/// Error level log
#[macro_export]
macro_rules! kerror {
    ($($arg:tt)*) => {{
        $crate::klog::_klog_impl(
            $crate::klog::LogLevel::Error,
            format_args!($($arg)*)
        );
    }};
}

/// Warning level log
#[macro_export]
macro_rules! kwarn {
    ($($arg:tt)*) => {{
        $crate::klog::_klog_impl(
            $crate::klog::LogLevel::Warn,
            format_args!($($arg)*)
        );
    }};
}

/// Info level log
#[macro_export]
macro_rules! kinfo {
    ($($arg:tt)*) => {{
        $crate::klog::_klog_impl(
            $crate::klog::LogLevel::Info,
            format_args!($($arg)*)
        );
    }};
}

/// Verbose level log
#[macro_export]
macro_rules! kverbose {
    ($($arg:tt)*) => {{
        $crate::klog::_klog_impl(
            $crate::klog::LogLevel::Verbose,
            format_args!($($arg)*)
        );
    }};
}

/// Debug level log (most verbose)
#[macro_export]
macro_rules! kdebug {
    ($($arg:tt)*) => {{
        $crate::klog::_klog_impl(
            $crate::klog::LogLevel::Debug,
            format_args!($($arg)*)
        );
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_levels() {
        assert!(LogLevel::Fatal < LogLevel::Error);
        assert!(LogLevel::Error < LogLevel::Warn);
        assert!(LogLevel::Warn < LogLevel::Info);
        assert!(LogLevel::Info < LogLevel::Verbose);
        assert!(LogLevel::Verbose < LogLevel::Debug);
    }

    #[test]
    fn test_level_parse() {
        assert_eq!(LogLevel::parse("WARN"), Some(LogLevel::Warn));
        assert_eq!(LogLevel::parse("6"), Some(LogLevel::Debug));
        assert_eq!(LogLevel::parse("loud"), None);
        assert_eq!(LogLevel::from_u8(99), LogLevel::Debug);
    }

    #[test]
    fn test_flags_pick_most_severe() {
        assert_eq!((LogFlags::DEBUG | LogFlags::ERROR).level(), LogLevel::Error);
        assert_eq!(LogFlags::VERBOSE.level(), LogLevel::Verbose);
        assert_eq!(LogFlags::NONE.level(), LogLevel::Info);
        assert!((LogFlags::WARN | LogFlags::INFO).contains(LogFlags::INFO));
    }

    #[test]
    fn test_macros_compile() {
        // Sink and level are process-global; only check the macros expand.
        kfatal!("fatal {}", 1);
        kerror!("error {}", "msg");
        kwarn!("warn");
        kinfo!("info");
        kverbose!("verbose");
        kdebug!("debug");
    }

    #[test]
    fn test_remove_sink_only_removes_its_own() {
        let ours: Arc<dyn LogSink> = Arc::new(|_: LogFlags, _: &str| {});
        let theirs: Arc<dyn LogSink> = Arc::new(|_: LogFlags, _: &str| {});

        set_sink(Some(Arc::clone(&ours)));
        assert!(!remove_sink(&theirs));
        assert_eq!(Arc::strong_count(&ours), 2);

        assert!(remove_sink(&ours));
        assert_eq!(Arc::strong_count(&ours), 1);
        assert!(!remove_sink(&ours));
    }
}
