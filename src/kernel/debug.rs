// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Kernel Logging and Diagnostics
//!
//! Every subsystem logs through the `log_*` macros defined here. They forward
//! to the `log` facade under the `rustux` target when the `logging` feature is
//! enabled and compile to nothing otherwise, so the embedding kernel decides
//! where the records end up.
//!
//! Broken invariants are fatal: [`kernel_panic!`](crate::kernel_panic) logs the
//! message at error level and panics. [`kassert!`](crate::kassert) is the
//! conditional form.
//!
//! # Usage
//!
//! ```rust
//! use rustux_taskcore::{kassert, log_debug};
//!
//! let queued = 3;
//! log_debug!("run queue holds {} threads", queued);
//! kassert!(queued > 0, "run queue unexpectedly empty");
//! ```

use core::fmt;

/// Target every kernel log record is emitted under
pub const LOG_TARGET: &str = "rustux";

/// Log levels
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    /// Trace-level logging (very verbose)
    Trace = 0,

    /// Debug-level logging (verbose)
    Debug = 1,

    /// Informational logging
    Info = 2,

    /// Warning-level logging
    Warning = 3,

    /// Error-level logging
    Error = 4,
}

impl LogLevel {
    /// Get the log level name as a string
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Trace => "TRACE",
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warning => "WARN",
            LogLevel::Error => "ERROR",
        }
    }

    #[cfg(feature = "logging")]
    fn to_log_level(self) -> log::Level {
        match self {
            LogLevel::Trace => log::Level::Trace,
            LogLevel::Debug => log::Level::Debug,
            LogLevel::Info => log::Level::Info,
            LogLevel::Warning => log::Level::Warn,
            LogLevel::Error => log::Level::Error,
        }
    }
}

/// Emit one log record
///
/// Called by the logging macros; prefer those.
#[cfg(feature = "logging")]
pub fn log_print(level: LogLevel, args: fmt::Arguments) {
    log::log!(target: LOG_TARGET, level.to_log_level(), "{}", args);
}

/// Emit one log record
///
/// Logging is compiled out; the record is discarded.
#[cfg(not(feature = "logging"))]
pub fn log_print(level: LogLevel, args: fmt::Arguments) {
    let _ = (level, args);
}

/// Report a broken kernel invariant and halt the current flow of control
#[cold]
#[inline(never)]
pub fn fatal(args: fmt::Arguments) -> ! {
    log_print(LogLevel::Error, format_args!("KERNEL PANIC: {}", args));
    panic!("{}", args)
}

/// Log a trace message
#[macro_export]
macro_rules! log_trace {
    ($($arg:tt)*) => {
        $crate::kernel::debug::log_print($crate::kernel::debug::LogLevel::Trace, format_args!($($arg)*))
    };
}

/// Log a debug message
#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => {
        $crate::kernel::debug::log_print($crate::kernel::debug::LogLevel::Debug, format_args!($($arg)*))
    };
}

/// Log an info message
#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        $crate::kernel::debug::log_print($crate::kernel::debug::LogLevel::Info, format_args!($($arg)*))
    };
}

/// Log a warning message
#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {
        $crate::kernel::debug::log_print($crate::kernel::debug::LogLevel::Warning, format_args!($($arg)*))
    };
}

/// Log an error message
#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {
        $crate::kernel::debug::log_print($crate::kernel::debug::LogLevel::Error, format_args!($($arg)*))
    };
}

/// Abort on a broken kernel invariant
#[macro_export]
macro_rules! kernel_panic {
    ($($arg:tt)*) => {
        $crate::kernel::debug::fatal(format_args!($($arg)*))
    };
}

/// Abort unless the condition holds
#[macro_export]
macro_rules! kassert {
    ($cond:expr, $($arg:tt)+) => {
        if !$cond {
            $crate::kernel::debug::fatal(format_args!($($arg)+));
        }
    };
    ($cond:expr) => {
        if !$cond {
            $crate::kernel::debug::fatal(format_args!("assertion failed: {}", stringify!($cond)));
        }
    };
}
