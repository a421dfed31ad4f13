// SPDX-License-Identifier: MIT

use std::sync::atomic::{AtomicU8, Ordering};

use colored::Colorize;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum LogLevel {
    Quiet,
    Normal,
    Verbose,
}

static LOG_LEVEL: AtomicU8 = AtomicU8::new(LogLevel::Normal as u8);

pub fn set_log_level(level: LogLevel) {
    LOG_LEVEL.store(level as u8, Ordering::Relaxed);
}

pub fn log_level() -> LogLevel {
    match LOG_LEVEL.load(Ordering::Relaxed) {
        0 => LogLevel::Quiet,
        1 => LogLevel::Normal,
        _ => LogLevel::Verbose,
    }
}

#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        if $crate::utils::log_level() != $crate::utils::LogLevel::Quiet {
            println!("[rimgen] {}", format_args!($($arg)*));
        }
    };
}

#[macro_export]
macro_rules! log_verbose {
    ($($arg:tt)*) => {
        if $crate::utils::log_level() == $crate::utils::LogLevel::Verbose {
            println!("[rimgen] {}", format_args!($($arg)*));
        }
    };
}

/// Forwards `rimlayout` records to stderr in verbose mode.
struct LayoutLogBridge;

impl ::log::Log for LayoutLogBridge {
    fn enabled(&self, metadata: &::log::Metadata) -> bool {
        log_level() == LogLevel::Verbose && metadata.level() <= ::log::Level::Debug
    }

    fn log(&self, record: &::log::Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let level = match record.level() {
            ::log::Level::Error => "error".red(),
            ::log::Level::Warn => "warn".yellow(),
            ::log::Level::Info => "info".green(),
            _ => "debug".dimmed(),
        };
        eprintln!("[rimgen] {level} {}", record.args());
    }

    fn flush(&self) {}
}

static BRIDGE: LayoutLogBridge = LayoutLogBridge;

pub fn init_log_bridge() {
    if ::log::set_logger(&BRIDGE).is_ok() {
        ::log::set_max_level(::log::LevelFilter::Debug);
    }
}
