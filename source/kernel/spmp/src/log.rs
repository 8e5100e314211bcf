// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Minimal structured logging with severity levels
//! OWNERS: @kernel-team
//! STATUS: Functional
//! API_STABILITY: Unstable
//! TEST_COVERAGE: Capture-sink unit test
//! PUBLIC API: log_* macros, emit(level,target,args), set_sink(), LogSink
//! DEPENDS_ON: uart::RawUart (OS target default sink), spin::Once
//! INVARIANTS: Debug/Trace only in debug builds; single-line emission; lock-free default sink
//!             so fault paths can log while another context holds a lock

use core::fmt::Arguments;

/// Logging severity used by the engine.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Level {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl Level {
    pub const fn tag(self) -> &'static str {
        match self {
            Level::Error => "ERROR",
            Level::Warn => "WARN",
            Level::Info => "INFO",
            Level::Debug => "DEBUG",
            Level::Trace => "TRACE",
        }
    }

    const fn enabled(self) -> bool {
        match self {
            Level::Debug | Level::Trace => cfg!(debug_assertions),
            _ => true,
        }
    }
}

/// Destination for log lines; fire-and-forget.
pub trait LogSink: Sync {
    fn write_line(&self, level: Level, target: &'static str, args: Arguments<'_>);
}

static SINK: spin::Once<&'static dyn LogSink> = spin::Once::new();

/// Installs the kernel's log sink. Only the first call takes effect.
pub fn set_sink(sink: &'static dyn LogSink) {
    SINK.call_once(|| sink);
}

/// Emits a structured log line if the level is enabled for the current build.
pub fn emit(level: Level, target: &'static str, args: Arguments<'_>) {
    if !level.enabled() {
        return;
    }
    match SINK.get() {
        Some(sink) => sink.write_line(level, target, args),
        None => default_sink(level, target, args),
    }
}

#[cfg(all(target_arch = "riscv64", target_os = "none"))]
fn default_sink(level: Level, target: &'static str, args: Arguments<'_>) {
    use core::fmt::Write;

    let mut uart = crate::uart::raw_writer();
    let _ = write!(uart, "[{} {}] ", level.tag(), target);
    let _ = uart.write_fmt(args);
    let _ = uart.write_char('\n');
}

#[cfg(not(all(target_arch = "riscv64", target_os = "none")))]
fn default_sink(_level: Level, _target: &'static str, _args: Arguments<'_>) {}

#[macro_export]
macro_rules! log_error {
    (target: $target:expr, $($arg:tt)+) => {{
        $crate::log::emit($crate::log::Level::Error, $target, format_args!($($arg)+));
    }};
    ($($arg:tt)+) => {{
        $crate::log::emit($crate::log::Level::Error, module_path!(), format_args!($($arg)+));
    }};
}

#[macro_export]
macro_rules! log_warn {
    (target: $target:expr, $($arg:tt)+) => {{
        $crate::log::emit($crate::log::Level::Warn, $target, format_args!($($arg)+));
    }};
    ($($arg:tt)+) => {{
        $crate::log::emit($crate::log::Level::Warn, module_path!(), format_args!($($arg)+));
    }};
}

#[macro_export]
macro_rules! log_info {
    (target: $target:expr, $($arg:tt)+) => {{
        $crate::log::emit($crate::log::Level::Info, $target, format_args!($($arg)+));
    }};
    ($($arg:tt)+) => {{
        $crate::log::emit($crate::log::Level::Info, module_path!(), format_args!($($arg)+));
    }};
}

#[macro_export]
macro_rules! log_debug {
    (target: $target:expr, $($arg:tt)+) => {{
        $crate::log::emit($crate::log::Level::Debug, $target, format_args!($($arg)+));
    }};
    ($($arg:tt)+) => {{
        $crate::log::emit($crate::log::Level::Debug, module_path!(), format_args!($($arg)+));
    }};
}

#[macro_export]
macro_rules! log_trace {
    (target: $target:expr, $($arg:tt)+) => {{
        $crate::log::emit($crate::log::Level::Trace, $target, format_args!($($arg)+));
    }};
    ($($arg:tt)+) => {{
        $crate::log::emit($crate::log::Level::Trace, module_path!(), format_args!($($arg)+));
    }};
}
