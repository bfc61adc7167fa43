// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! Logging backend for the `log` facade.

/// RAM ring buffer for log output.
pub mod inmemory;

use crate::debug::DEBUG;
use core::{
    fmt::{Arguments, Write},
    sync::atomic::{AtomicBool, Ordering},
};
use log::{LevelFilter, Log, Metadata, Record, SetLoggerError};
use spin::{Once, mutex::SpinMutex};

static LOGGER: Once<Logger> = Once::new();

struct Logger {
    sink: &'static (dyn LogSink + Send + Sync),
}

impl Log for Logger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            self.sink.write_fmt(format_args!(
                "PMUFW {:<5} {}: {}\n",
                record.level(),
                record.target(),
                record.args()
            ));
        }
    }

    fn flush(&self) {}
}

/// Installs `sink` as the destination of all log records.
///
/// Only the first call has any effect; later calls return the error from `log::set_logger`.
pub fn init(sink: &'static (dyn LogSink + Send + Sync)) -> Result<(), SetLoggerError> {
    let logger = LOGGER.call_once(|| Logger { sink });
    log::set_logger(logger)?;
    log::set_max_level(build_time_log_level());
    Ok(())
}

/// Returns the logging [`LevelFilter`] set by the build-time environment variable `LOG_LEVEL`.
/// `LOG_LEVEL` can have the lower-case string values "off", "error", "warn", "info", "debug", or
/// "trace", corresponding to the named values of [`LevelFilter`]. If `LOG_LEVEL` is absent or has
/// some other value, this function returns `LevelFilter::Debug` if [`DEBUG`] is true, otherwise
/// `LevelFilter::Info`.
pub const fn build_time_log_level() -> LevelFilter {
    let level = match option_env!("LOG_LEVEL") {
        Some(level) => level,
        None => "",
    };
    match level.as_bytes() {
        b"off" => LevelFilter::Off,
        b"error" => LevelFilter::Error,
        b"warn" => LevelFilter::Warn,
        b"info" => LevelFilter::Info,
        b"debug" => LevelFilter::Debug,
        b"trace" => LevelFilter::Trace,
        _ => {
            if DEBUG {
                LevelFilter::Debug
            } else {
                LevelFilter::Info
            }
        }
    }
}

/// Something to which logs can be sent.
///
/// Unlike `core::fmt::Write`, the `write_fmt` method on this trait takes `&self`. The
/// implementation is responsible for any locking it needs, since log records may be emitted from
/// interrupt context.
pub trait LogSink {
    /// Writes the given format arguments to the log sink.
    fn write_fmt(&self, args: Arguments);

    /// Flushes any buffered output.
    fn flush(&self) {}
}

/// An implementation of `LogSink` that wraps around any implementation of `core::fmt::Write`.
///
/// The writer sits behind a spin mutex so that a complete log line is written at once, even when
/// an interrupt handler logs while a lower priority handler is in the middle of a line.
pub struct LockedWriter<W: Write> {
    writer: SpinMutex<W>,
}

impl<W: Write> LockedWriter<W> {
    /// Creates a new `LockedWriter` wrapping the given [`Write`] implementation.
    pub const fn new(writer: W) -> Self {
        Self {
            writer: SpinMutex::new(writer),
        }
    }

    /// Runs `f` with exclusive access to the wrapped writer.
    pub fn with_writer<R>(&self, f: impl FnOnce(&mut W) -> R) -> R {
        f(&mut self.writer.lock())
    }
}

impl<W: Write> LogSink for LockedWriter<W> {
    fn write_fmt(&self, args: Arguments) {
        // A log line that can't be written is dropped.
        let _ = self.writer.lock().write_fmt(args);
    }
}

/// A sink which always logs to a primary sink, and optionally also to a secondary sink.
///
/// For example, the primary sink could be an in-memory ring buffer that a debugger can dump, and
/// the secondary sink the UART. The UART can then be switched off before the domain that holds
/// it is powered down.
pub struct HybridSink<P: LogSink, S: LogSink> {
    primary: P,
    secondary: S,
    secondary_enabled: AtomicBool,
}

impl<P: LogSink, S: LogSink> HybridSink<P, S> {
    /// Creates a new sink with the given primary and secondary log sinks.
    ///
    /// Logging to the secondary sink will initially be enabled.
    pub const fn new(primary: P, secondary: S) -> Self {
        Self {
            primary,
            secondary,
            secondary_enabled: AtomicBool::new(true),
        }
    }

    /// Enables or disables writing logs to the secondary sink.
    pub fn enable_secondary(&self, enable: bool) {
        self.secondary_enabled.store(enable, Ordering::Release);
    }

    /// Returns the primary sink.
    pub fn primary(&self) -> &P {
        &self.primary
    }
}

impl<P: LogSink, S: LogSink> LogSink for HybridSink<P, S> {
    fn write_fmt(&self, args: Arguments) {
        self.primary.write_fmt(args);
        if self.secondary_enabled.load(Ordering::Acquire) {
            self.secondary.write_fmt(args);
        }
    }

    fn flush(&self) {
        self.primary.flush();
        if self.secondary_enabled.load(Ordering::Acquire) {
            self.secondary.flush();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logger::inmemory::MemoryLogger;

    #[test]
    fn locked_writer_collects_lines() {
        let writer = LockedWriter::new(MemoryLogger::<64>::new());
        writer.write_fmt(format_args!("node {} on\n", 0x1c));
        writer.write_fmt(format_args!("node {} off\n", 0x1c));
        let text = writer.with_writer(|logger| logger.as_str().to_owned());
        assert_eq!("node 28 on\nnode 28 off\n", text);
    }

    #[test]
    fn hybrid_sink_secondary_can_be_disabled() {
        let sink = HybridSink::new(
            LockedWriter::new(MemoryLogger::<64>::new()),
            LockedWriter::new(MemoryLogger::<64>::new()),
        );
        sink.write_fmt(format_args!("a"));
        sink.enable_secondary(false);
        sink.write_fmt(format_args!("b"));

        assert_eq!("ab", sink.primary.with_writer(|l| l.as_str().to_owned()));
        assert_eq!("a", sink.secondary.with_writer(|l| l.as_str().to_owned()));
    }

    #[test]
    fn default_level_follows_build_profile() {
        if option_env!("LOG_LEVEL").is_none() {
            let expected = if DEBUG {
                LevelFilter::Debug
            } else {
                LevelFilter::Info
            };
            assert_eq!(expected, build_time_log_level());
        }
    }
}
