//! Kernel logging subsystem.
//!
//! Implements the `log` facade for the kernel: colored level prefixes,
//! whole records serialized through a spinlock so concurrent cores never
//! interleave characters, and a pluggable sink so the same logger can
//! write to a serial port on hardware or to a capture buffer in tests.
//!
//! The sink is a plain function pointer: no allocation, usable from the
//! first instruction of boot, long before a heap exists.
#![cfg_attr(not(test), no_std)]

use core::fmt;

use log::{Level, LevelFilter, Log, Metadata, Record};
use spin::{Mutex, Once};

/// Where formatted log records are sent. Invoked once per record, with the
/// write lock held, so a sink needs no synchronization of its own.
pub type Sink = fn(fmt::Arguments);

fn color(level: Level) -> &'static str {
    match level {
        Level::Trace => "\x1b[90m", // Gray
        Level::Debug => "\x1b[36m", // Cyan
        Level::Info => "\x1b[32m",  // Green
        Level::Warn => "\x1b[33m",  // Yellow
        Level::Error => "\x1b[31m", // Red
    }
}

fn tag(level: Level) -> &'static str {
    match level {
        Level::Trace => "TRACE",
        Level::Debug => "DEBUG",
        Level::Info => " INFO",
        Level::Warn => " WARN",
        Level::Error => "ERROR",
    }
}

struct KernelLog;

static LOGGER: KernelLog = KernelLog;
static SINK: Once<Sink> = Once::new();

/// Serializes whole records: multiple cores logging simultaneously get
/// their lines out one at a time, never mixed character-by-character.
/// The ORDER of lines from different cores stays non-deterministic.
static WRITE_LOCK: Mutex<()> = Mutex::new(());

impl Log for KernelLog {
    fn enabled(&self, _metadata: &Metadata) -> bool {
        true
    }

    fn log(&self, record: &Record) {
        if let Some(sink) = SINK.get() {
            let level = record.level();
            let _guard = WRITE_LOCK.lock();
            sink(format_args!(
                "{}[{}]\x1b[0m {}\n",
                color(level),
                tag(level),
                record.args()
            ));
        }
    }

    fn flush(&self) {}
}

/// Installs the kernel logger with the given sink.
///
/// The first call wins; later calls (and the sinks they carry) are ignored,
/// as is a logger already installed by someone else.
pub fn init(sink: Sink) {
    SINK.call_once(|| sink);
    if log::set_logger(&LOGGER).is_ok() {
        log::set_max_level(LevelFilter::Trace);
    }
}
