// SPDX-License-Identifier: GPL-2.0-or-later

//! Logging (component I).
//!
//! Structured diagnostics via `tracing`, initialized once at process start
//! from the `-v` count and `-s`/daemonized state. Verbosity 0 maps to
//! `WARN`; each `-v` lowers the filter one level, down to `TRACE`. When
//! daemonized or `-s` is given, records are additionally mirrored through a
//! [`LogSink`] — an implementation seam so tests can capture emitted
//! records without a real syslog connection, the same role `ddcommon`
//! gives its own small trait seams around things a unit test can't touch.

use std::sync::Mutex;

use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Maps a `-v` count to the default filter level. Monotonic: each
/// additional `-v` can only lower the effective level, never raise it.
pub fn level_for_verbosity(verbose: u8) -> Level {
    match verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    }
}

/// A transport that mirrors formatted log lines somewhere other than
/// stdio. The real implementation talks to `syslog(3)`; tests substitute
/// [`CapturingSink`].
pub trait LogSink: Send + Sync {
    fn emit(&self, level: Level, message: &str);
}

/// Mirrors every record to the platform syslog via `libc::syslog`.
/// Priority mapping follows the conventional syslog levels.
pub struct SyslogSink;

impl SyslogSink {
    /// Opens the syslog connection under the given ident, mirroring the
    /// source's `openlog("abrtd", ...)` call.
    pub fn open(ident: &'static str) -> Self {
        let ident_c = std::ffi::CString::new(ident).expect("ident has no NUL bytes");
        // Safety: `ident_c` is leaked intentionally; libc::syslog keeps a
        // raw pointer to it for the life of the process, same as openlog(3)
        // requires of its caller.
        unsafe {
            libc::openlog(
                ident_c.into_raw(),
                libc::LOG_PID | libc::LOG_CONS,
                libc::LOG_DAEMON,
            );
        }
        Self
    }
}

impl LogSink for SyslogSink {
    fn emit(&self, level: Level, message: &str) {
        let priority = match level {
            Level::ERROR => libc::LOG_ERR,
            Level::WARN => libc::LOG_WARNING,
            Level::INFO => libc::LOG_INFO,
            Level::DEBUG | Level::TRACE => libc::LOG_DEBUG,
        };
        if let Ok(msg_c) = std::ffi::CString::new(message) {
            // Safety: `msg_c` is a valid NUL-terminated buffer for the
            // duration of this call; syslog(3) does not retain it.
            unsafe {
                libc::syslog(priority, b"%s\0".as_ptr() as *const libc::c_char, msg_c.as_ptr());
            }
        }
    }
}

/// In-crate test double: records every emitted `(level, message)` pair.
#[derive(Default)]
pub struct CapturingSink {
    records: Mutex<Vec<(Level, String)>>,
}

impl CapturingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<(Level, String)> {
        self.records.lock().unwrap().clone()
    }
}

impl LogSink for CapturingSink {
    fn emit(&self, level: Level, message: &str) {
        self.records.lock().unwrap().push((level, message.to_string()));
    }
}

/// Extracts the `message` field out of an event; every `tracing::info!`
/// call site and friends sets exactly one.
#[derive(Default)]
struct MessageVisitor(String);

impl Visit for MessageVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.0 = format!("{value:?}");
        }
    }
}

/// Installs the global subscriber: an `EnvFilter`-driven stdio formatter
/// seeded from `-v`, plus (when `mirror` is given) a [`SinkLayerBoxed`] so
/// every record also reaches syslog or a test's [`CapturingSink`].
pub fn init(verbose: u8, mirror: Option<Box<dyn LogSink + 'static>>) {
    let default_level = level_for_verbosity(verbose);
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level.to_string()));

    let registry = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer());

    match mirror {
        Some(sink) => registry.with(SinkLayerBoxed { sink }).init(),
        None => registry.init(),
    }
}

/// Owns a boxed [`LogSink`] so [`init`] can install it without a generic
/// parameter leaking into callers that don't care about the concrete type.
struct SinkLayerBoxed {
    sink: Box<dyn LogSink>,
}

impl<Sub: Subscriber> Layer<Sub> for SinkLayerBoxed {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, Sub>) {
        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);
        self.sink.emit(*event.metadata().level(), &visitor.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbosity_mapping_is_monotonic() {
        assert_eq!(level_for_verbosity(0), Level::WARN);
        assert_eq!(level_for_verbosity(1), Level::INFO);
        assert_eq!(level_for_verbosity(2), Level::DEBUG);
        assert_eq!(level_for_verbosity(3), Level::TRACE);
        assert_eq!(level_for_verbosity(9), Level::TRACE);
    }

    #[test]
    fn capturing_sink_records_emitted_messages() {
        let sink = CapturingSink::new();
        sink.emit(Level::WARN, "quota exceeded");
        let records = sink.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].0, Level::WARN);
        assert_eq!(records[0].1, "quota exceeded");
    }
}
