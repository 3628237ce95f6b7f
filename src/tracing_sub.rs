//! Subscriber setup: compact lines into a [`LogRing`] or stderr, filtered
//! by the level a host configures for its contexts.

use std::io::{self, Write};

use tracing::level_filters::LevelFilter;
use tracing_subscriber::fmt::MakeWriter;

use crate::config::SyncConfig;
use crate::constants::LOG_LEVEL_ENV;
use crate::log_ring::{LogRing, LogRingWriter, global_log_ring};

/// Where formatted lines go.
#[derive(Clone, Debug, Default)]
pub enum LogSink {
    /// The global ring once one is installed, stderr until then.
    #[default]
    Global,
    Ring(LogRing),
    Stderr,
}

impl LogSink {
    fn ring(&self) -> Option<LogRing> {
        match self {
            LogSink::Global => global_log_ring(),
            LogSink::Ring(ring) => Some(ring.clone()),
            LogSink::Stderr => None,
        }
    }
}

pub enum SinkWriter {
    Ring(LogRingWriter),
    Stderr(io::Stderr),
}

impl Write for SinkWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            SinkWriter::Ring(w) => w.write(buf),
            SinkWriter::Stderr(s) => s.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            SinkWriter::Ring(w) => w.flush(),
            SinkWriter::Stderr(s) => s.flush(),
        }
    }
}

impl<'a> MakeWriter<'a> for LogSink {
    type Writer = SinkWriter;

    fn make_writer(&'a self) -> Self::Writer {
        match self.ring() {
            Some(ring) => SinkWriter::Ring(ring.writer()),
            None => SinkWriter::Stderr(io::stderr()),
        }
    }
}

/// Pick the effective level: a parsable override wins over the configured
/// value, and anything unparsable falls back to `debug`.
pub fn pick_level(override_level: Option<&str>, configured: &str) -> LevelFilter {
    override_level
        .and_then(|v| v.trim().parse().ok())
        .or_else(|| configured.trim().parse().ok())
        .unwrap_or(LevelFilter::DEBUG)
}

pub fn level_for(config: &SyncConfig) -> LevelFilter {
    let env = std::env::var(LOG_LEVEL_ENV).ok();
    pick_level(env.as_deref(), &config.log_level)
}

/// Build, without installing, the subscriber [`init`] would install.
pub fn subscriber(level: LevelFilter, sink: LogSink) -> impl tracing::Subscriber + Send + Sync {
    // Colour codes only make sense on a terminal.
    let ansi = sink.ring().is_none();
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(sink)
        .with_ansi(ansi)
        .with_target(false)
        .with_thread_names(false)
        .finish()
}

/// Install the process-wide subscriber. Returns false when one was already
/// installed; the first one stays in place.
pub fn init(config: &SyncConfig, sink: LogSink) -> bool {
    let level = level_for(config);
    tracing::subscriber::set_global_default(subscriber(level, sink)).is_ok()
}

/// [`init`] with default settings and the global sink.
pub fn init_default() {
    let _ = init(&SyncConfig::default(), LogSink::Global);
}
