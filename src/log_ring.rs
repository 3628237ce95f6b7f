use std::collections::VecDeque;
use std::io::{self, Write};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

pub const DEFAULT_MAX_LINES: usize = 2000;

static GLOBAL_RING: OnceLock<LogRing> = OnceLock::new();

/// Install the process-wide ring the tracing writer appends to. Only the
/// first call wins.
pub fn set_global_log_ring(ring: LogRing) -> bool {
    GLOBAL_RING.set(ring).is_ok()
}

pub fn global_log_ring() -> Option<LogRing> {
    GLOBAL_RING.get().cloned()
}

#[derive(Debug)]
struct Lines {
    lines: VecDeque<String>,
    max_lines: usize,
}

impl Lines {
    fn push(&mut self, line: String) {
        self.lines.push_back(line);
        while self.lines.len() > self.max_lines {
            self.lines.pop_front();
        }
    }
}

/// Bounded in-memory log, for hosts that surface recent sync activity
/// (a diagnostics panel, a bug report) instead of writing to stderr.
#[derive(Clone, Debug)]
pub struct LogRing {
    inner: Arc<Mutex<Lines>>,
}

impl Default for LogRing {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_LINES)
    }
}

impl LogRing {
    pub fn new(max_lines: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Lines {
                lines: VecDeque::new(),
                max_lines: max_lines.max(1),
            })),
        }
    }

    pub fn push(&self, line: impl Into<String>) {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(line.into());
    }

    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .lines
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of the retained lines, oldest first.
    pub fn lines(&self) -> Vec<String> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .lines
            .iter()
            .cloned()
            .collect()
    }

    pub fn writer(&self) -> LogRingWriter {
        LogRingWriter {
            ring: self.clone(),
            pending: Vec::new(),
        }
    }
}

/// `io::Write` adapter; complete lines go to the ring, a trailing partial
/// line waits for its newline or a flush.
#[derive(Debug)]
pub struct LogRingWriter {
    ring: LogRing,
    pending: Vec<u8>,
}

impl LogRingWriter {
    fn drain_lines(&mut self, to: usize) {
        let drained: Vec<u8> = self.pending.drain(..to).collect();
        for line in String::from_utf8_lossy(&drained).split('\n') {
            if !line.is_empty() {
                self.ring.push(line);
            }
        }
    }
}

impl Write for LogRingWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.pending.extend_from_slice(buf);
        if let Some(pos) = self.pending.iter().rposition(|b| *b == b'\n') {
            self.drain_lines(pos + 1);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        let len = self.pending.len();
        self.drain_lines(len);
        Ok(())
    }
}

impl Drop for LogRingWriter {
    fn drop(&mut self) {
        let _ = self.flush();
    }
}
