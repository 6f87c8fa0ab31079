//! In-memory log ring backing `diagnostics.getLogs()` (spec.md §6).
//!
//! The daemon's `tracing-subscriber` writer is duplicated into a bounded
//! ring buffer so a client can retrieve recent log lines without the
//! daemon needing a separate log file on disk.

use std::collections::VecDeque;
use std::io;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing_subscriber::fmt::MakeWriter;

const DEFAULT_CAPACITY: usize = 2000;

/// Bounded, shared ring buffer of formatted log lines.
#[derive(Clone)]
pub struct LogRing {
    lines: Arc<Mutex<VecDeque<String>>>,
    capacity: usize,
}

impl LogRing {
    pub fn new() -> Self {
        Self { lines: Arc::new(Mutex::new(VecDeque::with_capacity(DEFAULT_CAPACITY))), capacity: DEFAULT_CAPACITY }
    }

    /// Most recent lines, oldest first.
    pub fn snapshot(&self) -> Vec<String> {
        self.lines.lock().iter().cloned().collect()
    }

    fn push(&self, line: String) {
        let mut lines = self.lines.lock();
        if lines.len() >= self.capacity {
            lines.pop_front();
        }
        lines.push_back(line);
    }
}

impl Default for LogRing {
    fn default() -> Self {
        Self::new()
    }
}

/// A `std::io::Write` sink that appends complete lines to a [`LogRing`]
/// and passes everything through to stderr, so console output is
/// unaffected.
pub struct RingWriter(LogRing);

impl io::Write for RingWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if let Ok(text) = std::str::from_utf8(buf) {
            for line in text.lines() {
                if !line.is_empty() {
                    self.0.push(line.to_string());
                }
            }
        }
        io::stderr().write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        io::stderr().flush()
    }
}

impl<'a> MakeWriter<'a> for LogRing {
    type Writer = RingWriter;

    fn make_writer(&'a self) -> Self::Writer {
        RingWriter(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn ring_evicts_oldest_line_past_capacity() {
        let ring = LogRing { lines: Arc::new(Mutex::new(VecDeque::new())), capacity: 2 };
        let mut writer = ring.make_writer();
        writer.write_all(b"first\n").unwrap();
        writer.write_all(b"second\n").unwrap();
        writer.write_all(b"third\n").unwrap();
        assert_eq!(ring.snapshot(), vec!["second".to_string(), "third".to_string()]);
    }
}
