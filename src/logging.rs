//! Logging setup
//!
//! Installs a `tracing-subscriber` fmt layer that writes to stdout and to a
//! bounded in-memory [`LogBuffer`], so the chat layer can show recent log
//! lines on request.

use crate::error::{Error, Result};
use std::io;
use std::sync::{Arc, Mutex, PoisonError};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::fmt::writer::MakeWriterExt;

/// Default capacity of the in-memory log, in bytes
pub const DEFAULT_LOG_CAPACITY: usize = 50_000;

/// Bounded in-memory copy of recent log output
///
/// When the buffer grows past its capacity the oldest half is dropped,
/// cutting at a line boundary where possible.
#[derive(Clone, Debug)]
pub struct LogBuffer {
    inner: Arc<Mutex<String>>,
    capacity: usize,
}

impl Default for LogBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_LOG_CAPACITY)
    }
}

impl LogBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(String::new())),
            capacity: capacity.max(2),
        }
    }

    pub fn push_str(&self, text: &str) {
        let mut buf = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        buf.push_str(text);
        if buf.len() > self.capacity {
            let mut cut = buf.len() - self.capacity / 2;
            while !buf.is_char_boundary(cut) {
                cut += 1;
            }
            if let Some(nl) = buf[cut..].find('\n') {
                cut += nl + 1;
            }
            buf.drain(..cut);
        }
    }

    /// Everything currently held
    pub fn contents(&self) -> String {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// The last `lines` lines
    pub fn tail(&self, lines: usize) -> String {
        let buf = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let all: Vec<&str> = buf.lines().collect();
        let start = all.len().saturating_sub(lines);
        all[start..].join("\n")
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

/// `io::Write` handle appending into a [`LogBuffer`]
pub struct LogBufferWriter {
    buffer: LogBuffer,
}

impl io::Write for LogBufferWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer.push_str(&String::from_utf8_lossy(buf));
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for LogBuffer {
    type Writer = LogBufferWriter;

    fn make_writer(&'a self) -> Self::Writer {
        LogBufferWriter {
            buffer: self.clone(),
        }
    }
}

/// Install the global subscriber
///
/// `RUST_LOG` takes precedence over `level`. Returns the buffer that
/// receives a copy of every formatted line.
pub fn init_logging(level: &str) -> Result<LogBuffer> {
    let buffer = LogBuffer::default();

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .map_err(|e| Error::config("LOG_LEVEL", e.to_string()))?;

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(io::stdout.and(buffer.clone()))
        .with_ansi(false)
        .try_init()
        .map_err(|e| Error::Other(format!("failed to install log subscriber: {}", e)))?;

    tracing::info!(level, "Logging initialized");
    Ok(buffer)
}
