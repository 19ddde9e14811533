//! Per-invocation logging context.
//!
//! Explicitly constructed and passed into the invocation — no process-wide
//! registry. Entries are mirrored through `tracing` for live observation
//! and buffered so the invocation can deliver a `host_log` artifact to its
//! listeners at the end.

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use tracing::Level;
use uuid::Uuid;

/// One buffered log line.
#[derive(Debug, Clone)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: Level,
    pub message: String,
}

/// Buffering logger scoped to a single invocation attempt.
pub struct InvocationLogger {
    id: Uuid,
    entries: Mutex<Vec<LogEntry>>,
    closed: AtomicBool,
}

impl InvocationLogger {
    /// Create a logger with a fresh invocation id.
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            entries: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// Unique id of the invocation this logger belongs to.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Record an entry at the given level.
    pub fn log(&self, level: Level, message: impl Into<String>) {
        let message = message.into();
        // tracing's event! requires a const level; dispatch explicitly.
        match level {
            Level::ERROR => tracing::error!(invocation = %self.id, "{message}"),
            Level::WARN => tracing::warn!(invocation = %self.id, "{message}"),
            Level::INFO => tracing::info!(invocation = %self.id, "{message}"),
            Level::DEBUG => tracing::debug!(invocation = %self.id, "{message}"),
            Level::TRACE => tracing::trace!(invocation = %self.id, "{message}"),
        }
        self.entries.lock().expect("log lock poisoned").push(LogEntry {
            timestamp: Utc::now(),
            level,
            message,
        });
    }

    /// Record at INFO.
    pub fn info(&self, message: impl Into<String>) {
        self.log(Level::INFO, message);
    }

    /// Record at WARN.
    pub fn warn(&self, message: impl Into<String>) {
        self.log(Level::WARN, message);
    }

    /// Record at ERROR.
    pub fn error(&self, message: impl Into<String>) {
        self.log(Level::ERROR, message);
    }

    /// Render the buffered log as bytes for the `host_log` artifact.
    pub fn snapshot(&self) -> Vec<u8> {
        let entries = self.entries.lock().expect("log lock poisoned");
        let mut out = String::new();
        for entry in entries.iter() {
            out.push_str(&format!(
                "{} {:5} {}\n",
                entry.timestamp.format("%m-%d %H:%M:%S%.3f"),
                entry.level,
                entry.message
            ));
        }
        out.into_bytes()
    }

    /// Close the logger. Must be called exactly once per invocation;
    /// a second close reports the bookkeeping bug.
    pub fn close(&self) -> anyhow::Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            anyhow::bail!("invocation logger {} closed twice", self.id);
        }
        Ok(())
    }

    /// Whether the logger has been closed.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Default for InvocationLogger {
    fn default() -> Self {
        Self::new()
    }
}
