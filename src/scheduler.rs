//! Rescheduling contract and a simple in-memory queue.
//!
//! The invocation state machine never re-runs work itself; it hands the
//! decision to a [`Rescheduler`]. Two calls with distinct semantics:
//! `reschedule_command` re-queues the same command for a fresh run, while
//! `schedule_config` queues a specific configuration carrying unfinished
//! state (a resume). They stay separate on purpose — a resume continues
//! partial progress, a reschedule starts over.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use tracing::info;

use crate::config::Configuration;

/// Accepts re-submitted work for later execution.
pub trait Rescheduler: Send + Sync {
    /// Request a fresh re-run of the current command. Returns whether the
    /// request was accepted.
    fn reschedule_command(&self) -> bool;

    /// Queue a specific configuration (typically a resume configuration
    /// holding unfinished test units). Returns whether it was accepted.
    fn schedule_config(&self, config: Configuration) -> bool;
}

/// FIFO queue of configurations plus a reschedule-request counter.
///
/// A minimal [`Rescheduler`] for embedders that drive their own worker
/// loop, and for tests.
#[derive(Default)]
pub struct CommandQueue {
    queue: Mutex<VecDeque<Configuration>>,
    reschedule_requests: AtomicUsize,
}

impl CommandQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Pop the oldest scheduled configuration.
    pub fn pop(&self) -> Option<Configuration> {
        self.queue.lock().expect("queue lock poisoned").pop_front()
    }

    /// Number of queued configurations.
    pub fn len(&self) -> usize {
        self.queue.lock().expect("queue lock poisoned").len()
    }

    /// Whether the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of fresh-run requests received.
    pub fn reschedule_requests(&self) -> usize {
        self.reschedule_requests.load(Ordering::SeqCst)
    }
}

impl Rescheduler for CommandQueue {
    fn reschedule_command(&self) -> bool {
        self.reschedule_requests.fetch_add(1, Ordering::SeqCst);
        true
    }

    fn schedule_config(&self, config: Configuration) -> bool {
        info!(config = %config.name, "queueing configuration for resumption");
        self.queue
            .lock()
            .expect("queue lock poisoned")
            .push_back(config);
        true
    }
}
