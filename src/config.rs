//! Invocation configuration.
//!
//! A [`Configuration`] aggregates the collaborator objects one invocation
//! needs: build provider, target preparers, test units, listeners, and
//! [`CommandOptions`]. XML-driven configuration loading lives outside this
//! crate; embedders assemble configurations programmatically.
//!
//! # Options TOML
//!
//! ```toml
//! [options]
//! loop_mode = false
//! capture_logcat = true
//! ```

use std::mem;

use serde::{Deserialize, Serialize};

use crate::build::{BuildInfo, BuildProvider, ExistingBuildProvider};
use crate::listener::InvocationListener;
use crate::prepare::TargetPreparer;
use crate::testunit::RemoteTest;

/// Command-level options shared by every test unit in the configuration.
///
/// # Defaults
///
/// | Field | Default |
/// |-------|---------|
/// | `loop_mode` | false |
/// | `capture_logcat` | true |
/// | `min_loop_duration_ms` | 10000 |
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandOptions {
    /// Re-queue the command continuously. When set, failure-driven
    /// rescheduling is suppressed (the loop re-runs anyway).
    #[serde(default)]
    pub loop_mode: bool,

    /// Capture the device logcat as an artifact at invocation end.
    #[serde(default = "default_capture_logcat")]
    pub capture_logcat: bool,

    /// Minimum wall time between loop-mode iterations.
    #[serde(default = "default_min_loop_duration_ms")]
    pub min_loop_duration_ms: u64,
}

fn default_capture_logcat() -> bool {
    true
}

fn default_min_loop_duration_ms() -> u64 {
    10_000
}

impl Default for CommandOptions {
    fn default() -> Self {
        Self {
            loop_mode: false,
            capture_logcat: default_capture_logcat(),
            min_loop_duration_ms: default_min_loop_duration_ms(),
        }
    }
}

/// Everything one invocation attempt needs, built once per attempt.
pub struct Configuration {
    /// Name for logs and rescheduling.
    pub name: String,
    /// Source and owner of the build under test.
    pub build_provider: Box<dyn BuildProvider>,
    /// Preparers applied in order before the tests.
    pub target_preparers: Vec<Box<dyn TargetPreparer>>,
    /// Test units executed in order.
    pub tests: Vec<Box<dyn RemoteTest>>,
    /// Result listeners, in forwarding order.
    pub listeners: Vec<Box<dyn InvocationListener>>,
    /// Shared command options.
    pub command_options: CommandOptions,
}

impl Configuration {
    /// Start a configuration with a name and build provider.
    pub fn new(name: impl Into<String>, build_provider: Box<dyn BuildProvider>) -> Self {
        Self {
            name: name.into(),
            build_provider,
            target_preparers: Vec::new(),
            tests: Vec::new(),
            listeners: Vec::new(),
            command_options: CommandOptions::default(),
        }
    }

    /// Append a target preparer.
    pub fn with_preparer(mut self, preparer: Box<dyn TargetPreparer>) -> Self {
        self.target_preparers.push(preparer);
        self
    }

    /// Append a test unit.
    pub fn with_test(mut self, test: Box<dyn RemoteTest>) -> Self {
        self.tests.push(test);
        self
    }

    /// Append a result listener.
    pub fn with_listener(mut self, listener: Box<dyn InvocationListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    /// Set the command options.
    pub fn with_options(mut self, options: CommandOptions) -> Self {
        self.command_options = options;
        self
    }

    /// Remove and return the listeners (the invocation wraps them in a
    /// forwarder for its lifetime).
    pub fn take_listeners(&mut self) -> Vec<Box<dyn InvocationListener>> {
        mem::take(&mut self.listeners)
    }

    /// Build the child configuration used to resume this one on another
    /// device after device loss.
    ///
    /// The unfinished test-unit instances and the preparers move into the
    /// child; the already-fetched build is wrapped in an
    /// [`ExistingBuildProvider`] so the resumed attempt tests the same
    /// image. Listeners do not move — the embedder attaches fresh reporters
    /// when it picks the configuration up.
    pub fn into_resume_config(&mut self, build: BuildInfo) -> Configuration {
        Configuration {
            name: self.name.clone(),
            build_provider: Box::new(ExistingBuildProvider::new(build)),
            target_preparers: mem::take(&mut self.target_preparers),
            tests: mem::take(&mut self.tests),
            listeners: Vec::new(),
            command_options: self.command_options.clone(),
        }
    }
}
