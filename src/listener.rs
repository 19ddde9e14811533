//! Result listener contract and the fan-out forwarder.
//!
//! Listeners observe the invocation lifecycle. Callbacks for a single test
//! are strictly ordered `started → (failed)? → ended`, run-level callbacks
//! `run_started → [test callbacks]* → run_failed? → run_ended`, and the
//! forwarder preserves that order per listener.
//!
//! Every callback returns a [`ListenerResult`] so that the forwarding
//! policy has something real to act on: a listener that cannot persist a
//! result reports it instead of panicking.

use std::collections::BTreeMap;
use std::time::Duration;

use tracing::debug;

use crate::build::BuildInfo;
use crate::errors::ListenerError;
use crate::result::TestIdentifier;

/// Result of delivering one callback to one listener.
pub type ListenerResult = Result<(), ListenerError>;

/// Kind of a captured log artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogKind {
    /// Plain text (harness log).
    Text,
    /// Device logcat capture.
    Logcat,
    /// Device bugreport snapshot.
    Bugreport,
}

/// A pointer to detailed results produced by one listener, gathered at the
/// end of the invocation and broadcast to every summary-aware listener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestSummary {
    /// URI of the detailed results (report file, dashboard link).
    pub uri: String,
}

impl TestSummary {
    /// Create a summary pointing at the given URI.
    pub fn new(uri: impl Into<String>) -> Self {
        Self { uri: uri.into() }
    }
}

/// Receives callbacks for one test run on a device.
///
/// All methods default to no-ops so implementors only override what they
/// observe.
pub trait TestRunListener: Send {
    /// A test run of `test_count` tests named `run_name` started.
    fn test_run_started(&mut self, _run_name: &str, _test_count: usize) -> ListenerResult {
        Ok(())
    }

    /// An individual test started.
    fn test_started(&mut self, _test: &TestIdentifier) -> ListenerResult {
        Ok(())
    }

    /// An individual test failed. Always followed by `test_ended`.
    fn test_failed(&mut self, _test: &TestIdentifier, _trace: &str) -> ListenerResult {
        Ok(())
    }

    /// An individual test ended, with run metrics emitted by the device.
    fn test_ended(
        &mut self,
        _test: &TestIdentifier,
        _metrics: &BTreeMap<String, String>,
    ) -> ListenerResult {
        Ok(())
    }

    /// The run failed at the run level (crash, harness error on device).
    fn test_run_failed(&mut self, _message: &str) -> ListenerResult {
        Ok(())
    }

    /// The run was stopped before completion at user request.
    fn test_run_stopped(&mut self, _elapsed: Duration) -> ListenerResult {
        Ok(())
    }

    /// The run ended (successfully or after a reported failure).
    fn test_run_ended(
        &mut self,
        _elapsed: Duration,
        _metrics: &BTreeMap<String, String>,
    ) -> ListenerResult {
        Ok(())
    }
}

/// Receives invocation-level callbacks in addition to run callbacks.
pub trait InvocationListener: TestRunListener {
    /// Name used in log and error messages.
    fn name(&self) -> &str {
        "listener"
    }

    /// The invocation started with the given build. Called exactly once,
    /// before any test-affecting work.
    fn invocation_started(&mut self, _build: &BuildInfo) -> ListenerResult {
        Ok(())
    }

    /// The invocation failed with the given message.
    fn invocation_failed(&mut self, _message: &str) -> ListenerResult {
        Ok(())
    }

    /// The invocation ended after `elapsed` wall time, pass or fail.
    fn invocation_ended(&mut self, _elapsed: Duration) -> ListenerResult {
        Ok(())
    }

    /// A named log artifact was captured.
    fn test_log(&mut self, _name: &str, _kind: LogKind, _data: &[u8]) -> ListenerResult {
        Ok(())
    }

    /// A pointer to this listener's detailed results, gathered once at the
    /// end of the invocation.
    fn summary(&mut self) -> Option<TestSummary> {
        None
    }

    /// The aggregate summary list, broadcast after every listener's
    /// [`summary`](Self::summary) has been gathered.
    fn put_summary(&mut self, _summaries: &[TestSummary]) -> ListenerResult {
        Ok(())
    }
}

/// How [`ResultForwarder`] reacts when a wrapped listener errors mid-fan-out.
///
/// The legacy harness stopped at the first throwing listener. The default
/// here is [`BestEffort`](ForwardPolicy::BestEffort): one misbehaving
/// reporter should not suppress results to healthy reporters. This is a
/// deliberate behavior change; callers that depend on the legacy semantics
/// select [`FailFast`](ForwardPolicy::FailFast) explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ForwardPolicy {
    /// Deliver to listeners `0..i`, propagate the first error.
    FailFast,
    /// Deliver to every listener, aggregate all errors into one.
    #[default]
    BestEffort,
}

/// Fans out every callback, in listener order, to every wrapped listener.
///
/// The forwarder holds no result state of its own; it is a pure conduit.
/// The relative order of calls delivered to each listener equals the order
/// the forwarder received them.
pub struct ResultForwarder {
    listeners: Vec<Box<dyn InvocationListener>>,
    policy: ForwardPolicy,
}

impl ResultForwarder {
    /// Wrap an ordered set of listeners with the default policy.
    pub fn new(listeners: Vec<Box<dyn InvocationListener>>) -> Self {
        Self {
            listeners,
            policy: ForwardPolicy::default(),
        }
    }

    /// Select the forwarding policy.
    pub fn with_policy(mut self, policy: ForwardPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Number of wrapped listeners.
    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    /// Whether no listeners are wrapped.
    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    /// Gather every listener's summary, then broadcast the aggregate list.
    ///
    /// Gathering completes for all listeners before any `put_summary` call;
    /// the two phases never interleave.
    pub fn gather_and_broadcast_summaries(&mut self) -> ListenerResult {
        let summaries: Vec<TestSummary> = self
            .listeners
            .iter_mut()
            .filter_map(|listener| listener.summary())
            .collect();
        debug!(count = summaries.len(), "broadcasting invocation summaries");
        self.forward("put_summary", |listener| listener.put_summary(&summaries))
    }

    fn forward<F>(&mut self, callback: &'static str, mut call: F) -> ListenerResult
    where
        F: FnMut(&mut dyn InvocationListener) -> ListenerResult,
    {
        match self.policy {
            ForwardPolicy::FailFast => {
                for listener in self.listeners.iter_mut() {
                    call(listener.as_mut())?;
                }
                Ok(())
            }
            ForwardPolicy::BestEffort => {
                let mut failures = Vec::new();
                for listener in self.listeners.iter_mut() {
                    if let Err(err) = call(listener.as_mut()) {
                        failures.push(format!("{} ({}): {}", listener.name(), callback, err));
                    }
                }
                if failures.is_empty() {
                    Ok(())
                } else {
                    Err(ListenerError::Aggregate(failures))
                }
            }
        }
    }
}

impl TestRunListener for ResultForwarder {
    fn test_run_started(&mut self, run_name: &str, test_count: usize) -> ListenerResult {
        self.forward("test_run_started", |l| l.test_run_started(run_name, test_count))
    }

    fn test_started(&mut self, test: &TestIdentifier) -> ListenerResult {
        self.forward("test_started", |l| l.test_started(test))
    }

    fn test_failed(&mut self, test: &TestIdentifier, trace: &str) -> ListenerResult {
        self.forward("test_failed", |l| l.test_failed(test, trace))
    }

    fn test_ended(
        &mut self,
        test: &TestIdentifier,
        metrics: &BTreeMap<String, String>,
    ) -> ListenerResult {
        self.forward("test_ended", |l| l.test_ended(test, metrics))
    }

    fn test_run_failed(&mut self, message: &str) -> ListenerResult {
        self.forward("test_run_failed", |l| l.test_run_failed(message))
    }

    fn test_run_stopped(&mut self, elapsed: Duration) -> ListenerResult {
        self.forward("test_run_stopped", |l| l.test_run_stopped(elapsed))
    }

    fn test_run_ended(
        &mut self,
        elapsed: Duration,
        metrics: &BTreeMap<String, String>,
    ) -> ListenerResult {
        self.forward("test_run_ended", |l| l.test_run_ended(elapsed, metrics))
    }
}

impl InvocationListener for ResultForwarder {
    fn name(&self) -> &str {
        "result_forwarder"
    }

    fn invocation_started(&mut self, build: &BuildInfo) -> ListenerResult {
        self.forward("invocation_started", |l| l.invocation_started(build))
    }

    fn invocation_failed(&mut self, message: &str) -> ListenerResult {
        self.forward("invocation_failed", |l| l.invocation_failed(message))
    }

    fn invocation_ended(&mut self, elapsed: Duration) -> ListenerResult {
        self.forward("invocation_ended", |l| l.invocation_ended(elapsed))
    }

    fn test_log(&mut self, name: &str, kind: LogKind, data: &[u8]) -> ListenerResult {
        self.forward("test_log", |l| l.test_log(name, kind, data))
    }

    fn put_summary(&mut self, summaries: &[TestSummary]) -> ListenerResult {
        self.forward("put_summary", |l| l.put_summary(summaries))
    }
}
