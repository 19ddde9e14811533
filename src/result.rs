//! Test identity and per-run result tracking.
//!
//! [`TestRunResult`] is the transient state built up while one
//! instrumentation run streams callbacks; the rerun engine consumes it to
//! decide which tests the device silently dropped.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::listener::{ListenerResult, TestRunListener};

/// Identifies one test method as a `(class, method)` pair.
///
/// Equality covers both fields; this is the unit of expected-vs-executed
/// comparison in the rerun engine.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TestIdentifier {
    class_name: String,
    test_name: String,
}

impl TestIdentifier {
    /// Create a new identifier.
    pub fn new(class_name: impl Into<String>, test_name: impl Into<String>) -> Self {
        Self {
            class_name: class_name.into(),
            test_name: test_name.into(),
        }
    }

    /// Fully qualified class name containing the test.
    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    /// Method name of the test.
    pub fn test_name(&self) -> &str {
        &self.test_name
    }
}

impl fmt::Display for TestIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.class_name, self.test_name)
    }
}

/// Outcome of a single test within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestStatus {
    /// Test ran to completion and passed.
    Passed,
    /// Test ran and reported a failure.
    Failed,
    /// Test was in flight when the run itself broke.
    Error,
    /// Test started but never ended.
    Incomplete,
}

impl TestStatus {
    /// Whether the test reached a terminal state.
    pub fn is_complete(&self) -> bool {
        !matches!(self, TestStatus::Incomplete)
    }
}

/// Status plus failure detail for one test.
#[derive(Debug, Clone)]
pub struct TestRecord {
    pub status: TestStatus,
    pub trace: Option<String>,
}

/// Results of a single test run, built incrementally from listener
/// callbacks and discarded once the rerun decision has been made.
#[derive(Debug, Clone, Default)]
pub struct TestRunResult {
    run_name: String,
    records: BTreeMap<TestIdentifier, TestRecord>,
    expected_count: usize,
    run_complete: bool,
    run_failed: bool,
    failure_message: Option<String>,
    elapsed: Duration,
}

impl TestRunResult {
    /// Name of the run, as reported by `test_run_started`.
    pub fn run_name(&self) -> &str {
        &self.run_name
    }

    /// Number of tests the device announced for this run.
    pub fn expected_count(&self) -> usize {
        self.expected_count
    }

    /// All per-test records observed so far.
    pub fn records(&self) -> &BTreeMap<TestIdentifier, TestRecord> {
        &self.records
    }

    /// Number of tests that reported any callback.
    pub fn num_tests(&self) -> usize {
        self.records.len()
    }

    /// Number of tests with the given status.
    pub fn num_with_status(&self, status: TestStatus) -> usize {
        self.records.values().filter(|r| r.status == status).count()
    }

    /// Identifiers of every test that reached a terminal state.
    pub fn completed_tests(&self) -> BTreeSet<TestIdentifier> {
        self.records
            .iter()
            .filter(|(_, r)| r.status.is_complete())
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Whether `test_run_ended` was observed.
    pub fn is_run_complete(&self) -> bool {
        self.run_complete
    }

    /// Whether `test_run_failed` was observed.
    pub fn is_run_failure(&self) -> bool {
        self.run_failed
    }

    /// Run-level failure message, if any.
    pub fn failure_message(&self) -> Option<&str> {
        self.failure_message.as_deref()
    }

    /// Wall time of the run as reported by the device.
    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }
}

/// A listener that records callbacks into a [`TestRunResult`].
///
/// Used by the instrumentation engine both for log-only collection runs and
/// for tracking which tests actually completed during a real run. Scoped to
/// a single device interaction; call [`take_result`](Self::take_result) once
/// the run settles.
#[derive(Debug, Default)]
pub struct CollectingTestListener {
    result: TestRunResult,
}

impl CollectingTestListener {
    /// Create an empty collector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Borrow the result accumulated so far.
    pub fn result(&self) -> &TestRunResult {
        &self.result
    }

    /// Consume the collector, yielding its result.
    pub fn take_result(self) -> TestRunResult {
        self.result
    }
}

impl TestRunListener for CollectingTestListener {
    fn test_run_started(&mut self, run_name: &str, test_count: usize) -> ListenerResult {
        self.result.run_name = run_name.to_string();
        self.result.expected_count = test_count;
        self.result.run_complete = false;
        Ok(())
    }

    fn test_started(&mut self, test: &TestIdentifier) -> ListenerResult {
        self.result.records.insert(
            test.clone(),
            TestRecord {
                status: TestStatus::Incomplete,
                trace: None,
            },
        );
        Ok(())
    }

    fn test_failed(&mut self, test: &TestIdentifier, trace: &str) -> ListenerResult {
        let record = self
            .result
            .records
            .entry(test.clone())
            .or_insert(TestRecord {
                status: TestStatus::Incomplete,
                trace: None,
            });
        record.status = TestStatus::Failed;
        record.trace = Some(trace.to_string());
        Ok(())
    }

    fn test_ended(
        &mut self,
        test: &TestIdentifier,
        _metrics: &BTreeMap<String, String>,
    ) -> ListenerResult {
        let record = self
            .result
            .records
            .entry(test.clone())
            .or_insert(TestRecord {
                status: TestStatus::Incomplete,
                trace: None,
            });
        // A failure recorded between started and ended wins.
        if record.status == TestStatus::Incomplete {
            record.status = TestStatus::Passed;
        }
        Ok(())
    }

    fn test_run_failed(&mut self, message: &str) -> ListenerResult {
        self.result.run_failed = true;
        self.result.failure_message = Some(message.to_string());
        // A test in flight when the run broke errored rather than failed.
        for record in self.result.records.values_mut() {
            if record.status == TestStatus::Incomplete {
                record.status = TestStatus::Error;
                record.trace = Some(message.to_string());
            }
        }
        Ok(())
    }

    fn test_run_ended(
        &mut self,
        elapsed: Duration,
        _metrics: &BTreeMap<String, String>,
    ) -> ListenerResult {
        self.result.run_complete = true;
        self.result.elapsed = elapsed;
        Ok(())
    }
}
