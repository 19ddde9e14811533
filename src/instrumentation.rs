//! Instrumentation test unit with expected-vs-executed rerun tracking.
//!
//! Running a whole instrumentation package is lossy: a native crash can
//! take the run down with an unknown number of tests never executed. The
//! engine therefore collects the expected test list up front with a
//! log-only run, watches which tests actually complete, and reruns the
//! difference individually so every expected test gets a reported result.
//!
//! # Features
//!
//! - Log-only collection with bounded retries before the real run.
//! - Individual rerun of tests the device silently dropped.
//! - Synthesized failure reports for tests that never ran at all.
//! - Resume support: after device loss, the unit carries its unexecuted
//!   remainder to a replacement device.
//! - Optional APK install/uninstall bracketing around the run.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::device::{InstrumentationRunner, TestDevice};
use crate::errors::{DeviceError, RunError};
use crate::listener::{InvocationListener, ListenerResult, TestRunListener};
use crate::result::{CollectingTestListener, TestIdentifier};
use crate::testunit::{RemoteTest, TestCapabilities};
use crate::watchdog::TestTimeoutWatchdog;

/// Attempts at log-only test collection before giving up on tracking.
const COLLECT_ATTEMPTS: usize = 3;

/// Default instrumentation runner class.
pub const DEFAULT_RUNNER_CLASS: &str = "android.test.InstrumentationTestRunner";

const DEFAULT_RUN_TIMEOUT: Duration = Duration::from_secs(10 * 60);
const DEFAULT_COLLECTION_TIMEOUT: Duration = Duration::from_secs(2 * 60);
/// Per-test delay during collection; pacing the dry run works around
/// devices that wedge when tests are enumerated at full speed.
const DEFAULT_COLLECTION_DELAY: Duration = Duration::from_millis(15);

/// Runs one instrumentation package (or a subset of it) on a device.
pub struct InstrumentationTest {
    package: Option<String>,
    runner_class: String,
    class_name: Option<String>,
    method_name: Option<String>,
    tests_to_run: Option<Vec<TestIdentifier>>,
    install_apk: Option<PathBuf>,
    rerun_mode: bool,
    run_timeout: Duration,
    collection_timeout: Duration,
    collection_delay: Duration,
    device: Option<Arc<dyn TestDevice>>,
    attempted: bool,
    remaining: Option<Vec<TestIdentifier>>,
}

impl Default for InstrumentationTest {
    fn default() -> Self {
        Self::new()
    }
}

impl InstrumentationTest {
    /// Create an unconfigured instrumentation test. The package name is
    /// mandatory before `run`.
    pub fn new() -> Self {
        Self {
            package: None,
            runner_class: DEFAULT_RUNNER_CLASS.to_string(),
            class_name: None,
            method_name: None,
            tests_to_run: None,
            install_apk: None,
            rerun_mode: true,
            run_timeout: DEFAULT_RUN_TIMEOUT,
            collection_timeout: DEFAULT_COLLECTION_TIMEOUT,
            collection_delay: DEFAULT_COLLECTION_DELAY,
            device: None,
            attempted: false,
            remaining: None,
        }
    }

    /// Set the instrumentation package to run.
    pub fn with_package(mut self, package: impl Into<String>) -> Self {
        self.package = Some(package.into());
        self
    }

    /// Override the runner class.
    pub fn with_runner_class(mut self, runner_class: impl Into<String>) -> Self {
        self.runner_class = runner_class.into();
        self
    }

    /// Restrict the run to one class.
    pub fn with_class_name(mut self, class_name: impl Into<String>) -> Self {
        self.class_name = Some(class_name.into());
        self
    }

    /// Restrict the run to one method of the configured class.
    pub fn with_method_name(mut self, method_name: impl Into<String>) -> Self {
        self.method_name = Some(method_name.into());
        self
    }

    /// Run exactly these tests, one dedicated device run each, skipping
    /// collection.
    pub fn with_tests(mut self, tests: Vec<TestIdentifier>) -> Self {
        self.tests_to_run = Some(tests);
        self
    }

    /// Install this APK before the run and uninstall the package after.
    pub fn with_install_apk(mut self, apk: impl Into<PathBuf>) -> Self {
        self.install_apk = Some(apk.into());
        self
    }

    /// Enable or disable rerun tracking. Disabled, the engine issues a
    /// single untracked run.
    pub fn rerun_mode(mut self, enabled: bool) -> Self {
        self.rerun_mode = enabled;
        self
    }

    /// Maximum time the device may go silent during a real run.
    pub fn with_run_timeout(mut self, timeout: Duration) -> Self {
        self.run_timeout = timeout;
        self
    }

    /// Maximum time allowed for one log-only collection run.
    pub fn with_collection_timeout(mut self, timeout: Duration) -> Self {
        self.collection_timeout = timeout;
        self
    }

    /// Package under test, if configured.
    pub fn package(&self) -> Option<&str> {
        self.package.as_deref()
    }

    /// Tests left unexecuted by an interrupted attempt.
    pub fn remaining_tests(&self) -> Option<&[TestIdentifier]> {
        self.remaining.as_deref()
    }

    fn suite_runner(&self, package: &str, log_only: bool) -> InstrumentationRunner {
        let mut runner = InstrumentationRunner::new(package, &self.runner_class);
        match (&self.class_name, &self.method_name) {
            (Some(class), Some(method)) => runner = runner.with_method(class, method),
            (Some(class), None) => runner = runner.with_class(class),
            _ => {}
        }
        if log_only {
            runner
                .log_only(true)
                .max_time_to_output(self.collection_timeout)
                .arg("delay_msec", self.collection_delay.as_millis().to_string())
        } else {
            runner.max_time_to_output(self.run_timeout)
        }
    }

    fn method_runner(&self, package: &str, test: &TestIdentifier) -> InstrumentationRunner {
        InstrumentationRunner::new(package, &self.runner_class)
            .with_method(test.class_name(), test.test_name())
            .max_time_to_output(self.run_timeout)
    }

    async fn run_on_device(
        &mut self,
        package: &str,
        device: &Arc<dyn TestDevice>,
        listener: &mut dyn InvocationListener,
    ) -> Result<(), RunError> {
        // A resumed unit continues with the tests it never saw complete.
        if let Some(remaining) = self.remaining.take() {
            info!(count = remaining.len(), "resuming interrupted instrumentation run");
            return self.run_test_list(package, device, remaining, listener).await;
        }

        if let Some(tests) = self.tests_to_run.clone() {
            return self.run_test_list(package, device, tests, listener).await;
        }

        if !self.rerun_mode {
            let runner = self.suite_runner(package, false);
            return self.run_untracked(device, &runner, listener).await;
        }

        match self.collect_tests(package, device).await? {
            None => {
                // Expectations unknown; a single untracked run is still
                // better than no run.
                let runner = self.suite_runner(package, false);
                self.run_untracked(device, &runner, listener).await
            }
            Some(expected) if expected.is_empty() => {
                info!(package, "no tests found in package, nothing to run");
                Ok(())
            }
            Some(expected) => self.run_tracked(package, device, expected, listener).await,
        }
    }

    /// Enumerate the package's tests with a log-only run.
    ///
    /// `Ok(None)` means collection is not trustworthy and rerun tracking
    /// is disabled for this attempt. Only device loss is an error.
    async fn collect_tests(
        &self,
        package: &str,
        device: &Arc<dyn TestDevice>,
    ) -> Result<Option<BTreeSet<TestIdentifier>>, RunError> {
        for attempt in 1..=COLLECT_ATTEMPTS {
            let runner = self.suite_runner(package, true);
            let mut collector = CollectingTestListener::new();
            match device.run_instrumentation_tests(&runner, &mut collector).await {
                Ok(()) => {}
                Err(DeviceError::NotAvailable(lost)) => return Err(lost.into()),
                Err(err) => {
                    warn!(attempt, max = COLLECT_ATTEMPTS, "collection run failed to execute: {err}");
                    continue;
                }
            }

            let result = collector.take_result();
            if result.is_run_failure() {
                if result.num_tests() == 0 {
                    // A run failure with zero enumerated tests is the known
                    // flaky shape; a fresh attempt usually succeeds.
                    warn!(
                        attempt,
                        "collection reported run failure with no tests: {:?}",
                        result.failure_message()
                    );
                    continue;
                }
                // Tests were enumerated and the run still failed: something
                // on the device is genuinely broken, retrying won't help.
                warn!(
                    "collection failed on device ({:?}); running without rerun tracking",
                    result.failure_message()
                );
                return Ok(None);
            }
            if !result.is_run_complete() {
                warn!(attempt, "collection run ended without completing");
                continue;
            }
            debug!(count = result.num_tests(), "collected expected tests");
            return Ok(Some(result.completed_tests()));
        }
        warn!("giving up test collection after {COLLECT_ATTEMPTS} attempts");
        Ok(None)
    }

    async fn run_untracked(
        &self,
        device: &Arc<dyn TestDevice>,
        runner: &InstrumentationRunner,
        listener: &mut dyn InvocationListener,
    ) -> Result<(), RunError> {
        let timeout = self.run_timeout;
        let package = runner.package().to_string();
        let watchdog = TestTimeoutWatchdog::new(timeout).arm(move || {
            warn!(package, "instrumentation run exceeded {timeout:?} without output");
        });
        let result = device.run_instrumentation_tests(runner, listener).await;
        watchdog.disarm();
        result.map_err(RunError::from)
    }

    /// Run the full suite while tracking completion against `expected`,
    /// then rerun whatever the device dropped.
    async fn run_tracked(
        &mut self,
        package: &str,
        device: &Arc<dyn TestDevice>,
        expected: BTreeSet<TestIdentifier>,
        listener: &mut dyn InvocationListener,
    ) -> Result<(), RunError> {
        let runner = self.suite_runner(package, false);
        let mut collector = CollectingTestListener::new();
        let run_result = {
            let mut tee = TeeListener::new(listener, &mut collector);
            let timeout = self.run_timeout;
            let watched = package.to_string();
            let watchdog = TestTimeoutWatchdog::new(timeout).arm(move || {
                warn!(package = watched, "instrumentation run exceeded {timeout:?} without output");
            });
            let result = device.run_instrumentation_tests(&runner, &mut tee).await;
            watchdog.disarm();
            result
        };

        let observed = collector.take_result();
        let completed = observed.completed_tests();
        let remaining: Vec<TestIdentifier> = expected
            .iter()
            .filter(|id| !completed.contains(id))
            .cloned()
            .collect();

        if let Err(err) = run_result {
            match RunError::from(err) {
                RunError::DeviceNotAvailable(lost) => {
                    self.remaining = Some(remaining);
                    return Err(lost.into());
                }
                other if remaining.is_empty() => return Err(other),
                other => {
                    // Every expected test is unaccounted-for work; recover
                    // it through the individual rerun path.
                    warn!("suite run failed to execute cleanly: {other}");
                }
            }
        }

        if remaining.is_empty() {
            return Ok(());
        }
        warn!(
            missing = remaining.len(),
            expected = expected.len(),
            "run did not execute all expected tests, rerunning the remainder individually"
        );
        self.run_test_list(package, device, remaining, listener).await
    }

    /// Run each listed test in its own device run.
    ///
    /// A test its dedicated run never reaches gets a synthesized failure
    /// report, so downstream reporters account for every expected test.
    async fn run_test_list(
        &mut self,
        package: &str,
        device: &Arc<dyn TestDevice>,
        tests: Vec<TestIdentifier>,
        listener: &mut dyn InvocationListener,
    ) -> Result<(), RunError> {
        let mut pending: BTreeSet<TestIdentifier> = tests.iter().cloned().collect();
        let mut last_run_failure: Option<String> = None;

        for test in tests {
            if !pending.contains(&test) {
                // An earlier dedicated run covered this one too.
                continue;
            }
            let runner = self.method_runner(package, &test);
            let mut collector = CollectingTestListener::new();
            let sub_result = {
                let mut tee = TeeListener::new(listener, &mut collector);
                device.run_instrumentation_tests(&runner, &mut tee).await
            };

            let observed = collector.take_result();
            for done in observed.completed_tests() {
                pending.remove(&done);
            }
            if observed.is_run_failure() {
                last_run_failure = observed.failure_message().map(str::to_string);
            }

            if let Err(err) = sub_result {
                match RunError::from(err) {
                    RunError::DeviceNotAvailable(lost) => {
                        self.remaining = Some(pending.into_iter().collect());
                        return Err(lost.into());
                    }
                    other => warn!(test = %test, "dedicated rerun failed to execute: {other}"),
                }
            }

            if pending.remove(&test) {
                // The dedicated run came back without this test ever
                // starting. Report it rather than letting it vanish.
                let message = match &last_run_failure {
                    Some(msg) => format!("Test failed to run. Test run failed: {msg}"),
                    None => "Test failed to run to completion".to_string(),
                };
                note(listener.test_started(&test));
                note(listener.test_failed(&test, &message));
                note(listener.test_ended(&test, &BTreeMap::new()));
            }
        }

        if let Some(message) = last_run_failure {
            note(listener.test_run_failed(&message));
        }
        Ok(())
    }
}

fn note(result: ListenerResult) {
    if let Err(err) = result {
        warn!("listener failed during result forwarding: {err}");
    }
}

/// Forwards run callbacks to the real listener and a private collector at
/// the same time.
struct TeeListener<'a> {
    primary: &'a mut dyn InvocationListener,
    collector: &'a mut CollectingTestListener,
}

impl<'a> TeeListener<'a> {
    fn new(
        primary: &'a mut dyn InvocationListener,
        collector: &'a mut CollectingTestListener,
    ) -> Self {
        Self { primary, collector }
    }
}

impl TestRunListener for TeeListener<'_> {
    fn test_run_started(&mut self, run_name: &str, test_count: usize) -> ListenerResult {
        note(self.collector.test_run_started(run_name, test_count));
        self.primary.test_run_started(run_name, test_count)
    }

    fn test_started(&mut self, test: &TestIdentifier) -> ListenerResult {
        note(self.collector.test_started(test));
        self.primary.test_started(test)
    }

    fn test_failed(&mut self, test: &TestIdentifier, trace: &str) -> ListenerResult {
        note(self.collector.test_failed(test, trace));
        self.primary.test_failed(test, trace)
    }

    fn test_ended(
        &mut self,
        test: &TestIdentifier,
        metrics: &BTreeMap<String, String>,
    ) -> ListenerResult {
        note(self.collector.test_ended(test, metrics));
        self.primary.test_ended(test, metrics)
    }

    fn test_run_failed(&mut self, message: &str) -> ListenerResult {
        note(self.collector.test_run_failed(message));
        self.primary.test_run_failed(message)
    }

    fn test_run_stopped(&mut self, elapsed: Duration) -> ListenerResult {
        note(self.collector.test_run_stopped(elapsed));
        self.primary.test_run_stopped(elapsed)
    }

    fn test_run_ended(
        &mut self,
        elapsed: Duration,
        metrics: &BTreeMap<String, String>,
    ) -> ListenerResult {
        note(self.collector.test_run_ended(elapsed, metrics));
        self.primary.test_run_ended(elapsed, metrics)
    }
}

#[async_trait]
impl RemoteTest for InstrumentationTest {
    async fn run(&mut self, listener: &mut dyn InvocationListener) -> Result<(), RunError> {
        let package = self.package.clone().ok_or_else(|| {
            RunError::InvalidArgument("instrumentation package name not set".to_string())
        })?;
        let device = self.device.clone().ok_or_else(|| {
            RunError::InvalidArgument("device not set before run".to_string())
        })?;
        self.attempted = true;

        if let Some(apk) = self.install_apk.clone() {
            device.install_package(&apk, true).await.map_err(RunError::from)?;
            let result = self.run_on_device(&package, &device, listener).await;
            // Installed means we uninstall, pass or fail.
            if let Err(err) = device.uninstall_package(&package).await {
                warn!(package, "failed to uninstall test package: {err}");
            }
            result
        } else {
            self.run_on_device(&package, &device, listener).await
        }
    }

    fn capabilities(&self) -> TestCapabilities {
        TestCapabilities {
            resumable: true,
            needs_device: true,
            ..TestCapabilities::default()
        }
    }

    fn set_device(&mut self, device: Arc<dyn TestDevice>) {
        self.device = Some(device);
    }

    fn is_resumable(&self) -> bool {
        // Work that never started has nothing to resume.
        self.attempted
    }
}
