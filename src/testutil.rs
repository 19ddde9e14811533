//! Shared fakes for unit tests: a scriptable device, canned build
//! providers, recording listeners and preparers, and a counting
//! rescheduler.

use std::collections::{BTreeMap, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::build::{BuildInfo, BuildProvider};
use crate::config::Configuration;
use crate::device::{InstrumentationRunner, RecoveryMode, TestDevice};
use crate::errors::{
    BuildRetrievalError, DeviceError, DeviceNotAvailable, FatalHostError, InvocationError,
    ListenerError, RunError, TargetSetupError,
};
use crate::listener::{InvocationListener, ListenerResult, LogKind, TestRunListener, TestSummary};
use crate::prepare::TargetPreparer;
use crate::result::TestIdentifier;
use crate::scheduler::Rescheduler;
use crate::testunit::{RemoteTest, TestCapabilities};

/// Install a compact tracing subscriber for test debugging, honoring
/// `RUST_LOG`. Safe to call from every test; only the first call wins.
pub fn trace_init() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Shared, ordered log of observed events, cloneable across fakes.
#[derive(Clone, Default)]
pub struct EventLog(Arc<Mutex<Vec<String>>>);

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, event: impl Into<String>) {
        self.0.lock().unwrap().push(event.into());
    }

    pub fn events(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.events().iter().any(|e| e.contains(needle))
    }
}

/// Listener that records every callback into an [`EventLog`] and can be
/// told to fail a specific callback.
pub struct RecordingListener {
    name: String,
    log: EventLog,
    fail_on: Option<&'static str>,
    summary: Option<TestSummary>,
}

impl RecordingListener {
    pub fn new(name: impl Into<String>, log: EventLog) -> Self {
        Self {
            name: name.into(),
            log,
            fail_on: None,
            summary: None,
        }
    }

    pub fn failing_on(mut self, callback: &'static str) -> Self {
        self.fail_on = Some(callback);
        self
    }

    pub fn with_summary(mut self, summary: TestSummary) -> Self {
        self.summary = Some(summary);
        self
    }

    fn record(&self, callback: &'static str, detail: String) -> ListenerResult {
        if detail.is_empty() {
            self.log.push(format!("{}:{}", self.name, callback));
        } else {
            self.log.push(format!("{}:{}:{}", self.name, callback, detail));
        }
        if self.fail_on == Some(callback) {
            return Err(ListenerError::callback(&self.name, callback, "injected failure"));
        }
        Ok(())
    }
}

impl TestRunListener for RecordingListener {
    fn test_run_started(&mut self, run_name: &str, test_count: usize) -> ListenerResult {
        self.record("test_run_started", format!("{run_name}:{test_count}"))
    }

    fn test_started(&mut self, test: &TestIdentifier) -> ListenerResult {
        self.record("test_started", test.to_string())
    }

    fn test_failed(&mut self, test: &TestIdentifier, trace: &str) -> ListenerResult {
        self.record("test_failed", format!("{test}:{trace}"))
    }

    fn test_ended(
        &mut self,
        test: &TestIdentifier,
        _metrics: &BTreeMap<String, String>,
    ) -> ListenerResult {
        self.record("test_ended", test.to_string())
    }

    fn test_run_failed(&mut self, message: &str) -> ListenerResult {
        self.record("test_run_failed", message.to_string())
    }

    fn test_run_stopped(&mut self, _elapsed: Duration) -> ListenerResult {
        self.record("test_run_stopped", String::new())
    }

    fn test_run_ended(
        &mut self,
        _elapsed: Duration,
        _metrics: &BTreeMap<String, String>,
    ) -> ListenerResult {
        self.record("test_run_ended", String::new())
    }
}

impl InvocationListener for RecordingListener {
    fn name(&self) -> &str {
        &self.name
    }

    fn invocation_started(&mut self, build: &BuildInfo) -> ListenerResult {
        self.record("invocation_started", build.to_string())
    }

    fn invocation_failed(&mut self, message: &str) -> ListenerResult {
        self.record("invocation_failed", message.to_string())
    }

    fn invocation_ended(&mut self, _elapsed: Duration) -> ListenerResult {
        self.record("invocation_ended", String::new())
    }

    fn test_log(&mut self, name: &str, _kind: LogKind, data: &[u8]) -> ListenerResult {
        self.record("test_log", format!("{name}:{}b", data.len()))
    }

    fn summary(&mut self) -> Option<TestSummary> {
        self.log.push(format!("{}:summary", self.name));
        self.summary.clone()
    }

    fn put_summary(&mut self, summaries: &[TestSummary]) -> ListenerResult {
        self.record("put_summary", summaries.len().to_string())
    }
}

/// One scripted callback from a fake instrumentation run.
#[derive(Debug, Clone)]
pub enum RunEvent {
    RunStarted(String, usize),
    Started(TestIdentifier),
    Failed(TestIdentifier, String),
    Ended(TestIdentifier),
    RunFailed(String),
    RunEnded(u64),
}

/// Behavior of one fake instrumentation run.
#[derive(Debug, Clone)]
pub enum RunScript {
    /// Deliver the events and return success.
    Events(Vec<RunEvent>),
    /// Deliver some events, then report the device as lost.
    Lost {
        events_before: Vec<RunEvent>,
        reason: String,
    },
    /// Fail with a non-availability device error.
    Fail(String),
}

impl RunScript {
    /// A complete run where every listed test passes.
    pub fn complete(run_name: &str, tests: &[TestIdentifier]) -> Self {
        let mut events = vec![RunEvent::RunStarted(run_name.to_string(), tests.len())];
        for id in tests {
            events.push(RunEvent::Started(id.clone()));
            events.push(RunEvent::Ended(id.clone()));
        }
        events.push(RunEvent::RunEnded(25));
        RunScript::Events(events)
    }
}

/// Scriptable in-memory device.
///
/// Instrumentation runs pop scripts in FIFO order; with no script queued,
/// the device reports an empty complete run.
pub struct FakeDevice {
    serial: String,
    scripts: Mutex<VecDeque<RunScript>>,
    recorded_runs: Mutex<Vec<InstrumentationRunner>>,
    shell_commands: Mutex<Vec<String>>,
    installed: Mutex<Vec<String>>,
    uninstalled: Mutex<Vec<String>>,
    bugreport_requests: AtomicUsize,
    recovery: Mutex<RecoveryMode>,
}

impl FakeDevice {
    pub fn new(serial: impl Into<String>) -> Self {
        Self {
            serial: serial.into(),
            scripts: Mutex::new(VecDeque::new()),
            recorded_runs: Mutex::new(Vec::new()),
            shell_commands: Mutex::new(Vec::new()),
            installed: Mutex::new(Vec::new()),
            uninstalled: Mutex::new(Vec::new()),
            bugreport_requests: AtomicUsize::new(0),
            recovery: Mutex::new(RecoveryMode::default()),
        }
    }

    pub fn push_run(&self, script: RunScript) {
        self.scripts.lock().unwrap().push_back(script);
    }

    pub fn recorded_runs(&self) -> Vec<InstrumentationRunner> {
        self.recorded_runs.lock().unwrap().clone()
    }

    pub fn installed(&self) -> Vec<String> {
        self.installed.lock().unwrap().clone()
    }

    pub fn uninstalled(&self) -> Vec<String> {
        self.uninstalled.lock().unwrap().clone()
    }

    pub fn bugreport_requests(&self) -> usize {
        self.bugreport_requests.load(Ordering::SeqCst)
    }

    fn play(&self, events: &[RunEvent], listener: &mut dyn TestRunListener) {
        let metrics = BTreeMap::new();
        for event in events {
            let _ = match event {
                RunEvent::RunStarted(name, count) => listener.test_run_started(name, *count),
                RunEvent::Started(id) => listener.test_started(id),
                RunEvent::Failed(id, trace) => listener.test_failed(id, trace),
                RunEvent::Ended(id) => listener.test_ended(id, &metrics),
                RunEvent::RunFailed(msg) => listener.test_run_failed(msg),
                RunEvent::RunEnded(ms) => {
                    listener.test_run_ended(Duration::from_millis(*ms), &metrics)
                }
            };
        }
    }
}

#[async_trait]
impl TestDevice for FakeDevice {
    fn serial_number(&self) -> &str {
        &self.serial
    }

    async fn execute_shell_command(&self, cmd: &str) -> Result<String, DeviceError> {
        self.shell_commands.lock().unwrap().push(cmd.to_string());
        Ok(String::new())
    }

    async fn run_instrumentation_tests(
        &self,
        runner: &InstrumentationRunner,
        listener: &mut dyn TestRunListener,
    ) -> Result<(), DeviceError> {
        self.recorded_runs.lock().unwrap().push(runner.clone());
        let script = self.scripts.lock().unwrap().pop_front();
        match script {
            None => {
                // Unscripted: an empty run that completes cleanly.
                self.play(
                    &[
                        RunEvent::RunStarted(runner.package().to_string(), 0),
                        RunEvent::RunEnded(1),
                    ],
                    listener,
                );
                Ok(())
            }
            Some(RunScript::Events(events)) => {
                self.play(&events, listener);
                Ok(())
            }
            Some(RunScript::Lost {
                events_before,
                reason,
            }) => {
                self.play(&events_before, listener);
                Err(DeviceNotAvailable::new(&self.serial, reason).into())
            }
            Some(RunScript::Fail(reason)) => Err(DeviceError::CommandFailed {
                serial: self.serial.clone(),
                reason,
            }),
        }
    }

    async fn install_package(&self, apk: &Path, _reinstall: bool) -> Result<(), DeviceError> {
        self.installed
            .lock()
            .unwrap()
            .push(apk.display().to_string());
        Ok(())
    }

    async fn uninstall_package(&self, package: &str) -> Result<(), DeviceError> {
        self.uninstalled.lock().unwrap().push(package.to_string());
        Ok(())
    }

    async fn wait_for_device_available(&self, _timeout: Duration) -> Result<(), DeviceError> {
        Ok(())
    }

    async fn logcat(&self) -> Result<Vec<u8>, DeviceError> {
        Ok(b"--- fake logcat ---".to_vec())
    }

    async fn bugreport(&self) -> Result<Vec<u8>, DeviceError> {
        self.bugreport_requests.fetch_add(1, Ordering::SeqCst);
        Ok(b"--- fake bugreport ---".to_vec())
    }

    fn set_recovery(&self, mode: RecoveryMode) {
        *self.recovery.lock().unwrap() = mode;
    }
}

struct ProviderState {
    build: Option<BuildInfo>,
    error: Option<String>,
    cleaned: AtomicUsize,
    not_tested: AtomicUsize,
}

/// Canned build provider with call counters shared across clones.
#[derive(Clone)]
pub struct FakeBuildProvider {
    state: Arc<ProviderState>,
}

impl FakeBuildProvider {
    pub fn with_build(build: BuildInfo) -> Self {
        Self {
            state: Arc::new(ProviderState {
                build: Some(build),
                error: None,
                cleaned: AtomicUsize::new(0),
                not_tested: AtomicUsize::new(0),
            }),
        }
    }

    /// A provider with nothing to test.
    pub fn empty() -> Self {
        Self {
            state: Arc::new(ProviderState {
                build: None,
                error: None,
                cleaned: AtomicUsize::new(0),
                not_tested: AtomicUsize::new(0),
            }),
        }
    }

    pub fn failing(reason: impl Into<String>) -> Self {
        Self {
            state: Arc::new(ProviderState {
                build: None,
                error: Some(reason.into()),
                cleaned: AtomicUsize::new(0),
                not_tested: AtomicUsize::new(0),
            }),
        }
    }

    pub fn cleaned(&self) -> usize {
        self.state.cleaned.load(Ordering::SeqCst)
    }

    pub fn not_tested(&self) -> usize {
        self.state.not_tested.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BuildProvider for FakeBuildProvider {
    async fn get_build(&self) -> Result<Option<BuildInfo>, BuildRetrievalError> {
        if let Some(reason) = &self.state.error {
            return Err(BuildRetrievalError(reason.clone()));
        }
        Ok(self.state.build.clone())
    }

    async fn build_not_tested(&self, _build: &BuildInfo) {
        self.state.not_tested.fetch_add(1, Ordering::SeqCst);
    }

    async fn clean_up(&self, _build: BuildInfo) {
        self.state.cleaned.fetch_add(1, Ordering::SeqCst);
    }
}

/// How a [`RecordingPreparer`] behaves during `set_up`.
pub enum PreparerBehavior {
    Succeed,
    BuildError(String),
    Fail(String),
    DeviceLost(String),
}

/// Preparer that records setup/teardown into an [`EventLog`].
pub struct RecordingPreparer {
    name: String,
    log: EventLog,
    behavior: PreparerBehavior,
}

impl RecordingPreparer {
    pub fn new(name: impl Into<String>, log: EventLog) -> Self {
        Self {
            name: name.into(),
            log,
            behavior: PreparerBehavior::Succeed,
        }
    }

    pub fn with_behavior(mut self, behavior: PreparerBehavior) -> Self {
        self.behavior = behavior;
        self
    }
}

#[async_trait]
impl TargetPreparer for RecordingPreparer {
    fn name(&self) -> &str {
        &self.name
    }

    async fn set_up(
        &self,
        _device: &dyn TestDevice,
        _build: &BuildInfo,
    ) -> Result<(), TargetSetupError> {
        self.log.push(format!("{}:set_up", self.name));
        match &self.behavior {
            PreparerBehavior::Succeed => Ok(()),
            PreparerBehavior::BuildError(reason) => {
                Err(crate::errors::BuildError(reason.clone()).into())
            }
            PreparerBehavior::Fail(reason) => Err(TargetSetupError::Failed(reason.clone())),
            PreparerBehavior::DeviceLost(reason) => {
                Err(DeviceNotAvailable::new("FAKESERIAL", reason.clone()).into())
            }
        }
    }

    async fn tear_down(
        &self,
        _device: &dyn TestDevice,
        _build: &BuildInfo,
        cause: Option<&InvocationError>,
    ) {
        let cause = if cause.is_some() { "cause" } else { "none" };
        self.log.push(format!("{}:tear_down:{cause}", self.name));
    }
}

/// Rescheduler that counts fresh-run requests and captures resume configs.
#[derive(Default)]
pub struct FakeRescheduler {
    reschedules: AtomicUsize,
    scheduled: Mutex<Vec<Configuration>>,
}

impl FakeRescheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reschedule_count(&self) -> usize {
        self.reschedules.load(Ordering::SeqCst)
    }

    pub fn scheduled_count(&self) -> usize {
        self.scheduled.lock().unwrap().len()
    }

    pub fn take_scheduled(&self) -> Vec<Configuration> {
        std::mem::take(&mut *self.scheduled.lock().unwrap())
    }
}

impl Rescheduler for FakeRescheduler {
    fn reschedule_command(&self) -> bool {
        self.reschedules.fetch_add(1, Ordering::SeqCst);
        true
    }

    fn schedule_config(&self, config: Configuration) -> bool {
        self.scheduled.lock().unwrap().push(config);
        true
    }
}

/// Outcome a [`ScriptedTest`] produces when run.
pub enum ScriptedOutcome {
    Pass,
    DeviceLost,
    Fatal,
    Failing,
}

/// Minimal test unit with a fixed outcome and configurable capabilities.
pub struct ScriptedTest {
    outcome: ScriptedOutcome,
    capabilities: TestCapabilities,
    resumable_answer: bool,
    retriable_answer: bool,
    attempted: bool,
}

impl ScriptedTest {
    fn with_outcome(outcome: ScriptedOutcome) -> Self {
        Self {
            outcome,
            capabilities: TestCapabilities::default(),
            resumable_answer: false,
            retriable_answer: false,
            attempted: false,
        }
    }

    pub fn passing() -> Self {
        Self::with_outcome(ScriptedOutcome::Pass)
    }

    pub fn device_lost() -> Self {
        Self::with_outcome(ScriptedOutcome::DeviceLost)
    }

    pub fn fatal() -> Self {
        Self::with_outcome(ScriptedOutcome::Fatal)
    }

    pub fn failing() -> Self {
        Self::with_outcome(ScriptedOutcome::Failing)
    }

    pub fn resumable(mut self, answer: bool) -> Self {
        self.capabilities.resumable = true;
        self.resumable_answer = answer;
        self
    }

    pub fn retriable(mut self, answer: bool) -> Self {
        self.capabilities.retriable = true;
        self.retriable_answer = answer;
        self
    }
}

#[async_trait]
impl RemoteTest for ScriptedTest {
    async fn run(&mut self, listener: &mut dyn InvocationListener) -> Result<(), RunError> {
        self.attempted = true;
        match self.outcome {
            ScriptedOutcome::Pass => {
                let id = TestIdentifier::new("com.example.ScriptedTest", "testOk");
                let metrics = BTreeMap::new();
                let _ = listener.test_run_started("scripted", 1);
                let _ = listener.test_started(&id);
                let _ = listener.test_ended(&id, &metrics);
                let _ = listener.test_run_ended(Duration::from_millis(1), &metrics);
                Ok(())
            }
            ScriptedOutcome::DeviceLost => {
                Err(DeviceNotAvailable::new("FAKESERIAL", "device stopped responding").into())
            }
            ScriptedOutcome::Fatal => Err(FatalHostError("harness state corrupted".into()).into()),
            ScriptedOutcome::Failing => Err(anyhow::anyhow!("tests failed on device").into()),
        }
    }

    fn capabilities(&self) -> TestCapabilities {
        self.capabilities
    }

    fn is_resumable(&self) -> bool {
        self.attempted && self.resumable_answer
    }

    fn is_retriable(&self) -> bool {
        self.retriable_answer
    }
}
