//! The invocation state machine.
//!
//! One [`TestInvocation`] drives one configuration through its full
//! lifecycle on one device: fetch the build, prepare the target, run the
//! test units, report logs and results, clean up. The phases are a fixed
//! pipeline; what varies is how failures steer the exit path — resume on a
//! replacement device, reschedule a fresh run, or plain failure — and that
//! decision is delegated to the [`Rescheduler`] rather than made here.
//!
//! Whatever the exit path, three things happen exactly once: the logger is
//! closed, the build is released back to its provider, and listeners see
//! `invocation_ended` after any `invocation_failed`.

use std::sync::Arc;
use std::time::Instant;

use crate::build::BuildInfo;
use crate::config::{CommandOptions, Configuration};
use crate::device::{RecoveryMode, TestDevice};
use crate::errors::{InvocationError, ListenerError, RunError, TargetSetupError};
use crate::listener::{InvocationListener, LogKind, ResultForwarder};
use crate::logger::InvocationLogger;
use crate::scheduler::Rescheduler;

/// Artifact name for the captured device logcat.
pub const DEVICE_LOG_NAME: &str = "device_logcat";
/// Artifact name for the harness's own per-invocation log.
pub const HARNESS_LOG_NAME: &str = "host_log";
/// Artifact name for the bugreport captured when a build fails to prepare.
pub const BUILD_ERROR_BUGREPORT_NAME: &str = "build_error_bugreport";

/// Terminal verdict of one invocation attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvocationStatus {
    Success,
    Failed,
}

impl std::fmt::Display for InvocationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InvocationStatus::Success => write!(f, "success"),
            InvocationStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Mutable bookkeeping threaded through the phases.
#[derive(Default)]
struct PhaseState {
    /// At least one test unit was given a chance to run.
    tests_ran: bool,
    /// A preparer judged the build itself bad; that verdict stands in for
    /// `build_not_tested`.
    build_flagged_bad: bool,
    /// Bugreport captured after a build preparation failure.
    bugreport: Option<Vec<u8>>,
}

/// Executes one configuration on one device, start to finish.
pub struct TestInvocation {
    logger: InvocationLogger,
    status: Option<InvocationStatus>,
}

impl TestInvocation {
    /// Create an invocation around its logging context.
    pub fn new(logger: InvocationLogger) -> Self {
        Self {
            logger,
            status: None,
        }
    }

    /// Verdict of the attempt; `None` until [`invoke`](Self::invoke)
    /// returns.
    pub fn status(&self) -> Option<InvocationStatus> {
        self.status
    }

    /// The invocation's logging context.
    pub fn logger(&self) -> &InvocationLogger {
        &self.logger
    }

    /// Run the configuration to completion on `device`.
    ///
    /// Consumes the configuration's listeners and build; on device loss
    /// with resumable work left, hands a resume configuration to the
    /// rescheduler before returning the error.
    pub async fn invoke(
        &mut self,
        mut config: Configuration,
        device: Arc<dyn TestDevice>,
        rescheduler: &dyn Rescheduler,
    ) -> Result<(), InvocationError> {
        let start = Instant::now();
        self.logger.info(format!(
            "starting invocation {} for configuration '{}'",
            self.logger.id(),
            config.name
        ));

        let mut build = match config.build_provider.get_build().await {
            Ok(Some(build)) => build,
            Ok(None) => {
                // Nothing to test is not a failure. A retriable command gets
                // re-queued so it can catch a later build.
                self.logger.info("build provider returned no build to test");
                if !config.command_options.loop_mode
                    && any_retriable(&config)
                    && rescheduler.reschedule_command()
                {
                    self.logger.info("rescheduled command to wait for a build");
                }
                self.status = Some(InvocationStatus::Success);
                self.close_logger();
                return Ok(());
            }
            Err(err) => {
                // The invocation never started as far as listeners are
                // concerned: no build, no callbacks.
                self.logger.error(format!("{err}"));
                self.status = Some(InvocationStatus::Failed);
                self.close_logger();
                return Err(err.into());
            }
        };

        build.set_device_serial(device.serial_number());
        device.set_recovery(RecoveryMode::Available);
        self.logger.info(format!(
            "testing build {build} on device {}",
            device.serial_number()
        ));

        let mut forwarder = ResultForwarder::new(config.take_listeners());
        for test in config.tests.iter_mut() {
            let caps = test.capabilities();
            if caps.needs_device {
                test.set_device(device.clone());
            }
            if caps.wants_configuration {
                test.set_configuration(&config.command_options);
            }
        }

        self.note(forwarder.invocation_started(&build));

        let mut state = PhaseState::default();
        let result = self
            .perform(&mut config, &device, &build, &mut forwarder, rescheduler, &mut state)
            .await;

        // Reporting runs on every exit path.
        self.report_logs(&device, &config.command_options, &mut forwarder, &mut state)
            .await;
        match &result {
            Ok(()) => self.status = Some(InvocationStatus::Success),
            Err(err) => {
                self.note(forwarder.invocation_failed(&err.to_string()));
                self.status = Some(InvocationStatus::Failed);
            }
        }
        self.note(forwarder.invocation_ended(start.elapsed()));
        self.note(forwarder.gather_and_broadcast_summaries());

        // Cleanup: close the log and release the build, each exactly once.
        self.close_logger();
        if !state.tests_ran && !state.build_flagged_bad {
            config.build_provider.build_not_tested(&build).await;
        }
        config.build_provider.clean_up(build).await;

        result
    }

    /// Prepare, run, tear down.
    async fn perform(
        &self,
        config: &mut Configuration,
        device: &Arc<dyn TestDevice>,
        build: &BuildInfo,
        forwarder: &mut ResultForwarder,
        rescheduler: &dyn Rescheduler,
        state: &mut PhaseState,
    ) -> Result<(), InvocationError> {
        if let Err(err) = self.prepare_target(config, device, build, state).await {
            let err = InvocationError::Setup(err);
            self.tear_down(config, device, build, Some(&err)).await;
            return Err(err);
        }

        state.tests_ran = true;
        let result = self
            .run_tests(config, device, build, forwarder, rescheduler)
            .await;
        self.tear_down(config, device, build, result.as_ref().err()).await;
        result
    }

    async fn prepare_target(
        &self,
        config: &Configuration,
        device: &Arc<dyn TestDevice>,
        build: &BuildInfo,
        state: &mut PhaseState,
    ) -> Result<(), TargetSetupError> {
        for preparer in &config.target_preparers {
            self.logger.info(format!("running {} setup", preparer.name()));
            if let Err(err) = preparer.set_up(device.as_ref(), build).await {
                match &err {
                    TargetSetupError::Build(build_err) => {
                        // The build is the verdict; grab a bugreport while
                        // the device is still reachable.
                        self.logger
                            .error(format!("build {build} failed to prepare: {build_err}"));
                        state.build_flagged_bad = true;
                        match device.bugreport().await {
                            Ok(report) => state.bugreport = Some(report),
                            Err(report_err) => self
                                .logger
                                .warn(format!("could not capture bugreport: {report_err}")),
                        }
                    }
                    TargetSetupError::Device(lost) => {
                        self.logger.error(format!("device lost during setup: {lost}"));
                    }
                    TargetSetupError::Failed(reason) => {
                        self.logger
                            .error(format!("{} setup failed: {reason}", preparer.name()));
                    }
                }
                return Err(err);
            }
        }
        Ok(())
    }

    async fn run_tests(
        &self,
        config: &mut Configuration,
        device: &Arc<dyn TestDevice>,
        build: &BuildInfo,
        forwarder: &mut ResultForwarder,
        rescheduler: &dyn Rescheduler,
    ) -> Result<(), InvocationError> {
        for index in 0..config.tests.len() {
            let Err(err) = config.tests[index].run(&mut *forwarder).await else {
                continue;
            };
            let caps = config.tests[index].capabilities();
            match err {
                RunError::DeviceNotAvailable(lost) => {
                    self.logger.error(format!(
                        "device {} unavailable during run: {}",
                        lost.serial, lost.reason
                    ));
                    if caps.resumable && config.tests[index].is_resumable() {
                        let resume = config.into_resume_config(build.clone());
                        if rescheduler.schedule_config(resume) {
                            self.logger
                                .info("scheduled resume of unfinished tests on another device");
                        } else {
                            self.logger.warn("rescheduler rejected the resume configuration");
                        }
                    }
                    return Err(RunError::DeviceNotAvailable(lost).into());
                }
                RunError::FatalHost(fatal) => {
                    self.logger.error(format!("{fatal}"));
                    return Err(RunError::FatalHost(fatal).into());
                }
                err => {
                    self.logger.error(format!("test unit failed: {err}"));
                    let retriable = caps.retriable && config.tests[index].is_retriable();
                    if retriable
                        && !config.command_options.loop_mode
                        && rescheduler.reschedule_command()
                    {
                        self.logger.info("rescheduled command for a fresh run");
                    }
                    return Err(err.into());
                }
            }
        }
        Ok(())
    }

    /// Run teardown on every preparer, most-recently-set-up first.
    ///
    /// Skipped entirely when the cause is device loss: the device cannot be
    /// touched safely, and the resumed attempt re-prepares from scratch.
    async fn tear_down(
        &self,
        config: &Configuration,
        device: &Arc<dyn TestDevice>,
        build: &BuildInfo,
        cause: Option<&InvocationError>,
    ) {
        if cause.is_some_and(InvocationError::is_device_loss) {
            self.logger.warn("skipping target teardown: device presumed gone");
            return;
        }
        for preparer in config.target_preparers.iter().rev() {
            preparer.tear_down(device.as_ref(), build, cause).await;
        }
    }

    async fn report_logs(
        &self,
        device: &Arc<dyn TestDevice>,
        options: &CommandOptions,
        forwarder: &mut ResultForwarder,
        state: &mut PhaseState,
    ) {
        if options.capture_logcat {
            match device.logcat().await {
                Ok(data) => {
                    self.note(forwarder.test_log(DEVICE_LOG_NAME, LogKind::Logcat, &data));
                }
                Err(err) => self
                    .logger
                    .warn(format!("could not capture device logcat: {err}")),
            }
        }
        if let Some(report) = state.bugreport.take() {
            self.note(forwarder.test_log(BUILD_ERROR_BUGREPORT_NAME, LogKind::Bugreport, &report));
        }
        let host_log = self.logger.snapshot();
        self.note(forwarder.test_log(HARNESS_LOG_NAME, LogKind::Text, &host_log));
    }

    fn note(&self, result: Result<(), ListenerError>) {
        if let Err(err) = result {
            self.logger.warn(format!("listener failure: {err}"));
        }
    }

    fn close_logger(&self) {
        if let Err(err) = self.logger.close() {
            tracing::warn!("{err}");
        }
    }
}

fn any_retriable(config: &Configuration) -> bool {
    config
        .tests
        .iter()
        .any(|test| test.capabilities().retriable && test.is_retriable())
}
