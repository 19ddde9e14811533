//! Device abstraction and the instrumentation command descriptor.
//!
//! The harness core never speaks the device wire protocol itself; it drives
//! a [`TestDevice`] implementation through this narrow contract. Every
//! fallible operation may surface [`DeviceError::NotAvailable`], the
//! harness-wide cancellation signal.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;

use crate::errors::DeviceError;
use crate::listener::TestRunListener;

/// Recovery behavior to apply when the device drops off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RecoveryMode {
    /// Recover until the device is fully available for tests.
    #[default]
    Available,
    /// Recover only until the device is visible on the host.
    Online,
    /// Do not attempt recovery.
    None,
}

/// An Android-style device under test.
///
/// Implementations own the transport (adb, emulator console, fake). The
/// handle is single-owner for the duration of one invocation: no concurrent
/// test units share a device mid-invocation.
#[async_trait]
pub trait TestDevice: Send + Sync {
    /// Serial number identifying this device.
    fn serial_number(&self) -> &str;

    /// Execute a shell command and return its combined output.
    async fn execute_shell_command(&self, cmd: &str) -> Result<String, DeviceError>;

    /// Run an instrumentation command, streaming run callbacks into
    /// `listener` as the device reports them.
    async fn run_instrumentation_tests(
        &self,
        runner: &InstrumentationRunner,
        listener: &mut dyn TestRunListener,
    ) -> Result<(), DeviceError>;

    /// Install an application package.
    async fn install_package(&self, apk: &Path, reinstall: bool) -> Result<(), DeviceError>;

    /// Uninstall an application package.
    async fn uninstall_package(&self, package: &str) -> Result<(), DeviceError>;

    /// Block until the device is available for tests, or time out.
    async fn wait_for_device_available(&self, timeout: Duration) -> Result<(), DeviceError>;

    /// Capture the device log.
    async fn logcat(&self) -> Result<Vec<u8>, DeviceError>;

    /// Capture a bugreport snapshot.
    async fn bugreport(&self) -> Result<Vec<u8>, DeviceError>;

    /// Select the recovery mode used when the device drops off.
    fn set_recovery(&self, mode: RecoveryMode);
}

/// Describes one `am instrument` invocation.
///
/// Built by the instrumentation engine, interpreted by the device
/// implementation. Argument values are shell-escaped when rendered, so test
/// method names with shell metacharacters cannot break out of the command.
#[derive(Debug, Clone)]
pub struct InstrumentationRunner {
    package: String,
    runner_class: String,
    class_arg: Option<String>,
    log_only: bool,
    max_time_to_output: Option<Duration>,
    args: Vec<(String, String)>,
}

impl InstrumentationRunner {
    /// Create a runner for the given package and runner class.
    pub fn new(package: impl Into<String>, runner_class: impl Into<String>) -> Self {
        Self {
            package: package.into(),
            runner_class: runner_class.into(),
            class_arg: None,
            log_only: false,
            max_time_to_output: None,
            args: Vec::new(),
        }
    }

    /// Restrict the run to one class.
    pub fn with_class(mut self, class_name: &str) -> Self {
        self.class_arg = Some(class_name.to_string());
        self
    }

    /// Restrict the run to one test method.
    pub fn with_method(mut self, class_name: &str, method_name: &str) -> Self {
        self.class_arg = Some(format!("{class_name}#{method_name}"));
        self
    }

    /// Enable log-only (dry run) mode: the device enumerates tests without
    /// executing them.
    pub fn log_only(mut self, enabled: bool) -> Self {
        self.log_only = enabled;
        self
    }

    /// Maximum time the device may go without producing output.
    pub fn max_time_to_output(mut self, timeout: Duration) -> Self {
        self.max_time_to_output = Some(timeout);
        self
    }

    /// Add an instrumentation `-e key value` argument.
    pub fn arg(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.args.push((key.into(), value.into()));
        self
    }

    /// Package under instrumentation.
    pub fn package(&self) -> &str {
        &self.package
    }

    /// Instrumentation runner class.
    pub fn runner_class(&self) -> &str {
        &self.runner_class
    }

    /// The `class` filter argument, if any (`Class` or `Class#method`).
    pub fn class_arg(&self) -> Option<&str> {
        self.class_arg.as_deref()
    }

    /// Whether log-only mode is set.
    pub fn is_log_only(&self) -> bool {
        self.log_only
    }

    /// Output timeout, if set.
    pub fn max_time_to_output_value(&self) -> Option<Duration> {
        self.max_time_to_output
    }

    /// Extra instrumentation arguments.
    pub fn args(&self) -> &[(String, String)] {
        &self.args
    }

    /// All `-e` arguments this run carries, filters included, in render
    /// order.
    pub fn instrumentation_args(&self) -> BTreeMap<String, String> {
        let mut all = BTreeMap::new();
        if let Some(class) = &self.class_arg {
            all.insert("class".to_string(), class.clone());
        }
        if self.log_only {
            all.insert("log".to_string(), "true".to_string());
        }
        for (key, value) in &self.args {
            all.insert(key.clone(), value.clone());
        }
        all
    }

    /// Render the full shell command for this run.
    pub fn to_shell_command(&self) -> String {
        let mut parts = vec!["am".to_string(), "instrument".to_string(), "-w".to_string(), "-r".to_string()];
        for (key, value) in self.instrumentation_args() {
            parts.push("-e".to_string());
            parts.push(shell_words::quote(&key).into_owned());
            parts.push(shell_words::quote(&value).into_owned());
        }
        parts.push(shell_words::quote(&format!("{}/{}", self.package, self.runner_class)).into_owned());
        parts.join(" ")
    }
}
