//! Error taxonomy for the harness.
//!
//! Each failure class carries distinct recovery semantics, so they are kept
//! as separate types rather than folded into one opaque error:
//!
//! | Error | Device assumed alive? | Recovery |
//! |-------|----------------------|----------|
//! | [`DeviceNotAvailable`] | no | resume on another device, if the test opts in |
//! | [`BuildError`] | yes | fail the invocation, capture a bugreport |
//! | [`BuildRetrievalError`] | yes | fail fast, never retried |
//! | [`FatalHostError`] | unknown | always propagated, never rescheduled |
//! | other run errors | yes | reschedule a fresh run, if the test opts in |

use std::time::Duration;

/// The device stopped responding mid-operation.
///
/// This is the primary cancellation signal of the harness: it propagates up
/// through the run call stack and triggers the resume-or-abort decision in
/// the invocation state machine. It is never silently swallowed.
#[derive(Debug, Clone, thiserror::Error)]
#[error("device {serial} became unavailable: {reason}")]
pub struct DeviceNotAvailable {
    /// Serial number of the lost device.
    pub serial: String,
    /// Human-readable description of what was in flight.
    pub reason: String,
}

impl DeviceNotAvailable {
    /// Create a new device-unavailable error.
    pub fn new(serial: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            serial: serial.into(),
            reason: reason.into(),
        }
    }
}

/// The software image under test is bad; the device itself survived.
#[derive(Debug, Clone, thiserror::Error)]
#[error("build error: {0}")]
pub struct BuildError(pub String);

/// The build provider failed to deliver a build.
#[derive(Debug, Clone, thiserror::Error)]
#[error("failed to retrieve build: {0}")]
pub struct BuildRetrievalError(pub String);

/// The harness itself is compromised (corrupt state, unrecoverable host
/// condition). Always rethrown; never retried or rescheduled.
#[derive(Debug, Clone, thiserror::Error)]
#[error("fatal host error: {0}")]
pub struct FatalHostError(pub String);

/// Errors raised while preparing the device for a test run.
#[derive(Debug, thiserror::Error)]
pub enum TargetSetupError {
    /// The build failed to boot or prepare. The device is still usable.
    #[error(transparent)]
    Build(#[from] BuildError),

    /// The device went away during preparation.
    #[error(transparent)]
    Device(#[from] DeviceNotAvailable),

    /// Preparation failed for a reason unrelated to build or device health
    /// (bad preparer input, missing mandatory option).
    #[error("target setup failed: {0}")]
    Failed(String),
}

/// Errors raised by device operations.
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error(transparent)]
    NotAvailable(#[from] DeviceNotAvailable),

    #[error("shell command failed on {serial}: {reason}")]
    CommandFailed { serial: String, reason: String },

    #[error("install of {package} failed: {reason}")]
    InstallFailed { package: String, reason: String },

    #[error("device operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors returned by a test unit's `run`.
///
/// The invocation state machine classifies these to decide between resume,
/// reschedule, and plain failure.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error(transparent)]
    DeviceNotAvailable(#[from] DeviceNotAvailable),

    #[error(transparent)]
    FatalHost(#[from] FatalHostError),

    /// A mandatory option was missing or invalid. Raised before any device
    /// side effects.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A device error other than loss of the device.
    #[error(transparent)]
    Device(DeviceError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<DeviceError> for RunError {
    fn from(err: DeviceError) -> Self {
        // Loss of the device keeps its own identity through the conversion
        // so the resume-or-abort decision can see it.
        match err {
            DeviceError::NotAvailable(e) => RunError::DeviceNotAvailable(e),
            other => RunError::Device(other),
        }
    }
}

/// Terminal error of one invocation attempt.
#[derive(Debug, thiserror::Error)]
pub enum InvocationError {
    #[error(transparent)]
    BuildRetrieval(#[from] BuildRetrievalError),

    #[error(transparent)]
    Setup(#[from] TargetSetupError),

    #[error(transparent)]
    Run(#[from] RunError),
}

impl InvocationError {
    /// Whether this failure means the device is presumed gone.
    ///
    /// Teardown is skipped in that case: the device cannot be touched
    /// safely.
    pub fn is_device_loss(&self) -> bool {
        matches!(
            self,
            InvocationError::Setup(TargetSetupError::Device(_))
                | InvocationError::Run(RunError::DeviceNotAvailable(_))
        )
    }
}

/// Error raised by a result listener callback.
#[derive(Debug, thiserror::Error)]
pub enum ListenerError {
    /// A single listener callback failed.
    #[error("listener '{listener}' failed in {callback}: {reason}")]
    Callback {
        listener: String,
        callback: &'static str,
        reason: String,
    },

    /// Best-effort forwarding collected failures from several listeners.
    #[error("{} listener(s) failed: {}", .0.len(), .0.join("; "))]
    Aggregate(Vec<String>),
}

impl ListenerError {
    /// Convenience constructor for a single-callback failure.
    pub fn callback(
        listener: impl Into<String>,
        callback: &'static str,
        reason: impl Into<String>,
    ) -> Self {
        Self::Callback {
            listener: listener.into(),
            callback,
            reason: reason.into(),
        }
    }
}
