//! Target preparation before a test run.
//!
//! Preparers flash builds, push test data, toggle device settings. A
//! preparer that also needs teardown overrides
//! [`tear_down`](TargetPreparer::tear_down); the default is a no-op,
//! replacing the separate cleaner interface of older harnesses with a
//! single trait.

use async_trait::async_trait;

use crate::build::BuildInfo;
use crate::device::TestDevice;
use crate::errors::{InvocationError, TargetSetupError};

/// Prepares a device/build pair for test execution.
#[async_trait]
pub trait TargetPreparer: Send + Sync {
    /// Name used in log messages.
    fn name(&self) -> &str {
        "preparer"
    }

    /// Put the device into the state the tests expect.
    ///
    /// Return [`TargetSetupError::Build`] when the build itself is at fault
    /// (fails to boot, fails to flash) and the device survived; the
    /// invocation will capture a bugreport and keep the device for reuse.
    async fn set_up(&self, device: &dyn TestDevice, build: &BuildInfo)
    -> Result<(), TargetSetupError>;

    /// Undo whatever `set_up` did.
    ///
    /// `cause` is the invocation failure when there was one. Called on
    /// success and on generic failure alike, but never after device loss:
    /// the device is presumed gone and cannot be touched safely.
    async fn tear_down(
        &self,
        _device: &dyn TestDevice,
        _build: &BuildInfo,
        _cause: Option<&InvocationError>,
    ) {
    }
}
