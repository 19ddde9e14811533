//! The test-unit contract.
//!
//! One trait with a capability tag set replaces the mixin interface
//! hierarchy (`IRemoteTest`/`IDeviceTest`/`IResumableTest`/...) of older
//! harnesses: the static [`TestCapabilities`] says what a unit *can* do,
//! and the dynamic queries say what it is willing to do right now.

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::CommandOptions;
use crate::device::TestDevice;
use crate::errors::RunError;
use crate::listener::InvocationListener;

/// Static capability tags of a test unit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TestCapabilities {
    /// Unexecuted work can be continued on a replacement device after
    /// device loss.
    pub resumable: bool,
    /// A fresh run of the same configuration is worthwhile after a
    /// transient, non-device failure.
    pub retriable: bool,
    /// The unit needs a device handle injected before `run`.
    pub needs_device: bool,
    /// The unit wants the command options injected before `run`.
    pub wants_configuration: bool,
}

impl TestCapabilities {
    /// Tag set for a device-bound test.
    pub fn device_test() -> Self {
        Self {
            needs_device: true,
            ..Self::default()
        }
    }
}

/// A unit of test work within one invocation.
#[async_trait]
pub trait RemoteTest: Send {
    /// Execute the tests, reporting results through `listener`.
    async fn run(&mut self, listener: &mut dyn InvocationListener) -> Result<(), RunError>;

    /// Static capability tags. Consulted before the dynamic queries below.
    fn capabilities(&self) -> TestCapabilities {
        TestCapabilities::default()
    }

    /// Inject the device handle. Called before `run` when
    /// [`TestCapabilities::needs_device`] is set.
    fn set_device(&mut self, _device: Arc<dyn TestDevice>) {}

    /// Inject the command options. Called before `run` when
    /// [`TestCapabilities::wants_configuration`] is set.
    fn set_configuration(&mut self, _options: &CommandOptions) {}

    /// Whether unexecuted work is worth continuing on another device.
    ///
    /// Must return `false` until at least one run attempt has begun,
    /// regardless of outcome: work that never started has nothing to
    /// resume.
    fn is_resumable(&self) -> bool {
        false
    }

    /// Whether an immediate fresh re-run is worthwhile. Queried only after
    /// a non-device-availability failure.
    fn is_retriable(&self) -> bool {
        false
    }
}
