//! devicelab: a device test-harness core.
//!
//! This crate drives a single "test invocation" against one remote device:
//! build acquisition, device preparation, test execution with
//! rerun-on-incomplete-run semantics, result forwarding to a listener chain,
//! and guaranteed teardown and log delivery. When the device disappears
//! mid-run, unfinished work can be resumed on a replacement device through a
//! rescheduler.
//!
//! # Architecture
//!
//! The main components are:
//!
//! - **Device**: Narrow async contract for the remote device (shell,
//!   instrumentation, install, logcat)
//! - **Instrumentation**: Collect-then-run engine that reruns tests the
//!   device silently dropped
//! - **Invocation**: The top-level state machine (build → prepare → run →
//!   report → cleanup)
//! - **Listener**: Result forwarding with an explicit fan-out policy
//!
//! # Example
//!
//! ```no_run
//! use devicelab::config::Configuration;
//! use devicelab::invocation::TestInvocation;
//! use devicelab::logger::InvocationLogger;
//! use devicelab::scheduler::CommandQueue;
//!
//! # async fn run(config: Configuration, device: std::sync::Arc<dyn devicelab::device::TestDevice>) {
//! let queue = CommandQueue::new();
//! let mut invocation = TestInvocation::new(InvocationLogger::new());
//! let _ = invocation.invoke(config, device, &queue).await;
//! # }
//! ```

pub mod build;
pub mod config;
pub mod device;
pub mod errors;
pub mod instrumentation;
pub mod invocation;
pub mod listener;
pub mod logger;
pub mod prepare;
pub mod result;
pub mod scheduler;
pub mod testunit;
pub mod watchdog;

#[cfg(test)]
pub(crate) mod testutil;

// Re-export commonly used types
pub use build::{BuildInfo, BuildProvider};
pub use config::{CommandOptions, Configuration};
pub use device::{InstrumentationRunner, TestDevice};
pub use errors::{DeviceNotAvailable, InvocationError, RunError};
pub use instrumentation::InstrumentationTest;
pub use invocation::{InvocationStatus, TestInvocation};
pub use listener::{ForwardPolicy, InvocationListener, ResultForwarder, TestRunListener};
pub use result::{TestIdentifier, TestRunResult, TestStatus};
pub use scheduler::Rescheduler;
pub use testunit::RemoteTest;
