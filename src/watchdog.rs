//! Deadline watchdog for long-running tests.
//!
//! Signals the harness when a single test exceeds its allotted time; it
//! does not cancel the device-side process. Built on a timer raced against
//! a [`CancellationToken`] instead of a monitor-wait loop.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Arms per-test deadlines.
#[derive(Debug, Clone, Copy)]
pub struct TestTimeoutWatchdog {
    timeout: Duration,
}

/// Handle to one armed deadline. Dropping it disarms the deadline.
pub struct WatchdogHandle {
    token: CancellationToken,
    task: JoinHandle<()>,
}

impl TestTimeoutWatchdog {
    /// Create a watchdog with the given per-test allotment.
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// The configured allotment.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Arm the deadline. `on_expire` runs once if the allotment elapses
    /// before the handle is disarmed or dropped.
    pub fn arm<F>(&self, on_expire: F) -> WatchdogHandle
    where
        F: FnOnce() + Send + 'static,
    {
        let token = CancellationToken::new();
        let timer_token = token.clone();
        let timeout = self.timeout;
        let task = tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(timeout) => on_expire(),
                _ = timer_token.cancelled() => {}
            }
        });
        WatchdogHandle { token, task }
    }
}

impl WatchdogHandle {
    /// Disarm the deadline; the callback will not fire.
    pub fn disarm(&self) {
        self.token.cancel();
    }

    /// Whether the watchdog task has settled (fired or disarmed).
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for WatchdogHandle {
    fn drop(&mut self) {
        self.token.cancel();
    }
}
