//! Generic repeating-timer abstraction for background work.
//!
//! Every periodic subsystem (queue drain, periodic sync, snooze release,
//! reminder firing) runs as a named [`BackgroundTask`]. The supervisor loop
//! wraps each check invocation in its own failure boundary: a failing check
//! is logged with the task name and never stops the timer.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::task::JoinHandle;

/// Default interval between check invocations.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(60);

type CheckFn = Arc<dyn Fn() -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// A named periodic task.
///
/// `start` runs the check immediately and then every interval. Starting a
/// running task is a no-op; `stop` cancels the timer and is safe to call
/// when not running.
pub struct BackgroundTask {
    name: String,
    interval: Duration,
    check: CheckFn,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl BackgroundTask {
    /// Creates a task that runs `check` every `interval`.
    pub fn new<F, Fut>(name: impl Into<String>, interval: Duration, check: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self {
            name: name.into(),
            interval,
            check: Arc::new(move || Box::pin(check())),
            handle: Mutex::new(None),
        }
    }

    /// Creates a task with the default 60 second interval.
    pub fn with_default_interval<F, Fut>(name: impl Into<String>, check: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self::new(name, DEFAULT_INTERVAL, check)
    }

    /// Starts the timer; the first check runs immediately.
    pub fn start(&self) {
        let mut handle = self.handle.lock().unwrap();
        if handle.as_ref().is_some_and(|h| !h.is_finished()) {
            return;
        }

        let name = self.name.clone();
        let interval = self.interval;
        let check = self.check.clone();

        *handle = Some(tokio::spawn(async move {
            loop {
                if let Err(e) = check().await {
                    tracing::warn!(task = %name, error = %e, "background check failed");
                }
                tokio::time::sleep(interval).await;
            }
        }));
    }

    /// Stops the timer. Safe to call when not running.
    pub fn stop(&self) {
        if let Some(handle) = self.handle.lock().unwrap().take() {
            handle.abort();
        }
    }

    /// Returns whether the timer is currently running.
    pub fn is_running(&self) -> bool {
        self.handle
            .lock()
            .unwrap()
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }

    /// Returns the task's name.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for BackgroundTask {
    fn drop(&mut self) {
        self.stop();
    }
}
