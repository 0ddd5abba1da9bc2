//! Cancellable interval task.
//!
//! The closure runs on a fixed interval (first run immediately) until
//! [`PeriodicTask::stop`] is called. A run in progress always finishes; the
//! join is bounded by the caller's timeout.

use parking_lot::Mutex;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

#[derive(Debug, Default)]
struct Control {
    running: AtomicBool,
    ticks: AtomicU64,
    shutdown: Notify,
}

#[derive(Debug)]
pub struct PeriodicTask {
    name: String,
    interval: Duration,
    control: Arc<Control>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl PeriodicTask {
    pub fn spawn<F, Fut>(name: impl Into<String>, interval: Duration, mut tick: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let name = name.into();
        let control = Arc::new(Control::default());
        control.running.store(true, Ordering::Release);

        let task_control = Arc::clone(&control);
        let task_name = name.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(task = %task_name, interval_ms = interval.as_millis() as u64, "Periodic task started");

            while task_control.running.load(Ordering::Acquire) {
                tokio::select! {
                    _ = task_control.shutdown.notified() => break,
                    _ = ticker.tick() => {}
                }
                if !task_control.running.load(Ordering::Acquire) {
                    break;
                }
                tick().await;
                let count = task_control.ticks.fetch_add(1, Ordering::AcqRel) + 1;
                debug!(task = %task_name, tick = count, "Periodic tick complete");
            }
            info!(task = %task_name, "Periodic task stopped");
        });

        Self {
            name,
            interval,
            control,
            handle: Mutex::new(Some(handle)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn is_running(&self) -> bool {
        self.control.running.load(Ordering::Acquire)
    }

    /// Completed runs so far
    pub fn ticks(&self) -> u64 {
        self.control.ticks.load(Ordering::Acquire)
    }

    /// Returns `false` if the task did not finish within `timeout`
    pub async fn stop(&self, timeout: Duration) -> bool {
        self.control.running.store(false, Ordering::Release);
        self.control.shutdown.notify_one();

        let handle = self.handle.lock().take();
        let Some(handle) = handle else {
            return true;
        };
        match tokio::time::timeout(timeout, handle).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                warn!(task = %self.name, error = %e, "Periodic task ended abnormally");
                false
            }
            Err(_) => {
                warn!(task = %self.name, "Periodic task did not stop within timeout");
                false
            }
        }
    }
}

impl Drop for PeriodicTask {
    fn drop(&mut self) {
        self.control.running.store(false, Ordering::Release);
        self.control.shutdown.notify_one();
    }
}
