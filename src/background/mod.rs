//! Background tasks — detached, fire-and-forget work on the Tokio runtime.
//!
//! [`BackgroundTasks`] spawns futures that the spawning request never awaits.
//! Every task is logged when it fails, and the set of in-flight tasks can be
//! drained with [`BackgroundTasks::wait_idle`] at shutdown.

use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::Notify;
use tracing::{debug, warn};

#[derive(Default)]
struct Inner {
    in_flight: AtomicUsize,
    idle: Notify,
}

/// Handle for spawning detached tasks. Clones share the same in-flight count.
#[derive(Clone, Default)]
pub struct BackgroundTasks {
    inner: Arc<Inner>,
}

// Decrements the in-flight count even if the task panics.
struct InFlight(Arc<Inner>);

impl Drop for InFlight {
    fn drop(&mut self) {
        if self.0.in_flight.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.0.idle.notify_waiters();
        }
    }
}

impl BackgroundTasks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawns `task` onto the current Tokio runtime and returns immediately.
    ///
    /// `kind` and `key` are attached to the log records emitted when the task
    /// finishes. Errors are logged at `warn` and otherwise dropped.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime, like [`tokio::spawn`].
    pub fn spawn<F, E>(&self, kind: &'static str, key: impl Into<String>, task: F)
    where
        F: Future<Output = Result<(), E>> + Send + 'static,
        E: Display + Send + 'static,
    {
        let key = key.into();
        self.inner.in_flight.fetch_add(1, Ordering::AcqRel);
        let guard = InFlight(Arc::clone(&self.inner));

        tokio::spawn(async move {
            let _guard = guard;
            match task.await {
                Ok(()) => debug!(task = kind, key = %key, "background task finished"),
                Err(e) => warn!(task = kind, key = %key, error = %e, "background task failed"),
            }
        });
    }

    /// Number of spawned tasks that have not finished yet.
    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.load(Ordering::Acquire)
    }

    /// Waits until no background task is running, including tasks spawned
    /// by other background tasks while waiting.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.inner.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.in_flight() == 0 {
                return;
            }
            notified.await;
        }
    }
}
