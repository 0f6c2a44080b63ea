//! Debounced deferred work
//!
//! Event-driven helpers often react to a burst of events (focus changes,
//! title updates) with work that only matters for the last one. A
//! [`Debouncer`] holds at most one pending task: scheduling a new one
//! cancels the previous one first.

use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::connection::lock;

/// Single-slot scheduler for delayed tasks
#[derive(Debug, Default)]
pub struct Debouncer {
    pending: Mutex<Option<JoinHandle<()>>>,
}

impl Debouncer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `task` after `delay`, cancelling whatever was scheduled before
    ///
    /// Must be called from within a tokio runtime.
    pub fn schedule<F>(&self, delay: Duration, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut pending = lock(&self.pending);
        if let Some(previous) = pending.take() {
            previous.abort();
        }

        *pending = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            task.await;
        }));
    }

    /// Cancel the pending task, returning whether one was still waiting
    pub fn cancel(&self) -> bool {
        match lock(&self.pending).take() {
            Some(task) => {
                let waiting = !task.is_finished();
                task.abort();
                waiting
            }
            None => false,
        }
    }

    pub fn is_pending(&self) -> bool {
        lock(&self.pending)
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }
}

impl Drop for Debouncer {
    fn drop(&mut self) {
        self.cancel();
    }
}
