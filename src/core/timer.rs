//! Cancellable one-shot timeout jobs.

use std::future::Future;
use std::time::Duration;
use tokio::task::AbortHandle;

/// A spawned timer that runs `on_fire` once after `delay` unless cancelled.
///
/// The job does not cancel itself on drop: a firing job removes its own
/// owner from state and must keep running afterwards. Every firing path
/// re-checks `token` against current state, so a job that outlives its owner
/// is inert.
#[derive(Debug)]
pub struct TimeoutJob {
    token: u64,
    handle: AbortHandle,
}

impl TimeoutJob {
    pub fn spawn<F>(token: u64, delay: Duration, on_fire: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            on_fire.await;
        })
        .abort_handle();
        Self { token, handle }
    }

    pub fn token(&self) -> u64 {
        self.token
    }

    pub fn cancel(self) {
        self.handle.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}
