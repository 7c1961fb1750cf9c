//! Owned background task handle
//!
//! Every timer loop and stream subscription is started as an [`OwnedTask`]
//! and held by exactly one owner. Dropping the handle cancels the task, so
//! tearing down the owner can never leave an orphaned timer or connection.

use std::future::Future;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Spawned task plus its cancellation token
#[derive(Debug)]
pub struct OwnedTask {
    cancel: CancellationToken,
    join: JoinHandle<()>,
}

impl OwnedTask {
    /// Spawn `make(token)` on the current runtime
    ///
    /// The future should watch the token at each suspension point; the task
    /// is also aborted on drop as a backstop.
    pub fn spawn<F, Fut>(make: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let cancel = CancellationToken::new();
        let join = tokio::spawn(make(cancel.clone()));
        Self { cancel, join }
    }

    /// Cancel the task; calling it again is a no-op
    pub fn cancel(&self) {
        self.cancel.cancel();
        self.join.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }
}

impl Drop for OwnedTask {
    fn drop(&mut self) {
        self.cancel();
    }
}
