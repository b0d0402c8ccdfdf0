//! Delayed work whose lifetime is bound to a logical owner

use std::time::Duration;

use tokio::{sync::mpsc::UnboundedSender, task::JoinHandle};

/// When this struct is dropped, the contained task will be aborted
#[derive(Debug)]
pub struct OwnedHandle<T> {
    handle: JoinHandle<T>,
}

impl<T> OwnedHandle<T> {
    /// Whether the task ran to completion (or was aborted)
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl<T> From<JoinHandle<T>> for OwnedHandle<T> {
    fn from(handle: JoinHandle<T>) -> Self {
        Self { handle }
    }
}

impl<T> Drop for OwnedHandle<T> {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Post `message` to `tx` after `delay`, unless the returned handle is
/// dropped first. Must be called from within a runtime.
pub fn send_delayed<M: Send + 'static>(
    tx: UnboundedSender<M>,
    message: M,
    delay: Duration,
) -> OwnedHandle<()> {
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        // the receiver is gone once the route thread shut down
        let _ = tx.send(message);
    })
    .into()
}
