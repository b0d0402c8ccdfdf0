//! Helpers for driving the route thread deterministically in unit tests

use std::{future::Future, time::Duration};

use tokio::{
    runtime::Builder,
    select,
    task::{spawn_local, LocalSet},
};

/// Longer than any timer the route thread arms
const STUCK_AFTER: Duration = Duration::from_secs(100_000);

/// Shorter than any timer the route thread arms
const SETTLE_TIME: Duration = Duration::from_millis(10);

/// Run `f` to completion on a current-thread runtime with paused time
pub fn block_on_locally<T>(f: impl Future<Output = T>) -> T {
    let runtime = Builder::new_current_thread().enable_time().start_paused(true).build().unwrap();
    LocalSet::new().block_on(&runtime, async move {
        select! {
            t = f => t,
            _ = tokio::time::sleep(STUCK_AFTER) => panic!("test appears to be stuck"),
        }
    })
}

/// Poll `f` until it either resolves or blocks with nothing else left to
/// run. Returns `Ok(T)` in the first case, otherwise a future yielding the
/// eventual output; dropping it does not cancel `f`.
///
/// Only meaningful with paused time.
pub async fn try_await<T: 'static>(
    f: impl Future<Output = T> + 'static,
) -> Result<T, impl Future<Output = T>> {
    let mut handle = spawn_local(f);

    select! {
        t = &mut handle => Ok(t.unwrap()),
        _ = tokio::time::sleep(SETTLE_TIME) => Err(async { handle.await.unwrap() }),
    }
}
