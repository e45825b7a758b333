//! App - async drivers around the synchronous queue engine.
//!
//! The engine never sleeps or spawns; these loops do, on tokio.
//!
//! - **WorkerLoop**: claim -> handle -> commit / cancel with backoff
//! - **ReaperLoop**: periodic dead-reservation sweep
//! - **WorkerGroup**: spawns loops and shuts them down together

pub mod group;
pub mod reaper_loop;
pub mod worker_loop;

pub use self::group::WorkerGroup;
pub use self::reaper_loop::{ReaperLoop, Recovered};
pub use self::worker_loop::{HandlerError, ItemHandler, WorkerLoop};

use crate::domain::QueueError;

/// Run a synchronous engine call on tokio's blocking pool.
pub(crate) async fn blocking<T, F>(call: F) -> Result<T, QueueError>
where
    F: FnOnce() -> Result<T, QueueError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(call)
        .await
        .map_err(|e| QueueError::Blocking(e.to_string()))?
}
