//! WorkerLoop - drains a tenant's outbox through an `ItemHandler`.
//!
//! # Flow
//! 1. `claim()` on the blocking pool
//! 2. run the handler
//! 3. success -> `commit(token)`; failure -> `cancel(token, backoff)`
//! 4. nothing claimable -> sleep until `next_scheduled()`, at most `idle_poll`

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, warn};

use super::blocking;
use crate::domain::QueueError;
use crate::ports::Clock;
use crate::queue::{OutboxItem, OutboxTable, RetryPolicy};

/// Why a handler could not deliver an item. The item is rescheduled.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct HandlerError(pub String);

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

#[async_trait]
pub trait ItemHandler: Send + Sync + 'static {
    async fn handle(&self, item: &OutboxItem) -> Result<(), HandlerError>;
}

pub struct WorkerLoop<H: ItemHandler> {
    worker_id: usize,
    outbox: OutboxTable,
    handler: Arc<H>,
    retry: RetryPolicy,
    idle_poll: Duration,
}

impl<H: ItemHandler> Clone for WorkerLoop<H> {
    fn clone(&self) -> Self {
        Self {
            worker_id: self.worker_id,
            outbox: self.outbox.clone(),
            handler: Arc::clone(&self.handler),
            retry: self.retry.clone(),
            idle_poll: self.idle_poll,
        }
    }
}

impl<H: ItemHandler> WorkerLoop<H> {
    pub fn new(outbox: OutboxTable, handler: Arc<H>, retry: RetryPolicy, idle_poll: Duration) -> Self {
        Self {
            worker_id: 0,
            outbox,
            handler,
            retry,
            idle_poll,
        }
    }

    /// Same loop, tagged with another worker id in logs.
    pub fn with_worker_id(mut self, worker_id: usize) -> Self {
        self.worker_id = worker_id;
        self
    }

    /// One claim -> handle -> dispose cycle. `Ok(false)` when nothing was claimable.
    pub async fn run_once(&self) -> Result<bool, QueueError> {
        let outbox = self.outbox.clone();
        let Some(item) = blocking(move || outbox.claim()).await? else {
            return Ok(false);
        };
        let Some(token) = item.reservation_token else {
            return Err(QueueError::CorruptRow(format!(
                "claimed item {} carries no reservation token",
                item.item_id
            )));
        };

        match self.handler.handle(&item).await {
            Ok(()) => {
                let outbox = self.outbox.clone();
                blocking(move || outbox.commit(token)).await?;
                debug!(
                    worker = self.worker_id,
                    item_id = %item.item_id,
                    recipient = %item.recipient,
                    "delivered"
                );
            }
            Err(err) => {
                let attempts = u32::try_from(item.retry_count.saturating_add(1)).unwrap_or(u32::MAX);
                let retry_at = self.retry.next_run_time(self.outbox.clock().now(), attempts);
                warn!(
                    worker = self.worker_id,
                    item_id = %item.item_id,
                    recipient = %item.recipient,
                    attempts,
                    %retry_at,
                    error = %err,
                    "handler failed, rescheduling"
                );
                let outbox = self.outbox.clone();
                blocking(move || outbox.cancel(token, retry_at)).await?;
            }
        }
        Ok(true)
    }

    /// How long to sleep when nothing is claimable.
    pub async fn idle_delay(&self) -> Duration {
        let outbox = self.outbox.clone();
        match blocking(move || outbox.next_scheduled()).await {
            Ok(Some(at)) => (at - self.outbox.clock().now())
                .to_std()
                .unwrap_or(Duration::ZERO)
                .min(self.idle_poll),
            Ok(None) => self.idle_poll,
            Err(err) => {
                warn!(worker = self.worker_id, error = %err, "next_scheduled failed");
                self.idle_poll
            }
        }
    }

    /// Loop until `shutdown` flips to true or its sender is dropped.
    ///
    /// A handler already running is allowed to finish; shutdown only stops
    /// new claims.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        loop {
            if *shutdown.borrow() {
                break;
            }

            let delay = match self.run_once().await {
                Ok(true) => continue,
                Ok(false) => self.idle_delay().await,
                Err(err) => {
                    warn!(worker = self.worker_id, error = %err, "claim cycle failed");
                    self.idle_poll
                }
            };

            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
        debug!(worker = self.worker_id, "worker stopped");
    }
}
