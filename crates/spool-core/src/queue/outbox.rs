//! Outbox: one item per claim, lowest priority first, gated by dependencies.

use chrono::{DateTime, Utc};

use super::family::{Outbox, OutboxItem, OutboxToken};
use super::strategy::PriorityWithDependencies;
use super::table::QueueTable;
use crate::domain::QueueError;

pub type OutboxTable = QueueTable<Outbox>;

impl QueueTable<Outbox> {
    /// Reserve the next eligible item of the tenant, or `None` if nothing is
    /// due, everything due is reserved, or every due head is still blocked.
    pub fn claim(&self) -> Result<Option<OutboxItem>, QueueError> {
        Ok(self.claim_with(&PriorityWithDependencies)?.into_iter().next())
    }

    /// Delivery succeeded: remove every row under `token`.
    pub fn commit(&self, token: OutboxToken) -> Result<u64, QueueError> {
        self.commit_rows(token, None)
    }

    /// Delivery failed: release every row under `token`, due again at `next_run_time`.
    pub fn cancel(
        &self,
        token: OutboxToken,
        next_run_time: DateTime<Utc>,
    ) -> Result<u64, QueueError> {
        self.cancel_rows(token, None, Some(next_run_time))
    }
}
