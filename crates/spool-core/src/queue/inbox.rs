//! Inbox: FIFO batches under one shared token, no priority or dependencies.

use chrono::{DateTime, Utc};

use super::family::{Inbox, InboxItem, InboxToken};
use super::strategy::{BoxFifo, FairAcrossBoxes};
use super::table::QueueTable;
use crate::domain::{BoxId, ItemId, QueueError};

pub type InboxTable = QueueTable<Inbox>;

impl QueueTable<Inbox> {
    /// Reserve up to `max_count` of the oldest due rows of `box_id`.
    pub fn pop(&self, box_id: BoxId, max_count: usize) -> Result<Vec<InboxItem>, QueueError> {
        self.claim_with(&BoxFifo::new(box_id, max_count)?)
    }

    /// Reserve the oldest due row of each box, at most `max_count` boxes.
    ///
    /// A box with a deep backlog still yields only one row per call, so it
    /// cannot starve the other boxes sharing the table.
    pub fn pop_across_boxes(&self, max_count: usize) -> Result<Vec<InboxItem>, QueueError> {
        self.claim_with(&FairAcrossBoxes::new(max_count)?)
    }

    pub fn commit_all(&self, token: InboxToken) -> Result<u64, QueueError> {
        self.commit_rows(token, None)
    }

    /// Remove only the named items; the rest stay reserved under `token`.
    pub fn commit_list(&self, token: InboxToken, item_ids: &[ItemId]) -> Result<u64, QueueError> {
        self.commit_rows(token, Some(item_ids))
    }

    /// Release every row under `token`, keeping its `next_run_time`.
    pub fn cancel_all(&self, token: InboxToken) -> Result<u64, QueueError> {
        self.cancel_rows(token, None, None)
    }

    /// Release only the named items; the rest stay reserved under `token`.
    pub fn cancel_list(&self, token: InboxToken, item_ids: &[ItemId]) -> Result<u64, QueueError> {
        self.cancel_rows(token, Some(item_ids), None)
    }

    /// Release every row under `token`, due again at `next_run_time`.
    pub fn cancel_all_until(
        &self,
        token: InboxToken,
        next_run_time: DateTime<Utc>,
    ) -> Result<u64, QueueError> {
        self.cancel_rows(token, None, Some(next_run_time))
    }
}
