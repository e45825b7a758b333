//! Queue rows as seen by producers and workers.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::ids::{BoxId, IdMarker, ItemId, TenantId, Token};
use super::state::ItemState;

/// What a producer hands to `insert` / `upsert`.
///
/// Reservation state, retry count and the `created`/`modified` stamps are not
/// here: the storage layer owns them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewItem {
    pub box_id: BoxId,
    pub item_id: ItemId,
    pub recipient: String,

    /// Producer-defined type tag.
    pub kind: i64,

    /// Lower is served first (outbox only).
    pub priority: i64,

    /// Another item in the same box that must be gone before this one is claimable.
    pub dependency_item_id: Option<ItemId>,

    /// Not claimable before this instant. `None` means "now" at insert time.
    pub next_run_time: Option<DateTime<Utc>>,

    pub payload: Option<Vec<u8>>,
    pub correlation_id: Option<String>,
}

impl NewItem {
    pub fn new(box_id: BoxId, item_id: ItemId, recipient: impl Into<String>) -> Self {
        Self {
            box_id,
            item_id,
            recipient: recipient.into(),
            kind: 0,
            priority: 0,
            dependency_item_id: None,
            next_run_time: None,
            payload: None,
            correlation_id: None,
        }
    }

    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_kind(mut self, kind: i64) -> Self {
        self.kind = kind;
        self
    }

    pub fn depends_on(mut self, item_id: ItemId) -> Self {
        self.dependency_item_id = Some(item_id);
        self
    }

    pub fn run_at(mut self, at: DateTime<Utc>) -> Self {
        self.next_run_time = Some(at);
        self
    }

    pub fn with_payload(mut self, payload: impl Into<Vec<u8>>) -> Self {
        self.payload = Some(payload.into());
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    /// Payload encoded as JSON.
    pub fn with_json_payload<T: Serialize>(self, value: &T) -> Result<Self, serde_json::Error> {
        Ok(self.with_payload(serde_json::to_vec(value)?))
    }
}

/// A stored row of queue family `F`.
///
/// Returned by claims (a copy taken inside the claim transaction) and by the
/// diagnostic getters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueItem<F: IdMarker> {
    /// Insertion order within the table.
    pub row_id: i64,
    pub tenant_id: TenantId,
    pub box_id: BoxId,
    pub item_id: ItemId,
    pub recipient: String,
    pub kind: i64,
    pub priority: i64,
    pub dependency_item_id: Option<ItemId>,
    pub next_run_time: DateTime<Utc>,
    pub retry_count: i64,
    pub reservation_token: Option<Token<F>>,
    pub reserved_at: Option<DateTime<Utc>>,
    pub payload: Option<Vec<u8>>,
    pub correlation_id: Option<String>,
    pub created: DateTime<Utc>,
    pub modified: DateTime<Utc>,
}

impl<F: IdMarker> QueueItem<F> {
    pub fn state(&self) -> ItemState {
        if self.reservation_token.is_some() {
            ItemState::Reserved
        } else {
            ItemState::Available
        }
    }

    /// Whether the due time has passed (ignores reservation and dependencies).
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.next_run_time <= now
    }

    /// Decode the payload as JSON. `None` when the row has no payload.
    pub fn json_payload<T: DeserializeOwned>(&self) -> Option<Result<T, serde_json::Error>> {
        self.payload.as_deref().map(serde_json::from_slice)
    }
}

/// Depth report used by sleep/wake loops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStatus {
    pub total_rows: u64,
    pub reserved_rows: u64,

    /// Earliest `next_run_time` among unreserved rows (past or future), if any.
    pub earliest_next_run_time: Option<DateTime<Utc>>,

    /// When the longest-held reservation was taken. An old value points at a
    /// worker that died without committing.
    pub oldest_reserved_at: Option<DateTime<Utc>>,
}

impl QueueStatus {
    pub fn available_rows(&self) -> u64 {
        self.total_rows.saturating_sub(self.reserved_rows)
    }
}

/// One page of a cursor-paged listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<T> {
    pub items: Vec<T>,

    /// Pass back to fetch the next page; `None` when this page was the last.
    pub next_cursor: Option<i64>,
}
