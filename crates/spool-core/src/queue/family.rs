//! Queue families: one physical table each.
//!
//! The family marker doubles as the reservation token's type parameter, so an
//! `OutboxToken` can only ever be disposed against the outbox.

use crate::domain::ids::{IdMarker, Token};
use crate::domain::item::QueueItem;

pub trait QueueFamily: IdMarker + Clone + std::fmt::Debug + PartialEq + Eq {
    /// Physical table name.
    const TABLE: &'static str;
}

/// Single-item priority queue with dependency gating (outbound deliveries).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Outbox {}

impl IdMarker for Outbox {
    fn prefix() -> &'static str {
        "outbox-"
    }
}

impl QueueFamily for Outbox {
    const TABLE: &'static str = "outbox";
}

/// Batch FIFO queue (inbound messages, feed fan-out).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Inbox {}

impl IdMarker for Inbox {
    fn prefix() -> &'static str {
        "inbox-"
    }
}

impl QueueFamily for Inbox {
    const TABLE: &'static str = "inbox";
}

pub type OutboxToken = Token<Outbox>;
pub type InboxToken = Token<Inbox>;
pub type OutboxItem = QueueItem<Outbox>;
pub type InboxItem = QueueItem<Inbox>;
