//! Queue engine: the outbox and inbox tables and their claim protocol.
//!
//! - `QueueTable<F>`: producer writes, generic claim, disposition, recovery, status.
//! - `SelectionStrategy`: which rows a claim takes (priority, box FIFO, fair).
//! - `Store`: hands out tenant-scoped `OutboxTable` / `InboxTable`.

mod dependency;
mod family;
mod inbox;
mod outbox;
mod retry;
mod schema;
mod store;
mod strategy;
mod table;

pub use dependency::DependencyGraph;
pub use family::{Inbox, InboxItem, InboxToken, Outbox, OutboxItem, OutboxToken, QueueFamily};
pub use inbox::InboxTable;
pub use outbox::OutboxTable;
pub use retry::RetryPolicy;
pub use schema::{SCHEMA_VERSION, ensure_table};
pub use store::Store;
pub use strategy::{BoxFifo, ClaimScope, FairAcrossBoxes, PriorityWithDependencies, SelectionStrategy};
pub use table::QueueTable;

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Arc;

    use chrono::{DateTime, TimeZone, Utc};
    use tempfile::TempDir;

    use super::Store;
    use crate::config::StoreConfig;
    use crate::domain::TenantId;
    use crate::impls::SqliteConnectionFactory;
    use crate::ports::FixedClock;

    pub(crate) struct Harness {
        pub store: Store,
        pub clock: Arc<FixedClock>,
        pub tenant: TenantId,
        pub _dir: TempDir,
    }

    pub(crate) fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap()
    }

    /// Fresh database file with both tables, driven by a fixed clock.
    pub(crate) fn harness() -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let config = StoreConfig::for_path(dir.path().join("spool.db"));
        let clock = Arc::new(FixedClock::new(start()));
        let store = Store::new(Arc::new(SqliteConnectionFactory::new(config)), clock.clone());
        store.ensure_tables().unwrap();
        Harness {
            store,
            clock,
            tenant: TenantId::generate(),
            _dir: dir,
        }
    }
}
