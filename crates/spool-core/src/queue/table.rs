//! QueueTable - one tenant's view of one queue family's table.
//!
//! Everything the outbox and inbox share lives here: producer writes, the
//! generic claim, token-scoped disposition, dead recovery and status. The
//! family-specific entry points (`claim`, `pop`, ...) are thin wrappers in
//! `outbox.rs` / `inbox.rs` that pick a `SelectionStrategy`.
//!
//! Every call opens its own connection and runs in one transaction. Claims and
//! producer writes use `BEGIN IMMEDIATE` so the write lock is taken before the
//! first read.

use std::marker::PhantomData;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Transaction, TransactionBehavior, params};
use tracing::{debug, info, warn};

use super::dependency::DependencyGraph;
use super::family::QueueFamily;
use super::schema::{COLUMNS, millis_to_datetime, read_row, to_millis};
use super::strategy::{ClaimScope, SelectionStrategy};
use crate::domain::{BoxId, ItemId, NewItem, Page, QueueError, QueueItem, QueueStatus, TenantId, Token};
use crate::ports::{Clock, ConnectionFactory, UlidGenerator};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriteMode {
    Insert,
    Upsert,
}

pub struct QueueTable<F: QueueFamily> {
    tenant_id: TenantId,
    connections: Arc<dyn ConnectionFactory>,
    clock: Arc<dyn Clock>,
    ids: UlidGenerator,
    _family: PhantomData<F>,
}

impl<F: QueueFamily> Clone for QueueTable<F> {
    fn clone(&self) -> Self {
        Self {
            tenant_id: self.tenant_id,
            connections: Arc::clone(&self.connections),
            clock: Arc::clone(&self.clock),
            ids: self.ids.clone(),
            _family: PhantomData,
        }
    }
}

impl<F: QueueFamily> std::fmt::Debug for QueueTable<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueTable")
            .field("table", &F::TABLE)
            .field("tenant_id", &self.tenant_id)
            .finish_non_exhaustive()
    }
}

impl<F: QueueFamily> QueueTable<F> {
    /// The table must already exist (see `Store`).
    pub fn new(
        tenant_id: TenantId,
        connections: Arc<dyn ConnectionFactory>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let ids = UlidGenerator::new(Arc::clone(&clock));
        Self {
            tenant_id,
            connections,
            clock,
            ids,
            _family: PhantomData,
        }
    }

    pub fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    fn connect(&self) -> Result<Connection, QueueError> {
        self.connections.connect()
    }

    // ---- producer side ----

    /// Add a row. Fails with `DuplicateKey` if `(box, item, recipient)` exists.
    pub fn insert(&self, item: NewItem) -> Result<QueueItem<F>, QueueError> {
        self.write_item(item, WriteMode::Insert)
    }

    /// Add a row, or overwrite the scheduling fields and payload of the
    /// existing one. Reservation state and `retry_count` are left alone.
    pub fn upsert(&self, item: NewItem) -> Result<QueueItem<F>, QueueError> {
        self.write_item(item, WriteMode::Upsert)
    }

    fn write_item(&self, item: NewItem, mode: WriteMode) -> Result<QueueItem<F>, QueueError> {
        if item.dependency_item_id == Some(item.item_id) {
            return Err(QueueError::SelfDependency(item.item_id.to_string()));
        }

        let table = F::TABLE;
        let now_ms = to_millis(self.clock.now());
        let next_run_ms = item.next_run_time.map(to_millis).unwrap_or(now_ms);

        let mut conn = self.connect()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let conflict = match mode {
            WriteMode::Insert => "",
            WriteMode::Upsert => {
                " ON CONFLICT(tenant_id, box_id, item_id, recipient) DO UPDATE SET
                    kind = excluded.kind,
                    priority = excluded.priority,
                    dependency_item_id = excluded.dependency_item_id,
                    next_run_time = excluded.next_run_time,
                    payload = excluded.payload,
                    correlation_id = excluded.correlation_id,
                    modified = excluded.modified"
            }
        };
        tx.execute(
            &format!(
                "INSERT INTO {table} (tenant_id, box_id, item_id, recipient, kind, priority,
                    dependency_item_id, next_run_time, retry_count, payload, correlation_id,
                    created, modified)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 0, ?9, ?10, ?11, ?11){conflict}"
            ),
            params![
                self.tenant_id,
                item.box_id,
                item.item_id,
                item.recipient,
                item.kind,
                item.priority,
                item.dependency_item_id,
                next_run_ms,
                item.payload,
                item.correlation_id,
                now_ms,
            ],
        )?;
        // after the write, so a duplicate key wins over a cycle; dropping tx rolls back
        self.check_dependency_cycle(&tx, &item)?;

        let stored = tx.query_row(
            &format!(
                "SELECT {COLUMNS} FROM {table}
                 WHERE tenant_id = ?1 AND box_id = ?2 AND item_id = ?3 AND recipient = ?4"
            ),
            params![self.tenant_id, item.box_id, item.item_id, item.recipient],
            read_row::<F>,
        )?;
        tx.commit()?;

        debug!(
            table,
            tenant = %self.tenant_id,
            box_id = %stored.box_id,
            item_id = %stored.item_id,
            ?mode,
            "item written"
        );
        Ok(stored)
    }

    /// Refuse an edge that would close a loop among the box's items.
    fn check_dependency_cycle(&self, tx: &Transaction<'_>, item: &NewItem) -> Result<(), QueueError> {
        let Some(depends_on) = item.dependency_item_id else {
            return Ok(());
        };

        let table = F::TABLE;
        let mut stmt = tx.prepare(&format!(
            "SELECT item_id, dependency_item_id FROM {table}
             WHERE tenant_id = ?1 AND box_id = ?2 AND dependency_item_id IS NOT NULL
               AND NOT (item_id = ?3 AND recipient = ?4)"
        ))?;
        let edges = stmt.query_map(
            params![self.tenant_id, item.box_id, item.item_id, item.recipient],
            |row| Ok((row.get::<_, ItemId>(0)?, row.get::<_, ItemId>(1)?)),
        )?;

        let mut graph = DependencyGraph::new();
        for edge in edges {
            let (from, to) = edge?;
            graph.add_dependency(from, to);
        }
        graph.add_dependency(item.item_id, depends_on);

        if let Some(cycle) = graph.detect_cycle() {
            let path: Vec<String> = cycle.iter().map(ToString::to_string).collect();
            warn!(
                table,
                tenant = %self.tenant_id,
                box_id = %item.box_id,
                cycle = %path.join(" -> "),
                "rejected dependency cycle"
            );
            return Err(QueueError::DependencyCycle(path));
        }
        Ok(())
    }

    // ---- diagnostics ----

    pub fn get(
        &self,
        box_id: BoxId,
        item_id: ItemId,
        recipient: &str,
    ) -> Result<Option<QueueItem<F>>, QueueError> {
        let table = F::TABLE;
        let conn = self.connect()?;
        let item = conn
            .query_row(
                &format!(
                    "SELECT {COLUMNS} FROM {table}
                     WHERE tenant_id = ?1 AND box_id = ?2 AND item_id = ?3 AND recipient = ?4"
                ),
                params![self.tenant_id, box_id, item_id, recipient],
                read_row::<F>,
            )
            .optional()?;
        Ok(item)
    }

    /// Every recipient row of one item, in insertion order.
    pub fn get_item(&self, box_id: BoxId, item_id: ItemId) -> Result<Vec<QueueItem<F>>, QueueError> {
        let table = F::TABLE;
        let conn = self.connect()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {COLUMNS} FROM {table}
             WHERE tenant_id = ?1 AND box_id = ?2 AND item_id = ?3
             ORDER BY row_id ASC"
        ))?;
        let items = stmt
            .query_map(params![self.tenant_id, box_id, item_id], read_row::<F>)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(items)
    }

    /// Rows of one box in insertion order, `page_size` at a time.
    ///
    /// Pass the returned `next_cursor` back to continue; reservation state is ignored.
    pub fn get_by_box(
        &self,
        box_id: BoxId,
        page_size: usize,
        cursor: Option<i64>,
    ) -> Result<Page<QueueItem<F>>, QueueError> {
        if page_size == 0 {
            return Err(QueueError::Configuration(
                "page_size must be at least 1".to_string(),
            ));
        }
        let limit = i64::try_from(page_size).unwrap_or(i64::MAX);

        let table = F::TABLE;
        let conn = self.connect()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {COLUMNS} FROM {table}
             WHERE tenant_id = ?1 AND box_id = ?2 AND row_id > ?3
             ORDER BY row_id ASC
             LIMIT ?4"
        ))?;
        let items = stmt
            .query_map(
                params![self.tenant_id, box_id, cursor.unwrap_or(0), limit],
                read_row::<F>,
            )?
            .collect::<Result<Vec<_>, _>>()?;

        let next_cursor = if items.len() == page_size {
            items.last().map(|item| item.row_id)
        } else {
            None
        };
        Ok(Page { items, next_cursor })
    }

    /// Remove a row regardless of reservation. Returns whether a row was removed.
    pub fn delete(&self, box_id: BoxId, item_id: ItemId, recipient: &str) -> Result<bool, QueueError> {
        let table = F::TABLE;
        let conn = self.connect()?;
        let removed = conn.execute(
            &format!(
                "DELETE FROM {table}
                 WHERE tenant_id = ?1 AND box_id = ?2 AND item_id = ?3 AND recipient = ?4"
            ),
            params![self.tenant_id, box_id, item_id, recipient],
        )?;
        Ok(removed > 0)
    }

    // ---- claim engine ----

    /// Select with `strategy` and stamp one fresh token on every selected row,
    /// atomically. Returns the stamped rows in insertion order; empty means
    /// nothing was eligible.
    pub(crate) fn claim_with(
        &self,
        strategy: &dyn SelectionStrategy,
    ) -> Result<Vec<QueueItem<F>>, QueueError> {
        let table = F::TABLE;
        let now_ms = to_millis(self.clock.now());

        let mut conn = self.connect()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let scope = ClaimScope {
            table,
            tenant_id: self.tenant_id,
            now_ms,
        };
        let row_ids = strategy.select(&tx, &scope)?;
        if row_ids.is_empty() {
            return Ok(Vec::new());
        }

        let token: Token<F> = self.ids.generate();
        {
            let mut stamp = tx.prepare(&format!(
                "UPDATE {table}
                 SET reservation_token = ?1, reserved_at = ?2, modified = ?2
                 WHERE row_id = ?3 AND tenant_id = ?4 AND reservation_token IS NULL"
            ))?;
            for row_id in &row_ids {
                stamp.execute(params![token, now_ms, row_id, self.tenant_id])?;
            }
        }

        let items = {
            let mut stmt = tx.prepare(&format!(
                "SELECT {COLUMNS} FROM {table}
                 WHERE tenant_id = ?1 AND reservation_token = ?2
                 ORDER BY row_id ASC"
            ))?;
            stmt.query_map(params![self.tenant_id, token], read_row::<F>)?
                .collect::<Result<Vec<_>, _>>()?
        };
        tx.commit()?;

        debug!(
            table,
            tenant = %self.tenant_id,
            strategy = strategy.name(),
            token = %token,
            count = items.len(),
            "claimed"
        );
        Ok(items)
    }

    // ---- disposition ----

    /// Delete the rows under `token` (all of them, or only `item_ids`).
    pub(crate) fn commit_rows(
        &self,
        token: Token<F>,
        item_ids: Option<&[ItemId]>,
    ) -> Result<u64, QueueError> {
        let table = F::TABLE;
        let mut conn = self.connect()?;
        let tx = conn.transaction()?;
        let removed = match item_ids {
            None => tx.execute(
                &format!("DELETE FROM {table} WHERE tenant_id = ?1 AND reservation_token = ?2"),
                params![self.tenant_id, token],
            )?,
            Some(item_ids) => {
                let mut stmt = tx.prepare(&format!(
                    "DELETE FROM {table}
                     WHERE tenant_id = ?1 AND reservation_token = ?2 AND item_id = ?3"
                ))?;
                let mut removed = 0;
                for item_id in item_ids {
                    removed += stmt.execute(params![self.tenant_id, token, item_id])?;
                }
                removed
            }
        };
        tx.commit()?;
        self.expect_rows("commit", token, removed as u64)
    }

    /// Release the rows under `token` (all of them, or only `item_ids`):
    /// clear the token, bump `retry_count`, and move `next_run_time` when given.
    pub(crate) fn cancel_rows(
        &self,
        token: Token<F>,
        item_ids: Option<&[ItemId]>,
        next_run_time: Option<DateTime<Utc>>,
    ) -> Result<u64, QueueError> {
        let table = F::TABLE;
        let now_ms = to_millis(self.clock.now());
        let next_run_ms = next_run_time.map(to_millis);
        let release = format!(
            "UPDATE {table}
             SET reservation_token = NULL, reserved_at = NULL,
                 retry_count = retry_count + 1,
                 next_run_time = COALESCE(?3, next_run_time),
                 modified = ?4
             WHERE tenant_id = ?1 AND reservation_token = ?2"
        );

        let mut conn = self.connect()?;
        let tx = conn.transaction()?;
        let released = match item_ids {
            None => tx.execute(
                &release,
                params![self.tenant_id, token, next_run_ms, now_ms],
            )?,
            Some(item_ids) => {
                let mut stmt = tx.prepare(&format!("{release} AND item_id = ?5"))?;
                let mut released = 0;
                for item_id in item_ids {
                    released +=
                        stmt.execute(params![self.tenant_id, token, next_run_ms, now_ms, item_id])?;
                }
                released
            }
        };
        tx.commit()?;
        self.expect_rows("cancel", token, released as u64)
    }

    fn expect_rows(&self, action: &'static str, token: Token<F>, affected: u64) -> Result<u64, QueueError> {
        if affected == 0 {
            warn!(
                table = F::TABLE,
                tenant = %self.tenant_id,
                token = %token,
                action,
                "no reserved rows matched token"
            );
            return Err(QueueError::NotFound {
                token: token.to_string(),
            });
        }
        debug!(
            table = F::TABLE,
            tenant = %self.tenant_id,
            token = %token,
            action,
            count = affected,
            "disposed"
        );
        Ok(affected)
    }

    // ---- recovery ----

    /// Release every reservation stamped before `older_than`, as a cancel with
    /// `next_run_time = now`. Returns how many rows were released.
    pub fn recover_dead(&self, older_than: DateTime<Utc>) -> Result<u64, QueueError> {
        let table = F::TABLE;
        let now_ms = to_millis(self.clock.now());
        let conn = self.connect()?;
        let recovered = conn.execute(
            &format!(
                "UPDATE {table}
                 SET reservation_token = NULL, reserved_at = NULL,
                     retry_count = retry_count + 1,
                     next_run_time = ?2, modified = ?2
                 WHERE tenant_id = ?1
                   AND reservation_token IS NOT NULL
                   AND reserved_at < ?3"
            ),
            params![self.tenant_id, now_ms, to_millis(older_than)],
        )? as u64;

        if recovered > 0 {
            info!(
                table,
                tenant = %self.tenant_id,
                count = recovered,
                %older_than,
                "recovered dead reservations"
            );
        }
        Ok(recovered)
    }

    // ---- status ----

    pub fn status(&self) -> Result<QueueStatus, QueueError> {
        self.read_status(None)
    }

    pub fn status_for_box(&self, box_id: BoxId) -> Result<QueueStatus, QueueError> {
        self.read_status(Some(box_id))
    }

    fn read_status(&self, box_id: Option<BoxId>) -> Result<QueueStatus, QueueError> {
        let table = F::TABLE;
        let conn = self.connect()?;
        let (total, reserved, earliest, oldest_reserved): (i64, i64, Option<i64>, Option<i64>) =
            conn.query_row(
                &format!(
                    "SELECT COUNT(*), COUNT(reservation_token),
                            MIN(CASE WHEN reservation_token IS NULL THEN next_run_time END),
                            MIN(CASE WHEN reservation_token IS NOT NULL THEN reserved_at END)
                     FROM {table}
                     WHERE tenant_id = ?1 AND (?2 IS NULL OR box_id = ?2)"
                ),
                params![self.tenant_id, box_id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )?;

        Ok(QueueStatus {
            total_rows: u64::try_from(total).unwrap_or(0),
            reserved_rows: u64::try_from(reserved).unwrap_or(0),
            earliest_next_run_time: earliest.map(millis_to_datetime).transpose()?,
            oldest_reserved_at: oldest_reserved.map(millis_to_datetime).transpose()?,
        })
    }

    /// Earliest `next_run_time` among unreserved rows that are not yet due.
    pub fn next_scheduled(&self) -> Result<Option<DateTime<Utc>>, QueueError> {
        self.read_next_scheduled(None)
    }

    pub fn next_scheduled_for_box(&self, box_id: BoxId) -> Result<Option<DateTime<Utc>>, QueueError> {
        self.read_next_scheduled(Some(box_id))
    }

    fn read_next_scheduled(&self, box_id: Option<BoxId>) -> Result<Option<DateTime<Utc>>, QueueError> {
        let table = F::TABLE;
        let now_ms = to_millis(self.clock.now());
        let conn = self.connect()?;
        let next: Option<i64> = conn.query_row(
            &format!(
                "SELECT MIN(next_run_time) FROM {table}
                 WHERE tenant_id = ?1 AND (?2 IS NULL OR box_id = ?2)
                   AND reservation_token IS NULL
                   AND next_run_time > ?3"
            ),
            params![self.tenant_id, box_id, now_ms],
            |row| row.get(0),
        )?;
        next.map(millis_to_datetime).transpose()
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::domain::ItemState;
    use crate::queue::testing::{harness, start};

    #[test]
    fn insert_fills_storage_owned_fields() {
        let h = harness();
        let outbox = h.store.outbox(h.tenant);
        let box_id = BoxId::generate();
        let item_id = ItemId::generate();

        let stored = outbox
            .insert(
                NewItem::new(box_id, item_id, "sam")
                    .with_kind(7)
                    .with_payload(b"hello".to_vec())
                    .with_correlation_id("corr-1"),
            )
            .unwrap();

        assert_eq!(stored.tenant_id, h.tenant);
        assert_eq!(stored.next_run_time, start());
        assert_eq!(stored.created, start());
        assert_eq!(stored.modified, start());
        assert_eq!(stored.retry_count, 0);
        assert_eq!(stored.kind, 7);
        assert_eq!(stored.payload.as_deref(), Some(&b"hello"[..]));
        assert_eq!(stored.correlation_id.as_deref(), Some("corr-1"));
        assert_eq!(stored.state(), ItemState::Available);
        assert!(stored.is_due(start()));
    }

    #[test]
    fn duplicate_key_is_rejected_per_recipient() {
        let h = harness();
        let outbox = h.store.outbox(h.tenant);
        let box_id = BoxId::generate();
        let item_id = ItemId::generate();

        outbox.insert(NewItem::new(box_id, item_id, "a")).unwrap();
        outbox.insert(NewItem::new(box_id, item_id, "b")).unwrap();

        assert!(matches!(
            outbox.insert(NewItem::new(box_id, item_id, "a")),
            Err(QueueError::DuplicateKey(_))
        ));
        assert_eq!(outbox.get_item(box_id, item_id).unwrap().len(), 2);
    }

    #[test]
    fn same_key_in_other_tenant_is_not_a_duplicate() {
        let h = harness();
        let box_id = BoxId::generate();
        let item_id = ItemId::generate();

        h.store
            .inbox(h.tenant)
            .insert(NewItem::new(box_id, item_id, "a"))
            .unwrap();
        h.store
            .inbox(TenantId::generate())
            .insert(NewItem::new(box_id, item_id, "a"))
            .unwrap();
    }

    #[test]
    fn upsert_keeps_reservation_and_retry_count() {
        let h = harness();
        let outbox = h.store.outbox(h.tenant);
        let box_id = BoxId::generate();
        let item_id = ItemId::generate();
        outbox.upsert(NewItem::new(box_id, item_id, "r")).unwrap();

        let claimed = outbox.claim().unwrap().unwrap();
        h.clock.advance(Duration::seconds(3));
        let updated = outbox
            .upsert(
                NewItem::new(box_id, item_id, "r")
                    .with_priority(5)
                    .with_payload(b"v2".to_vec()),
            )
            .unwrap();

        assert_eq!(updated.row_id, claimed.row_id);
        assert_eq!(updated.priority, 5);
        assert_eq!(updated.payload.as_deref(), Some(&b"v2"[..]));
        assert_eq!(updated.reservation_token, claimed.reservation_token);
        assert_eq!(updated.created, start());
        assert_eq!(updated.modified, start() + Duration::seconds(3));
    }

    #[test]
    fn self_dependency_is_rejected() {
        let h = harness();
        let item_id = ItemId::generate();

        assert!(matches!(
            h.store
                .outbox(h.tenant)
                .insert(NewItem::new(BoxId::generate(), item_id, "r").depends_on(item_id)),
            Err(QueueError::SelfDependency(_))
        ));
    }

    #[test]
    fn insert_closing_a_cycle_is_rejected() {
        let h = harness();
        let outbox = h.store.outbox(h.tenant);
        let box_id = BoxId::generate();
        let [a, b, c] = std::array::from_fn(|_| ItemId::generate());

        outbox.insert(NewItem::new(box_id, a, "r").depends_on(b)).unwrap();
        outbox.insert(NewItem::new(box_id, b, "r").depends_on(c)).unwrap();
        let err = outbox
            .insert(NewItem::new(box_id, c, "r").depends_on(a))
            .unwrap_err();

        match err {
            QueueError::DependencyCycle(path) => assert_eq!(path.len(), 4),
            other => panic!("expected cycle, got {other:?}"),
        }
        assert!(outbox.get(box_id, c, "r").unwrap().is_none());

        // the same edge in another box is fine
        outbox
            .insert(NewItem::new(BoxId::generate(), c, "r").depends_on(a))
            .unwrap();
    }

    #[test]
    fn duplicate_insert_reports_duplicate_before_cycle() {
        let h = harness();
        let outbox = h.store.outbox(h.tenant);
        let box_id = BoxId::generate();
        let [a, b] = std::array::from_fn(|_| ItemId::generate());

        outbox.insert(NewItem::new(box_id, b, "r").depends_on(a)).unwrap();
        outbox.insert(NewItem::new(box_id, a, "r")).unwrap();

        assert!(matches!(
            outbox.insert(NewItem::new(box_id, a, "r").depends_on(b)),
            Err(QueueError::DuplicateKey(_))
        ));
        let stored = outbox.get(box_id, a, "r").unwrap().unwrap();
        assert_eq!(stored.dependency_item_id, None);
    }

    #[test]
    fn upsert_replaces_its_own_edge() {
        let h = harness();
        let outbox = h.store.outbox(h.tenant);
        let box_id = BoxId::generate();
        let [a, b] = std::array::from_fn(|_| ItemId::generate());

        outbox.insert(NewItem::new(box_id, a, "r").depends_on(b)).unwrap();
        // b -> a would loop while a -> b exists ...
        assert!(outbox.insert(NewItem::new(box_id, b, "r").depends_on(a)).is_err());
        // ... but not once a's edge is dropped
        outbox.upsert(NewItem::new(box_id, a, "r")).unwrap();
        outbox.insert(NewItem::new(box_id, b, "r").depends_on(a)).unwrap();
    }

    #[test]
    fn get_by_box_pages_in_insertion_order() {
        let h = harness();
        let inbox = h.store.inbox(h.tenant);
        let box_id = BoxId::generate();
        let ids: Vec<ItemId> = (0..5)
            .map(|_| {
                let id = ItemId::generate();
                inbox.insert(NewItem::new(box_id, id, "r")).unwrap();
                id
            })
            .collect();
        inbox
            .insert(NewItem::new(BoxId::generate(), ItemId::generate(), "r"))
            .unwrap();
        // reservation does not hide rows from diagnostics
        inbox.pop(box_id, 1).unwrap();

        let mut seen = Vec::new();
        let mut cursor = None;
        let mut pages = 0;
        loop {
            let page = inbox.get_by_box(box_id, 2, cursor).unwrap();
            pages += 1;
            seen.extend(page.items.iter().map(|i| i.item_id));
            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        assert_eq!(seen, ids);
        assert_eq!(pages, 3);
    }

    #[test]
    fn get_by_box_rejects_zero_page_size() {
        let h = harness();
        assert!(matches!(
            h.store.outbox(h.tenant).get_by_box(BoxId::generate(), 0, None),
            Err(QueueError::Configuration(_))
        ));
    }

    #[test]
    fn delete_removes_one_recipient() {
        let h = harness();
        let outbox = h.store.outbox(h.tenant);
        let box_id = BoxId::generate();
        let item_id = ItemId::generate();
        outbox.insert(NewItem::new(box_id, item_id, "a")).unwrap();
        outbox.insert(NewItem::new(box_id, item_id, "b")).unwrap();

        assert!(outbox.delete(box_id, item_id, "a").unwrap());
        assert!(!outbox.delete(box_id, item_id, "a").unwrap());
        let left = outbox.get_item(box_id, item_id).unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].recipient, "b");
    }

    #[test]
    fn status_counts_rows_and_earliest_unreserved() {
        let h = harness();
        let outbox = h.store.outbox(h.tenant);
        let (x, y) = (BoxId::generate(), BoxId::generate());
        let past = start() - Duration::minutes(1);
        let future = start() + Duration::minutes(1);

        outbox
            .insert(NewItem::new(x, ItemId::generate(), "r").run_at(past).with_priority(0))
            .unwrap();
        outbox
            .insert(NewItem::new(x, ItemId::generate(), "r").run_at(future))
            .unwrap();
        outbox
            .insert(NewItem::new(y, ItemId::generate(), "r").with_priority(1))
            .unwrap();
        assert_eq!(outbox.status().unwrap().earliest_next_run_time, Some(past));

        // claims the past-due row in x
        outbox.claim().unwrap().unwrap();

        let all = outbox.status().unwrap();
        assert_eq!(all.total_rows, 3);
        assert_eq!(all.reserved_rows, 1);
        assert_eq!(all.available_rows(), 2);
        assert_eq!(all.earliest_next_run_time, Some(start()));

        let only_x = outbox.status_for_box(x).unwrap();
        assert_eq!(only_x.total_rows, 2);
        assert_eq!(only_x.reserved_rows, 1);
        assert_eq!(only_x.earliest_next_run_time, Some(future));
        assert_eq!(only_x.oldest_reserved_at, Some(start()));
        assert_eq!(outbox.status_for_box(y).unwrap().oldest_reserved_at, None);

        let empty = outbox.status_for_box(BoxId::generate()).unwrap();
        assert_eq!(empty, QueueStatus::default());
    }

    #[test]
    fn status_reports_the_oldest_reservation() {
        let h = harness();
        let inbox = h.store.inbox(h.tenant);
        let box_id = BoxId::generate();
        for _ in 0..3 {
            inbox.insert(NewItem::new(box_id, ItemId::generate(), "r")).unwrap();
        }
        assert_eq!(inbox.status().unwrap().oldest_reserved_at, None);

        inbox.pop(box_id, 1).unwrap();
        h.clock.advance(Duration::seconds(30));
        let later = inbox.pop(box_id, 1).unwrap();
        assert_eq!(inbox.status().unwrap().oldest_reserved_at, Some(start()));

        // committing the younger batch leaves the stuck one visible
        inbox.commit_all(later[0].reservation_token.unwrap()).unwrap();
        let status = inbox.status_for_box(box_id).unwrap();
        assert_eq!(status.reserved_rows, 1);
        assert_eq!(status.oldest_reserved_at, Some(start()));

        inbox.recover_dead(start() + Duration::seconds(1)).unwrap();
        assert_eq!(inbox.status().unwrap().oldest_reserved_at, None);
    }

    #[test]
    fn next_scheduled_ignores_due_and_reserved_rows() {
        let h = harness();
        let inbox = h.store.inbox(h.tenant);
        let box_id = BoxId::generate();
        assert_eq!(inbox.next_scheduled().unwrap(), None);

        inbox.insert(NewItem::new(box_id, ItemId::generate(), "r")).unwrap();
        assert_eq!(inbox.next_scheduled().unwrap(), None);

        let soon = start() + Duration::seconds(10);
        let later = start() + Duration::seconds(20);
        inbox
            .insert(NewItem::new(box_id, ItemId::generate(), "r").run_at(later))
            .unwrap();
        inbox
            .insert(NewItem::new(BoxId::generate(), ItemId::generate(), "r").run_at(soon))
            .unwrap();

        assert_eq!(inbox.next_scheduled().unwrap(), Some(soon));
        assert_eq!(inbox.next_scheduled_for_box(box_id).unwrap(), Some(later));
    }

    #[test]
    fn recover_dead_releases_old_reservations_once() {
        let h = harness();
        let outbox = h.store.outbox(h.tenant);
        let box_id = BoxId::generate();
        let item_id = ItemId::generate();
        outbox.insert(NewItem::new(box_id, item_id, "r")).unwrap();
        outbox.claim().unwrap().unwrap();

        // stamped exactly at `start()`, which is not before `start()`
        assert_eq!(outbox.recover_dead(start()).unwrap(), 0);

        h.clock.advance(Duration::minutes(10));
        let now = h.clock.now();
        assert_eq!(outbox.recover_dead(now).unwrap(), 1);
        assert_eq!(outbox.recover_dead(now - Duration::minutes(5)).unwrap(), 0);

        let stored = outbox.get(box_id, item_id, "r").unwrap().unwrap();
        assert_eq!(stored.state(), ItemState::Available);
        assert_eq!(stored.retry_count, 1);
        assert_eq!(stored.next_run_time, now);
        assert!(outbox.claim().unwrap().is_some());
    }

    #[test]
    fn recover_dead_spares_young_reservations() {
        let h = harness();
        let inbox = h.store.inbox(h.tenant);
        let box_id = BoxId::generate();
        inbox.insert(NewItem::new(box_id, ItemId::generate(), "r")).unwrap();
        inbox.pop(box_id, 1).unwrap();

        h.clock.advance(Duration::minutes(10));
        inbox.insert(NewItem::new(box_id, ItemId::generate(), "r")).unwrap();
        inbox.pop(box_id, 1).unwrap();

        let cutoff = h.clock.now() - Duration::minutes(5);
        assert_eq!(inbox.recover_dead(cutoff).unwrap(), 1);
        assert_eq!(inbox.status().unwrap().reserved_rows, 1);
    }

    #[test]
    fn recover_dead_releases_whole_batches() {
        let h = harness();
        let inbox = h.store.inbox(h.tenant);
        for _ in 0..3 {
            inbox
                .insert(NewItem::new(BoxId::generate(), ItemId::generate(), "r"))
                .unwrap();
        }
        let batch = inbox.pop_across_boxes(3).unwrap();
        assert_eq!(batch.len(), 3);

        h.clock.advance(Duration::hours(1));
        assert_eq!(inbox.recover_dead(h.clock.now()).unwrap(), 3);
        assert!(matches!(
            inbox.commit_all(batch[0].reservation_token.unwrap()),
            Err(QueueError::NotFound { .. })
        ));
    }
}
