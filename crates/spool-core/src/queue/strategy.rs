//! Claim selection strategies.
//!
//! A strategy only picks row ids. Stamping the token, reading the rows back
//! and committing the claim transaction is the engine's job, so every strategy
//! gets the same exclusivity guarantee for free.

use rusqlite::{Transaction, params};

use crate::domain::{BoxId, QueueError, TenantId};

/// What a strategy may look at.
#[derive(Debug, Clone, Copy)]
pub struct ClaimScope<'a> {
    pub table: &'a str,
    pub tenant_id: TenantId,
    pub now_ms: i64,
}

pub trait SelectionStrategy {
    /// Row ids to reserve, in claim order. Runs inside the claim transaction.
    fn select(&self, tx: &Transaction<'_>, scope: &ClaimScope<'_>) -> Result<Vec<i64>, QueueError>;

    fn name(&self) -> &'static str;
}

fn collect_row_ids(
    tx: &Transaction<'_>,
    sql: &str,
    params: impl rusqlite::Params,
) -> Result<Vec<i64>, QueueError> {
    let mut stmt = tx.prepare(sql)?;
    let ids = stmt
        .query_map(params, |row| row.get::<_, i64>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(ids)
}

fn checked_limit(max_count: usize) -> Result<i64, QueueError> {
    if max_count == 0 {
        return Err(QueueError::Configuration(
            "max_count must be at least 1".to_string(),
        ));
    }
    Ok(i64::try_from(max_count).unwrap_or(i64::MAX))
}

/// One due, unreserved row whose dependency (same box) is gone.
/// Lowest priority first, then earliest due time, then insertion order.
#[derive(Debug, Clone, Copy, Default)]
pub struct PriorityWithDependencies;

impl SelectionStrategy for PriorityWithDependencies {
    fn select(&self, tx: &Transaction<'_>, scope: &ClaimScope<'_>) -> Result<Vec<i64>, QueueError> {
        let table = scope.table;
        collect_row_ids(
            tx,
            &format!(
                "SELECT q.row_id FROM {table} q
                 WHERE q.tenant_id = ?1
                   AND q.reservation_token IS NULL
                   AND q.next_run_time <= ?2
                   AND (q.dependency_item_id IS NULL OR NOT EXISTS (
                        SELECT 1 FROM {table} d
                        WHERE d.tenant_id = q.tenant_id
                          AND d.box_id = q.box_id
                          AND d.item_id = q.dependency_item_id))
                 ORDER BY q.priority ASC, q.next_run_time ASC, q.row_id ASC
                 LIMIT 1"
            ),
            params![scope.tenant_id, scope.now_ms],
        )
    }

    fn name(&self) -> &'static str {
        "priority"
    }
}

/// Oldest due, unreserved rows of a single box.
#[derive(Debug, Clone, Copy)]
pub struct BoxFifo {
    box_id: BoxId,
    limit: i64,
}

impl BoxFifo {
    pub fn new(box_id: BoxId, max_count: usize) -> Result<Self, QueueError> {
        Ok(Self {
            box_id,
            limit: checked_limit(max_count)?,
        })
    }
}

impl SelectionStrategy for BoxFifo {
    fn select(&self, tx: &Transaction<'_>, scope: &ClaimScope<'_>) -> Result<Vec<i64>, QueueError> {
        let table = scope.table;
        collect_row_ids(
            tx,
            &format!(
                "SELECT row_id FROM {table}
                 WHERE tenant_id = ?1 AND box_id = ?2
                   AND reservation_token IS NULL
                   AND next_run_time <= ?3
                 ORDER BY row_id ASC
                 LIMIT ?4"
            ),
            params![scope.tenant_id, self.box_id, scope.now_ms, self.limit],
        )
    }

    fn name(&self) -> &'static str {
        "box-fifo"
    }
}

/// The oldest due, unreserved row of each box, at most one per box, boxes
/// ordered by the age of that row.
#[derive(Debug, Clone, Copy)]
pub struct FairAcrossBoxes {
    limit: i64,
}

impl FairAcrossBoxes {
    pub fn new(max_count: usize) -> Result<Self, QueueError> {
        Ok(Self {
            limit: checked_limit(max_count)?,
        })
    }
}

impl SelectionStrategy for FairAcrossBoxes {
    fn select(&self, tx: &Transaction<'_>, scope: &ClaimScope<'_>) -> Result<Vec<i64>, QueueError> {
        let table = scope.table;
        collect_row_ids(
            tx,
            &format!(
                "SELECT MIN(row_id) AS head FROM {table}
                 WHERE tenant_id = ?1
                   AND reservation_token IS NULL
                   AND next_run_time <= ?2
                 GROUP BY box_id
                 ORDER BY head ASC
                 LIMIT ?3"
            ),
            params![scope.tenant_id, scope.now_ms, self.limit],
        )
    }

    fn name(&self) -> &'static str {
        "fair"
    }
}
