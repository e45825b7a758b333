//! Table layout and row mapping shared by every queue family.
//!
//! Timestamps are stored as Unix milliseconds so that due-time comparisons are
//! plain integer comparisons inside SQL.

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, TransactionBehavior, params};

use super::family::QueueFamily;
use crate::domain::QueueError;
use crate::domain::item::QueueItem;

/// Current layout version of every queue table.
pub const SCHEMA_VERSION: i64 = 1;

/// Column list matching `read_row`.
pub(crate) const COLUMNS: &str = "row_id, tenant_id, box_id, item_id, recipient, kind, priority, \
     dependency_item_id, next_run_time, retry_count, reservation_token, reserved_at, payload, \
     correlation_id, created, modified";

#[derive(Debug, thiserror::Error)]
#[error("timestamp {0} ms is out of range")]
struct TimestampOutOfRange(i64);

pub(crate) fn to_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

fn from_millis(idx: usize, millis: i64) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(millis).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            Type::Integer,
            Box::new(TimestampOutOfRange(millis)),
        )
    })
}

pub(crate) fn millis_to_datetime(millis: i64) -> Result<DateTime<Utc>, QueueError> {
    from_millis(0, millis).map_err(QueueError::from)
}

pub(crate) fn read_row<F: QueueFamily>(row: &Row<'_>) -> rusqlite::Result<QueueItem<F>> {
    let reserved_at: Option<i64> = row.get(11)?;
    Ok(QueueItem {
        row_id: row.get(0)?,
        tenant_id: row.get(1)?,
        box_id: row.get(2)?,
        item_id: row.get(3)?,
        recipient: row.get(4)?,
        kind: row.get(5)?,
        priority: row.get(6)?,
        dependency_item_id: row.get(7)?,
        next_run_time: from_millis(8, row.get(8)?)?,
        retry_count: row.get(9)?,
        reservation_token: row.get(10)?,
        reserved_at: reserved_at.map(|ms| from_millis(11, ms)).transpose()?,
        payload: row.get(12)?,
        correlation_id: row.get(13)?,
        created: from_millis(14, row.get(14)?)?,
        modified: from_millis(15, row.get(15)?)?,
    })
}

/// Ensure the family's table exists at `SCHEMA_VERSION`.
///
/// Upgrades are owned by the migration tooling; this only creates a missing
/// table and refuses to run against a newer layout.
pub fn ensure_table<F: QueueFamily>(conn: &mut Connection) -> Result<(), QueueError> {
    let table = F::TABLE;
    // take the write lock up front; a deferred read upgraded to write is not retried on busy
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    tx.execute_batch(
        "CREATE TABLE IF NOT EXISTS spool_schema (
            table_name TEXT PRIMARY KEY,
            version INTEGER NOT NULL
        );",
    )?;

    let existing: Option<i64> = tx
        .query_row(
            "SELECT version FROM spool_schema WHERE table_name = ?1",
            params![table],
            |row| row.get(0),
        )
        .optional()?;
    if let Some(version) = existing
        && version > SCHEMA_VERSION
    {
        return Err(QueueError::Configuration(format!(
            "table {table} is at schema version {version}, this build supports {SCHEMA_VERSION}"
        )));
    }

    tx.execute_batch(&format!(
        "CREATE TABLE IF NOT EXISTS {table} (
            row_id INTEGER PRIMARY KEY AUTOINCREMENT,
            tenant_id TEXT NOT NULL,
            box_id TEXT NOT NULL,
            item_id TEXT NOT NULL,
            recipient TEXT NOT NULL,
            kind INTEGER NOT NULL,
            priority INTEGER NOT NULL,
            dependency_item_id TEXT,
            next_run_time INTEGER NOT NULL,
            retry_count INTEGER NOT NULL DEFAULT 0,
            reservation_token TEXT,
            reserved_at INTEGER,
            payload BLOB,
            correlation_id TEXT,
            created INTEGER NOT NULL,
            modified INTEGER NOT NULL,
            UNIQUE(tenant_id, box_id, item_id, recipient)
        );
        CREATE INDEX IF NOT EXISTS idx_{table}_next_run ON {table}(tenant_id, next_run_time);
        CREATE INDEX IF NOT EXISTS idx_{table}_box ON {table}(tenant_id, box_id);
        CREATE INDEX IF NOT EXISTS idx_{table}_token ON {table}(tenant_id, reservation_token);"
    ))?;

    if existing.is_none() {
        tx.execute(
            "INSERT INTO spool_schema (table_name, version) VALUES (?1, ?2)",
            params![table, SCHEMA_VERSION],
        )?;
    }
    tx.commit()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::family::{Inbox, Outbox};

    fn memory_conn() -> Connection {
        Connection::open_in_memory().unwrap()
    }

    #[test]
    fn ensure_table_is_idempotent() {
        let mut conn = memory_conn();
        ensure_table::<Outbox>(&mut conn).unwrap();
        ensure_table::<Outbox>(&mut conn).unwrap();
        ensure_table::<Inbox>(&mut conn).unwrap();

        let versions: i64 = conn
            .query_row("SELECT COUNT(*) FROM spool_schema", [], |row| row.get(0))
            .unwrap();
        assert_eq!(versions, 2);
    }

    #[test]
    fn concurrent_ensure_table_on_one_file_succeeds() {
        use crate::config::StoreConfig;
        use crate::impls::SqliteConnectionFactory;
        use crate::ports::ConnectionFactory;

        let dir = tempfile::tempdir().unwrap();
        let factory = SqliteConnectionFactory::new(StoreConfig::for_path(dir.path().join("q.db")));
        // the file is already in WAL mode, as after any earlier open
        let conn = factory.connect().unwrap();

        let results: Vec<Result<(), QueueError>> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    s.spawn(|| {
                        let mut conn = factory.connect()?;
                        ensure_table::<Outbox>(&mut conn)?;
                        ensure_table::<Inbox>(&mut conn)
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        for result in results {
            result.unwrap();
        }
        let versions: i64 = conn
            .query_row("SELECT COUNT(*) FROM spool_schema", [], |row| row.get(0))
            .unwrap();
        assert_eq!(versions, 2);
    }

    #[test]
    fn creates_claim_indexes() {
        let mut conn = memory_conn();
        ensure_table::<Outbox>(&mut conn).unwrap();

        let mut stmt = conn
            .prepare("SELECT name FROM sqlite_master WHERE type = 'index' AND tbl_name = 'outbox'")
            .unwrap();
        let names: Vec<String> = stmt
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();

        for expected in ["idx_outbox_next_run", "idx_outbox_box", "idx_outbox_token"] {
            assert!(names.iter().any(|n| n == expected), "missing {expected}");
        }
    }

    #[test]
    fn newer_schema_is_refused() {
        let mut conn = memory_conn();
        ensure_table::<Inbox>(&mut conn).unwrap();
        conn.execute(
            "UPDATE spool_schema SET version = ?1 WHERE table_name = 'inbox'",
            params![SCHEMA_VERSION + 1],
        )
        .unwrap();

        assert!(matches!(
            ensure_table::<Inbox>(&mut conn),
            Err(QueueError::Configuration(_))
        ));
    }

    #[test]
    fn out_of_range_timestamp_is_a_corrupt_row() {
        assert!(matches!(
            millis_to_datetime(i64::MAX),
            Err(QueueError::CorruptRow(_))
        ));
        assert_eq!(
            millis_to_datetime(0).unwrap(),
            DateTime::<Utc>::UNIX_EPOCH
        );
    }
}
