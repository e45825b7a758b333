//! SqliteConnectionFactory - opens the configured database file per call.
//!
//! Each call gets its own connection, so concurrent workers in one process
//! contend on SQLite's file lock exactly like workers in separate processes.
//! `busy_timeout` turns lock contention into a bounded wait instead of an
//! immediate `SQLITE_BUSY`.

use rusqlite::{Connection, OpenFlags};

use crate::config::StoreConfig;
use crate::domain::QueueError;
use crate::ports::ConnectionFactory;

pub struct SqliteConnectionFactory {
    config: StoreConfig,
}

impl SqliteConnectionFactory {
    pub fn new(config: StoreConfig) -> Self {
        Self { config }
    }
}

impl ConnectionFactory for SqliteConnectionFactory {
    fn connect(&self) -> Result<Connection, QueueError> {
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let conn = Connection::open_with_flags(&self.config.path, flags)?;
        conn.busy_timeout(self.config.busy_timeout())?;
        // journal_mode returns the resulting mode as a row
        conn.pragma_update_and_check(
            None,
            "journal_mode",
            self.config.journal_mode.pragma_value(),
            |_row| Ok(()),
        )?;
        conn.pragma_update(None, "synchronous", self.config.sync_mode.pragma_value())?;
        Ok(conn)
    }
}
