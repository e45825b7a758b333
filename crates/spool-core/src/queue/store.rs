//! Store - entry point that hands out tenant-scoped queue tables.

use std::sync::Arc;

use tracing::debug;

use super::family::{Inbox, Outbox};
use super::inbox::InboxTable;
use super::outbox::OutboxTable;
use super::schema::ensure_table;
use super::table::QueueTable;
use crate::config::StoreConfig;
use crate::domain::{QueueError, TenantId};
use crate::impls::SqliteConnectionFactory;
use crate::ports::{Clock, ConnectionFactory, SystemClock};

#[derive(Clone)]
pub struct Store {
    connections: Arc<dyn ConnectionFactory>,
    clock: Arc<dyn Clock>,
}

impl Store {
    pub fn new(connections: Arc<dyn ConnectionFactory>, clock: Arc<dyn Clock>) -> Self {
        Self { connections, clock }
    }

    /// Validate `config`, open the database on the wall clock and make sure
    /// both tables exist.
    pub fn open(config: StoreConfig) -> Result<Self, QueueError> {
        config
            .validate()
            .map_err(|err| QueueError::Configuration(err.to_string()))?;
        let store = Self::new(
            Arc::new(SqliteConnectionFactory::new(config)),
            Arc::new(SystemClock),
        );
        store.ensure_tables()?;
        Ok(store)
    }

    pub fn ensure_tables(&self) -> Result<(), QueueError> {
        let mut conn = self.connections.connect()?;
        ensure_table::<Outbox>(&mut conn)?;
        ensure_table::<Inbox>(&mut conn)?;
        debug!("queue tables ready");
        Ok(())
    }

    pub fn outbox(&self, tenant_id: TenantId) -> OutboxTable {
        QueueTable::new(tenant_id, Arc::clone(&self.connections), Arc::clone(&self.clock))
    }

    pub fn inbox(&self, tenant_id: TenantId) -> InboxTable {
        QueueTable::new(tenant_id, Arc::clone(&self.connections), Arc::clone(&self.clock))
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store").finish_non_exhaustive()
    }
}
