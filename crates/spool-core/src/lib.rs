//! spool-core
//!
//! Transactional outbox/inbox work queues stored in SQLite, shared by many
//! tenants and claimed concurrently by workers in any number of processes.
//!
//! # Modules
//! - **domain**: ids, rows, status, errors
//! - **ports**: Clock, UlidGenerator, ConnectionFactory
//! - **impls**: SqliteConnectionFactory
//! - **queue**: the claim engine (QueueTable, strategies, Store)
//! - **app**: async drivers (WorkerLoop, ReaperLoop, WorkerGroup)
//! - **config**: StoreConfig loaded from TOML

pub mod app;
pub mod config;
pub mod domain;
pub mod impls;
pub mod ports;
pub mod queue;

pub use config::{ConfigError, StoreConfig};
pub use domain::{BoxId, ItemId, NewItem, QueueError, QueueItem, QueueStatus, TenantId};
pub use queue::{InboxTable, OutboxTable, Store};
