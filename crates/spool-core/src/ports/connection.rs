//! ConnectionFactory port.
//!
//! Pooling and tenant routing live outside the queue engine. The engine only
//! needs "a connection I can open a transaction on" for the duration of one
//! call; it never holds a connection between calls.

use rusqlite::Connection;

use crate::domain::QueueError;

pub trait ConnectionFactory: Send + Sync {
    fn connect(&self) -> Result<Connection, QueueError>;
}
