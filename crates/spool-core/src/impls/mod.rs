//! Impls - implementations of the ports.
//!
//! - **SqliteConnectionFactory**: one connection per call against a database file.

pub mod sqlite;

pub use self::sqlite::SqliteConnectionFactory;
