//! Ports: the seams between the queue engine and its collaborators.
//!
//! - `Clock`: the source of "now" for due times, stamps and recovery ages.
//! - `UlidGenerator`: mints reservation tokens from the clock.
//! - `ConnectionFactory`: hands out a database connection per call.

pub mod clock;
pub mod connection;
pub mod id_generator;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::connection::ConnectionFactory;
pub use self::id_generator::UlidGenerator;
