//! Reservation token generation.
//!
//! Tokens are ULIDs whose timestamp part is taken from the injected clock, so
//! a token minted later sorts after one minted earlier, and two tokens minted
//! in the same millisecond still differ in their random part.

use std::sync::Arc;

use ulid::Ulid;

use crate::domain::ids::{Id, IdMarker};
use crate::ports::Clock;

/// ULID-based id generator driven by a `Clock`.
#[derive(Clone)]
pub struct UlidGenerator {
    clock: Arc<dyn Clock>,
}

impl UlidGenerator {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    /// Mint a fresh identifier of kind `T`.
    pub fn generate<T: IdMarker>(&self) -> Id<T> {
        let timestamp_ms = self.clock.now().timestamp_millis().max(0) as u64;
        Id::from_ulid(Ulid::from_parts(timestamp_ms, rand::random()))
    }
}

impl std::fmt::Debug for UlidGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UlidGenerator").finish_non_exhaustive()
    }
}
