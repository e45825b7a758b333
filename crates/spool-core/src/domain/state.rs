//! Item state machine.

use serde::{Deserialize, Serialize};

/// Lifecycle of a queue row.
///
/// State transitions:
/// - Available -> Reserved (claim / pop)
/// - Reserved -> Available (cancel / dead recovery)
/// - Reserved -> removed (commit)
///
/// A removed row no longer exists, so there is no `Removed` variant: the
/// table is the single source of truth and absence is the terminal state.
/// The state is derived from `reservation_token`; callers never set it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ItemState {
    /// Waiting in the table. Claimable once due and its dependency is gone.
    Available,

    /// Stamped with a reservation token and owned by one worker.
    Reserved,
}

impl ItemState {
    pub fn is_reserved(self) -> bool {
        matches!(self, ItemState::Reserved)
    }
}
