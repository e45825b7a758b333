//! Domain model (identifiers, rows, states, errors).

pub mod errors;
pub mod ids;
pub mod item;
pub mod state;

pub use errors::QueueError;
pub use ids::{BoxId, Id, IdMarker, ItemId, ParseIdError, TenantId, Token};
pub use item::{NewItem, Page, QueueItem, QueueStatus};
pub use state::ItemState;
