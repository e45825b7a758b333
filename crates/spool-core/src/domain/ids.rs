//! Domain identifiers (strongly-typed IDs).
//!
//! Every identifier is a ULID wrapped in `Id<T>`, where `T` is a marker type
//! that only exists at compile time. A `TenantId` cannot be passed where a
//! `BoxId` is expected, and a reservation token minted by the outbox cannot be
//! handed to the inbox.
//!
//! ULIDs sort by creation time, which the queue relies on for reservation
//! tokens: a token minted later compares greater.
//!
//! Identifiers are persisted as their canonical 26-character ULID string.

use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::marker::PhantomData;
use std::str::FromStr;
use ulid::Ulid;

/// Marker trait for each identifier kind.
///
/// Supplies the prefix used by `Display` (`"tenant-"`, `"box-"`, ...).
pub trait IdMarker: Send + Sync + 'static {
    fn prefix() -> &'static str;
}

/// Generic identifier.
///
/// `T` is carried in `PhantomData`, so `Id<T>` has exactly the size of a ULID.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Id<T: IdMarker> {
    ulid: Ulid,
    #[serde(skip)]
    _marker: PhantomData<T>,
}

impl<T: IdMarker> Id<T> {
    pub fn from_ulid(ulid: Ulid) -> Self {
        Self {
            ulid,
            _marker: PhantomData,
        }
    }

    /// Fresh identifier stamped with the system time.
    ///
    /// Producers use this for box and item ids. Reservation tokens are minted
    /// through `UlidGenerator` instead so their timestamp follows the injected clock.
    pub fn generate() -> Self {
        Self::from_ulid(Ulid::new())
    }

    pub fn as_ulid(&self) -> Ulid {
        self.ulid
    }

    /// Milliseconds since the epoch encoded in the ULID.
    pub fn timestamp_ms(&self) -> u64 {
        self.ulid.timestamp_ms()
    }
}

impl<T: IdMarker> From<Ulid> for Id<T> {
    fn from(ulid: Ulid) -> Self {
        Self::from_ulid(ulid)
    }
}

impl<T: IdMarker> fmt::Display for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", T::prefix(), self.ulid)
    }
}

/// Error returned when an identifier string cannot be parsed.
#[derive(Debug, thiserror::Error)]
#[error("invalid identifier '{input}': {source}")]
pub struct ParseIdError {
    input: String,
    #[source]
    source: ulid::DecodeError,
}

impl<T: IdMarker> FromStr for Id<T> {
    type Err = ParseIdError;

    /// Accepts both the prefixed display form and a bare ULID.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.strip_prefix(T::prefix()).unwrap_or(s);
        Ulid::from_string(raw)
            .map(Self::from_ulid)
            .map_err(|source| ParseIdError {
                input: s.to_string(),
                source,
            })
    }
}

impl<T: IdMarker> ToSql for Id<T> {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.ulid.to_string()))
    }
}

impl<T: IdMarker> FromSql for Id<T> {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let text = value.as_str()?;
        Ulid::from_string(text)
            .map(Self::from_ulid)
            .map_err(|e| FromSqlError::Other(Box::new(e)))
    }
}

// ========================================
// Marker types
// ========================================

/// Tenant marker (the identity that owns a set of tables).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Tenant {}

impl IdMarker for Tenant {
    fn prefix() -> &'static str {
        "tenant-"
    }
}

/// Box marker (a logical sub-queue such as a destination drive).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum QueueBox {}

impl IdMarker for QueueBox {
    fn prefix() -> &'static str {
        "box-"
    }
}

/// Item marker (one unit of work, possibly fanned out to several recipients).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Item {}

impl IdMarker for Item {
    fn prefix() -> &'static str {
        "item-"
    }
}

// ========================================
// Type aliases
// ========================================

/// Identifier of a tenant; every queue operation is scoped to one.
pub type TenantId = Id<Tenant>;

/// Identifier of a box (logical sub-queue sharing a physical table).
pub type BoxId = Id<QueueBox>;

/// Identifier of a unit of work.
pub type ItemId = Id<Item>;

/// Reservation token for a queue family `F`.
///
/// The family marker keeps outbox tokens and inbox tokens apart at compile time.
pub type Token<F> = Id<F>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_distinct_types() {
        let ulid1 = Ulid::new();
        let ulid2 = Ulid::new();
        let ulid3 = Ulid::new();

        let tenant = TenantId::from_ulid(ulid1);
        let box_id = BoxId::from_ulid(ulid2);
        let item = ItemId::from_ulid(ulid3);

        assert_eq!(tenant.as_ulid(), ulid1);
        assert_eq!(box_id.as_ulid(), ulid2);
        assert_eq!(item.as_ulid(), ulid3);

        assert!(tenant.to_string().starts_with("tenant-"));
        assert!(box_id.to_string().starts_with("box-"));
        assert!(item.to_string().starts_with("item-"));

        // let _: BoxId = tenant; // <- does not compile
    }

    #[test]
    fn ulid_ids_are_sortable() {
        let id1 = ItemId::from_ulid(Ulid::from_parts(1_000, 7));
        let id2 = ItemId::from_ulid(Ulid::from_parts(1_001, 3));
        let id3 = ItemId::from_ulid(Ulid::from_parts(1_002, 0));

        assert!(id1 < id2);
        assert!(id2 < id3);
    }

    #[test]
    fn parse_accepts_prefixed_and_bare_forms() {
        let id = BoxId::generate();

        let prefixed: BoxId = id.to_string().parse().unwrap();
        let bare: BoxId = id.as_ulid().to_string().parse().unwrap();

        assert_eq!(prefixed, id);
        assert_eq!(bare, id);
        assert!("box-not-a-ulid".parse::<BoxId>().is_err());
    }

    #[test]
    fn ids_can_be_serialized() {
        let tenant = TenantId::generate();

        let serialized = serde_json::to_string(&tenant).unwrap();
        let deserialized: TenantId = serde_json::from_str(&serialized).unwrap();

        assert_eq!(tenant, deserialized);
    }

    #[test]
    fn phantom_data_does_not_consume_memory() {
        use std::mem::size_of;

        assert_eq!(size_of::<TenantId>(), size_of::<Ulid>());
        assert_eq!(size_of::<ItemId>(), 16);
    }
}
