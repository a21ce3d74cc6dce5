//! Seams to the external stores the engine depends on.
//!
//! Both traits are synchronous and must be safe to call from any thread.
//! [`MarkerPersistence`] is called while the engine holds its state lock, so
//! it should not block for long. [`CallLogStore::query_recent`] is called
//! from reconciliation tasks with no engine lock held.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::call_log::CallLogRow;

/// Failure reaching an external store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// The process lacks permission to read the store.
    #[error("permission denied")]
    PermissionDenied,
    /// The store could not be reached or returned garbage.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// "A call to `number` was just placed at `placed_at`."
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMarker {
    pub number: String,
    pub placed_at: DateTime<Utc>,
}

/// Durable single-slot storage for the outgoing marker.
///
/// Implementations must survive process restarts.
pub trait MarkerPersistence: Send + Sync {
    /// Returns the stored marker, regardless of its age.
    fn get(&self) -> Result<Option<OutgoingMarker>, StoreError>;

    /// Overwrites the slot.
    fn set(&self, marker: &OutgoingMarker) -> Result<(), StoreError>;

    /// Empties the slot.
    fn clear(&self) -> Result<(), StoreError>;
}

/// The authoritative historical call-record store.
pub trait CallLogStore: Send + Sync {
    /// Returns at most `limit` rows with `timestamp >= since`, newest first.
    fn query_recent(
        &self,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<CallLogRow>, StoreError>;
}
