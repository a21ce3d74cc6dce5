//! The outgoing-call marker: a short-lived bridge between "a call was placed"
//! and the line-state change that follows it.
//!
//! The slot is durable (see [`MarkerPersistence`]) and never swept; expiry is
//! decided lazily on read. Persistence failures are logged and read as "no
//! marker" so correlation degrades instead of failing.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use ct_core::{MarkerPersistence, OutgoingMarker};

pub struct OutgoingMarkerStore {
    persistence: Arc<dyn MarkerPersistence>,
    window: Duration,
}

impl OutgoingMarkerStore {
    pub fn new(persistence: Arc<dyn MarkerPersistence>, window: Duration) -> Self {
        Self {
            persistence,
            window,
        }
    }

    /// Records a placement, overwriting any previous marker.
    pub fn place(&self, number: &str, now: DateTime<Utc>) {
        let marker = OutgoingMarker {
            number: number.to_string(),
            placed_at: now,
        };
        if let Err(err) = self.persistence.set(&marker) {
            tracing::warn!(number, error = %err, "failed to persist outgoing marker");
        }
    }

    /// The marker if it is still inside the validity window.
    pub fn peek(&self, now: DateTime<Utc>) -> Option<OutgoingMarker> {
        self.stored()
            .filter(|marker| now.signed_duration_since(marker.placed_at) <= self.window)
    }

    /// The marker regardless of age.
    pub fn stored(&self) -> Option<OutgoingMarker> {
        match self.persistence.get() {
            Ok(marker) => marker,
            Err(err) => {
                tracing::warn!(error = %err, "failed to read outgoing marker");
                None
            }
        }
    }

    /// Reads and clears the slot.
    ///
    /// Callers serialize access through the engine lock, which makes the
    /// read-then-clear atomic with respect to other engine operations.
    pub fn consume(&self) -> Option<OutgoingMarker> {
        let marker = self.stored();
        if let Err(err) = self.persistence.clear() {
            tracing::warn!(error = %err, "failed to clear outgoing marker");
        }
        marker
    }
}
