//! Reconciliation against the historical call-record store.
//!
//! The store is the only authoritative source for how a call ended, but it
//! persists the record some time after the line goes idle. Reconciliation
//! waits a settle delay, queries, retries a bounded number of times while the
//! store has nothing, then picks the row that best matches the call.

use std::sync::Arc;

use chrono::Duration;
use ct_core::{
    CallLogRow, CallType, CorrelationConfig, Direction, OutgoingMarker, Outcome, StoreError,
    likely_match_with,
};
use thiserror::Error;

use crate::engine::Shared;

/// Why reconciliation fell back to a marker-only final event.
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("call log permission denied")]
    PermissionDenied,
    #[error("no usable call log rows after {attempts} queries")]
    RetriesExhausted { attempts: u32 },
}

/// One scheduled reconciliation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileRequest {
    pub number_override: Option<String>,
    pub direction_override: Option<Direction>,
    /// Wait for the store to persist the call before the first query.
    pub settle: bool,
    /// The call is over (as opposed to just picked up).
    pub call_ended: bool,
}

impl ReconcileRequest {
    /// Reconciliation for a call that just ended.
    pub const fn after_call(
        number_override: Option<String>,
        direction_override: Option<Direction>,
    ) -> Self {
        Self {
            number_override,
            direction_override,
            settle: true,
            call_ended: true,
        }
    }

    /// Immediate lookup for an off-hook nobody announced.
    pub const fn unannounced_offhook() -> Self {
        Self {
            number_override: None,
            direction_override: None,
            settle: false,
            call_ended: false,
        }
    }
}

/// Chooses the row that most likely is the call being reconciled.
///
/// In order of preference:
/// 1. rows matching the outgoing marker's number within the marker window of
///    its placement, longest first
/// 2. the longest row with a positive duration
/// 3. the most recent row
pub fn pick_best_row<'a>(
    rows: &'a [CallLogRow],
    marker: Option<&OutgoingMarker>,
    config: &CorrelationConfig,
) -> Option<&'a CallLogRow> {
    if let Some(marker) = marker {
        let window = config.marker_window();
        let best = rows
            .iter()
            .filter(|row| {
                row.number.as_deref().is_some_and(|number| {
                    likely_match_with(number, &marker.number, config.match_suffix_len)
                }) && within(row, marker, window)
            })
            .max_by_key(|row| row.duration_seconds);
        if best.is_some() {
            return best;
        }
    }

    rows.iter()
        .filter(|row| row.duration_seconds > 0)
        .max_by_key(|row| row.duration_seconds)
        .or_else(|| rows.iter().max_by_key(|row| row.timestamp))
}

fn within(row: &CallLogRow, marker: &OutgoingMarker, window: Duration) -> bool {
    (row.timestamp - marker.placed_at).abs() <= window
}

/// Maps a call-record type to the event outcome and direction.
pub const fn outcome_for(
    call_type: CallType,
    direction_override: Option<Direction>,
    call_ended: bool,
) -> (Outcome, Direction) {
    let placed = if call_ended {
        Outcome::Ended
    } else {
        Outcome::Started
    };
    match call_type {
        CallType::Incoming => (Outcome::Ended, Direction::Inbound),
        CallType::Outgoing => (placed, Direction::Outbound),
        CallType::Missed => (Outcome::Missed, Direction::Inbound),
        CallType::Voicemail => (Outcome::Voicemail, Direction::Inbound),
        CallType::Rejected => (Outcome::Rejected, Direction::Inbound),
        CallType::AnsweredExternally => (Outcome::AnsweredExternally, Direction::Inbound),
        CallType::Unknown => match direction_override {
            Some(Direction::Outbound) => (placed, Direction::Outbound),
            Some(Direction::Inbound) | None => (Outcome::Ended, Direction::Inbound),
        },
    }
}

/// Runs one reconciliation to completion.
///
/// Every path ends in at most one candidate passed to the finalization gate.
/// An `Err` means the engine degraded to the marker-only fallback.
pub(crate) async fn reconcile(
    shared: Arc<Shared>,
    request: ReconcileRequest,
) -> Result<(), ReconcileError> {
    let config = &shared.config;
    if request.settle {
        tokio::time::sleep(config.settle_delay()).await;
    }

    let mut attempt: u32 = 0;
    loop {
        let since = shared.clock.now() - config.query_lookback();
        match shared.call_log.query_recent(since, config.query_limit) {
            Ok(rows) if !rows.is_empty() => {
                tracing::debug!(attempt, rows = rows.len(), "call log returned rows");
                shared.finalize_from_rows(&rows, &request);
                return Ok(());
            }
            Ok(_) => tracing::debug!(attempt, "call log empty"),
            Err(StoreError::PermissionDenied) => {
                tracing::warn!("call log permission denied; using marker fallback");
                shared.finalize_fallback(&request);
                return Err(ReconcileError::PermissionDenied);
            }
            Err(err) => tracing::warn!(attempt, error = %err, "call log query failed"),
        }

        if attempt >= config.max_retries {
            break;
        }
        attempt += 1;
        tokio::time::sleep(config.retry_delay()).await;
    }

    shared.finalize_fallback(&request);
    Err(ReconcileError::RetriesExhausted {
        attempts: attempt + 1,
    })
}
