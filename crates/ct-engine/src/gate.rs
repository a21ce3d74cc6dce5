//! The finalization gate: the only path by which a terminal event leaves
//! the engine.
//!
//! Two guards stack up:
//! 1. A per-number TTL lock. The first finalization for a number wins; every
//!    other attempt inside the TTL is dropped. Expired entries are ignored,
//!    not swept.
//! 2. A close-duplicate check against the last final emitted for the number:
//!    timestamps closer than the duplicate window with an unknown or equal
//!    duration are the same call.
//!
//! The duplicate check is a known approximation: a genuine second call to the
//! same number inside the window with the same reported duration is also
//! suppressed.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use ct_core::{CallEvent, CorrelationConfig, Direction, Outcome, normalize};

/// A proposed event on its way to the consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalCandidate {
    pub number: String,
    pub outcome: Outcome,
    pub timestamp: DateTime<Utc>,
    pub duration_seconds: Option<i64>,
    pub direction: Direction,
}

/// What the gate decided about a candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    Emit(CallEvent),
    /// The number has no digits.
    InvalidNumber,
    /// Another finalization for this number already went through.
    Locked { until: DateTime<Utc> },
    /// Same call as the last final for this number.
    Duplicate,
}

#[derive(Debug, Clone, Copy)]
struct LastFinal {
    timestamp: DateTime<Utc>,
    duration_seconds: Option<i64>,
}

#[derive(Debug)]
pub struct FinalizationGate {
    lock_ttl: Duration,
    duplicate_window: Duration,
    locks: HashMap<String, DateTime<Utc>>,
    last_finals: HashMap<String, LastFinal>,
}

impl FinalizationGate {
    pub fn new(config: &CorrelationConfig) -> Self {
        Self {
            lock_ttl: config.final_lock_ttl(),
            duplicate_window: config.duplicate_window(),
            locks: HashMap::new(),
            last_finals: HashMap::new(),
        }
    }

    /// Runs a candidate through the gate.
    ///
    /// Check and set of the lock happen in one `&mut self` call; the engine
    /// holds its state lock around it. Non-terminal outcomes are held back by
    /// an active lock but neither take the lock nor count for duplicates.
    pub fn try_finalize(&mut self, candidate: FinalCandidate, now: DateTime<Utc>) -> GateDecision {
        let Ok(key) = normalize(&candidate.number) else {
            return GateDecision::InvalidNumber;
        };

        if let Some(&until) = self.locks.get(&key) {
            if now < until {
                return GateDecision::Locked { until };
            }
        }

        if candidate.outcome.is_final() {
            self.locks.insert(key.clone(), now + self.lock_ttl);

            if let Some(last) = self.last_finals.get(&key) {
                let gap = (candidate.timestamp - last.timestamp).abs();
                let same_duration = candidate.duration_seconds.is_none()
                    || candidate.duration_seconds == last.duration_seconds;
                if gap < self.duplicate_window && same_duration {
                    return GateDecision::Duplicate;
                }
            }

            self.last_finals.insert(
                key,
                LastFinal {
                    timestamp: candidate.timestamp,
                    duration_seconds: candidate.duration_seconds,
                },
            );
        }

        GateDecision::Emit(CallEvent {
            phone_number: candidate.number,
            direction: candidate.direction,
            outcome: candidate.outcome,
            timestamp: candidate.timestamp,
            duration_seconds: candidate.duration_seconds,
        })
    }
}
