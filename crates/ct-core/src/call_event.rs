//! Semantic call-lifecycle events delivered to the consumer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which side placed the call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Inbound,
    Outbound,
}

impl Direction {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Inbound => "inbound",
            Self::Outbound => "outbound",
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle stage reported by a [`CallEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Started,
    Ringing,
    Answered,
    Ended,
    Missed,
    Rejected,
    Voicemail,
    #[serde(alias = "answered_external")]
    AnsweredExternally,
}

impl Outcome {
    /// Terminal outcomes; at most one of these is emitted per call.
    pub const fn is_final(self) -> bool {
        !matches!(self, Self::Started | Self::Ringing | Self::Answered)
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Started => "started",
            Self::Ringing => "ringing",
            Self::Answered => "answered",
            Self::Ended => "ended",
            Self::Missed => "missed",
            Self::Rejected => "rejected",
            Self::Voicemail => "voicemail",
            Self::AnsweredExternally => "answered_externally",
        }
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One emitted call event.
///
/// Serialized with camelCase keys; `durationSeconds` is always present and
/// `null` when unknown. `timestamp` is epoch milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallEvent {
    pub phone_number: String,
    pub direction: Direction,
    pub outcome: Outcome,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
    pub duration_seconds: Option<i64>,
}
