//! Read-only rows from the historical call-record store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Coarse call type recorded by the call-record store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallType {
    Incoming,
    Outgoing,
    Missed,
    Voicemail,
    Rejected,
    AnsweredExternally,
    /// Any type code the engine has no mapping for (blocked, vendor codes).
    Unknown,
}

impl CallType {
    /// Maps the platform's numeric type code.
    pub const fn from_code(code: i64) -> Self {
        match code {
            1 => Self::Incoming,
            2 => Self::Outgoing,
            3 => Self::Missed,
            4 => Self::Voicemail,
            5 => Self::Rejected,
            7 => Self::AnsweredExternally,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for CallType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Incoming => "incoming",
            Self::Outgoing => "outgoing",
            Self::Missed => "missed",
            Self::Voicemail => "voicemail",
            Self::Rejected => "rejected",
            Self::AnsweredExternally => "answered_externally",
            Self::Unknown => "unknown",
        };
        write!(f, "{s}")
    }
}

impl FromStr for CallType {
    type Err = UnknownCallType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "incoming" => Ok(Self::Incoming),
            "outgoing" => Ok(Self::Outgoing),
            "missed" => Ok(Self::Missed),
            "voicemail" => Ok(Self::Voicemail),
            "rejected" => Ok(Self::Rejected),
            "answered_externally" | "answered_external" => Ok(Self::AnsweredExternally),
            "unknown" => Ok(Self::Unknown),
            _ => Err(UnknownCallType(s.to_string())),
        }
    }
}

impl Serialize for CallType {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for CallType {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Error type for unknown call type strings.
#[derive(Debug, Clone, thiserror::Error)]
#[error("unknown call type: {0}")]
pub struct UnknownCallType(String);

/// One record of the call-record store. The engine never mutates these.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallLogRow {
    /// Remote number; the store may omit it for private callers.
    #[serde(default)]
    pub number: Option<String>,
    #[serde(rename = "type")]
    pub call_type: CallType,
    /// When the call started.
    pub timestamp: DateTime<Utc>,
    /// Talk time in seconds; zero for calls that never connected.
    #[serde(default)]
    pub duration_seconds: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn platform_codes_map_to_types() {
        assert_eq!(CallType::from_code(1), CallType::Incoming);
        assert_eq!(CallType::from_code(2), CallType::Outgoing);
        assert_eq!(CallType::from_code(3), CallType::Missed);
        assert_eq!(CallType::from_code(4), CallType::Voicemail);
        assert_eq!(CallType::from_code(5), CallType::Rejected);
        assert_eq!(CallType::from_code(6), CallType::Unknown);
        assert_eq!(CallType::from_code(7), CallType::AnsweredExternally);
    }

    #[test]
    fn legacy_answered_external_spelling_parses() {
        let parsed: CallType = "answered_external".parse().unwrap();
        assert_eq!(parsed, CallType::AnsweredExternally);
        assert_eq!(parsed.to_string(), "answered_externally");
    }

    #[test]
    fn row_deserializes_with_defaults() {
        let json = r#"{"type":"missed","timestamp":"2025-01-01T00:00:00Z"}"#;
        let row: CallLogRow = serde_json::from_str(json).unwrap();
        assert_eq!(row.number, None);
        assert_eq!(row.call_type, CallType::Missed);
        assert_eq!(row.duration_seconds, 0);
    }

    #[test]
    fn row_rejects_unknown_type_string() {
        let json = r#"{"type":"teleport","timestamp":"2025-01-01T00:00:00Z"}"#;
        assert!(serde_json::from_str::<CallLogRow>(json).is_err());
    }
}
