//! Telephony line state as reported by the OS observer.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Physical line status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum LineState {
    #[default]
    Idle,
    Ringing,
    Offhook,
}

impl fmt::Display for LineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Ringing => "ringing",
            Self::Offhook => "offhook",
        };
        write!(f, "{s}")
    }
}

impl FromStr for LineState {
    type Err = UnknownLineState;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "idle" => Ok(Self::Idle),
            "ringing" => Ok(Self::Ringing),
            "offhook" | "off_hook" => Ok(Self::Offhook),
            _ => Err(UnknownLineState(s.to_string())),
        }
    }
}

impl Serialize for LineState {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for LineState {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Error type for unknown line state strings.
#[derive(Debug, Clone, thiserror::Error)]
#[error("unknown line state: {0}")]
pub struct UnknownLineState(String);
