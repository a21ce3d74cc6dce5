//! Inbound signals from the platform's observers and interception points.

use ct_core::LineState;
use serde::{Deserialize, Serialize};

/// Any input the engine accepts, as a value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Signal {
    /// The telephony observer saw the line change state.
    LineState {
        state: LineState,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        number: Option<String>,
    },
    /// An outbound placement was intercepted (marker + context + `started`).
    PlacementIntercepted { number: String },
    /// A placement hook could only persist the marker.
    OutgoingMarker { number: String },
    /// An incoming call is ringing.
    IncomingRinging { number: String },
    /// An incoming call went off-hook without a ringing broadcast.
    IncomingAnswered { number: String },
    /// Some source saw the call end.
    CallEnded {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        number: Option<String>,
    },
}
