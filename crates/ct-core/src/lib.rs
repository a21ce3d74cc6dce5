//! Core domain types for call event correlation.
//!
//! This crate contains the fundamental types and logic for:
//! - Line states and call-record rows reported by the platform
//! - Call events emitted to the consumer
//! - Phone number normalization and fuzzy matching
//! - Correlation tolerances and the store traits the engine depends on

pub mod call_event;
pub mod call_log;
mod config;
pub mod line_state;
pub mod number;
mod store;

pub use call_event::{CallEvent, Direction, Outcome};
pub use call_log::{CallLogRow, CallType, UnknownCallType};
pub use config::CorrelationConfig;
pub use line_state::{LineState, UnknownLineState};
pub use number::{InvalidNumber, likely_match, likely_match_with, normalize};
pub use store::{CallLogStore, MarkerPersistence, OutgoingMarker, StoreError};
