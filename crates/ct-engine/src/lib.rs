//! Call event correlation.
//!
//! The platform reports a call through several unreliable channels: a coarse
//! line-state observer, optional number hints from placement and ringing
//! hooks, and a call-record store that persists the authoritative record
//! some time after the call ends. [`CorrelationEngine`] fuses them into a
//! stream of [`CallEvent`](ct_core::CallEvent)s with at most one terminal
//! event per call.
//!
//! ```no_run
//! # async fn demo(
//! #     markers: std::sync::Arc<dyn ct_core::MarkerPersistence>,
//! #     call_log: std::sync::Arc<dyn ct_core::CallLogStore>,
//! # ) -> Result<(), ct_engine::EngineError> {
//! use ct_core::LineState;
//! use ct_engine::CorrelationEngine;
//!
//! let engine = CorrelationEngine::builder(markers, call_log).build()?;
//! let mut events = engine.subscribe();
//!
//! engine.on_placement_intercepted("+15551234567");
//! engine.on_line_state_changed(LineState::Offhook, None);
//! engine.on_line_state_changed(LineState::Idle, None);
//!
//! while let Some(event) = events.recv().await {
//!     println!("{} {}", event.outcome, event.phone_number);
//! }
//! # Ok(())
//! # }
//! ```

mod clock;
mod context;
mod engine;
mod gate;
mod marker;
mod reconcile;
mod signal;
mod sink;

pub use clock::{Clock, SystemClock, TokioClock};
pub use context::CallContext;
pub use engine::{CorrelationEngine, EngineBuilder, EngineError};
pub use gate::{FinalCandidate, FinalizationGate, GateDecision};
pub use marker::OutgoingMarkerStore;
pub use reconcile::{ReconcileError, ReconcileRequest, outcome_for, pick_best_row};
pub use signal::Signal;
pub use sink::{EventConsumer, EventSink};
