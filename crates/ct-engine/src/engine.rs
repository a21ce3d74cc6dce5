//! The correlation state machine and the engine that owns all shared state.
//!
//! Every piece of mutable state (call context, marker store, finalization
//! gate) sits behind one mutex. Inbound signals lock it, mutate, and
//! return; reconciliation runs on spawned tasks that re-lock it for each
//! step. The lock is never held across an await.
//!
//! Events produced under the lock are queued in an outbox and handed to the
//! sink only after the lock is released, so consumers may call back in.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use ct_core::{
    CallEvent, CallLogRow, CallLogStore, CorrelationConfig, Direction, LineState,
    MarkerPersistence, OutgoingMarker, Outcome, likely_match_with, normalize,
};
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::mpsc;

use crate::clock::{Clock, SystemClock};
use crate::context::CallContext;
use crate::gate::{FinalCandidate, FinalizationGate, GateDecision};
use crate::marker::OutgoingMarkerStore;
use crate::reconcile::{self, ReconcileRequest, outcome_for, pick_best_row};
use crate::signal::Signal;
use crate::sink::{EventConsumer, EventSink};

/// Engine construction errors.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Reconciliation needs a tokio runtime to schedule on.
    #[error("no tokio runtime available; build inside a runtime or pass a handle")]
    NoRuntime,
}

pub(crate) struct EngineState {
    context: CallContext,
    markers: OutgoingMarkerStore,
    gate: FinalizationGate,
    outbox: Vec<CallEvent>,
}

impl EngineState {
    fn emit(&mut self, event: CallEvent) {
        tracing::info!(
            number = %event.phone_number,
            direction = %event.direction,
            outcome = %event.outcome,
            duration = ?event.duration_seconds,
            "call event"
        );
        self.outbox.push(event);
    }

    fn emit_progress(
        &mut self,
        number: &str,
        direction: Direction,
        outcome: Outcome,
        now: DateTime<Utc>,
    ) {
        self.emit(CallEvent {
            phone_number: number.to_string(),
            direction,
            outcome,
            timestamp: now,
            duration_seconds: None,
        });
    }

    fn finalize(&mut self, candidate: FinalCandidate, now: DateTime<Utc>) {
        let number = candidate.number.clone();
        match self.gate.try_finalize(candidate, now) {
            GateDecision::Emit(event) => self.emit(event),
            GateDecision::InvalidNumber => {
                tracing::warn!(number = %number, "final event dropped: number has no digits");
            }
            GateDecision::Locked { until } => {
                tracing::debug!(number = %number, %until, "final event dropped: already finalized");
            }
            GateDecision::Duplicate => {
                tracing::debug!(number = %number, "final event dropped: duplicate of last final");
            }
        }
    }
}

pub(crate) struct Shared {
    pub(crate) config: CorrelationConfig,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) call_log: Arc<dyn CallLogStore>,
    state: Mutex<EngineState>,
    sink: EventSink,
    runtime: Handle,
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, EngineState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Runs `f` under the state lock, then delivers whatever it emitted.
    fn with_state<R>(&self, f: impl FnOnce(&mut EngineState) -> R) -> R {
        let (result, events) = {
            let mut state = self.state();
            let result = f(&mut state);
            (result, std::mem::take(&mut state.outbox))
        };
        for event in events {
            self.sink.emit(event);
        }
        result
    }

    fn matches(&self, a: &str, b: &str) -> bool {
        likely_match_with(a, b, self.config.match_suffix_len)
    }

    /// Applies one line-state transition.
    ///
    /// Returns a reconciliation to schedule once the state lock is released.
    fn apply_line_state(
        &self,
        state: &mut EngineState,
        new: LineState,
        hint: Option<String>,
        now: DateTime<Utc>,
    ) -> Option<ReconcileRequest> {
        let previous = state.context.previous_state;
        if new == LineState::Idle && state.context.in_cooldown(now, self.config.cooldown()) {
            tracing::debug!(%previous, "idle transition ignored during cooldown");
            return None;
        }
        tracing::debug!(%previous, %new, hint = ?hint, "line state transition");

        let request = match (previous, new) {
            (LineState::Idle, LineState::Offhook) => self.offhook_from_idle(state, hint, now),
            (LineState::Ringing, LineState::Offhook) => {
                let direction = state.context.direction.unwrap_or(Direction::Inbound);
                if state.context.number.is_none() {
                    state.context.number = hint;
                }
                match state.context.number.clone() {
                    Some(number) => {
                        state.emit_progress(&number, direction, Outcome::Answered, now);
                    }
                    None => tracing::warn!("answered call has no number; not reported"),
                }
                None
            }
            (LineState::Offhook | LineState::Ringing, LineState::Idle) => {
                let direction_override = if previous == LineState::Ringing {
                    Some(Direction::Inbound)
                } else {
                    state.context.direction
                };
                let number_override = state.context.number.clone().or(hint);
                Some(ReconcileRequest::after_call(number_override, direction_override))
            }
            (_, LineState::Ringing) => {
                if state.context.direction.is_none() {
                    state.context.direction = Some(Direction::Inbound);
                }
                if state.context.number.is_none() {
                    state.context.number = hint;
                }
                None
            }
            _ => None,
        };

        if new == LineState::Idle {
            state.context.end_call(now);
        }
        state.context.previous_state = new;
        request
    }

    fn offhook_from_idle(
        &self,
        state: &mut EngineState,
        hint: Option<String>,
        now: DateTime<Utc>,
    ) -> Option<ReconcileRequest> {
        if state.context.number.is_none() {
            if let Some(marker) = state.markers.peek(now) {
                let correlated = hint
                    .as_deref()
                    .is_none_or(|observed| self.matches(&marker.number, observed));
                if correlated {
                    state.markers.consume();
                    tracing::debug!(number = %marker.number, "off-hook matched outgoing marker");
                    state.context.number = Some(marker.number.clone());
                    state.context.direction = Some(Direction::Outbound);
                    state.emit_progress(&marker.number, Direction::Outbound, Outcome::Answered, now);
                    return None;
                }
            }
        }

        let Some(number) = state.context.number.clone().or(hint) else {
            tracing::debug!("unannounced off-hook; consulting call log");
            return Some(ReconcileRequest::unannounced_offhook());
        };
        // No ringing first: an unannounced dial-out unless a hint said otherwise.
        let direction = *state.context.direction.get_or_insert(Direction::Outbound);
        state.context.number = Some(number.clone());
        state.emit_progress(&number, direction, Outcome::Answered, now);
        None
    }

    /// Finalizes from a non-empty query result.
    ///
    /// While the call is still up only non-terminal outcomes get through;
    /// a terminal row there describes an earlier call, and the end-of-call
    /// reconciliation owns this call's final event.
    pub(crate) fn finalize_from_rows(&self, rows: &[CallLogRow], request: &ReconcileRequest) {
        let now = self.clock.now();
        self.with_state(|state| {
            let marker = state.markers.stored();
            let candidate = match pick_best_row(rows, marker.as_ref(), &self.config) {
                Some(best) => self.row_candidate(best, marker.as_ref(), request),
                None => self.fallback_candidate(marker.as_ref(), request, now),
            };
            let Some(candidate) = candidate else {
                return;
            };
            if !request.call_ended && candidate.outcome.is_final() {
                tracing::debug!(
                    number = %candidate.number,
                    outcome = %candidate.outcome,
                    "terminal row ignored while the call is up"
                );
                return;
            }
            state.finalize(candidate, now);
        });
    }

    /// Finalizes from whatever is known without the call log.
    ///
    /// Only for ended calls: a call that is still up has nothing to report.
    pub(crate) fn finalize_fallback(&self, request: &ReconcileRequest) {
        if !request.call_ended {
            tracing::debug!("no call log rows for a live call; waiting for it to end");
            return;
        }
        let now = self.clock.now();
        self.with_state(|state| {
            let marker = state.markers.stored();
            if let Some(candidate) = self.fallback_candidate(marker.as_ref(), request, now) {
                state.finalize(candidate, now);
            }
        });
    }

    fn row_candidate(
        &self,
        row: &CallLogRow,
        marker: Option<&OutgoingMarker>,
        request: &ReconcileRequest,
    ) -> Option<FinalCandidate> {
        let Some(number) = request
            .number_override
            .clone()
            .or_else(|| row.number.clone())
            .or_else(|| marker.map(|m| m.number.clone()))
        else {
            tracing::warn!("chosen call log row has no number and none is known");
            return None;
        };

        let (outcome, mut direction) =
            outcome_for(row.call_type, request.direction_override, request.call_ended);
        if let Some(marker) = marker {
            let fresh = (marker.placed_at - row.timestamp).abs() <= self.config.marker_window();
            if fresh && self.matches(&marker.number, &number) {
                direction = Direction::Outbound;
            }
        }

        Some(FinalCandidate {
            number,
            outcome,
            timestamp: row.timestamp,
            duration_seconds: (row.duration_seconds >= 0).then_some(row.duration_seconds),
            direction,
        })
    }

    fn fallback_candidate(
        &self,
        marker: Option<&OutgoingMarker>,
        request: &ReconcileRequest,
        now: DateTime<Utc>,
    ) -> Option<FinalCandidate> {
        let Some(number) = request
            .number_override
            .clone()
            .or_else(|| marker.map(|m| m.number.clone()))
        else {
            tracing::warn!("no number known for ended call; skipping final event");
            return None;
        };

        let marker = marker.filter(|m| self.matches(&m.number, &number));
        let direction = request.direction_override.unwrap_or(if marker.is_some() {
            Direction::Outbound
        } else {
            Direction::Inbound
        });
        Some(FinalCandidate {
            number,
            outcome: Outcome::Ended,
            timestamp: marker.map_or(now, |m| m.placed_at),
            duration_seconds: None,
            direction,
        })
    }
}

/// Turns line-state transitions and hints into call events.
///
/// Cheap to clone; clones share state. All signal methods return
/// immediately and never fail.
#[derive(Clone)]
pub struct CorrelationEngine {
    shared: Arc<Shared>,
}

impl CorrelationEngine {
    pub fn builder(
        markers: Arc<dyn MarkerPersistence>,
        call_log: Arc<dyn CallLogStore>,
    ) -> EngineBuilder {
        EngineBuilder {
            config: CorrelationConfig::default(),
            clock: Arc::new(SystemClock),
            markers,
            call_log,
            runtime: None,
        }
    }

    pub fn config(&self) -> &CorrelationConfig {
        &self.shared.config
    }

    /// Dispatches a signal value to the matching entry point.
    pub fn handle(&self, signal: Signal) {
        match signal {
            Signal::LineState { state, number } => {
                self.on_line_state_changed(state, number.as_deref());
            }
            Signal::PlacementIntercepted { number } => self.on_placement_intercepted(&number),
            Signal::OutgoingMarker { number } => self.record_outgoing_marker(&number),
            Signal::IncomingRinging { number } => self.on_incoming_ringing_detected(&number),
            Signal::IncomingAnswered { number } => self.on_incoming_answered_detected(&number),
            Signal::CallEnded { number } => self.on_call_ended_hint(number.as_deref()),
        }
    }

    /// The telephony observer saw the line change state.
    pub fn on_line_state_changed(&self, state: LineState, number_hint: Option<&str>) {
        let hint = number_hint
            .filter(|number| normalize(number).is_ok())
            .map(str::to_string);
        let now = self.shared.clock.now();
        let request = self
            .shared
            .with_state(|engine_state| self.shared.apply_line_state(engine_state, state, hint, now));
        if let Some(request) = request {
            self.schedule(request);
        }
    }

    /// An outbound placement was intercepted before the line changed state.
    pub fn on_placement_intercepted(&self, number: &str) {
        if !usable(number) {
            return;
        }
        let now = self.shared.clock.now();
        self.shared.with_state(|state| {
            state.markers.place(number, now);
            state.context.apply_hint(number, Direction::Outbound);
            state.emit_progress(number, Direction::Outbound, Outcome::Started, now);
        });
    }

    /// Persists an outgoing marker without touching the call context.
    ///
    /// For placement hooks that can record the number but know nothing
    /// else about the call.
    pub fn record_outgoing_marker(&self, number: &str) {
        if !usable(number) {
            return;
        }
        let now = self.shared.clock.now();
        self.shared.state().markers.place(number, now);
    }

    pub fn on_incoming_ringing_detected(&self, number: &str) {
        self.incoming_hint(number, Outcome::Ringing);
    }

    /// Some devices go straight to off-hook without a ringing broadcast.
    pub fn on_incoming_answered_detected(&self, number: &str) {
        self.incoming_hint(number, Outcome::Answered);
    }

    fn incoming_hint(&self, number: &str, outcome: Outcome) {
        if !usable(number) {
            return;
        }
        let now = self.shared.clock.now();
        self.shared.with_state(|state| {
            state.context.apply_hint(number, Direction::Inbound);
            let direction = state.context.direction.unwrap_or(Direction::Inbound);
            state.emit_progress(number, direction, outcome, now);
        });
    }

    /// Some source saw the call end; reconcile against the call log.
    pub fn on_call_ended_hint(&self, number_override: Option<&str>) {
        let number_override = number_override
            .filter(|number| normalize(number).is_ok())
            .map(str::to_string);
        self.schedule(ReconcileRequest::after_call(number_override, None));
    }

    /// Attaches the consumer, flushing any pending event to it.
    ///
    /// The consumer is called without any engine lock held and may call
    /// back into the engine.
    pub fn attach_sink(&self, consumer: impl EventConsumer + 'static) {
        self.shared.sink.attach(Arc::new(consumer));
    }

    pub fn detach_sink(&self) {
        self.shared.sink.detach();
    }

    /// Attaches a fresh channel as the consumer and returns its receiver.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<CallEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.attach_sink(tx);
        rx
    }

    /// A snapshot of the tracked call context.
    pub fn context(&self) -> CallContext {
        self.shared.state().context.clone()
    }

    fn schedule(&self, request: ReconcileRequest) {
        let shared = Arc::clone(&self.shared);
        self.shared.runtime.spawn(async move {
            if let Err(err) = reconcile::reconcile(shared, request).await {
                tracing::warn!(error = %err, "reconciliation fell back");
            }
        });
    }
}

fn usable(number: &str) -> bool {
    match normalize(number) {
        Ok(_) => true,
        Err(err) => {
            tracing::warn!(error = %err, "ignoring hint");
            false
        }
    }
}

/// Builder for [`CorrelationEngine`].
pub struct EngineBuilder {
    config: CorrelationConfig,
    clock: Arc<dyn Clock>,
    markers: Arc<dyn MarkerPersistence>,
    call_log: Arc<dyn CallLogStore>,
    runtime: Option<Handle>,
}

impl EngineBuilder {
    #[must_use]
    pub fn config(mut self, config: CorrelationConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Runtime for reconciliation tasks. Defaults to the current one.
    #[must_use]
    pub fn runtime(mut self, handle: Handle) -> Self {
        self.runtime = Some(handle);
        self
    }

    pub fn build(self) -> Result<CorrelationEngine, EngineError> {
        let runtime = match self.runtime {
            Some(handle) => handle,
            None => Handle::try_current().map_err(|_| EngineError::NoRuntime)?,
        };
        let state = EngineState {
            context: CallContext::default(),
            markers: OutgoingMarkerStore::new(self.markers, self.config.marker_window()),
            gate: FinalizationGate::new(&self.config),
            outbox: Vec::new(),
        };
        Ok(CorrelationEngine {
            shared: Arc::new(Shared {
                config: self.config,
                clock: self.clock,
                call_log: self.call_log,
                state: Mutex::new(state),
                sink: EventSink::new(),
                runtime,
            }),
        })
    }
}
