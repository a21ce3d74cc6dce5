//! Replay command: drives the engine from a timed script.
//!
//! Each script line is one step, either a signal for the engine or a call
//! record the platform "persists" at that moment:
//!
//! ```text
//! {"at_ms": 0, "signal": {"kind": "placement_intercepted", "number": "+15551234567"}}
//! {"at_ms": 40, "signal": {"kind": "line_state", "state": "offhook"}}
//! {"at_ms": 900, "call_log": {"number": "+15551234567", "type": "outgoing", "duration_seconds": 42}}
//! {"at_ms": 950, "signal": {"kind": "line_state", "state": "idle"}}
//! ```
//!
//! Steps run in real time against the configured database. Once the last
//! step has run the command waits out every pending reconciliation and
//! prints the emitted events as JSON lines.

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use ct_core::{CallEvent, CallLogRow, CallType, CorrelationConfig};
use ct_db::{Database, SharedDatabase};
use ct_engine::{CorrelationEngine, Signal, TokioClock};
use serde::Deserialize;

/// Slack on top of the longest reconciliation before collecting events.
const DRAIN_MARGIN: Duration = Duration::from_millis(200);

/// One timed script line.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Step {
    /// Milliseconds since the replay started.
    pub at_ms: u64,
    #[serde(flatten)]
    pub action: StepAction,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepAction {
    Signal(Signal),
    CallLog(ScriptedCall),
}

/// A call record with its start time relative to the replay.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ScriptedCall {
    #[serde(default)]
    pub number: Option<String>,
    #[serde(rename = "type")]
    pub call_type: CallType,
    #[serde(default)]
    pub duration_seconds: i64,
    /// When the call started. Defaults to the step's own time.
    #[serde(default)]
    pub started_at_ms: Option<u64>,
}

impl ScriptedCall {
    fn to_row(&self, origin: DateTime<Utc>, at_ms: u64) -> CallLogRow {
        let offset = self.started_at_ms.unwrap_or(at_ms);
        let offset = chrono::Duration::milliseconds(i64::try_from(offset).unwrap_or(i64::MAX));
        CallLogRow {
            number: self.number.clone(),
            call_type: self.call_type,
            timestamp: origin + offset,
            duration_seconds: self.duration_seconds,
        }
    }
}

/// Parses a script. Blank lines and `#` comments are skipped.
pub fn parse_script(text: &str) -> Result<Vec<Step>> {
    let mut steps: Vec<Step> = Vec::new();
    for (index, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let line_no = index + 1;
        let step: Step = serde_json::from_str(line)
            .with_context(|| format!("invalid replay step on line {line_no}"))?;
        if let Some(previous) = steps.last() {
            if step.at_ms < previous.at_ms {
                bail!(
                    "line {line_no}: at_ms {} is earlier than the previous step ({})",
                    step.at_ms,
                    previous.at_ms
                );
            }
        }
        steps.push(step);
    }
    Ok(steps)
}

pub fn run<W: Write>(
    writer: &mut W,
    db: Database,
    config: &CorrelationConfig,
    steps: &[Step],
) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .context("failed to start runtime")?;
    let events = runtime.block_on(replay(db, config, steps))?;

    for event in events {
        writeln!(writer, "{}", serde_json::to_string(&event)?)?;
    }
    Ok(())
}

async fn replay(
    db: Database,
    config: &CorrelationConfig,
    steps: &[Step],
) -> Result<Vec<CallEvent>> {
    let store = Arc::new(SharedDatabase::new(db));
    let origin = Utc::now();
    let engine = CorrelationEngine::builder(store.clone(), store.clone())
        .config(config.clone())
        .clock(TokioClock::new(origin))
        .build()
        .context("failed to build correlation engine")?;
    let mut receiver = engine.subscribe();

    let start = tokio::time::Instant::now();
    for step in steps {
        tokio::time::sleep_until(start + Duration::from_millis(step.at_ms)).await;
        match &step.action {
            StepAction::Signal(signal) => {
                tracing::debug!(at_ms = step.at_ms, ?signal, "replaying signal");
                engine.handle(signal.clone());
            }
            StepAction::CallLog(call) => {
                let row = call.to_row(origin, step.at_ms);
                tracing::debug!(at_ms = step.at_ms, ?row, "persisting call record");
                store
                    .lock()?
                    .insert_call_log(&row)
                    .context("failed to insert scripted call record")?;
            }
        }
    }

    tokio::time::sleep(config.max_reconcile_time() + DRAIN_MARGIN).await;
    // Dropping the consumer closes the channel so the drain below ends.
    engine.detach_sink();

    let mut events = Vec::new();
    while let Some(event) = receiver.recv().await {
        events.push(event);
    }
    Ok(events)
}

#[cfg(test)]
mod tests {
    use super::*;

    use ct_core::LineState;

    #[test]
    fn script_lines_parse_into_steps() {
        let script = r#"
# outbound call
{"at_ms": 0, "signal": {"kind": "outgoing_marker", "number": "+15551234567"}}
{"at_ms": 40, "signal": {"kind": "line_state", "state": "OFFHOOK"}}

{"at_ms": 900, "call_log": {"number": "+15551234567", "type": "outgoing", "duration_seconds": 42, "started_at_ms": 40}}
"#;
        let steps = parse_script(script).unwrap();
        assert_eq!(steps.len(), 3);
        assert_eq!(
            steps[1].action,
            StepAction::Signal(Signal::LineState {
                state: LineState::Offhook,
                number: None,
            })
        );

        let StepAction::CallLog(call) = &steps[2].action else {
            panic!("expected a call record step");
        };
        let origin = DateTime::from_timestamp_millis(1_700_000_000_000).unwrap();
        let row = call.to_row(origin, steps[2].at_ms);
        assert_eq!(row.timestamp, origin + chrono::Duration::milliseconds(40));
        assert_eq!(row.duration_seconds, 42);
    }

    #[test]
    fn out_of_order_steps_are_rejected() {
        let script = r#"
{"at_ms": 500, "signal": {"kind": "call_ended"}}
{"at_ms": 100, "signal": {"kind": "call_ended"}}
"#;
        let err = parse_script(script).unwrap_err();
        assert!(err.to_string().contains("line 3"), "{err}");
    }

    #[test]
    fn malformed_line_reports_its_number() {
        let err = parse_script("{\"at_ms\": 0, \"nonsense\": 1}").unwrap_err();
        assert_eq!(err.to_string(), "invalid replay step on line 1");
    }

    #[test]
    fn missed_call_replays_to_ringing_and_missed() {
        let config = CorrelationConfig {
            settle_delay_ms: 10,
            retry_delay_ms: 10,
            max_retries: 1,
            ..CorrelationConfig::default()
        };
        let steps = parse_script(
            r#"
{"at_ms": 0, "signal": {"kind": "incoming_ringing", "number": "+15559876543"}}
{"at_ms": 0, "signal": {"kind": "line_state", "state": "ringing", "number": "+15559876543"}}
{"at_ms": 30, "call_log": {"number": "+15559876543", "type": "missed", "started_at_ms": 0}}
{"at_ms": 40, "signal": {"kind": "line_state", "state": "idle"}}
"#,
        )
        .unwrap();

        let mut output = Vec::new();
        run(
            &mut output,
            Database::open_in_memory().unwrap(),
            &config,
            &steps,
        )
        .unwrap();

        let events: Vec<CallEvent> = String::from_utf8(output)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        let outcomes: Vec<_> = events
            .iter()
            .map(|e| (e.outcome.as_str(), e.direction.as_str()))
            .collect();
        assert_eq!(outcomes, [("ringing", "inbound"), ("missed", "inbound")]);
    }
}
