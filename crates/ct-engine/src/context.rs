//! What the engine currently believes about the call in progress.

use chrono::{DateTime, Duration, Utc};
use ct_core::{Direction, LineState};

/// In-memory call context. Lost on restart.
///
/// `direction == None` means the direction is not known yet.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallContext {
    pub number: Option<String>,
    pub direction: Option<Direction>,
    pub previous_state: LineState,
    pub last_ended_at: Option<DateTime<Utc>>,
}

impl CallContext {
    /// True while an idle transition at `now` would be an OS duplicate.
    pub fn in_cooldown(&self, now: DateTime<Utc>, cooldown: Duration) -> bool {
        self.last_ended_at
            .is_some_and(|ended| now < ended + cooldown)
    }

    /// Applies a direct hint. A tracked outbound call is never downgraded.
    pub fn apply_hint(&mut self, number: &str, direction: Direction) {
        if self.direction != Some(Direction::Outbound) {
            self.direction = Some(direction);
        }
        self.number = Some(number.to_string());
    }

    /// Forgets the call; keeps the line history.
    pub fn end_call(&mut self, now: DateTime<Utc>) {
        self.number = None;
        self.direction = None;
        self.last_ended_at = Some(now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(ms: i64) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(1_700_000_000_000 + ms).unwrap()
    }

    #[test]
    fn cooldown_window_is_half_open() {
        let context = CallContext {
            last_ended_at: Some(t(0)),
            ..CallContext::default()
        };
        let cooldown = Duration::milliseconds(2_000);
        assert!(context.in_cooldown(t(500), cooldown));
        assert!(context.in_cooldown(t(1_999), cooldown));
        assert!(!context.in_cooldown(t(2_000), cooldown));
        assert!(!CallContext::default().in_cooldown(t(0), cooldown));
    }

    #[test]
    fn inbound_hint_does_not_downgrade_outbound() {
        let mut context = CallContext::default();
        context.apply_hint("+15551234567", Direction::Outbound);
        context.apply_hint("+15551234567", Direction::Inbound);
        assert_eq!(context.direction, Some(Direction::Outbound));

        let mut context = CallContext::default();
        context.apply_hint("+15559876543", Direction::Inbound);
        assert_eq!(context.direction, Some(Direction::Inbound));
        assert_eq!(context.number.as_deref(), Some("+15559876543"));
    }

    #[test]
    fn end_call_keeps_line_history() {
        let mut context = CallContext {
            number: Some("+15551234567".to_string()),
            direction: Some(Direction::Inbound),
            previous_state: LineState::Offhook,
            last_ended_at: None,
        };
        context.end_call(t(42));
        assert_eq!(context.number, None);
        assert_eq!(context.direction, None);
        assert_eq!(context.previous_state, LineState::Offhook);
        assert_eq!(context.last_ended_at, Some(t(42)));
    }
}
