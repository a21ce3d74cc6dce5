//! Single-consumer delivery of emitted events.
//!
//! The slot (consumer plus one pending event) has its own small lock, and
//! [`EventConsumer::deliver`] is always called with no lock held, so a
//! consumer may call back into the engine or the sink.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use ct_core::CallEvent;
use tokio::sync::mpsc;

/// Receives emitted events.
///
/// Returning the event back signals that the consumer is gone; the sink then
/// detaches it and buffers the event instead.
pub trait EventConsumer: Send + Sync {
    fn deliver(&self, event: CallEvent) -> Result<(), CallEvent>;
}

impl EventConsumer for mpsc::UnboundedSender<CallEvent> {
    fn deliver(&self, event: CallEvent) -> Result<(), CallEvent> {
        self.send(event).map_err(|err| err.0)
    }
}

#[derive(Default)]
struct Slot {
    consumer: Option<Arc<dyn EventConsumer>>,
    pending: Option<CallEvent>,
}

impl Slot {
    fn buffer(&mut self, event: CallEvent) {
        if let Some(dropped) = self.pending.replace(event) {
            tracing::debug!(outcome = %dropped.outcome, "pending event overwritten");
        }
    }
}

/// Holds at most one consumer and at most one undelivered event.
#[derive(Default)]
pub struct EventSink {
    slot: Mutex<Slot>,
}

impl EventSink {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Attaches a consumer, replacing any previous one, and flushes the
    /// pending event to it.
    pub fn attach(&self, consumer: Arc<dyn EventConsumer>) {
        let pending = {
            let mut slot = self.slot();
            slot.consumer = Some(Arc::clone(&consumer));
            slot.pending.take()
        };
        if let Some(event) = pending {
            tracing::debug!(outcome = %event.outcome, "flushing pending event");
            self.deliver(&consumer, event);
        }
    }

    /// Drops the consumer. Later events are buffered.
    pub fn detach(&self) {
        self.slot().consumer = None;
    }

    pub fn is_attached(&self) -> bool {
        self.slot().consumer.is_some()
    }

    /// The event waiting for a consumer, if any.
    pub fn pending(&self) -> Option<CallEvent> {
        self.slot().pending.clone()
    }

    /// Delivers to the consumer, or buffers when none is attached.
    ///
    /// Buffering overwrites: only the most recent undelivered event survives.
    pub fn emit(&self, event: CallEvent) {
        let consumer = {
            let mut slot = self.slot();
            match &slot.consumer {
                Some(consumer) => Arc::clone(consumer),
                None => {
                    slot.buffer(event);
                    return;
                }
            }
        };
        self.deliver(&consumer, event);
    }

    fn deliver(&self, consumer: &Arc<dyn EventConsumer>, event: CallEvent) {
        let Err(event) = consumer.deliver(event) else {
            return;
        };
        tracing::warn!("consumer closed; detaching and buffering event");
        let mut slot = self.slot();
        // A consumer attached meanwhile is left alone.
        if slot
            .consumer
            .as_ref()
            .is_some_and(|current| Arc::ptr_eq(current, consumer))
        {
            slot.consumer = None;
        }
        slot.buffer(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Weak;

    use chrono::DateTime;
    use ct_core::{Direction, Outcome};

    fn event(outcome: Outcome) -> CallEvent {
        CallEvent {
            phone_number: "+15551234567".to_string(),
            direction: Direction::Inbound,
            outcome,
            timestamp: DateTime::from_timestamp_millis(1_700_000_000_000).unwrap(),
            duration_seconds: None,
        }
    }

    fn channel() -> (Arc<dyn EventConsumer>, mpsc::UnboundedReceiver<CallEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(tx), rx)
    }

    #[test]
    fn emits_directly_to_attached_consumer() {
        let (tx, mut rx) = channel();
        let sink = EventSink::new();
        sink.attach(tx);

        sink.emit(event(Outcome::Ringing));
        assert_eq!(rx.try_recv().unwrap().outcome, Outcome::Ringing);
        assert!(sink.pending().is_none());
    }

    #[test]
    fn buffers_only_latest_event_while_detached() {
        let sink = EventSink::new();
        sink.emit(event(Outcome::Ringing));
        sink.emit(event(Outcome::Missed));
        assert_eq!(sink.pending().map(|e| e.outcome), Some(Outcome::Missed));

        let (tx, mut rx) = channel();
        sink.attach(tx);
        assert_eq!(rx.try_recv().unwrap().outcome, Outcome::Missed);
        assert!(rx.try_recv().is_err());
        assert!(sink.pending().is_none());
    }

    #[test]
    fn detach_resumes_buffering() {
        let (tx, mut rx) = channel();
        let sink = EventSink::new();
        sink.attach(tx);
        sink.detach();

        sink.emit(event(Outcome::Ended));
        assert!(rx.try_recv().is_err());
        assert_eq!(sink.pending().map(|e| e.outcome), Some(Outcome::Ended));
    }

    #[test]
    fn closed_consumer_is_detached_and_event_kept() {
        let (tx, rx) = channel();
        let sink = EventSink::new();
        sink.attach(tx);
        drop(rx);

        sink.emit(event(Outcome::Answered));
        assert!(!sink.is_attached());
        assert_eq!(sink.pending().map(|e| e.outcome), Some(Outcome::Answered));
    }

    #[test]
    fn closed_consumer_on_attach_stays_detached() {
        let sink = EventSink::new();
        sink.emit(event(Outcome::Missed));

        let (tx, rx) = channel();
        drop(rx);
        sink.attach(tx);
        assert!(!sink.is_attached());
        assert_eq!(sink.pending().map(|e| e.outcome), Some(Outcome::Missed));
    }

    /// Detaches itself from inside `deliver`.
    struct DetachOnDeliver {
        sink: Weak<EventSink>,
        seen: Mutex<Vec<Outcome>>,
    }

    impl EventConsumer for DetachOnDeliver {
        fn deliver(&self, event: CallEvent) -> Result<(), CallEvent> {
            if let Some(sink) = self.sink.upgrade() {
                sink.detach();
                assert!(!sink.is_attached());
            }
            self.seen.lock().unwrap().push(event.outcome);
            Ok(())
        }
    }

    #[test]
    fn consumer_may_call_back_into_sink() {
        let sink = Arc::new(EventSink::new());
        let consumer = Arc::new(DetachOnDeliver {
            sink: Arc::downgrade(&sink),
            seen: Mutex::new(Vec::new()),
        });
        sink.attach(consumer.clone());

        sink.emit(event(Outcome::Ringing));
        sink.emit(event(Outcome::Ended));

        assert_eq!(*consumer.seen.lock().unwrap(), [Outcome::Ringing]);
        assert_eq!(sink.pending().map(|e| e.outcome), Some(Outcome::Ended));
    }
}
