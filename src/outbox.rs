//! Event outbox: domain events waiting for the caller.
//!
//! The poll thread pushes, callers pull. Unbounded; a slow consumer grows the
//! queue. Async consumers can await [`EventOutbox::recv`] instead of polling.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};
use tokio::sync::Notify;

use crate::device::codes::EventKind;
use crate::ledger::Denomination;

/// Something the device reported that the caller may act on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DomainEvent {
    /// Absent for events that carry no value.
    pub note: Option<Denomination>,
    pub kind: EventKind,
    pub received_at: DateTime<Utc>,
}

/// Thread-safe FIFO of domain events.
#[derive(Debug, Default)]
pub struct EventOutbox {
    queue: Mutex<VecDeque<DomainEvent>>,
    notify: Notify,
}

impl EventOutbox {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<DomainEvent>> {
        self.queue.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn push(&self, note: Option<Denomination>, kind: EventKind) {
        self.lock().push_back(DomainEvent {
            note,
            kind,
            received_at: Utc::now(),
        });
        self.notify.notify_one();
    }

    /// Remove and return the oldest event, or `None` when empty.
    pub fn pull(&self) -> Option<DomainEvent> {
        self.lock().pop_front()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Wait for the next event.
    pub async fn recv(&self) -> DomainEvent {
        loop {
            if let Some(event) = self.pull() {
                return event;
            }
            self.notify.notified().await;
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::Note;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_pull_empty_is_none_repeatedly() {
        let outbox = EventOutbox::new();
        assert!(outbox.pull().is_none());
        assert!(outbox.pull().is_none());
        assert!(outbox.is_empty());
    }

    #[test]
    fn test_pull_in_arrival_order() {
        let outbox = EventOutbox::new();
        let note = Denomination::Note(Note::new(500, "RUB"));
        outbox.push(Some(note.clone()), EventKind::Credit);
        outbox.push(None, EventKind::CashboxReplaced);
        outbox.push(None, EventKind::Unknown(0x42));
        assert_eq!(outbox.len(), 3);

        let first = outbox.pull().unwrap();
        assert_eq!(first.kind, EventKind::Credit);
        assert_eq!(first.note, Some(note));
        assert_eq!(outbox.pull().unwrap().kind, EventKind::CashboxReplaced);
        assert_eq!(outbox.pull().unwrap().kind, EventKind::Unknown(0x42));
        assert!(outbox.pull().is_none());
    }

    #[tokio::test]
    async fn test_recv_returns_queued_event() {
        let outbox = EventOutbox::new();
        outbox.push(None, EventKind::Disabled);
        let event = outbox.recv().await;
        assert_eq!(event.kind, EventKind::Disabled);
    }

    #[tokio::test]
    async fn test_recv_wakes_on_push_from_thread() {
        let outbox = Arc::new(EventOutbox::new());
        let producer = Arc::clone(&outbox);
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            producer.push(None, EventKind::StackerFull);
        });
        let event = tokio::time::timeout(Duration::from_secs(2), outbox.recv())
            .await
            .expect("event should arrive");
        assert_eq!(event.kind, EventKind::StackerFull);
    }
}
