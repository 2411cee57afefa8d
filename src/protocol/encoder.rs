//! Wire framing and state-event computation.
//!
//! [`EventEncoder`] stamps each event with the run's message id and the next
//! sequence number, and turns the result into a server-sent event frame.
//! [`StateTracker`] remembers the last document the client has seen so every
//! mutation is reported exactly once, as a snapshot or a minimal delta.

use axum::response::sse;
use serde_json::Value;

use super::events::{Envelope, Event};
use crate::state::{StateDocument, patch};

/// Per-run sequencer and SSE framer.
#[derive(Debug)]
pub struct EventEncoder {
    message_id: String,
    next_seq: u64,
}

impl EventEncoder {
    #[must_use]
    pub fn new(message_id: impl Into<String>) -> Self {
        Self {
            message_id: message_id.into(),
            next_seq: 0,
        }
    }

    /// Wrap `event` in the next envelope of this run.
    pub fn seal(&mut self, event: Event) -> Envelope {
        let seq = self.next_seq;
        self.next_seq += 1;
        Envelope {
            seq,
            message_id: self.message_id.clone(),
            event,
        }
    }

    /// Number of envelopes sealed so far.
    #[must_use]
    pub fn sealed(&self) -> u64 {
        self.next_seq
    }
}

/// Build the axum SSE event for an envelope.
pub fn sse_event(envelope: &Envelope) -> Result<sse::Event, serde_json::Error> {
    let json = serde_json::to_string(envelope)?;
    Ok(sse::Event::default()
        .id(envelope.seq.to_string())
        .event(envelope.event.name())
        .data(json))
}

/// Tracks the client's view of the state document.
#[derive(Debug, Default)]
pub struct StateTracker {
    last: Option<Value>,
}

impl StateTracker {
    /// Full snapshot of `doc`; the baseline for later deltas.
    pub fn snapshot(&mut self, doc: &StateDocument) -> serde_json::Result<Event> {
        let value = doc.to_value()?;
        self.last = Some(value.clone());
        Ok(Event::StateSnapshot { snapshot: value })
    }

    /// Delta from the last emitted view to `doc`, or `None` if nothing changed.
    ///
    /// Without a prior snapshot the whole document is sent as one.
    pub fn delta(&mut self, doc: &StateDocument) -> serde_json::Result<Option<Event>> {
        let value = doc.to_value()?;
        let Some(last) = self.last.as_ref() else {
            return self.snapshot(doc).map(Some);
        };

        let ops = patch::diff(last, &value);
        if ops.is_empty() {
            return Ok(None);
        }
        self.last = Some(value);
        Ok(Some(Event::StateDelta { delta: ops }))
    }
}
