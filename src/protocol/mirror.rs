//! Client-side reducer over the event stream.
//!
//! [`StateMirror`] is what a UI keeps: snapshots replace the tree, deltas are
//! applied in order, text and tool calls are accumulated for display.

use serde_json::Value;
use thiserror::Error;

use super::events::{Envelope, Event};
use crate::state::patch::{self, PatchError};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MirrorError {
    #[error("out-of-order event: expected seq {expected}, got {got}")]
    OutOfOrder { expected: u64, got: u64 },
    #[error("event after stream end (seq {0})")]
    AfterEnd(u64),
    #[error(transparent)]
    Patch(#[from] PatchError),
}

/// A tool call as seen by the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservedToolCall {
    pub id: String,
    pub name: String,
    pub args: String,
    pub ended: bool,
}

#[derive(Debug)]
pub struct StateMirror {
    doc: Value,
    next_seq: u64,
    phases: Vec<String>,
    text: String,
    tool_calls: Vec<ObservedToolCall>,
    finished: bool,
    error: Option<(String, String)>,
}

impl Default for StateMirror {
    fn default() -> Self {
        Self {
            doc: patch::empty(),
            next_seq: 0,
            phases: Vec::new(),
            text: String::new(),
            tool_calls: Vec::new(),
            finished: false,
            error: None,
        }
    }
}

impl StateMirror {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one envelope into the mirror.
    pub fn apply(&mut self, envelope: &Envelope) -> Result<(), MirrorError> {
        if self.finished || self.error.is_some() {
            return Err(MirrorError::AfterEnd(envelope.seq));
        }
        if envelope.seq != self.next_seq {
            return Err(MirrorError::OutOfOrder {
                expected: self.next_seq,
                got: envelope.seq,
            });
        }
        self.next_seq += 1;

        match &envelope.event {
            Event::StateSnapshot { snapshot } => {
                self.doc = snapshot.clone();
                self.observe_phase();
            }
            Event::StateDelta { delta } => {
                patch::apply(&mut self.doc, delta)?;
                self.observe_phase();
            }
            Event::TextMessageContent { delta } => self.text.push_str(delta),
            Event::ToolCallStart {
                tool_call_id,
                tool_call_name,
            } => self.tool_calls.push(ObservedToolCall {
                id: tool_call_id.clone(),
                name: tool_call_name.clone(),
                args: String::new(),
                ended: false,
            }),
            Event::ToolCallArgs {
                tool_call_id,
                delta,
            } => {
                if let Some(call) = self.tool_call_mut(tool_call_id) {
                    call.args.push_str(delta);
                }
            }
            Event::ToolCallEnd { tool_call_id } => {
                if let Some(call) = self.tool_call_mut(tool_call_id) {
                    call.ended = true;
                }
            }
            Event::RunFinished { .. } => self.finished = true,
            Event::RunError { message, code } => {
                self.error = Some((code.clone(), message.clone()));
            }
            Event::RunStarted { .. } | Event::TextMessageStart { .. } | Event::TextMessageEnd {} => {}
        }
        Ok(())
    }

    /// Fold a whole stream, stopping at the first error.
    pub fn apply_all<'a>(
        &mut self,
        envelopes: impl IntoIterator<Item = &'a Envelope>,
    ) -> Result<(), MirrorError> {
        envelopes.into_iter().try_for_each(|e| self.apply(e))
    }

    fn tool_call_mut(&mut self, id: &str) -> Option<&mut ObservedToolCall> {
        self.tool_calls.iter_mut().rev().find(|c| c.id == id)
    }

    fn observe_phase(&mut self) {
        let Some(phase) = self.doc.pointer("/status/phase").and_then(Value::as_str) else {
            return;
        };
        if self.phases.last().map(String::as_str) != Some(phase) {
            self.phases.push(phase.to_string());
        }
    }

    /// The mirrored state tree.
    #[must_use]
    pub fn document(&self) -> &Value {
        &self.doc
    }

    /// Distinct `status.phase` values in the order they were observed.
    #[must_use]
    pub fn phases(&self) -> &[String] {
        &self.phases
    }

    /// Concatenated assistant text.
    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    #[must_use]
    pub fn tool_calls(&self) -> &[ObservedToolCall] {
        &self.tool_calls
    }

    /// True once `RUN_FINISHED` was seen.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// `(code, message)` of the `RUN_ERROR`, if any.
    #[must_use]
    pub fn error(&self) -> Option<(&str, &str)> {
        self.error
            .as_ref()
            .map(|(code, message)| (code.as_str(), message.as_str()))
    }

    /// True when the stream ended on a feedback prompt instead of finishing.
    #[must_use]
    pub fn is_awaiting_feedback(&self) -> bool {
        !self.finished
            && self.error.is_none()
            && self
                .tool_calls
                .last()
                .is_some_and(|c| c.name == crate::run::FEEDBACK_TOOL && c.ended)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::encoder::{EventEncoder, StateTracker};
    use crate::state::{Phase, Restaurant, StateDocument};

    #[test]
    fn test_snapshot_then_deltas_reconstructs_document() {
        let mut encoder = EventEncoder::new("m");
        let mut tracker = StateTracker::default();
        let mut doc = StateDocument::new("Find ramen in Tokyo", Vec::new());
        let mut stream = vec![encoder.seal(tracker.snapshot(&doc).unwrap())];

        doc.set_phase(Phase::Initialized);
        doc.search.location = "Tokyo".to_string();
        stream.push(encoder.seal(tracker.delta(&doc).unwrap().unwrap()));

        doc.push_restaurant(Restaurant::new("rest_0", "Ichiran"));
        doc.raise_progress(0.4);
        stream.push(encoder.seal(tracker.delta(&doc).unwrap().unwrap()));

        let mut mirror = StateMirror::new();
        mirror.apply_all(&stream).unwrap();

        assert_eq!(mirror.document(), &doc.to_value().unwrap());
        assert_eq!(mirror.phases(), ["idle", "initialized"]);
    }

    #[test]
    fn test_rejects_gaps_and_trailing_events() {
        let mut encoder = EventEncoder::new("m");
        let first = encoder.seal(Event::text_start());
        let _skipped = encoder.seal(Event::text_content("a"));
        let third = encoder.seal(Event::run_error("x", "WorkflowFailure"));

        let mut mirror = StateMirror::new();
        mirror.apply(&first).unwrap();
        assert_eq!(
            mirror.apply(&third),
            Err(MirrorError::OutOfOrder {
                expected: 1,
                got: 2
            })
        );
    }

    #[test]
    fn test_collects_text_and_tool_calls() {
        let mut encoder = EventEncoder::new("m");
        let stream = [
            encoder.seal(Event::text_start()),
            encoder.seal(Event::text_content("Hello ")),
            encoder.seal(Event::text_content("there")),
            encoder.seal(Event::TextMessageEnd {}),
            encoder.seal(Event::tool_call_start("call_1", "provideFeedback")),
            encoder.seal(Event::tool_call_args(
                "call_1",
                &serde_json::json!({ "message": "?" }),
            )),
            encoder.seal(Event::tool_call_end("call_1")),
        ];

        let mut mirror = StateMirror::new();
        mirror.apply_all(&stream).unwrap();
        assert_eq!(mirror.text(), "Hello there");
        assert!(mirror.is_awaiting_feedback());
        assert_eq!(mirror.tool_calls()[0].args, r#"{"message":"?"}"#);

        let after = encoder.seal(Event::run_error("late", "StreamClosed"));
        mirror.apply(&after).unwrap();
        assert_eq!(mirror.error(), Some(("StreamClosed", "late")));
        let again = encoder.seal(Event::text_start());
        assert_eq!(mirror.apply(&again), Err(MirrorError::AfterEnd(8)));
    }
}
