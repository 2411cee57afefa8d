//! One run's lifecycle.
//!
//! The controller owns the run's [`StateDocument`] and its single outbound
//! queue. Every state mutation goes through it and is reported as exactly one
//! snapshot or delta; every event gets the next sequence number.

use serde_json::json;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{FEEDBACK_TOOL, machine};
use crate::error::AdapterError;
use crate::protocol::events::{self, Envelope, Event, RunContext, RunKind};
use crate::protocol::encoder::{EventEncoder, StateTracker};
use crate::session::{Overwrite, PendingFeedback, SessionRegistry};
use crate::state::{Phase, Restaurant, SearchStage, StateDocument};
use crate::workflow::{Notification, Task, Verdict, WorkflowOutcome};

#[derive(Debug)]
pub struct RunController {
    ctx: RunContext,
    doc: StateDocument,
    encoder: EventEncoder,
    tracker: StateTracker,
    out: mpsc::Sender<Envelope>,
    cancel: CancellationToken,
    text_open: bool,
    closed: bool,
}

impl RunController {
    #[must_use]
    pub fn new(
        ctx: RunContext,
        doc: StateDocument,
        out: mpsc::Sender<Envelope>,
        cancel: CancellationToken,
    ) -> Self {
        let encoder = EventEncoder::new(ctx.message_id.clone());
        Self {
            ctx,
            doc,
            encoder,
            tracker: StateTracker::default(),
            out,
            cancel,
            text_open: false,
            closed: false,
        }
    }

    #[must_use]
    pub fn context(&self) -> &RunContext {
        &self.ctx
    }

    #[must_use]
    pub fn document(&self) -> &StateDocument {
        &self.doc
    }

    #[must_use]
    pub fn phase(&self) -> Phase {
        self.doc.status.phase
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Resolves once the client stops listening.
    pub async fn disconnected(&self) {
        self.out.closed().await;
    }

    /// Send one event. Terminal events close the controller.
    async fn emit(&mut self, event: Event) -> Result<(), AdapterError> {
        if self.closed {
            error!(
                name: "run.emit_after_close",
                thread_id = %self.ctx.thread_id,
                event = event.name(),
                "Event emitted on a closed run"
            );
            return Err(AdapterError::StreamClosed);
        }

        let terminal = event.is_terminal();
        let envelope = self.encoder.seal(event);
        if self.out.send(envelope).await.is_err() {
            debug!(name: "run.client_gone", thread_id = %self.ctx.thread_id, "Client disconnected");
            self.closed = true;
            self.cancel.cancel();
            return Err(AdapterError::Cancelled);
        }
        if terminal {
            self.closed = true;
        }
        Ok(())
    }

    /// Report pending document changes, if any.
    async fn sync(&mut self) -> Result<(), AdapterError> {
        if let Some(event) = self.tracker.delta(&self.doc)? {
            self.emit(event).await?;
        }
        Ok(())
    }

    /// Apply `mutate`, then report the change.
    async fn update(&mut self, mutate: impl FnOnce(&mut StateDocument)) -> Result<(), AdapterError> {
        mutate(&mut self.doc);
        self.sync().await
    }

    /// Move to `to`, applying `mutate` in the same delta.
    pub async fn transition_with(
        &mut self,
        to: Phase,
        mutate: impl FnOnce(&mut StateDocument),
    ) -> Result<(), AdapterError> {
        machine::check(self.doc.status.phase, to)?;
        debug!(name: "run.phase", from = %self.doc.status.phase, %to, "Phase change");
        mutate(&mut self.doc);
        self.doc.set_phase(to);
        self.sync().await
    }

    pub async fn transition(&mut self, to: Phase) -> Result<(), AdapterError> {
        self.transition_with(to, |_| {}).await
    }

    /// Move to `to` before anything was sent. Only valid ahead of [`Self::start`].
    pub fn restore(&mut self, to: Phase) -> Result<(), AdapterError> {
        machine::check(self.doc.status.phase, to)?;
        self.doc.set_phase(to);
        Ok(())
    }

    /// `RUN_STARTED` followed by the initial snapshot.
    pub async fn start(&mut self) -> Result<(), AdapterError> {
        self.emit(Event::run_started(&self.ctx)).await?;
        let snapshot = self.tracker.snapshot(&self.doc)?;
        self.emit(snapshot).await
    }

    async fn open_text(&mut self) -> Result<(), AdapterError> {
        if !self.text_open {
            self.emit(Event::text_start()).await?;
            self.text_open = true;
        }
        Ok(())
    }

    async fn close_text(&mut self) -> Result<(), AdapterError> {
        if self.text_open {
            self.text_open = false;
            self.emit(Event::TextMessageEnd {}).await?;
        }
        Ok(())
    }

    async fn announce_tool(&mut self, name: &str, args: &serde_json::Value) -> Result<(), AdapterError> {
        let id = events::tool_call_id();
        self.emit(Event::tool_call_start(&id, name)).await?;
        self.emit(Event::tool_call_args(&id, args)).await?;
        self.emit(Event::tool_call_end(id)).await
    }

    fn add_restaurant(&mut self, restaurant: Restaurant) -> bool {
        let id = restaurant.id.clone();
        if self.doc.push_restaurant(restaurant) {
            self.doc.ui.show_restaurants = true;
            true
        } else {
            warn!(name: "run.duplicate_restaurant", thread_id = %self.ctx.thread_id, %id, "Dropped duplicate restaurant");
            false
        }
    }

    /// Translate one engine notification into events.
    pub async fn on_notification(&mut self, notification: Notification) -> Result<(), AdapterError> {
        match notification {
            Notification::PhaseStarted(task) => self.on_task(task).await,
            Notification::Progress { task, ratio } => {
                let overall = task.overall(ratio);
                if self.doc.raise_progress(overall) {
                    self.sync().await
                } else {
                    debug!(
                        name: "run.progress_regression",
                        task = task.as_str(),
                        ratio,
                        current = self.doc.processing.progress,
                        "Ignored progress regression"
                    );
                    Ok(())
                }
            }
            Notification::LocationResolved(location) => {
                self.update(|doc| doc.search.location = location).await
            }
            Notification::RestaurantFound(restaurant) => {
                if self.add_restaurant(restaurant) {
                    self.sync().await
                } else {
                    Ok(())
                }
            }
            Notification::TextChunk(delta) => {
                if delta.is_empty() {
                    return Ok(());
                }
                self.open_text().await?;
                self.emit(Event::text_content(delta)).await
            }
            Notification::TextEnd => self.close_text().await,
            Notification::ToolInvoked { name, args } => self.announce_tool(&name, &args).await,
        }
    }

    async fn on_task(&mut self, task: Task) -> Result<(), AdapterError> {
        match task {
            Task::Search => {
                self.transition_with(Phase::Searching, |doc| {
                    doc.search.stage = SearchStage::Searching;
                    doc.processing.current_phase = task.as_str().to_string();
                })
                .await
            }
            Task::Recommend => {
                if self.phase() == Phase::Searching {
                    self.transition_with(Phase::Found, |doc| {
                        doc.search.stage = SearchStage::Found;
                        doc.search.completed = true;
                        doc.ui.show_restaurants = true;
                    })
                    .await?;
                }
                self.transition_with(Phase::Recommending, |doc| {
                    doc.processing.current_phase = task.as_str().to_string();
                })
                .await
            }
            Task::Feedback => {
                let phase = self.phase();
                if phase != Phase::ProcessingFeedback {
                    return Err(AdapterError::IllegalTransition {
                        from: phase,
                        to: Phase::ProcessingFeedback,
                    });
                }
                self.update(|doc| doc.processing.current_phase = task.as_str().to_string())
                    .await
            }
        }
    }

    /// End a search run at its feedback prompt.
    ///
    /// The pending entry is registered before the prompt is sent so a fast
    /// resume always finds it. The stream ends without `RUN_FINISHED`.
    pub async fn suspend(
        &mut self,
        outcome: WorkflowOutcome,
        registry: &SessionRegistry,
        prompt: &str,
    ) -> Result<(), AdapterError> {
        self.close_text().await?;

        // Outcome lists repeat what was already streamed.
        for restaurant in outcome.restaurants {
            self.doc.push_restaurant(restaurant);
        }
        let recommendations = outcome.recommendations;
        self.update(|doc| {
            doc.processing.recommendations = Some(recommendations);
        })
        .await?;

        self.transition_with(Phase::AwaitFeedback, |doc| {
            doc.ui.show_feedback_prompt = true;
            doc.processing.in_progress = false;
        })
        .await?;

        let pending = PendingFeedback {
            thread_id: self.ctx.thread_id.clone(),
            location: self.doc.search.location.clone(),
            query: self.doc.search.query.clone(),
            recommendations: self.doc.processing.recommendations.clone().unwrap_or_default(),
            restaurants: self.doc.search.restaurants.clone(),
            feedback_options: self.doc.ui.feedback_options.clone(),
            created_at: chrono::Utc::now(),
        };
        registry.register(&self.ctx.thread_id, pending, Overwrite::Deny)?;

        let args = json!({
            "message": prompt,
            "feedbackOptions": self.doc.ui.feedback_options,
        });
        if let Err(e) = self.announce_tool(FEEDBACK_TOOL, &args).await {
            registry.discard(&self.ctx.thread_id);
            return Err(e);
        }

        self.closed = true;
        info!(
            name: "run.suspended",
            thread_id = %self.ctx.thread_id,
            run_id = %self.ctx.run_id,
            restaurants = self.doc.search.restaurants.len(),
            "Run suspended awaiting feedback"
        );
        Ok(())
    }

    /// End a resumed run with the engine's answer.
    pub async fn complete(&mut self, outcome: WorkflowOutcome) -> Result<(), AdapterError> {
        self.close_text().await?;

        match self.ctx.kind {
            // A feedback outcome is the revised list, not an addition to it.
            RunKind::Resume => {
                self.doc.replace_restaurants(outcome.restaurants);
                self.doc.ui.show_restaurants = !self.doc.search.restaurants.is_empty();
            }
            RunKind::Search => {
                for restaurant in outcome.restaurants {
                    self.doc.push_restaurant(restaurant);
                }
            }
        }

        let to = match outcome.verdict {
            Verdict::Accepted => Phase::Completed,
            Verdict::Revised => Phase::FeedbackCompleted,
        };
        let recommendations = outcome.recommendations;
        self.doc.raise_progress(1.0);
        self.transition_with(to, |doc| {
            doc.processing.recommendations = Some(recommendations);
            doc.processing.completed = true;
            doc.processing.in_progress = false;
            doc.ui.show_feedback_prompt = false;
        })
        .await?;

        self.emit(Event::run_finished(&self.ctx)).await?;
        info!(
            name: "run.finished",
            thread_id = %self.ctx.thread_id,
            run_id = %self.ctx.run_id,
            phase = %to,
            "Run finished"
        );
        Ok(())
    }

    /// Collapse the run to `error` and send `RUN_ERROR`.
    ///
    /// Does nothing once closed or when the client went away.
    pub async fn fail(&mut self, err: &AdapterError) {
        if self.closed || matches!(err, AdapterError::Cancelled) {
            return;
        }
        self.cancel.cancel();
        warn!(
            name: "run.failed",
            thread_id = %self.ctx.thread_id,
            run_id = %self.ctx.run_id,
            code = err.kind(),
            error = %err,
            "Run failed"
        );

        if let Err(e) = self.close_text().await {
            debug!(name: "run.fail.text_unclosed", thread_id = %self.ctx.thread_id, error = %e, "Open text not closed before failure");
        }

        let message = err.to_string();
        if machine::check(self.doc.status.phase, Phase::Error).is_ok() {
            self.doc.status.error = Some(message.clone());
            self.doc.processing.in_progress = false;
            self.doc.set_phase(Phase::Error);
            // The snapshot was never sent when the run fails at the start.
            if self.encoder.sealed() > 0 && self.sync().await.is_err() {
                return;
            }
        }

        if let Err(e) = self.emit(Event::run_error(message, err.kind())).await {
            debug!(name: "run.fail.unreported", thread_id = %self.ctx.thread_id, error = %e, "Run error not delivered");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::mirror::StateMirror;

    fn controller(capacity: usize) -> (RunController, mpsc::Receiver<Envelope>) {
        let (tx, rx) = mpsc::channel(capacity);
        let ctx = RunContext::new("t1", "r1", RunKind::Search);
        let doc = StateDocument::new("Find Italian restaurants in Chicago", vec!["ok".into()]);
        (
            RunController::new(ctx, doc, tx, CancellationToken::new()),
            rx,
        )
    }

    fn drain(rx: &mut mpsc::Receiver<Envelope>) -> Vec<Envelope> {
        let mut out = Vec::new();
        while let Ok(e) = rx.try_recv() {
            out.push(e);
        }
        out
    }

    #[tokio::test]
    async fn test_emit_after_close_is_rejected() {
        let (mut ctl, mut rx) = controller(16);
        ctl.start().await.unwrap();
        ctl.emit(Event::run_error("boom", "WorkflowFailure")).await.unwrap();
        assert!(ctl.is_closed());

        assert_eq!(
            ctl.emit(Event::text_start()).await,
            Err(AdapterError::StreamClosed)
        );
        assert_eq!(drain(&mut rx).len(), 3);
    }

    #[tokio::test]
    async fn test_illegal_transition_is_rejected() {
        let (mut ctl, _rx) = controller(16);
        ctl.start().await.unwrap();
        let err = ctl.transition(Phase::Recommending).await.unwrap_err();
        assert_eq!(err.kind(), "IllegalTransition");
        assert_eq!(ctl.phase(), Phase::Idle);
    }

    #[tokio::test]
    async fn test_text_is_wrapped_in_one_message() {
        let (mut ctl, mut rx) = controller(16);
        ctl.start().await.unwrap();
        for chunk in ["a", "b"] {
            ctl.on_notification(Notification::TextChunk(chunk.into()))
                .await
                .unwrap();
        }
        ctl.on_notification(Notification::TextEnd).await.unwrap();
        ctl.on_notification(Notification::TextEnd).await.unwrap();

        let names: Vec<_> = drain(&mut rx)
            .into_iter()
            .skip(2)
            .map(|e| e.event.name())
            .collect();
        assert_eq!(
            names,
            [
                "TEXT_MESSAGE_START",
                "TEXT_MESSAGE_CONTENT",
                "TEXT_MESSAGE_CONTENT",
                "TEXT_MESSAGE_END"
            ]
        );
    }

    #[tokio::test]
    async fn test_progress_regression_is_ignored() {
        let (mut ctl, mut rx) = controller(16);
        ctl.start().await.unwrap();
        ctl.on_notification(Notification::Progress {
            task: Task::Search,
            ratio: 0.8,
        })
        .await
        .unwrap();
        ctl.on_notification(Notification::Progress {
            task: Task::Search,
            ratio: 0.2,
        })
        .await
        .unwrap();

        assert_eq!(drain(&mut rx).len(), 3);
        assert!((ctl.document().processing.progress - 0.4).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_closed_receiver_cancels_run() {
        let (mut ctl, rx) = controller(4);
        drop(rx);
        assert_eq!(ctl.start().await, Err(AdapterError::Cancelled));
        assert!(ctl.cancel.is_cancelled());
    }

    #[tokio::test]
    async fn test_failure_with_open_text_after_disconnect() {
        let (mut ctl, mut rx) = controller(16);
        ctl.start().await.unwrap();
        ctl.on_notification(Notification::TextChunk("partial".into()))
            .await
            .unwrap();
        assert_eq!(drain(&mut rx).len(), 4);
        drop(rx);

        ctl.fail(&AdapterError::WorkflowFailure("model down".into()))
            .await;
        assert!(ctl.is_closed());
        assert!(ctl.cancel.is_cancelled());
    }

    #[tokio::test]
    async fn test_failure_sets_error_state() {
        let (mut ctl, mut rx) = controller(16);
        ctl.start().await.unwrap();
        ctl.transition(Phase::Initialized).await.unwrap();
        ctl.fail(&AdapterError::WorkflowFailure("model down".into()))
            .await;

        let stream = drain(&mut rx);
        let mut mirror = StateMirror::new();
        mirror.apply_all(&stream).unwrap();

        assert_eq!(mirror.document()["status"]["phase"], "error");
        assert_eq!(
            mirror.document()["status"]["error"],
            "Workflow failed: model down"
        );
        assert_eq!(
            mirror.error().map(|(code, _)| code),
            Some("WorkflowFailure")
        );
    }
}
