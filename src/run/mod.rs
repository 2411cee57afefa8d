//! Run orchestration.
//!
//! [`RunService::dispatch`] turns one `POST /agent` body into an event stream.
//! A search run drives the engine until its feedback prompt and suspends; a
//! resume run takes the suspended state back out of the registry and drives
//! the engine to a terminal phase. Each run is one tokio task owning one
//! [`RunController`].

mod controller;
pub mod machine;

pub use controller::RunController;

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span};

use crate::error::AdapterError;
use crate::protocol::{Envelope, FeedbackPayload, RunAgentInput, RunContext, RunKind, RunRequest};
use crate::session::{PendingFeedback, SessionRegistry};
use crate::state::{Phase, SearchStage, StateDocument};
use crate::workflow::bridge::{self, BridgeItem, BridgeStream};
use crate::workflow::{Job, Task, WorkflowEngine, WorkflowError};

/// Name of the client-side action that asks the user for feedback.
pub const FEEDBACK_TOOL: &str = "provideFeedback";

/// Per-run limits and prompt text.
#[derive(Debug, Clone)]
pub struct RunSettings {
    pub queue_capacity: usize,
    pub outbound_capacity: usize,
    pub feedback_message: String,
    pub feedback_options: Vec<String>,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            queue_capacity: 64,
            outbound_capacity: 64,
            feedback_message: crate::config::DEFAULT_FEEDBACK_MESSAGE.to_string(),
            feedback_options: Vec::new(),
        }
    }
}

impl From<&crate::config::AppConfig> for RunSettings {
    fn from(cfg: &crate::config::AppConfig) -> Self {
        Self {
            queue_capacity: cfg.runs.queue_capacity,
            outbound_capacity: cfg.runs.outbound_capacity,
            feedback_message: cfg.workflow.feedback_message.clone(),
            feedback_options: cfg.workflow.feedback_options.clone(),
        }
    }
}

/// Starts runs. Cheap to clone.
#[derive(Debug, Clone)]
pub struct RunService {
    engine: Arc<dyn WorkflowEngine>,
    registry: SessionRegistry,
    settings: Arc<RunSettings>,
}

impl RunService {
    #[must_use]
    pub fn new(
        engine: Arc<dyn WorkflowEngine>,
        registry: SessionRegistry,
        settings: RunSettings,
    ) -> Self {
        Self {
            engine,
            registry,
            settings: Arc::new(settings),
        }
    }

    #[must_use]
    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// Start the run `input` asks for and return its event stream.
    ///
    /// Dropping the stream cancels the run.
    pub fn dispatch(&self, input: RunAgentInput) -> ReceiverStream<Envelope> {
        let (tx, rx) = mpsc::channel(self.settings.outbound_capacity.max(1));
        let run_id = input.run_id_or_new();
        let thread_id = input.thread_id.clone();

        match input.route() {
            RunRequest::Search { query } => {
                let span = info_span!("run", %thread_id, %run_id, kind = "search");
                let ctx = RunContext::new(thread_id, run_id, RunKind::Search);
                let service = self.clone();
                tokio::spawn(async move { service.search(ctx, query, tx).await }.instrument(span));
            }
            RunRequest::Resume {
                raw,
                original_location,
            } => {
                let span = info_span!("run", %thread_id, %run_id, kind = "resume");
                let ctx = RunContext::new(thread_id, run_id, RunKind::Resume);
                let service = self.clone();
                tokio::spawn(
                    async move { service.resume(ctx, &raw, original_location, tx).await }
                        .instrument(span),
                );
            }
        }

        ReceiverStream::new(rx)
    }

    /// Fresh search, ending at the feedback prompt.
    async fn search(&self, ctx: RunContext, query: String, tx: mpsc::Sender<Envelope>) {
        if self.registry.discard(&ctx.thread_id) {
            info!(name: "run.stale_discarded", thread_id = %ctx.thread_id, "New search replaced a suspended run");
        }

        let cancel = CancellationToken::new();
        let doc = StateDocument::new(query.clone(), self.settings.feedback_options.clone());
        let mut ctl = RunController::new(ctx, doc, tx, cancel.clone());
        info!(name: "run.started", query = %query, "Search run started");

        let result = async {
            ctl.start().await?;
            ctl.transition_with(Phase::Initialized, |doc| {
                doc.processing.in_progress = true;
            })
            .await?;

            let bridge = bridge::spawn(
                Arc::clone(&self.engine),
                Job::Search { query },
                self.settings.queue_capacity,
                cancel.clone(),
            );
            let outcome = drive(&mut ctl, bridge).await?;
            ctl.suspend(outcome, &self.registry, &self.settings.feedback_message)
                .await
        }
        .await;

        finish(&mut ctl, &cancel, result).await;
    }

    /// Resume a suspended run with the user's feedback.
    async fn resume(
        &self,
        ctx: RunContext,
        raw: &str,
        request_location: Option<String>,
        tx: mpsc::Sender<Envelope>,
    ) {
        let cancel = CancellationToken::new();

        // Validate before taking so a bad payload leaves the entry in place.
        let taken = FeedbackPayload::parse(raw).and_then(|payload| {
            let pending = self.registry.take(&ctx.thread_id)?;
            Ok((payload, pending))
        });
        let (payload, pending) = match taken {
            Ok(pair) => pair,
            Err(err) => {
                let doc = StateDocument::new("", self.settings.feedback_options.clone());
                let mut ctl = RunController::new(ctx, doc, tx, cancel);
                ctl.fail(&err).await;
                return;
            }
        };

        let location = payload
            .original_location
            .clone()
            .or(request_location)
            .unwrap_or_else(|| pending.location.clone());
        debug!(name: "run.resume.location", %location, "Resolved resume location");

        let doc = restored(&pending, &location);
        let mut ctl = RunController::new(ctx, doc, tx, cancel.clone());
        info!(name: "run.resumed", feedback = %payload.text, "Resume run started");

        let result = async {
            ctl.restore(Phase::AwaitFeedback)?;
            ctl.start().await?;

            let feedback = payload.text.clone();
            ctl.transition_with(Phase::ProcessingFeedback, |doc| {
                doc.processing.feedback = Some(feedback);
                doc.processing.in_progress = true;
                doc.processing.current_phase = Task::Feedback.as_str().to_string();
                doc.ui.show_feedback_prompt = false;
            })
            .await?;

            let bridge = bridge::spawn(
                Arc::clone(&self.engine),
                Job::Feedback {
                    feedback: payload.text,
                    location,
                    prior_recommendations: pending.recommendations,
                    prior_restaurants: pending.restaurants,
                },
                self.settings.queue_capacity,
                cancel.clone(),
            );
            let outcome = drive(&mut ctl, bridge).await?;
            ctl.complete(outcome).await
        }
        .await;

        finish(&mut ctl, &cancel, result).await;
    }
}

/// Document a resume run starts from: the suspended results at `await_feedback`.
fn restored(pending: &PendingFeedback, location: &str) -> StateDocument {
    let mut doc = StateDocument::new(pending.query.clone(), pending.feedback_options.clone());
    doc.search.location = location.to_string();
    doc.search.stage = SearchStage::Found;
    doc.search.completed = true;
    for r in &pending.restaurants {
        doc.push_restaurant(r.clone());
    }
    doc.processing.recommendations = Some(pending.recommendations.clone());
    doc.ui.show_restaurants = !doc.search.restaurants.is_empty();
    doc.ui.show_feedback_prompt = true;
    doc
}

/// Feed bridge items to the controller until the engine returns.
async fn drive(
    ctl: &mut RunController,
    mut bridge: BridgeStream,
) -> Result<crate::workflow::WorkflowOutcome, AdapterError> {
    loop {
        // Progress that changes nothing sends nothing, so watch the client too.
        let item = tokio::select! {
            () = ctl.disconnected() => return Err(AdapterError::Cancelled),
            item = bridge.next() => item,
        };
        let Some(item) = item else { break };
        match item {
            BridgeItem::Notice(notification) => ctl.on_notification(notification).await?,
            BridgeItem::Finished(outcome) => return Ok(outcome),
            BridgeItem::Failed(err) => return Err(workflow_error(err)),
        }
    }
    Err(AdapterError::WorkflowFailure(
        "engine stopped without a result".into(),
    ))
}

fn workflow_error(err: WorkflowError) -> AdapterError {
    match err {
        WorkflowError::Cancelled | WorkflowError::Disconnected => AdapterError::Cancelled,
        other => AdapterError::WorkflowFailure(other.to_string()),
    }
}

async fn finish(ctl: &mut RunController, cancel: &CancellationToken, result: Result<(), AdapterError>) {
    match result {
        Ok(()) => {}
        Err(AdapterError::Cancelled) => {
            cancel.cancel();
            info!(name: "run.cancelled", thread_id = %ctl.context().thread_id, "Run cancelled by client");
        }
        Err(err) => ctl.fail(&err).await,
    }
}
