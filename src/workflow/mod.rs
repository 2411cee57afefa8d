//! The crew boundary.
//!
//! A [`WorkflowEngine`] is a synchronous, possibly slow piece of work (a crew
//! of agents) that reports what it is doing through a [`Notifier`]. The
//! [`bridge`] runs it on a blocking worker and hands its notifications to the
//! async run task.
//!
//! Two engines ship with the crate:
//!
//! - [`ScriptedCrew`]: deterministic and offline
//! - [`ChatCrew`]: prompts an OpenAI-compatible model

pub mod bridge;
pub mod chat;
pub mod parse;
pub mod scripted;

pub use bridge::{BridgeItem, BridgeStream};
pub use chat::ChatCrew;
pub use scripted::ScriptedCrew;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::state::Restaurant;

/// A task of the crew, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Task {
    Search,
    Recommend,
    Feedback,
}

impl Task {
    /// Name shown in `processing.currentPhase`.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Search => "search",
            Self::Recommend => "recommend",
            Self::Feedback => "feedback",
        }
    }

    /// Share of the run's overall progress this task covers.
    ///
    /// A search run spans search and recommend; a feedback run is one task.
    #[must_use]
    pub fn band(self) -> (f64, f64) {
        match self {
            Self::Search => (0.0, 0.5),
            Self::Recommend => (0.5, 1.0),
            Self::Feedback => (0.0, 1.0),
        }
    }

    /// Map a task-local ratio onto overall progress.
    #[must_use]
    pub fn overall(self, ratio: f64) -> f64 {
        let (lo, hi) = self.band();
        let ratio = if ratio.is_nan() { 0.0 } else { ratio.clamp(0.0, 1.0) };
        lo + (hi - lo) * ratio
    }
}

/// Work handed to an engine.
#[derive(Debug, Clone, PartialEq)]
pub enum Job {
    Search {
        query: String,
    },
    Feedback {
        feedback: String,
        location: String,
        prior_recommendations: String,
        prior_restaurants: Vec<Restaurant>,
    },
}

/// Something the engine wants the client to see.
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    PhaseStarted(Task),
    /// Task-local progress in `[0, 1]`.
    Progress { task: Task, ratio: f64 },
    LocationResolved(String),
    RestaurantFound(Restaurant),
    TextChunk(String),
    TextEnd,
    ToolInvoked { name: String, args: Value },
}

/// How the user's feedback was taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    /// The user asked for changes; recommendations were rewritten.
    Revised,
    /// The user was happy; recommendations were kept.
    Accepted,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WorkflowOutcome {
    pub recommendations: String,
    pub restaurants: Vec<Restaurant>,
    pub verdict: Verdict,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WorkflowError {
    /// The run was cancelled; stop quietly.
    #[error("cancelled")]
    Cancelled,
    /// Nobody is consuming notifications any more.
    #[error("notification channel closed")]
    Disconnected,
    /// The job cannot be handled by this engine.
    #[error("unsupported job: {0}")]
    Unsupported(String),
    /// The model call failed.
    #[error("model request failed: {0}")]
    Model(String),
    /// Anything else the engine reports.
    #[error("{0}")]
    Engine(String),
}

/// An opaque, blocking crew.
///
/// Implementations must check `cancel` between steps and stop with
/// [`WorkflowError::Cancelled`] once it fires.
pub trait WorkflowEngine: Send + Sync + std::fmt::Debug {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    fn run(
        &self,
        job: Job,
        notifier: &Notifier,
        cancel: &CancellationToken,
    ) -> Result<WorkflowOutcome, WorkflowError>;
}

/// Handle an engine uses to report progress from its worker thread.
///
/// Sends block while the bridge queue is full.
#[derive(Debug, Clone)]
pub struct Notifier {
    tx: mpsc::Sender<Notification>,
}

impl Notifier {
    pub(crate) fn new(tx: mpsc::Sender<Notification>) -> Self {
        Self { tx }
    }

    /// Deliver one notification. Must not be called from async code.
    pub fn notify(&self, notification: Notification) -> Result<(), WorkflowError> {
        self.tx
            .blocking_send(notification)
            .map_err(|_| WorkflowError::Disconnected)
    }

    pub fn phase(&self, task: Task) -> Result<(), WorkflowError> {
        self.notify(Notification::PhaseStarted(task))
    }

    pub fn progress(&self, task: Task, ratio: f64) -> Result<(), WorkflowError> {
        self.notify(Notification::Progress { task, ratio })
    }

    pub fn text(&self, chunk: impl Into<String>) -> Result<(), WorkflowError> {
        self.notify(Notification::TextChunk(chunk.into()))
    }

    pub fn tool(&self, name: &str, args: Value) -> Result<(), WorkflowError> {
        self.notify(Notification::ToolInvoked {
            name: name.to_string(),
            args,
        })
    }
}

/// Fail with [`WorkflowError::Cancelled`] once `cancel` fired.
pub fn checkpoint(cancel: &CancellationToken) -> Result<(), WorkflowError> {
    if cancel.is_cancelled() {
        Err(WorkflowError::Cancelled)
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_bands() {
        assert!((Task::Search.overall(1.0) - 0.5).abs() < f64::EPSILON);
        assert!((Task::Recommend.overall(0.0) - 0.5).abs() < f64::EPSILON);
        assert!((Task::Recommend.overall(0.5) - 0.75).abs() < f64::EPSILON);
        assert!((Task::Feedback.overall(f64::NAN)).abs() < f64::EPSILON);
        assert!((Task::Feedback.overall(3.0) - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_checkpoint() {
        let cancel = CancellationToken::new();
        assert!(checkpoint(&cancel).is_ok());
        cancel.cancel();
        assert_eq!(checkpoint(&cancel), Err(WorkflowError::Cancelled));
    }
}
