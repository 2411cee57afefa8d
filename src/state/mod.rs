//! The shared state document mirrored by the client.
//!
//! One [`StateDocument`] exists per run. It is owned by the run controller and
//! only ever reaches the wire through a snapshot or a delta computed by the
//! [`patch`] engine.
//!
//! # Sections
//!
//! - [`StatusSection`]: current [`Phase`], optional error, timestamp
//! - [`SearchSection`]: query, resolved location and the restaurant list
//! - [`ProcessingSection`]: progress ratio, current task, recommendation text
//! - [`UiSection`]: display flags and the feedback option list

pub mod patch;

use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Ordered task names shown by the client's progress widget.
pub const WORKFLOW_PHASES: [&str; 3] = ["search", "recommend", "feedback"];

/// Lifecycle phase of a run, as exposed in `status.phase`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    #[default]
    Idle,
    Initialized,
    Searching,
    Found,
    Recommending,
    AwaitFeedback,
    ProcessingFeedback,
    Completed,
    FeedbackCompleted,
    Error,
}

impl Phase {
    /// Wire name of the phase.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Initialized => "initialized",
            Self::Searching => "searching",
            Self::Found => "found",
            Self::Recommending => "recommending",
            Self::AwaitFeedback => "await_feedback",
            Self::ProcessingFeedback => "processing_feedback",
            Self::Completed => "completed",
            Self::FeedbackCompleted => "feedback_completed",
            Self::Error => "error",
        }
    }

    /// Phases after which nothing more may be emitted.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Completed | Self::FeedbackCompleted | Self::Error
        )
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Progress of the restaurant discovery step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchStage {
    #[default]
    NotStarted,
    Searching,
    Found,
}

/// A single restaurant record.
///
/// Records are immutable once emitted; the client reconciles them by `id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Restaurant {
    pub id: String,
    pub name: String,
    pub cuisine: Option<String>,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub price_range: String,
    pub rating: Option<f64>,
    pub url: Option<String>,
    pub image_url: Option<String>,
}

impl Restaurant {
    /// Create a restaurant with only the identifying fields set.
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            cuisine: None,
            address: String::new(),
            price_range: String::new(),
            rating: None,
            url: None,
            image_url: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusSection {
    pub phase: Phase,
    pub error: Option<String>,
    /// RFC 3339 time of the last phase change.
    pub timestamp: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchSection {
    pub query: String,
    pub location: String,
    pub stage: SearchStage,
    pub restaurants_found: u64,
    pub restaurants: Vec<Restaurant>,
    pub completed: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingSection {
    pub progress: f64,
    pub phases: Vec<String>,
    pub current_phase: String,
    pub recommendations: Option<String>,
    pub completed: bool,
    pub in_progress: bool,
    pub feedback: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UiSection {
    pub show_restaurants: bool,
    pub show_progress: bool,
    pub active_tab: String,
    pub show_feedback_prompt: bool,
    pub feedback_options: Vec<String>,
}

/// Canonical state tree for one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateDocument {
    pub status: StatusSection,
    pub search: SearchSection,
    pub processing: ProcessingSection,
    pub ui: UiSection,
}

impl StateDocument {
    /// A document for a fresh run over `query`, before any inference.
    #[must_use]
    pub fn new(query: impl Into<String>, feedback_options: Vec<String>) -> Self {
        Self {
            status: StatusSection {
                phase: Phase::Idle,
                error: None,
                timestamp: Utc::now().to_rfc3339(),
            },
            search: SearchSection {
                query: query.into(),
                location: String::new(),
                stage: SearchStage::NotStarted,
                restaurants_found: 0,
                restaurants: Vec::new(),
                completed: false,
            },
            processing: ProcessingSection {
                progress: 0.0,
                phases: WORKFLOW_PHASES.iter().map(ToString::to_string).collect(),
                current_phase: String::new(),
                recommendations: None,
                completed: false,
                in_progress: false,
                feedback: None,
            },
            ui: UiSection {
                show_restaurants: false,
                show_progress: true,
                active_tab: "chat".to_string(),
                show_feedback_prompt: false,
                feedback_options,
            },
        }
    }

    /// Serialize to the JSON tree the client mirrors.
    pub fn to_value(&self) -> serde_json::Result<serde_json::Value> {
        serde_json::to_value(self)
    }

    /// Record a phase change and refresh the timestamp.
    pub(crate) fn set_phase(&mut self, phase: Phase) {
        self.status.phase = phase;
        self.status.timestamp = Utc::now().to_rfc3339();
    }

    /// Raise progress to `ratio`, clamped to `[0, 1]`.
    ///
    /// Returns `false` (and leaves the document untouched) when the value
    /// would move progress backwards.
    pub(crate) fn raise_progress(&mut self, ratio: f64) -> bool {
        let ratio = if ratio.is_nan() { 0.0 } else { ratio.clamp(0.0, 1.0) };
        if ratio < self.processing.progress {
            return false;
        }
        self.processing.progress = ratio;
        true
    }

    /// Append a restaurant unless its id is already present.
    pub(crate) fn push_restaurant(&mut self, restaurant: Restaurant) -> bool {
        if self
            .search
            .restaurants
            .iter()
            .any(|r| r.id == restaurant.id)
        {
            return false;
        }
        self.search.restaurants.push(restaurant);
        self.search.restaurants_found = self.search.restaurants.len() as u64;
        true
    }

    /// Swap in a revised list, keeping the first record per id.
    pub(crate) fn replace_restaurants(&mut self, restaurants: Vec<Restaurant>) {
        self.search.restaurants.clear();
        for r in restaurants {
            self.push_restaurant(r);
        }
        self.search.restaurants_found = self.search.restaurants.len() as u64;
    }
}
