//! Inbound run requests.

use serde::Deserialize;
use serde_json::Value;

use crate::error::AdapterError;

/// One chat message from the client.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct InputMessage {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub content: String,
}

/// Body of `POST /agent`. Accepts both camelCase and snake_case keys.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunAgentInput {
    #[serde(alias = "thread_id")]
    pub thread_id: String,
    #[serde(default, alias = "run_id")]
    pub run_id: Option<String>,
    #[serde(default)]
    pub messages: Vec<InputMessage>,
    #[serde(default)]
    pub feedback: Option<String>,
    #[serde(default, alias = "original_location")]
    pub original_location: Option<String>,
}

/// What a request asks the service to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunRequest {
    /// Start a new search with the user's query.
    Search { query: String },
    /// Resume a suspended run. `raw` is the unparsed feedback payload.
    Resume {
        raw: String,
        original_location: Option<String>,
    },
}

impl RunAgentInput {
    /// Content of the last message, or empty.
    #[must_use]
    pub fn last_message(&self) -> &str {
        self.messages.last().map_or("", |m| m.content.as_str())
    }

    /// Decide between a fresh search and a resume.
    ///
    /// An explicit `feedback` field always resumes. Otherwise a last message
    /// that is a JSON feedback object is treated as a resume.
    #[must_use]
    pub fn route(&self) -> RunRequest {
        let original_location = self.original_location.clone().filter(|l| !l.is_empty());

        if let Some(raw) = &self.feedback {
            return RunRequest::Resume {
                raw: raw.clone(),
                original_location,
            };
        }

        let last = self.last_message();
        if looks_like_feedback(last) {
            return RunRequest::Resume {
                raw: last.to_string(),
                original_location,
            };
        }

        RunRequest::Search {
            query: last.trim().to_string(),
        }
    }

    /// The run id to use, generated when the client sent none.
    #[must_use]
    pub fn run_id_or_new(&self) -> String {
        self.run_id
            .clone()
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
    }
}

fn looks_like_feedback(content: &str) -> bool {
    let trimmed = content.trim_start();
    if !trimmed.starts_with('{') {
        return false;
    }
    serde_json::from_str::<Value>(trimmed).is_ok_and(|v| {
        v.get("feedbackText").is_some() || v.get("originalLocation").is_some()
    })
}

/// Feedback after parsing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedbackPayload {
    pub text: String,
    pub original_location: Option<String>,
}

impl FeedbackPayload {
    /// Parse plain-text or JSON feedback.
    ///
    /// JSON must be an object carrying `feedbackText` (or `feedback`) and may
    /// carry `originalLocation` (or `original_location`).
    pub fn parse(raw: &str) -> Result<Self, AdapterError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(AdapterError::MalformedResume("empty feedback".into()));
        }

        if !trimmed.starts_with('{') {
            return Ok(Self {
                text: trimmed.to_string(),
                original_location: None,
            });
        }

        let value: Value = serde_json::from_str(trimmed)
            .map_err(|e| AdapterError::MalformedResume(format!("invalid JSON: {e}")))?;

        let text = ["feedbackText", "feedback"]
            .iter()
            .find_map(|k| value.get(*k).and_then(Value::as_str))
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| {
                AdapterError::MalformedResume("missing feedbackText".into())
            })?;

        let original_location = ["originalLocation", "original_location"]
            .iter()
            .find_map(|k| value.get(*k).and_then(Value::as_str))
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(ToString::to_string);

        Ok(Self {
            text: text.to_string(),
            original_location,
        })
    }
}
