use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::state::patch::PatchOp;

/// Author of a streamed text message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Assistant,
    User,
}

/// Whether a run starts a new search or resumes a suspended one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunKind {
    Search,
    Resume,
}

/// Identity of one run. Fixed for the run's lifetime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunContext {
    pub thread_id: String,
    pub run_id: String,
    pub message_id: String,
    pub kind: RunKind,
}

impl RunContext {
    #[must_use]
    pub fn new(thread_id: impl Into<String>, run_id: impl Into<String>, kind: RunKind) -> Self {
        Self {
            thread_id: thread_id.into(),
            run_id: run_id.into(),
            message_id: uuid::Uuid::new_v4().to_string(),
            kind,
        }
    }
}

/// Protocol events sent to the client.
///
/// Variants serialize with AG-UI type tags (`RUN_STARTED`, `STATE_DELTA`, ...).
/// The message id and sequence marker live on the [`Envelope`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Event {
    // ─────────────────────────────────────────────────────────────────────
    // Lifecycle
    // ─────────────────────────────────────────────────────────────────────
    #[serde(rename = "RUN_STARTED")]
    RunStarted {
        #[serde(rename = "threadId")]
        thread_id: String,
        #[serde(rename = "runId")]
        run_id: String,
    },

    #[serde(rename = "RUN_FINISHED")]
    RunFinished {
        #[serde(rename = "threadId")]
        thread_id: String,
        #[serde(rename = "runId")]
        run_id: String,
    },

    /// Terminal failure. `code` is the error kind, e.g. `UnknownThread`.
    #[serde(rename = "RUN_ERROR")]
    RunError { message: String, code: String },

    // ─────────────────────────────────────────────────────────────────────
    // State
    // ─────────────────────────────────────────────────────────────────────
    #[serde(rename = "STATE_SNAPSHOT")]
    StateSnapshot { snapshot: Value },

    #[serde(rename = "STATE_DELTA")]
    StateDelta { delta: Vec<PatchOp> },

    // ─────────────────────────────────────────────────────────────────────
    // Text
    // ─────────────────────────────────────────────────────────────────────
    #[serde(rename = "TEXT_MESSAGE_START")]
    TextMessageStart { role: Role },

    #[serde(rename = "TEXT_MESSAGE_CONTENT")]
    TextMessageContent { delta: String },

    #[serde(rename = "TEXT_MESSAGE_END")]
    TextMessageEnd {},

    // ─────────────────────────────────────────────────────────────────────
    // Tool calls
    // ─────────────────────────────────────────────────────────────────────
    #[serde(rename = "TOOL_CALL_START")]
    ToolCallStart {
        #[serde(rename = "toolCallId")]
        tool_call_id: String,
        #[serde(rename = "toolCallName")]
        tool_call_name: String,
    },

    /// Arguments as a JSON-encoded string.
    #[serde(rename = "TOOL_CALL_ARGS")]
    ToolCallArgs {
        #[serde(rename = "toolCallId")]
        tool_call_id: String,
        delta: String,
    },

    #[serde(rename = "TOOL_CALL_END")]
    ToolCallEnd {
        #[serde(rename = "toolCallId")]
        tool_call_id: String,
    },
}

impl Event {
    /// AG-UI type tag, also used as the SSE event name.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::RunStarted { .. } => "RUN_STARTED",
            Self::RunFinished { .. } => "RUN_FINISHED",
            Self::RunError { .. } => "RUN_ERROR",
            Self::StateSnapshot { .. } => "STATE_SNAPSHOT",
            Self::StateDelta { .. } => "STATE_DELTA",
            Self::TextMessageStart { .. } => "TEXT_MESSAGE_START",
            Self::TextMessageContent { .. } => "TEXT_MESSAGE_CONTENT",
            Self::TextMessageEnd {} => "TEXT_MESSAGE_END",
            Self::ToolCallStart { .. } => "TOOL_CALL_START",
            Self::ToolCallArgs { .. } => "TOOL_CALL_ARGS",
            Self::ToolCallEnd { .. } => "TOOL_CALL_END",
        }
    }

    /// Events after which the stream must close.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::RunFinished { .. } | Self::RunError { .. })
    }

    pub fn run_started(ctx: &RunContext) -> Self {
        Self::RunStarted {
            thread_id: ctx.thread_id.clone(),
            run_id: ctx.run_id.clone(),
        }
    }

    pub fn run_finished(ctx: &RunContext) -> Self {
        Self::RunFinished {
            thread_id: ctx.thread_id.clone(),
            run_id: ctx.run_id.clone(),
        }
    }

    pub fn run_error(message: impl Into<String>, code: impl Into<String>) -> Self {
        Self::RunError {
            message: message.into(),
            code: code.into(),
        }
    }

    pub fn text_start() -> Self {
        Self::TextMessageStart {
            role: Role::Assistant,
        }
    }

    pub fn text_content(delta: impl Into<String>) -> Self {
        Self::TextMessageContent {
            delta: delta.into(),
        }
    }

    pub fn tool_call_start(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self::ToolCallStart {
            tool_call_id: id.into(),
            tool_call_name: name.into(),
        }
    }

    /// Tool arguments, JSON-encoded into the `delta` string.
    pub fn tool_call_args(id: impl Into<String>, args: &Value) -> Self {
        Self::ToolCallArgs {
            tool_call_id: id.into(),
            delta: args.to_string(),
        }
    }

    pub fn tool_call_end(id: impl Into<String>) -> Self {
        Self::ToolCallEnd {
            tool_call_id: id.into(),
        }
    }
}

/// An [`Event`] as framed on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Position of the event within its run, starting at 0.
    pub seq: u64,
    #[serde(rename = "messageId")]
    pub message_id: String,
    #[serde(flatten)]
    pub event: Event,
}

/// Generate a short tool call id in the `call_xxxxxxxx` form clients expect.
#[must_use]
pub fn tool_call_id() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("call_{}", &id[..8])
}
