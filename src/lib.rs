//! Crew AG-UI adapter
//!
//! Streams a restaurant-finder crew to a browser over the AG-UI event
//! protocol, and suspends the run while it waits for the user's feedback.
//!
//! # Architecture
//!
//! - **Server**: Axum `POST /agent` returning server-sent events
//! - **Runs**: one task per run driving a phase state machine
//! - **Workflow**: a blocking crew on tokio's blocking pool, behind a bounded queue
//! - **Registry**: suspended runs keyed by thread id, taken once on resume
//!
//! # Modules
//!
//! - [`protocol`]: events, envelopes, SSE framing and the client-side reducer
//! - [`state`]: the state document and its patch engine
//! - [`run`]: run controller and service
//! - [`workflow`]: engine trait, bridge and the bundled crews
//! - [`session`]: suspended-run registry
//! - [`llm`]: chat-completions client used by the model-backed crew

// Allow pedantic clippy warnings that don't add value for this codebase
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::missing_fields_in_debug)]
#![allow(clippy::assigning_clones)]
#![allow(clippy::match_same_arms)]
#![allow(clippy::cargo_common_metadata)]
#![allow(clippy::multiple_crate_versions)]
#![allow(clippy::unused_async)]

pub mod config;
pub mod error;
pub mod llm;
pub mod protocol;
pub mod run;
pub mod server;
pub mod session;
pub mod state;
pub mod telemetry;
pub mod workflow;

use std::sync::Arc;

use crate::config::AppConfig;
use crate::run::RunService;

/// Application state shared across all handlers.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Starts and resumes runs; owns the suspended-run registry.
    pub runs: RunService,
    /// Global configuration.
    pub config: Arc<AppConfig>,
}
