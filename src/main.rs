//! Crew AG-UI adapter server
//!
//! Entry point: loads configuration, picks the workflow engine and serves
//! `POST /agent` until interrupted.

// Allow pedantic clippy warnings that don't add value for this codebase
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::map_err_ignore)]

use mimalloc::MiMalloc;

/// Global allocator for improved performance (M-MIMALLOC-APPS).
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use dotenvy::dotenv;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crew_agui::AppState;
use crew_agui::config::{AppConfig, EngineKind, load_llm_settings};
use crew_agui::run::{RunService, RunSettings};
use crew_agui::session::SessionRegistry;
use crew_agui::workflow::WorkflowEngine;
use crew_agui::workflow::chat::ChatCrew;
use crew_agui::workflow::scripted::ScriptedCrew;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env (if present)
    let _ = dotenv();

    crew_agui::telemetry::init();

    let config = Arc::new(AppConfig::load().context("failed to load configuration")?);

    let engine: Arc<dyn WorkflowEngine> = match config.workflow.engine {
        EngineKind::Chat => {
            let settings = load_llm_settings()
                .map_err(anyhow::Error::msg)
                .context("chat engine needs LLM settings")?;
            info!(
                name: "llm.config.loaded",
                base_url = %settings.base_url,
                model = %settings.model,
                "LLM configuration loaded"
            );
            Arc::new(ChatCrew::new(settings, tokio::runtime::Handle::current()))
        }
        EngineKind::Scripted => Arc::new(ScriptedCrew::new(Duration::from_millis(
            config.workflow.step_delay_ms,
        ))),
    };
    info!(name: "workflow.engine.selected", engine = engine.name(), "Workflow engine selected");

    let registry = SessionRegistry::new();
    let shutdown = CancellationToken::new();
    let sweeper = registry.spawn_sweeper(
        Duration::from_secs(config.registry.sweep_interval_secs),
        Duration::from_secs(config.registry.ttl_secs),
        shutdown.clone(),
    );

    let state = AppState {
        runs: RunService::new(engine, registry, RunSettings::from(config.as_ref())),
        config,
    };

    let signal = shutdown.clone();
    crew_agui::server::start_server(state, async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for shutdown signal");
        }
        info!(name: "server.shutdown", "Shutdown requested");
        signal.cancel();
    })
    .await?;

    shutdown.cancel();
    let _ = sweeper.await;
    Ok(())
}
