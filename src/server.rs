use axum::{
    Json, Router,
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{
        IntoResponse,
        sse::{Event, KeepAlive, Sse},
    },
    routing::{get, post},
};
use futures::{Stream, StreamExt};
use serde_json::json;
use std::convert::Infallible;
use std::time::Duration;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::AppState;
use crate::protocol::{Envelope, RunAgentInput, encoder};

/// Build the application router.
pub fn router(state: AppState) -> Router {
    let timeout = Duration::from_secs(state.config.server.request_timeout_secs.max(1));

    Router::new()
        .route("/agent", post(api_agent))
        .route("/health", get(api_health))
        // Bounds the time to response headers only; SSE bodies keep flowing.
        .layer(axum::middleware::from_fn(
            move |req: Request, next: Next| async move {
                match tokio::time::timeout(timeout, next.run(req)).await {
                    Ok(res) => res,
                    Err(_) => (StatusCode::REQUEST_TIMEOUT, "Request timed out").into_response(),
                }
            },
        ))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind and serve until `shutdown` resolves.
pub async fn start_server(
    state: AppState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let addr = format!("{}:{}", state.config.server.host, state.config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!(
        name: "server.started",
        address = %addr,
        "Server started"
    );

    axum::serve(listener, router(state).into_make_service())
        .with_graceful_shutdown(shutdown)
        .await?;

    info!(name: "server.stopped", "Server stopped");
    Ok(())
}

/// Turn a run's envelopes into SSE frames, with a keep-alive comment every 15s.
pub fn build_sse_response<S>(stream: S) -> Sse<impl Stream<Item = Result<Event, Infallible>> + Send>
where
    S: Stream<Item = Envelope> + Send + 'static,
{
    let stream = stream.map(|envelope| {
        Ok(encoder::sse_event(&envelope).unwrap_or_else(|e| {
            error!(name: "sse.encode_failed", seq = envelope.seq, error = %e, "Failed to encode event");
            Event::default()
                .id(envelope.seq.to_string())
                .event("RUN_ERROR")
                .data(
                    json!({
                        "type": "RUN_ERROR",
                        "seq": envelope.seq,
                        "messageId": envelope.message_id,
                        "message": e.to_string(),
                        "code": "EncodingFailure",
                    })
                    .to_string(),
                )
        }))
    });

    Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
}

// ─────────────────────────────────────────────────────────────────────────────
// API Handlers
// ─────────────────────────────────────────────────────────────────────────────

/// POST /agent - Start or resume a run and stream its events.
async fn api_agent(State(state): State<AppState>, Json(input): Json<RunAgentInput>) -> impl IntoResponse {
    info!(
        thread_id = %input.thread_id,
        run_id = ?input.run_id,
        messages = input.messages.len(),
        resume = input.feedback.is_some(),
        "Received agent request"
    );

    build_sse_response(state.runs.dispatch(input))
}

/// GET /health - Liveness plus the number of runs awaiting feedback.
async fn api_health(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "pendingThreads": state.runs.registry().len(),
    }))
}
