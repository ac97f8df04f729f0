use crate::config::ServeConfig;
use crate::monitor::Monitor;
use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;

#[derive(Clone)]
struct AppState {
    monitor: Monitor,
}

/// Routes for the webhook trigger and a health probe.
pub fn router(monitor: Monitor) -> Router {
    let state = AppState { monitor };

    Router::new()
        .route("/api/health", get(health))
        .route("/api/session_start", post(session_start))
        .with_state(state)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::DEBUG))
                .on_response(DefaultOnResponse::new().level(Level::DEBUG)),
        )
}

/// Serve until the monitor's shutdown signal fires.
pub async fn run(
    config: ServeConfig,
    monitor: Monitor,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let shutdown = monitor.shutdown_signal();
    let app = router(monitor);

    let addr = format!("{}:{}", config.bind, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let local_addr = listener.local_addr()?;
    tracing::info!("listening on {local_addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    tracing::info!("http server stopped");
    Ok(())
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({"ok": true}))
}

/// Webhook target. Always 200; the caller never learns the outcome.
async fn session_start(State(state): State<AppState>) -> StatusCode {
    state.monitor.notify_session_start().await;
    StatusCode::OK
}
