//! Local HTTP dashboard: status, command list, config editing, restart and
//! recent logs.

pub mod logs;

use std::collections::BTreeMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    extract::{DefaultBodyLimit, State},
    http::StatusCode,
    response::Html,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use tracing::{error, info};

use crate::bot::{self, SharedState};
use crate::config::{Config, REDACTED};

const BODY_LIMIT: usize = 1024 * 1024;

const INDEX_HTML: &str = r#"<!doctype html>
<html>
<head><meta charset="utf-8"><title>mediabot</title></head>
<body>
<h1>mediabot</h1>
<pre id="status">loading...</pre>
<pre id="logs"></pre>
<script>
async function refresh() {
  const status = await fetch('/api/status').then(r => r.json());
  document.getElementById('status').textContent = JSON.stringify(status, null, 2);
  const logs = await fetch('/api/logs').then(r => r.json());
  document.getElementById('logs').textContent = logs.lines.join('\n');
}
refresh();
setInterval(refresh, 5000);
</script>
</body>
</html>
"#;

#[derive(Debug, Serialize)]
struct StatusResponse {
    uptime_secs: u64,
    started_at: String,
    connected: bool,
    messages: u64,
    active_cooldowns: usize,
}

#[derive(Debug, Serialize)]
struct OkResponse {
    ok: bool,
}

#[derive(Debug, Serialize)]
struct LogsResponse {
    lines: Vec<String>,
}

pub fn router(state: Arc<SharedState>) -> Router {
    Router::new()
        .route("/", get(serve_index))
        .route("/api/status", get(status))
        .route("/api/commands", get(commands))
        .route("/api/config", get(get_config).post(save_config))
        .route("/api/restart", post(restart))
        .route("/api/logs", get(logs))
        .layer(DefaultBodyLimit::max(BODY_LIMIT))
        .with_state(state)
}

pub async fn serve(state: Arc<SharedState>, bind: String) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("Failed to bind dashboard to {bind}"))?;
    info!("Dashboard listening on http://{}", bind);
    axum::serve(listener, router(state))
        .await
        .context("Dashboard server error")
}

async fn serve_index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

async fn status(State(state): State<Arc<SharedState>>) -> Json<StatusResponse> {
    Json(StatusResponse {
        uptime_secs: bot::uptime(&state).as_secs(),
        started_at: state.started_at.to_rfc3339(),
        connected: state.stats.connected.load(Ordering::SeqCst),
        messages: state.stats.messages.load(Ordering::Relaxed),
        active_cooldowns: state.commands.active_cooldowns().await,
    })
}

async fn commands(State(state): State<Arc<SharedState>>) -> Json<BTreeMap<String, String>> {
    Json(state.commands.list().await.into_iter().collect())
}

async fn get_config(State(state): State<Arc<SharedState>>) -> Json<Config> {
    Json(state.config.read().await.redacted())
}

/// Replaces the config and writes it to disk. A redacted or empty token
/// keeps the current one.
async fn save_config(
    State(state): State<Arc<SharedState>>,
    Json(mut incoming): Json<Config>,
) -> Result<Json<OkResponse>, (StatusCode, String)> {
    let mut config = state.config.write().await;
    let token = incoming.telegram.bot_token.trim();
    if token.is_empty() || token == REDACTED {
        incoming.telegram.bot_token = config.telegram.bot_token.clone();
    }
    incoming
        .validate()
        .map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?;
    incoming.save(&state.config_path).map_err(|e| {
        error!("Failed to save config: {:#}", e);
        (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
    })?;
    *config = incoming;
    info!("Configuration updated from dashboard");
    Ok(Json(OkResponse { ok: true }))
}

async fn restart(State(state): State<Arc<SharedState>>) -> Json<OkResponse> {
    state.request_restart();
    Json(OkResponse { ok: true })
}

async fn logs(State(state): State<Arc<SharedState>>) -> Json<LogsResponse> {
    Json(LogsResponse {
        lines: state.logs.lines(),
    })
}
