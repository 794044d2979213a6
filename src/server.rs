use std::path::PathBuf;

use anyhow::{Context, Result};
use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Query, State},
    http::{header, HeaderValue, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::{
    services::ServeDir, set_header::SetResponseHeaderLayer, trace::TraceLayer,
};
use tracing::{error, info};

use crate::{
    error::StoreError,
    report::Report,
    store::Store,
    types::ScanResult,
    view,
};

/// Listener and asset settings for the HTTP server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: String,
    pub static_dir: PathBuf,
    pub max_body_bytes: usize,
}

#[derive(Clone)]
pub struct AppState {
    store: Store,
}

impl AppState {
    pub fn new(store: Store) -> Self {
        Self { store }
    }
}

#[derive(Debug, Deserialize)]
pub struct IndexParams {
    #[serde(default)]
    pub ip: Option<String>,
}

/// Failure of a request. Every variant is answered with a 500 and the error text.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("worker task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let message = self.to_string();
        error!(error = %message, "request failed");
        (StatusCode::INTERNAL_SERVER_ERROR, message).into_response()
    }
}

/// Build the router: report page, IP feed, ingestion endpoint and static files.
pub fn build_router(state: AppState, config: &ServerConfig) -> Router {
    let pages = Router::new()
        .route("/", get(get_index))
        .route("/ips.json", get(get_ips))
        .route("/results", post(post_results))
        .layer(SetResponseHeaderLayer::overriding(
            header::CACHE_CONTROL,
            HeaderValue::from_static("no-store"),
        ));

    let static_svc = ServeDir::new(&config.static_dir);

    Router::new()
        .merge(pages)
        .nest_service("/static", static_svc)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(DefaultBodyLimit::max(config.max_body_bytes)),
        )
        .with_state(state)
}

/// Bind and serve until `shutdown` is cancelled.
pub async fn spawn_server(config: ServerConfig, store: Store, shutdown: CancellationToken) -> Result<()> {
    let app = build_router(AppState::new(store), &config);
    let listener = tokio::net::TcpListener::bind(&config.bind)
        .await
        .with_context(|| format!("failed to bind {}", config.bind))?;
    info!(addr = %listener.local_addr()?, "serving scan report");
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    info!("server stopped");
    Ok(())
}

/// Run a store call on the blocking pool.
async fn run_blocking<T, F>(f: F) -> Result<T, ApiError>
where
    F: FnOnce() -> Result<T, StoreError> + Send + 'static,
    T: Send + 'static,
{
    Ok(tokio::task::spawn_blocking(f).await??)
}

async fn get_index(
    State(app): State<AppState>,
    Query(params): Query<IndexParams>,
) -> Result<Html<String>, ApiError> {
    let filter = params.ip.filter(|s| !s.is_empty());
    let store = app.store.clone();
    let query_filter = filter.clone();
    let rows = run_blocking(move || store.query(query_filter.as_deref())).await?;
    let report = Report::from_rows(rows);
    Ok(Html(view::render_index(&report, filter.as_deref())))
}

async fn get_ips(State(app): State<AppState>) -> Result<Json<Vec<String>>, ApiError> {
    let store = app.store.clone();
    let ips = run_blocking(move || store.distinct_ips()).await?;
    Ok(Json(ips))
}

// Parsed by hand: a bad payload is a malformed-input error, answered like any other failure.
async fn post_results(State(app): State<AppState>, body: Bytes) -> Result<StatusCode, ApiError> {
    let batch: Vec<ScanResult> = serde_json::from_slice(&body)
        .map_err(|e| StoreError::MalformedInput(e.to_string()))?;
    let store = app.store.clone();
    run_blocking(move || store.ingest(&batch)).await?;
    Ok(StatusCode::OK)
}
