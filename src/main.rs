use axum::{
    extract::State,
    http::StatusCode,
    response::Json,
    routing::post,
    Router,
};
use serde::Deserialize;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use veilleur::{tools, AppState, Settings};

fn default_max_results() -> usize {
    3
}
fn default_use_cache() -> bool {
    true
}
fn default_top_k() -> usize {
    5
}
fn default_n_last() -> usize {
    5
}

#[derive(Debug, Deserialize)]
struct ResearchRequest {
    topic: String,
    #[serde(default = "default_max_results")]
    max_results: usize,
    #[serde(default = "default_use_cache")]
    use_cache: bool,
}

#[derive(Debug, Deserialize)]
struct MemorySearchRequest {
    query: String,
    #[serde(default = "default_top_k")]
    top_k: usize,
}

#[derive(Debug, Deserialize)]
struct HistoryRequest {
    #[serde(default = "default_n_last")]
    n_last: usize,
}

#[derive(Debug, Deserialize)]
struct ClearMemoryRequest {
    #[serde(default)]
    confirm: bool,
}

type ToolResponse = Result<Json<serde_json::Value>, (StatusCode, Json<serde_json::Value>)>;

fn ok(result: String) -> ToolResponse {
    Ok(Json(serde_json::json!({ "result": result })))
}

fn err(e: veilleur::PipelineError) -> ToolResponse {
    Err((
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(serde_json::json!({ "error": e.to_string() })),
    ))
}

async fn handle_research(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ResearchRequest>,
) -> ToolResponse {
    match tools::research_complete_pipeline_with_memory(
        &state,
        &request.topic,
        request.max_results,
        request.use_cache,
    )
    .await
    {
        Ok(markdown) => ok(markdown),
        Err(e) => err(e),
    }
}

async fn handle_memory_search(
    State(state): State<Arc<AppState>>,
    Json(request): Json<MemorySearchRequest>,
) -> ToolResponse {
    match tools::search_in_memory(&state, &request.query, request.top_k).await {
        Ok(result) => ok(result),
        Err(e) => err(e),
    }
}

async fn handle_history(
    State(state): State<Arc<AppState>>,
    Json(request): Json<HistoryRequest>,
) -> ToolResponse {
    match tools::get_research_history(&state, request.n_last).await {
        Ok(result) => ok(result),
        Err(e) => err(e),
    }
}

async fn handle_clear_memory(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ClearMemoryRequest>,
) -> ToolResponse {
    match tools::clear_memory(&state, request.confirm).await {
        Ok(result) => ok(result),
        Err(e) => err(e),
    }
}

fn port_from_env() -> u16 {
    std::env::var("VEILLEUR_PORT")
        .or_else(|_| std::env::var("PORT"))
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(8787)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // `.env` first so the filter and settings see it.
    let _ = dotenvy::dotenv();

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,tower_http=warn"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let settings = Settings::from_env();
    settings.validate()?;

    info!("starting veilleur research pipeline server");
    let state = Arc::new(AppState::initialize(settings).await?);

    let app = Router::new()
        .route(
            "/tools/research_complete_pipeline_with_memory",
            post(handle_research),
        )
        .route("/tools/search_in_memory", post(handle_memory_search))
        .route("/tools/get_research_history", post(handle_history))
        .route("/tools/clear_memory", post(handle_clear_memory))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let port = port_from_env();
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    info!("listening on 0.0.0.0:{}", port);
    axum::serve(listener, app).await?;
    Ok(())
}
