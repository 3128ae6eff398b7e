//! HTTP and websocket front door for Blogochain
//!
//! Serves the viewer websocket at `/ws`, plain JSON endpoints under `/api`,
//! and static dashboard files for everything else.

use axum::{
    extract::{ws::WebSocketUpgrade, Query, Request, State},
    http::{self, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    routing::post,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Instant;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::services::ServeDir;

use crate::blockchain::Block;
use crate::commands::{failure_message, Commands, ValidationReport};
use crate::config::SessionConfig;
use crate::error::ChainError;
use crate::session;

/// Shared state handed to every route.
#[derive(Debug, Clone)]
pub struct AppState {
    pub commands: Commands,
    pub session: SessionConfig,
}

impl AppState {
    pub fn new(commands: Commands, session: SessionConfig) -> Self {
        Self { commands, session }
    }
}

// ============================================================================
// API Error Handling
// ============================================================================

#[derive(Debug)]
pub enum ApiError {
    InvalidInput(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::InvalidInput(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        (status, Json(ErrorResponse { error: message })).into_response()
    }
}

impl From<ChainError> for ApiError {
    fn from(err: ChainError) -> Self {
        match err {
            ChainError::InvalidInput(_) | ChainError::InvalidDifficulty(_) => {
                ApiError::InvalidInput(failure_message(&err))
            }
            other => ApiError::Internal(other.to_string()),
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct AddTransactionRequest {
    #[serde(default)]
    pub data: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MineResponse {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block: Option<Block>,
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    #[serde(default)]
    pub q: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SearchResponse {
    pub results: Vec<Block>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DifficultyBody {
    pub difficulty: Option<i64>,
}

// ============================================================================
// Middleware
// ============================================================================

/// Logs method, path, status and duration for every request.
async fn logging_middleware(req: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    let response = next.run(req).await;

    tracing::info!(
        method = %method,
        path = %path,
        status = %response.status().as_u16(),
        duration_ms = %start.elapsed().as_millis(),
        "api.request"
    );

    response
}

// ============================================================================
// API Server
// ============================================================================

/// Build the router with every endpoint. `static_dir` is served as the
/// fallback for unknown paths.
pub fn build_api_router(state: AppState, static_dir: &str) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::mirror_request())
        .allow_methods(vec![
            http::Method::GET,
            http::Method::POST,
            http::Method::OPTIONS,
        ])
        .allow_headers(vec![http::header::CONTENT_TYPE]);

    let api_routes = Router::new()
        .route("/tx", post(add_transaction))
        .route("/pending", get(get_pending))
        .route("/mine", post(mine_block))
        .route("/chain", get(get_chain))
        .route("/search", get(search))
        .route("/validate", get(validate))
        .route("/difficulty", get(get_difficulty).post(set_difficulty))
        .route("/health", get(health_check))
        .layer(middleware::from_fn(logging_middleware));

    Router::new()
        .nest("/api", api_routes)
        .route("/ws", get(websocket))
        .with_state(state)
        .fallback_service(ServeDir::new(static_dir))
        .layer(cors)
}

/// Bind `addr` and serve until the process stops.
pub async fn run_api_server(state: AppState, addr: SocketAddr, static_dir: &str) -> Result<(), ChainError> {
    let app = build_api_router(state, static_dir);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    serve(listener, app).await
}

/// Serve `app` on an already bound listener.
pub async fn serve(listener: tokio::net::TcpListener, app: Router) -> Result<(), ChainError> {
    tracing::info!(addr = ?listener.local_addr().ok(), "api server listening");
    axum::serve(listener, app).await?;
    Ok(())
}

// ============================================================================
// Route Handlers
// ============================================================================

async fn websocket(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    let AppState { commands, session: config } = state;
    ws.max_message_size(config.max_message_size)
        .on_upgrade(move |socket| session::run(socket, commands, config))
}

async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let summary = state.commands.ledger().summary();
    Json(serde_json::json!({
        "status": "healthy",
        "chain_len": summary.chain_len,
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

async fn add_transaction(
    State(state): State<AppState>,
    Json(req): Json<AddTransactionRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    state.commands.add_transaction(req.data).await?;
    Ok(Json(MessageResponse {
        message: "Transaction added successfully".to_string(),
    }))
}

async fn get_pending(State(state): State<AppState>) -> Result<Json<Vec<String>>, ApiError> {
    Ok(Json(state.commands.pending().await?))
}

async fn mine_block(State(state): State<AppState>) -> Result<Json<MineResponse>, ApiError> {
    let block = state.commands.mine_block().await?;
    let message = if block.is_some() {
        "Block mined successfully"
    } else {
        "No pending transactions to mine"
    };
    Ok(Json(MineResponse {
        message: message.to_string(),
        block,
    }))
}

async fn get_chain(State(state): State<AppState>) -> Result<Json<Vec<Block>>, ApiError> {
    Ok(Json(state.commands.chain().await?))
}

async fn search(
    State(state): State<AppState>,
    Query(params): Query<SearchQuery>,
) -> Result<Json<SearchResponse>, ApiError> {
    if params.q.is_empty() {
        return Err(ApiError::InvalidInput(
            "Query parameter 'q' is required".to_string(),
        ));
    }
    let results = state.commands.search(params.q).await?;
    Ok(Json(SearchResponse { results }))
}

async fn validate(State(state): State<AppState>) -> Result<Json<ValidationReport>, ApiError> {
    Ok(Json(state.commands.validate().await?))
}

async fn get_difficulty(State(state): State<AppState>) -> Result<Json<DifficultyBody>, ApiError> {
    let difficulty = state.commands.difficulty().await?;
    Ok(Json(DifficultyBody {
        difficulty: Some(i64::from(difficulty)),
    }))
}

async fn set_difficulty(
    State(state): State<AppState>,
    Json(body): Json<DifficultyBody>,
) -> Result<Json<DifficultyBody>, ApiError> {
    let difficulty = state.commands.set_difficulty(body.difficulty).await?;
    Ok(Json(DifficultyBody {
        difficulty: Some(i64::from(difficulty)),
    }))
}
