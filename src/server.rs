//! Read-only HTTP browser API.
//!
//! A thin JSON view over the story log for browser UIs and exports; nothing
//! here mutates the stores. For any story the API reconstructs its full
//! provenance (the documents that contributed context).
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (returns version) |
//! | `GET`  | `/stats` | Corpus and story-log statistics |
//! | `GET`  | `/stories` | List stories (`limit`, `offset`, `style`, `q`) |
//! | `GET`  | `/stories/{id}` | One story with its provenance documents |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "not_found", "message": "story not found: ..." } }
//! ```
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted to support browser-based
//! clients.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::browse::{gather_statistics, StoryRecord};
use crate::config::Config;
use crate::db;
use crate::store::StoryStore;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
struct AppState {
    pool: SqlitePool,
    stories: Arc<StoryStore>,
}

/// Start the read-only browser API on the configured bind address.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let pool = db::connect(config).await?;
    let state = AppState {
        pool: pool.clone(),
        stories: Arc::new(StoryStore::new(pool)),
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/health", get(handle_health))
        .route("/stats", get(handle_stats))
        .route("/stories", get(handle_list_stories))
        .route("/stories/{id}", get(handle_get_story))
        .layer(cors)
        .with_state(state);

    let bind_addr = config.server.bind.clone();
    println!("story browser listening on http://{}", bind_addr);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found".to_string(),
        message: message.into(),
    }
}

fn internal(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal".to_string(),
        message: message.into(),
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ GET /stats ============

async fn handle_stats(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, AppError> {
    let stats = gather_statistics(&state.pool)
        .await
        .map_err(|e| internal(e.to_string()))?;
    let value = serde_json::to_value(&stats).map_err(|e| internal(e.to_string()))?;
    Ok(Json(value))
}

// ============ GET /stories ============

#[derive(Deserialize)]
struct ListParams {
    #[serde(default = "default_limit")]
    limit: i64,
    #[serde(default)]
    offset: i64,
    style: Option<String>,
    q: Option<String>,
}

fn default_limit() -> i64 {
    20
}

#[derive(Serialize)]
struct StoryListResponse {
    stories: Vec<StoryRecord>,
}

async fn handle_list_stories(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<Json<StoryListResponse>, AppError> {
    if params.limit < 1 || params.limit > 500 {
        return Err(bad_request("limit must be in 1..=500"));
    }
    if params.offset < 0 {
        return Err(bad_request("offset must be >= 0"));
    }

    let stories = match (&params.q, &params.style) {
        (Some(q), _) => state.stories.search(q, params.limit, params.offset).await,
        (None, Some(style)) => {
            state
                .stories
                .by_style(style, params.limit, params.offset)
                .await
        }
        (None, None) => state.stories.list(params.limit, params.offset).await,
    }
    .map_err(|e| internal(e.to_string()))?;

    let mut records = Vec::with_capacity(stories.len());
    for story in stories {
        let record = StoryRecord::build(&state.stories, story)
            .await
            .map_err(|e| internal(e.to_string()))?;
        records.push(record);
    }

    Ok(Json(StoryListResponse { stories: records }))
}

// ============ GET /stories/{id} ============

async fn handle_get_story(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<StoryRecord>, AppError> {
    let story = state
        .stories
        .get(&id)
        .await
        .map_err(|e| internal(e.to_string()))?
        .ok_or_else(|| not_found(format!("story not found: {}", id)))?;

    let record = StoryRecord::build(&state.stories, story)
        .await
        .map_err(|e| internal(e.to_string()))?;

    Ok(Json(record))
}
