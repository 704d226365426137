use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;

use crate::enrich::{EnrichmentJob, JobManager, StartOutcome};
use crate::error::EngineError;
use crate::model::AggregateResult;
use crate::query::{QueryEngine, TopVideosRequest};

#[derive(Clone)]
pub struct AppState {
    pub queries: Arc<QueryEngine>,
    pub jobs: Arc<JobManager>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/api/top-videos", post(top_videos))
        .route(
            "/api/collections/{id}/enrich",
            post(start_enrichment).get(enrichment_status),
        )
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

/// JSON error body with a status derived from the engine error.
pub struct ApiError(EngineError);

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            EngineError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            EngineError::CollectionNotFound(_) => StatusCode::NOT_FOUND,
            EngineError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

async fn top_videos(
    State(state): State<AppState>,
    Json(req): Json<TopVideosRequest>,
) -> Result<Json<AggregateResult>, ApiError> {
    // Dropping the request future (client gone) cancels the walk.
    let cancel = CancellationToken::new();
    let _cancel_on_drop = cancel.clone().drop_guard();
    let result = state.queries.top_videos(&req, &cancel).await?;
    Ok(Json(result))
}

async fn start_enrichment(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<StartOutcome>), ApiError> {
    let outcome = state.jobs.start(&id)?;
    let status = if outcome.started {
        StatusCode::ACCEPTED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(outcome)))
}

async fn enrichment_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<EnrichmentJob>, ApiError> {
    Ok(Json(state.jobs.status(&id)?))
}
