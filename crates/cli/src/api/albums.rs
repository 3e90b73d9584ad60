//! Album API handlers.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use gridforge_core::{Job, JobStatus, JobSummary};
use serde::{Deserialize, Serialize};

use crate::state::AppState;

// ============================================================================
// Request/Response types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct AlbumQueryParams {
    /// Only albums in this status.
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    100
}

#[derive(Debug, Serialize)]
pub struct AlbumListResponse {
    pub albums: Vec<JobSummary>,
    pub total: usize,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

fn error(status: StatusCode, message: impl Into<String>) -> (StatusCode, Json<ErrorResponse>) {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
}

// ============================================================================
// Handlers
// ============================================================================

/// GET /api/v1/albums
///
/// Stored albums, most recently updated first.
pub async fn list_albums(
    State(state): State<Arc<AppState>>,
    Query(params): Query<AlbumQueryParams>,
) -> Result<Json<AlbumListResponse>, impl IntoResponse> {
    let status = match params.status.as_deref() {
        None => None,
        Some(value) => match JobStatus::parse(value) {
            Some(status) => Some(status),
            None => {
                return Err(error(
                    StatusCode::BAD_REQUEST,
                    format!("unknown status: {}", value),
                ))
            }
        },
    };

    match state.store().list() {
        Ok(albums) => {
            let albums: Vec<JobSummary> = albums
                .into_iter()
                .filter(|a| status.is_none_or(|s| a.status == s))
                .take(params.limit)
                .collect();
            let total = albums.len();
            Ok(Json(AlbumListResponse { albums, total }))
        }
        Err(e) => Err(error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())),
    }
}

/// GET /api/v1/albums/{id}
pub async fn get_album(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Job>, impl IntoResponse> {
    match state.store().load(&id) {
        Ok(Some(job)) => Ok(Json(job)),
        Ok(None) => Err(error(
            StatusCode::NOT_FOUND,
            format!("album not found: {}", id),
        )),
        Err(e) => Err(error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())),
    }
}
