//! # Archive API
//!
//! Completed missions, newest first.

use axum::{
    extract::{Path, Query, State},
    routing::{delete, get},
    Json, Router,
};
use nexus_core::state::MissionRecord;
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use super::{ApiError, ApiResponse};
use crate::SharedState;

const DEFAULT_LIMIT: usize = 50;

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ListQuery {
    /// Maximum records to return (default 50)
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ArchiveEntry {
    pub id: String,
    pub goal: String,
    pub report: String,
    pub timestamp: String,
}

impl From<MissionRecord> for ArchiveEntry {
    fn from(record: MissionRecord) -> Self {
        Self {
            id: record.id,
            goal: record.goal,
            report: record.report,
            timestamp: record.timestamp.to_rfc3339(),
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ArchiveListResponse {
    pub missions: Vec<ArchiveEntry>,
}

pub fn routes() -> Router<SharedState> {
    Router::new()
        .route("/", get(list_archive))
        .route("/:id", delete(delete_record))
}

/// List archived missions
#[utoipa::path(
    get,
    path = "/api/v1/archive",
    tag = "archive",
    params(ListQuery),
    responses(
        (status = 200, description = "Archived missions, newest first", body = ArchiveListResponse)
    )
)]
pub async fn list_archive(
    State(state): State<SharedState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<ArchiveListResponse>, ApiError> {
    let records = state.archive.recent(query.limit.unwrap_or(DEFAULT_LIMIT))?;
    Ok(Json(ArchiveListResponse {
        missions: records.into_iter().map(ArchiveEntry::from).collect(),
    }))
}

/// Delete one archived mission
#[utoipa::path(
    delete,
    path = "/api/v1/archive/{id}",
    tag = "archive",
    params(("id" = String, Path, description = "Mission record id")),
    responses(
        (status = 200, description = "Record deleted", body = ApiResponse),
        (status = 404, description = "No such record", body = super::ErrorResponse)
    )
)]
pub async fn delete_record(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse>, ApiError> {
    if state.archive.delete(&id)? {
        Ok(Json(ApiResponse::ok(format!("Deleted {}", id))))
    } else {
        Err(ApiError::NotFound(format!("No archived mission {}", id)))
    }
}
