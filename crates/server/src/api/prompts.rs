//! # Prompt Template API
//!
//! System prompts for the four swarm roles, editable at runtime. Edits take
//! effect on the next collaborator call.

use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::ApiError;
use crate::SharedState;

#[derive(Debug, Serialize, ToSchema)]
pub struct PromptListItem {
    pub slug: String,
    pub version: i32,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct PromptListResponse {
    pub prompts: Vec<PromptListItem>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct PromptResponse {
    pub slug: String,
    pub content: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdatePromptRequest {
    pub content: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct UpdatePromptResponse {
    pub slug: String,
    pub new_version: i32,
}

pub fn routes() -> Router<SharedState> {
    Router::new()
        .route("/", get(list_prompts))
        .route("/:slug", get(get_prompt).put(update_prompt))
}

/// List all prompts
#[utoipa::path(
    get,
    path = "/api/v1/prompts",
    tag = "prompts",
    responses(
        (status = 200, description = "List of prompts", body = PromptListResponse)
    )
)]
pub async fn list_prompts(
    State(state): State<SharedState>,
) -> Result<Json<PromptListResponse>, ApiError> {
    let prompts = state
        .db
        .list_prompts()?
        .into_iter()
        .map(|(slug, version)| PromptListItem { slug, version })
        .collect();
    Ok(Json(PromptListResponse { prompts }))
}

/// Get a prompt by slug
#[utoipa::path(
    get,
    path = "/api/v1/prompts/{slug}",
    tag = "prompts",
    params(("slug" = String, Path, description = "Prompt slug")),
    responses(
        (status = 200, description = "Prompt content", body = PromptResponse),
        (status = 404, description = "Unknown slug", body = super::ErrorResponse)
    )
)]
pub async fn get_prompt(
    State(state): State<SharedState>,
    Path(slug): Path<String>,
) -> Result<Json<PromptResponse>, ApiError> {
    let content = state
        .db
        .get_prompt(&slug)
        .map_err(|_| ApiError::NotFound(format!("Prompt '{}' not found", slug)))?;
    Ok(Json(PromptResponse { slug, content }))
}

/// Replace a prompt (bumps its version)
#[utoipa::path(
    put,
    path = "/api/v1/prompts/{slug}",
    tag = "prompts",
    params(("slug" = String, Path, description = "Prompt slug")),
    request_body = UpdatePromptRequest,
    responses(
        (status = 200, description = "Prompt updated", body = UpdatePromptResponse)
    )
)]
pub async fn update_prompt(
    State(state): State<SharedState>,
    Path(slug): Path<String>,
    Json(req): Json<UpdatePromptRequest>,
) -> Result<Json<UpdatePromptResponse>, ApiError> {
    let new_version = state.db.set_prompt(&slug, &req.content)?;
    Ok(Json(UpdatePromptResponse { slug, new_version }))
}
