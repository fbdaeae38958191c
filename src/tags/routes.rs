//! REST endpoints for tags.

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
};
use serde_json::json;
use tracing::info;

use super::model::{
    AutocompleteParams, CreateTagRequest, ListTagsParams, TagName, autocomplete_limit,
};
use crate::api::AppState;
use crate::auth::CurrentUser;
use crate::error::ApiError;
use crate::extract::{ApiJson, ApiQuery};
use crate::tasks::query::Pagination;
use crate::tasks::routes::parse_id;

/// GET /api/v1/tags
async fn list_tags(
    State(state): State<AppState>,
    user: CurrentUser,
    ApiQuery(params): ApiQuery<ListTagsParams>,
) -> Result<impl IntoResponse, ApiError> {
    let pagination = Pagination::from_parts(params.page, params.per_page)?;
    let page = state
        .db
        .list_tags(&user.id, params.search.as_deref(), pagination)
        .await?;
    Ok(Json(page))
}

/// POST /api/v1/tags
///
/// Upsert: an existing name returns the existing tag.
async fn create_tag(
    State(state): State<AppState>,
    user: CurrentUser,
    ApiJson(body): ApiJson<CreateTagRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let name = TagName::parse(&body.name)?;
    let tag = state.db.get_or_create_tag(&user.id, &name).await?;
    Ok((StatusCode::CREATED, Json(tag)))
}

/// GET /api/v1/tags/autocomplete?q=&limit=
async fn autocomplete(
    State(state): State<AppState>,
    user: CurrentUser,
    ApiQuery(params): ApiQuery<AutocompleteParams>,
) -> Result<impl IntoResponse, ApiError> {
    let limit = autocomplete_limit(params.limit)?;
    let suggestions = state
        .db
        .autocomplete_tags(&user.id, &params.q, limit)
        .await?;
    Ok(Json(json!({ "suggestions": suggestions })))
}

/// GET /api/v1/tags/{id}
async fn get_tag(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let id = parse_id(&id, "Tag")?;
    let tag = state.db.get_tag(&user.id, id).await?;
    Ok(Json(tag))
}

/// DELETE /api/v1/tags/{id}
async fn delete_tag(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let id = parse_id(&id, "Tag")?;
    state.db.delete_tag(&user.id, id).await?;
    info!(tag_id = id, user = %user.id, "Tag deleted");
    Ok(StatusCode::NO_CONTENT)
}

/// Build the tag REST routes.
pub fn tag_routes() -> Router<AppState> {
    Router::new()
        .route("/api/v1/tags", get(list_tags).post(create_tag))
        .route("/api/v1/tags/autocomplete", get(autocomplete))
        .route("/api/v1/tags/{id}", get(get_tag).delete(delete_tag))
}
