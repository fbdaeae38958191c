//! REST endpoints for tasks. Every handler is scoped to the caller.

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, patch},
};
use tracing::info;

use super::model::{CreateTaskRequest, NewTask, TaskPatch, UpdateTaskRequest};
use super::query::{ListTasksParams, TaskQuery};
use crate::api::AppState;
use crate::auth::CurrentUser;
use crate::error::ApiError;
use crate::extract::{ApiJson, ApiQuery};

/// Parse a path id. Anything non-numeric is reported like a missing row.
pub(crate) fn parse_id(raw: &str, entity: &'static str) -> Result<i64, ApiError> {
    raw.parse::<i64>().map_err(|_| ApiError::NotFound { entity })
}

/// GET /api/v1/tasks
async fn list_tasks(
    State(state): State<AppState>,
    user: CurrentUser,
    ApiQuery(params): ApiQuery<ListTasksParams>,
) -> Result<impl IntoResponse, ApiError> {
    let query = TaskQuery::try_from(params)?;
    let page = state.db.list_tasks(&user.id, &query).await?;
    Ok(Json(page))
}

/// POST /api/v1/tasks
async fn create_task(
    State(state): State<AppState>,
    user: CurrentUser,
    ApiJson(body): ApiJson<CreateTaskRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let new = NewTask::try_from(body)?;
    let task = state.db.create_task(&user.id, &new).await?;
    info!(task_id = task.id, user = %user.id, "Task created");
    Ok((StatusCode::CREATED, Json(task)))
}

/// GET /api/v1/tasks/{id}
async fn get_task(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let id = parse_id(&id, "Task")?;
    let task = state.db.get_task(&user.id, id).await?;
    Ok(Json(task))
}

/// PUT /api/v1/tasks/{id}
async fn update_task(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<String>,
    ApiJson(body): ApiJson<UpdateTaskRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let id = parse_id(&id, "Task")?;
    let patch = TaskPatch::try_from(body)?;
    let task = state.db.update_task(&user.id, id, &patch).await?;
    Ok(Json(task))
}

/// DELETE /api/v1/tasks/{id}
async fn delete_task(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let id = parse_id(&id, "Task")?;
    state.db.delete_task(&user.id, id).await?;
    info!(task_id = id, user = %user.id, "Task deleted");
    Ok(StatusCode::NO_CONTENT)
}

/// PATCH /api/v1/tasks/{id}/complete
async fn toggle_complete(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let id = parse_id(&id, "Task")?;
    let task = state.db.toggle_complete(&user.id, id).await?;
    Ok(Json(task))
}

/// Build the task REST routes.
pub fn task_routes() -> Router<AppState> {
    Router::new()
        .route("/api/v1/tasks", get(list_tasks).post(create_task))
        .route(
            "/api/v1/tasks/{id}",
            get(get_task).put(update_task).delete(delete_task),
        )
        .route("/api/v1/tasks/{id}/complete", patch(toggle_complete))
}
