use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};

use jobrelay_core::TaskId;
use jobrelay_infra::NewTask;
use jobrelay_tasks::TaskPayload;

use crate::app::dto::{self, Items};
use crate::app::errors::ApiError;
use crate::app::services::AppServices;
use crate::context::OwnerContext;

const DEFAULT_LIST_LIMIT: usize = 50;
const MAX_LIST_LIMIT: usize = 500;

pub fn router() -> Router {
    Router::new()
        .route("/", post(create_task).get(list_tasks))
        .route("/stats", get(task_stats))
        .route("/:id", get(get_task))
        .route("/:id/reset", post(reset_task))
        .route("/:id/cancel", post(cancel_task))
        .route("/:id/verification-code", post(submit_verification_code))
}

pub async fn create_task(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(owner): Extension<OwnerContext>,
    Json(body): Json<dto::CreateTaskRequest>,
) -> Result<Response, ApiError> {
    // Reject payloads an agent could never decode.
    TaskPayload::decode(body.task_type, &body.payload)?;

    let mut new = NewTask::new(owner.owner_id(), body.task_type, body.payload).with_priority(body.priority);
    if let Some(blueprint_id) = body.blueprint_id {
        match services.blueprints.store().get(blueprint_id).await? {
            Some(bp) if bp.owner == owner.owner_id() => new = new.for_blueprint(blueprint_id),
            _ => return Err(ApiError::not_found(format!("blueprint {blueprint_id}"))),
        }
    }

    let task = services.tasks.create(new).await?;
    Ok((StatusCode::CREATED, Json(task)).into_response())
}

pub async fn list_tasks(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(owner): Extension<OwnerContext>,
    Query(query): Query<dto::ListTasksQuery>,
) -> Result<Response, ApiError> {
    let limit = query.limit.unwrap_or(DEFAULT_LIST_LIMIT).clamp(1, MAX_LIST_LIMIT);
    let tasks = services
        .tasks
        .list_for_owner(owner.owner_id(), query.status, limit)
        .await?;
    Ok(Json(Items::from(tasks)).into_response())
}

pub async fn task_stats(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(owner): Extension<OwnerContext>,
) -> Result<Response, ApiError> {
    let stats = services.tasks.stats(owner.owner_id()).await?;
    Ok(Json(stats).into_response())
}

pub async fn get_task(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(owner): Extension<OwnerContext>,
    Path(id): Path<TaskId>,
) -> Result<Response, ApiError> {
    let task = services.owned_task(owner.owner_id(), id).await?;
    Ok(Json(task).into_response())
}

pub async fn reset_task(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(owner): Extension<OwnerContext>,
    Path(id): Path<TaskId>,
) -> Result<Response, ApiError> {
    services.owned_task(owner.owner_id(), id).await?;
    let task = services.tasks.reset(id).await?;
    Ok(Json(task).into_response())
}

pub async fn cancel_task(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(owner): Extension<OwnerContext>,
    Path(id): Path<TaskId>,
) -> Result<Response, ApiError> {
    services.owned_task(owner.owner_id(), id).await?;
    let task = services.tasks.cancel(id).await?;
    Ok(Json(task).into_response())
}

pub async fn submit_verification_code(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(owner): Extension<OwnerContext>,
    Path(id): Path<TaskId>,
    Json(body): Json<dto::SubmitCodeRequest>,
) -> Result<Response, ApiError> {
    services.submit_code(owner.owner_id(), id, &body.code).await?;
    Ok(StatusCode::ACCEPTED.into_response())
}
