//! The protocol remote agents speak: pairing, liveness, claim and report.

use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde_json::json;
use tracing::info;

use jobrelay_core::TaskId;
use jobrelay_tasks::TaskReport;

use crate::app::dto::{self, Items};
use crate::app::errors::ApiError;
use crate::app::services::AppServices;
use crate::context::OwnerContext;

pub fn router() -> Router {
    Router::new()
        .route("/", get(list_agents))
        .route("/register", post(register))
        .route("/heartbeat", post(heartbeat))
        .route("/tasks/claim", post(claim))
        .route("/tasks/result", post(report_result))
        .route("/tasks/:id/verification-code", get(take_verification_code))
}

pub async fn register(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(owner): Extension<OwnerContext>,
    Json(body): Json<dto::RegisterAgentRequest>,
) -> Result<Response, ApiError> {
    let agent_id = body.agent_id.trim();
    if agent_id.is_empty() {
        return Err(ApiError::Validation("agent_id must not be empty".to_string()));
    }
    let agent = services
        .agents
        .register(
            owner.owner_id(),
            agent_id,
            body.name,
            body.metadata.unwrap_or_else(|| json!({})),
        )
        .await?;
    info!(agent_id = %agent.agent_id, owner_id = %owner.owner_id(), "agent registered");
    Ok((StatusCode::OK, Json(agent)).into_response())
}

pub async fn heartbeat(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(owner): Extension<OwnerContext>,
    Json(body): Json<dto::HeartbeatRequest>,
) -> Result<Response, ApiError> {
    services.owned_agent(owner.owner_id(), &body.agent_id).await?;
    let agent = services
        .agents
        .heartbeat(&body.agent_id, body.status, body.active_tasks)
        .await?;
    Ok(Json(agent).into_response())
}

pub async fn claim(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(owner): Extension<OwnerContext>,
    Json(body): Json<dto::ClaimRequest>,
) -> Result<Response, ApiError> {
    match services.claim_for_agent(owner.owner_id(), &body.agent_id).await? {
        Some(task) => Ok(Json(task).into_response()),
        None => Ok(StatusCode::NO_CONTENT.into_response()),
    }
}

pub async fn report_result(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(owner): Extension<OwnerContext>,
    Json(report): Json<TaskReport>,
) -> Result<Response, ApiError> {
    let task = services.record_report(owner.owner_id(), report).await?;
    Ok(Json(task).into_response())
}

pub async fn take_verification_code(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(owner): Extension<OwnerContext>,
    Path(id): Path<TaskId>,
) -> Result<Response, ApiError> {
    services.owned_task(owner.owner_id(), id).await?;
    match services.codes.take(id, Utc::now()) {
        Some(code) => Ok(Json(dto::VerificationCodeResponse { code }).into_response()),
        None => Ok(StatusCode::NO_CONTENT.into_response()),
    }
}

pub async fn list_agents(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(owner): Extension<OwnerContext>,
) -> Result<Response, ApiError> {
    let agents = services.agents.list_for_owner(owner.owner_id()).await?;
    Ok(Json(Items::from(agents)).into_response())
}
