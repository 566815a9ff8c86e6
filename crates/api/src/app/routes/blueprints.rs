use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;

use jobrelay_blueprints::{Blueprint, BlueprintPatch};
use jobrelay_core::BlueprintId;
use jobrelay_infra::Delivery;

use crate::app::dto::{self, Items};
use crate::app::errors::ApiError;
use crate::app::services::AppServices;
use crate::context::OwnerContext;

pub fn router() -> Router {
    Router::new()
        .route("/", post(create_blueprint).get(list_blueprints))
        .route("/:id", get(get_blueprint).patch(update_blueprint))
        .route("/:id/deliver", post(deliver_blueprint))
}

async fn owned_blueprint(
    services: &AppServices,
    owner: &OwnerContext,
    id: BlueprintId,
) -> Result<Blueprint, ApiError> {
    match services.blueprints.store().get(id).await? {
        Some(bp) if bp.owner == owner.owner_id() => Ok(bp),
        _ => Err(ApiError::not_found(format!("blueprint {id}"))),
    }
}

pub async fn create_blueprint(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(owner): Extension<OwnerContext>,
    Json(body): Json<dto::CreateBlueprintRequest>,
) -> Result<Response, ApiError> {
    let bp = Blueprint::new(
        owner.owner_id(),
        body.name,
        body.portal,
        body.filters,
        body.frequency_secs,
        Utc::now(),
    )?
    .with_status(body.status)?;
    let bp = services.blueprints.store().create(bp).await?;
    Ok((StatusCode::CREATED, Json(bp)).into_response())
}

pub async fn list_blueprints(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(owner): Extension<OwnerContext>,
) -> Result<Response, ApiError> {
    let items = services.blueprints.store().list_for_owner(owner.owner_id()).await?;
    Ok(Json(Items::from(items)).into_response())
}

pub async fn get_blueprint(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(owner): Extension<OwnerContext>,
    Path(id): Path<BlueprintId>,
) -> Result<Response, ApiError> {
    let bp = owned_blueprint(&services, &owner, id).await?;
    Ok(Json(bp).into_response())
}

/// Patch a blueprint; in-flight tasks the change invalidates are cancelled.
pub async fn update_blueprint(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(owner): Extension<OwnerContext>,
    Path(id): Path<BlueprintId>,
    Json(patch): Json<BlueprintPatch>,
) -> Result<Response, ApiError> {
    owned_blueprint(&services, &owner, id).await?;
    let bp = services.blueprints.update(id, patch, Utc::now()).await?;
    Ok(Json(bp).into_response())
}

/// Manual delivery outside the schedule.
pub async fn deliver_blueprint(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(owner): Extension<OwnerContext>,
    Path(id): Path<BlueprintId>,
) -> Result<Response, ApiError> {
    owned_blueprint(&services, &owner, id).await?;
    match services.blueprints.deliver_now(id, Utc::now()).await? {
        Delivery::Created(task) => Ok((StatusCode::CREATED, Json(task)).into_response()),
        Delivery::Idle | Delivery::NotDue => Err(ApiError::InvalidTransition(format!(
            "blueprint {id} is IDLE and produces no work"
        ))),
    }
}
