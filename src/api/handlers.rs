//! Request handlers. Every `/api` route requires a known bearer token.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use super::auth::AuthUser;
use crate::db::{DbEntity, DbFunctionalService, DbProject};
use crate::error::ApiError;
use crate::state::{AppState, PassRecord, PassTrigger};
use crate::types::User;

type ApiResult<T> = Result<Json<T>, ApiError>;

pub async fn ping() -> Json<Value> {
    Json(json!({ "message": "pong" }))
}

/// The user behind the token.
pub async fn profile(user: AuthUser) -> Json<User> {
    Json(user.0)
}

// -----------------------------------------------------------------------------
// Deployment indicators job
// -----------------------------------------------------------------------------

/// Run a pass now and answer with its plain-text summary.
pub async fn trigger_deployment_pass(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
) -> Result<String, ApiError> {
    user.require_admin()?;
    log::info!("Deployment indicators pass triggered by {}", user.0.username);
    let summary = state.run_deployment_pass(PassTrigger::Manual).await?;
    Ok(summary.to_string())
}

#[derive(Debug, Deserialize)]
pub struct HistoryParams {
    limit: Option<usize>,
}

pub async fn deployment_pass_history(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Query(params): Query<HistoryParams>,
) -> ApiResult<Vec<PassRecord>> {
    user.require_admin()?;
    Ok(Json(state.pass_history(params.limit.unwrap_or(20))))
}

// -----------------------------------------------------------------------------
// Functional services catalog
// -----------------------------------------------------------------------------

pub async fn list_services(
    State(state): State<Arc<AppState>>,
    _user: AuthUser,
) -> ApiResult<Vec<DbFunctionalService>> {
    Ok(Json(state.services.find_all()?))
}

pub async fn get_service(
    State(state): State<Arc<AppState>>,
    _user: AuthUser,
    Path(id): Path<String>,
) -> ApiResult<DbFunctionalService> {
    state
        .services
        .find_by_id(&id)?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Functional service {} not found", id)))
}

pub async fn create_service(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Json(service): Json<DbFunctionalService>,
) -> ApiResult<DbFunctionalService> {
    user.require_admin()?;
    save_service(&state, None, service)
}

pub async fn update_service(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<String>,
    Json(service): Json<DbFunctionalService>,
) -> ApiResult<DbFunctionalService> {
    user.require_admin()?;
    if state.services.find_by_id(&id)?.is_none() {
        return Err(ApiError::NotFound(format!(
            "Functional service {} not found",
            id
        )));
    }
    save_service(&state, Some(&id), service)
}

fn save_service(
    state: &AppState,
    id: Option<&str>,
    mut service: DbFunctionalService,
) -> ApiResult<DbFunctionalService> {
    service.name = service.name.trim().to_string();
    service.package = service.package.trim().to_string();
    if service.name.is_empty() || service.package.is_empty() {
        return Err(ApiError::BadRequest(
            "The name and package fields cannot be empty".to_string(),
        ));
    }
    if state.services.exists(&service.name, &service.package, id)? {
        return Err(ApiError::Conflict(format!(
            "Functional service {} already exists in package {}",
            service.name, service.package
        )));
    }
    service.id = id.unwrap_or_default().to_string();
    let saved = state.services.save(service)?;
    log::info!("Functional service {} ({}) saved", saved.name, saved.id);
    Ok(Json(saved))
}

pub async fn delete_service(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<String>,
) -> ApiResult<Value> {
    user.require_admin()?;
    state.services.delete(&id)?;
    log::info!("Functional service {} deleted by {}", id, user.0.username);
    Ok(Json(json!({ "id": id })))
}

// -----------------------------------------------------------------------------
// Entities
// -----------------------------------------------------------------------------

pub async fn list_entities(
    State(state): State<Arc<AppState>>,
    _user: AuthUser,
) -> ApiResult<Vec<DbEntity>> {
    Ok(Json(state.entities.find_all()?))
}

pub async fn get_entity(
    State(state): State<Arc<AppState>>,
    _user: AuthUser,
    Path(id): Path<String>,
) -> ApiResult<DbEntity> {
    state
        .entities
        .find_by_id(&id)?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Entity {} not found", id)))
}

pub async fn create_entity(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Json(entity): Json<DbEntity>,
) -> ApiResult<DbEntity> {
    user.require_admin()?;
    save_entity(&state, None, entity)
}

pub async fn update_entity(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<String>,
    Json(entity): Json<DbEntity>,
) -> ApiResult<DbEntity> {
    user.require_admin()?;
    if state.entities.find_by_id(&id)?.is_none() {
        return Err(ApiError::NotFound(format!("Entity {} not found", id)));
    }
    save_entity(&state, Some(&id), entity)
}

/// The id always comes from the route: a create never reuses a body id.
fn save_entity(state: &AppState, id: Option<&str>, mut entity: DbEntity) -> ApiResult<DbEntity> {
    entity.name = entity.name.trim().to_string();
    if entity.name.is_empty() {
        return Err(ApiError::BadRequest(
            "The name field cannot be empty".to_string(),
        ));
    }
    if state.entities.exists(&entity.name, id)? {
        return Err(ApiError::Conflict(format!(
            "Entity {} already exists",
            entity.name
        )));
    }
    entity.id = id.unwrap_or_default().to_string();
    let saved = state.entities.save(entity)?;
    log::info!("Entity {} ({}) saved", saved.name, saved.id);
    Ok(Json(saved))
}

pub async fn delete_entity(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<String>,
) -> ApiResult<Value> {
    user.require_admin()?;
    state.entities.delete(&id)?;
    log::info!("Entity {} deleted by {}", id, user.0.username);
    Ok(Json(json!({ "id": id })))
}

// -----------------------------------------------------------------------------
// Projects
// -----------------------------------------------------------------------------

pub async fn list_projects(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
) -> ApiResult<Vec<DbProject>> {
    Ok(Json(state.project_service.list(&user.0)?))
}

pub async fn get_project(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<String>,
) -> ApiResult<DbProject> {
    Ok(Json(state.project_service.get(&user.0, &id)?))
}

pub async fn create_project(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Json(project): Json<DbProject>,
) -> ApiResult<DbProject> {
    Ok(Json(state.project_service.save(&user.0, None, project).await?))
}

pub async fn update_project(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<String>,
    Json(project): Json<DbProject>,
) -> ApiResult<DbProject> {
    Ok(Json(
        state
            .project_service
            .save(&user.0, Some(&id), project)
            .await?,
    ))
}

pub async fn delete_project(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<String>,
) -> ApiResult<Value> {
    state.project_service.delete(&user.0, &id)?;
    Ok(Json(json!({ "id": id })))
}
