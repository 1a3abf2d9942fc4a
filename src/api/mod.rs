//! HTTP API: liveness, the caller's profile, the admin job trigger, the
//! functional services catalog, entities and projects.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

mod auth;
mod handlers;

pub use auth::AuthUser;

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/ping", get(handlers::ping))
        .route(
            "/api/admin/jobs/deployment-indicators",
            post(handlers::trigger_deployment_pass).get(handlers::deployment_pass_history),
        )
        .route("/api/services", get(handlers::list_services))
        .route("/api/services/new", post(handlers::create_service))
        .route(
            "/api/services/:id",
            get(handlers::get_service)
                .put(handlers::update_service)
                .delete(handlers::delete_service),
        )
        .route("/api/profile", get(handlers::profile))
        .route("/api/entities", get(handlers::list_entities))
        .route("/api/entities/new", post(handlers::create_entity))
        .route(
            "/api/entities/:id",
            get(handlers::get_entity)
                .put(handlers::update_entity)
                .delete(handlers::delete_entity),
        )
        .route("/api/projects", get(handlers::list_projects))
        .route("/api/projects/new", post(handlers::create_project))
        .route(
            "/api/projects/:id",
            get(handlers::get_project)
                .put(handlers::update_project)
                .delete(handlers::delete_project),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve the API until `shutdown` turns true.
pub async fn serve(
    state: Arc<AppState>,
    addr: SocketAddr,
    mut shutdown: watch::Receiver<bool>,
) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    log::info!("D.A.D listening on {}", addr);
    axum::serve(listener, create_router(state))
        .with_graceful_shutdown(async move {
            let _ = shutdown.wait_for(|stop| *stop).await;
        })
        .await
}
