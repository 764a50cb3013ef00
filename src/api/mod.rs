//! HTTP transport (spec §6.1). Routes exactly the surface the external
//! transport layer binds to; router layering grounded on the teacher's
//! `api::create_router` (trace layer, CORS, bearer-token middleware).

mod applications;
mod auth;
mod deploy_keys;
mod deployments;
mod domains;
mod envs;
mod health_check;
mod stats;
mod webhooks;

use crate::AppState;
use axum::{
    middleware,
    routing::{delete, get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub fn create_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

    let protected = Router::new()
        .route("/applications", get(applications::list).post(applications::create))
        .route(
            "/applications/:id",
            get(applications::get).put(applications::update).delete(applications::delete),
        )
        .route("/applications/:id/envs", get(envs::list).post(envs::create))
        .route("/applications/:id/envs/:key", delete(envs::delete).put(envs::update))
        .route("/applications/:id/deploy-key", get(deploy_keys::get).post(deploy_keys::regenerate))
        .route("/applications/:id/deploy", post(deployments::trigger))
        .route("/deployments", get(deployments::list))
        .route("/deployments/:id", get(deployments::get))
        .route("/deployments/:id/cancel", post(deployments::cancel))
        .route("/applications/:id/domains", get(domains::list).post(domains::create))
        .route("/applications/:id/domains/:host", delete(domains::remove))
        .route("/applications/:id/domains/:host/primary", post(domains::set_primary))
        .route("/applications/:id/domains/:host/verify", post(domains::verify))
        .route(
            "/applications/:id/webhooks",
            get(webhooks::get_config).post(webhooks::upsert_config).delete(webhooks::remove_config),
        )
        .route("/applications/:id/webhooks/deliveries", get(webhooks::list_deliveries))
        .route(
            "/applications/:id/health-check",
            get(health_check::get_config).post(health_check::upsert_config),
        )
        .route("/applications/:id/health-check/results", get(health_check::list_results))
        .route("/applications/:id/stats", get(stats::get_stats))
        .layer(middleware::from_fn_with_state(state.clone(), auth::bearer_auth));

    let ingress = Router::new()
        .route("/github", post(webhooks::github_ingress))
        .route("/gitlab", post(webhooks::gitlab_ingress));

    Router::new()
        .route("/health", get(health))
        .nest("/", protected)
        .nest("/webhooks", ingress)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}
