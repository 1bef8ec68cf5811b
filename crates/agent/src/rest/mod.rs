//! REST adapter — a thin axum surface over the controllers.

pub mod error_map;
pub mod handlers;

use axum::routing::{delete, get, post};
use axum::Router;

use crate::state::SharedState;

pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/api/v1/process", post(handlers::start_process))
        .route("/api/v1/process/{name}", delete(handlers::stop_process))
        .route("/api/v1/process/{name}", get(handlers::process_info))
        .route("/api/v1/processlist", get(handlers::process_list))
        .route("/api/v1/processupgrades", get(handlers::find_upgrades))
        .route("/api/v1/processupgrade", post(handlers::upgrade_process))
        .route("/api/v1/app", post(handlers::install_app))
        .route("/api/v1/app/{name}", delete(handlers::remove_app))
        .route("/api/v1/app/{name}", get(handlers::app_info))
        .route("/api/v1/applist", get(handlers::app_list))
        .route("/api/v1/settings", get(handlers::get_settings))
        .route("/api/v1/settings", post(handlers::overwrite_settings))
        .route("/api/v1/images", get(handlers::local_images))
        .route("/api/v1/pullimage", post(handlers::pull_image))
        .with_state(state)
}
