//! REST handlers — validate, call the controller, map the error kind.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;

use crate::error::AgentError;
use crate::images::{CAMERA_REPO, KIND_RTSP};
use crate::process::model::{AppProcess, CameraProcess, ProcessKind, StreamFlags};
use crate::rest::error_map::ApiError;
use crate::settings::Settings;
use crate::state::SharedState;

/// A camera without a name gets one derived from its pull URL.
fn default_device_name(rtsp_endpoint: &str) -> String {
    format!("{:x}", md5::compute(rtsp_endpoint))
}

pub async fn start_process(
    State(state): State<SharedState>,
    Json(mut camera): Json<CameraProcess>,
) -> Result<Json<CameraProcess>, ApiError> {
    if camera.rtsp_endpoint.is_empty() {
        return Err(AgentError::Validation("rtsp_endpoint is required".to_string()).into());
    }
    if camera.name.is_empty() {
        camera.name = default_device_name(&camera.rtsp_endpoint);
    }
    camera.rtmp_stream_status = Some(StreamFlags {
        streaming: true,
        storing: false,
    });

    let started = state.processes.start(camera).await?;
    Ok(Json(started))
}

pub async fn stop_process(
    State(state): State<SharedState>,
    Path(name): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.processes.stop(&name, ProcessKind::Camera).await?;
    Ok(StatusCode::OK)
}

pub async fn process_info(
    State(state): State<SharedState>,
    Path(name): Path<String>,
) -> Result<Json<CameraProcess>, ApiError> {
    Ok(Json(state.processes.info(&name).await?))
}

pub async fn process_list(
    State(state): State<SharedState>,
) -> Result<Json<Vec<CameraProcess>>, ApiError> {
    Ok(Json(state.processes.list().await?))
}

pub async fn find_upgrades(
    State(state): State<SharedState>,
) -> Result<Json<Vec<CameraProcess>>, ApiError> {
    let record = state.resolver.local_record(CAMERA_REPO, KIND_RTSP).await?;
    Ok(Json(state.processes.find_upgrades(&record).await?))
}

#[derive(Deserialize)]
pub struct UpgradeRequest {
    pub name: String,
    pub image_tag: String,
}

pub async fn upgrade_process(
    State(state): State<SharedState>,
    Json(request): Json<UpgradeRequest>,
) -> Result<Json<CameraProcess>, ApiError> {
    let upgraded = state
        .processes
        .upgrade(&request.name, &request.image_tag)
        .await?;
    Ok(Json(upgraded))
}

pub async fn install_app(
    State(state): State<SharedState>,
    Json(app): Json<AppProcess>,
) -> Result<Json<AppProcess>, ApiError> {
    Ok(Json(state.apps.install(app).await?))
}

pub async fn remove_app(
    State(state): State<SharedState>,
    Path(name): Path<String>,
) -> Result<StatusCode, ApiError> {
    state
        .processes
        .stop(&name, ProcessKind::Application)
        .await?;
    Ok(StatusCode::OK)
}

pub async fn app_info(
    State(state): State<SharedState>,
    Path(name): Path<String>,
) -> Result<Json<AppProcess>, ApiError> {
    Ok(Json(state.apps.info(&name).await?))
}

pub async fn app_list(
    State(state): State<SharedState>,
) -> Result<Json<Vec<AppProcess>>, ApiError> {
    Ok(Json(state.apps.list().await?))
}

pub async fn get_settings(
    State(state): State<SharedState>,
) -> Result<Json<Settings>, ApiError> {
    Ok(Json(state.settings.get()?))
}

pub async fn overwrite_settings(
    State(state): State<SharedState>,
    Json(settings): Json<Settings>,
) -> Result<Json<Settings>, ApiError> {
    Ok(Json(state.settings.overwrite(settings).await?))
}

#[derive(Deserialize)]
pub struct ImageQuery {
    pub tag: String,
}

pub async fn local_images(
    State(state): State<SharedState>,
    Query(query): Query<ImageQuery>,
) -> Result<Json<crate::images::ImageUpgrade>, ApiError> {
    if query.tag.is_empty() {
        return Err(AgentError::Validation("tag query required".to_string()).into());
    }
    Ok(Json(state.resolver.describe(&query.tag, KIND_RTSP).await?))
}

#[derive(Deserialize)]
pub struct PullQuery {
    pub tag: String,
    pub version: String,
}

pub async fn pull_image(
    State(state): State<SharedState>,
    Query(query): Query<PullQuery>,
) -> Result<StatusCode, ApiError> {
    if query.tag.is_empty() || query.version.is_empty() {
        return Err(
            AgentError::Validation("tag and version queries required".to_string()).into(),
        );
    }
    state.resolver.pull(&query.tag, &query.version).await?;
    Ok(StatusCode::OK)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unnamed_camera_gets_md5_of_pull_url() {
        let name = default_device_name("rtsp://example/stream");
        assert_eq!(name.len(), 32);
        assert_eq!(name, default_device_name("rtsp://example/stream"));
        assert_ne!(name, default_device_name("rtsp://example/other"));
    }
}
