//! Display Routes

use std::io::Cursor;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use camera_capture::CameraKey;
use display_session::{DisplayMode, SessionSnapshot};
use fan_control::FanState;
use image::ImageFormat;
use serde::{Deserialize, Serialize};

use super::{blocking, ApiError};
use crate::config::{StartupConfig, StartupMode};
use crate::AppState;

/// Response for status endpoint
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub mode: DisplayMode,
    /// Cameras picked so far while selecting for multiview
    pub selection: Vec<CameraKey>,
    pub session: Option<SessionSnapshot>,
    pub live_sessions: usize,
    pub frames_presented: u64,
    pub fans: FanState,
    pub uptime_seconds: u64,
}

/// Requested display mode
#[derive(Debug, Deserialize)]
pub struct ModeRequest {
    pub mode: StartupMode,
    /// Cameras in pane order
    #[serde(default)]
    pub cameras: Vec<CameraKey>,
}

impl ModeRequest {
    fn display_mode(&self) -> Result<DisplayMode, ApiError> {
        StartupConfig {
            mode: self.mode,
            cameras: self.cameras.clone(),
        }
        .display_mode()
        .map_err(|e| ApiError::bad_request(e.to_string()))
    }
}

/// Mode after a request
#[derive(Debug, Serialize)]
pub struct ModeResponse {
    pub mode: DisplayMode,
}

/// Get controller, session and fan status
pub async fn get_status(State(state): State<Arc<AppState>>) -> Result<Json<StatusResponse>, ApiError> {
    let uptime_seconds = state.start_time.elapsed().as_secs();
    let dashboard = state.dashboard.clone();

    // Selection and session reads wait for any switch in progress
    let status = blocking(move || {
        let controller = dashboard.controller();
        Ok::<_, ApiError>(StatusResponse {
            mode: controller.current_mode(),
            selection: controller.selection(),
            session: controller.session_snapshot(),
            live_sessions: controller.live_sessions(),
            frames_presented: dashboard.frames_presented(),
            fans: dashboard.fans().state(),
            uptime_seconds,
        })
    })
    .await?;

    Ok(Json(status))
}

/// Switch the display mode
pub async fn set_mode(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ModeRequest>,
) -> Result<Json<ModeResponse>, ApiError> {
    let target = request.display_mode()?;
    let dashboard = state.dashboard.clone();
    blocking(move || dashboard.controller().switch_mode(target)).await?;

    Ok(Json(ModeResponse {
        mode: state.dashboard.controller().current_mode(),
    }))
}

/// Start picking two cameras for multiview
pub async fn begin_selection(State(state): State<Arc<AppState>>) -> Result<Json<ModeResponse>, ApiError> {
    let dashboard = state.dashboard.clone();
    blocking(move || dashboard.controller().begin_multiview_selection()).await?;

    Ok(Json(ModeResponse {
        mode: state.dashboard.controller().current_mode(),
    }))
}

/// Pick (or un-pick) a camera for multiview
pub async fn select_camera(
    State(state): State<Arc<AppState>>,
    Path(key): Path<u8>,
) -> Result<Json<ModeResponse>, ApiError> {
    let key = CameraKey::try_from(key).map_err(|e| ApiError::bad_request(e.to_string()))?;
    let dashboard = state.dashboard.clone();
    let mode = blocking(move || dashboard.controller().select_camera(key)).await?;

    Ok(Json(ModeResponse { mode }))
}

/// Abandon multiview selection
pub async fn cancel_selection(State(state): State<Arc<AppState>>) -> Result<Json<ModeResponse>, ApiError> {
    let dashboard = state.dashboard.clone();
    let mode = blocking(move || {
        let controller = dashboard.controller();
        controller.cancel_selection()?;
        Ok::<_, ApiError>(controller.current_mode())
    })
    .await?;

    Ok(Json(ModeResponse { mode }))
}

/// Latest composed frame as PNG
pub async fn get_snapshot(State(state): State<Arc<AppState>>) -> Result<Response, ApiError> {
    let frame = state
        .dashboard
        .latest_frame()
        .ok_or_else(|| ApiError::new(StatusCode::NOT_FOUND, "no frame presented yet"))?;

    let png = blocking(move || {
        let image = frame
            .as_image()
            .ok_or_else(|| ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "malformed frame"))?;
        let mut out = Cursor::new(Vec::new());
        image
            .write_to(&mut out, ImageFormat::Png)
            .map_err(|e| ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
        Ok::<_, ApiError>(out.into_inner())
    })
    .await?;

    Ok(([(header::CONTENT_TYPE, "image/png")], png).into_response())
}
