//! API Routes

pub mod display;
pub mod fans;

use std::sync::Arc;

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use display_session::ControllerError;
use fan_control::FanError;
use serde::Serialize;
use tracing::{error, info};

use crate::AppState;

/// Error body returned by every route
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
}

/// Handler error mapped onto an HTTP status
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            error!(status = %self.status, error = %self.message, "Request failed");
        }
        (self.status, Json(ErrorBody { error: self.message })).into_response()
    }
}

impl From<ControllerError> for ApiError {
    fn from(e: ControllerError) -> Self {
        let status = match e {
            ControllerError::InvalidSelection(_) | ControllerError::NotADisplayTarget(_) => {
                StatusCode::BAD_REQUEST
            }
            ControllerError::NotSelecting => StatusCode::CONFLICT,
            ControllerError::ShutDown => StatusCode::SERVICE_UNAVAILABLE,
            ControllerError::Session(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, e.to_string())
    }
}

impl From<FanError> for ApiError {
    fn from(e: FanError) -> Self {
        let status = match e {
            FanError::UnknownChannel(_) | FanError::InvalidChannel(_) => StatusCode::NOT_FOUND,
            FanError::UnsupportedLevel { .. } => StatusCode::BAD_REQUEST,
            FanError::ShutDown => StatusCode::SERVICE_UNAVAILABLE,
            FanError::I2c(_) | FanError::DuplicateChannel(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, e.to_string())
    }
}

/// Run a controller call off the async runtime; mode switches block on
/// device open and thread join
pub(crate) async fn blocking<T, E, F>(f: F) -> Result<T, ApiError>
where
    F: FnOnce() -> Result<T, E> + Send + 'static,
    T: Send + 'static,
    E: Into<ApiError> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?
        .map_err(Into::into)
}

/// Shut the dashboard down: display first, then fans. The server stops
/// once the response is sent.
pub async fn shutdown(State(state): State<Arc<AppState>>) -> Result<StatusCode, ApiError> {
    info!("Shutdown requested over the API");
    let dashboard = state.dashboard.clone();
    blocking(move || {
        dashboard.shutdown();
        Ok::<_, ApiError>(())
    })
    .await?;
    Ok(StatusCode::ACCEPTED)
}

/// Prometheus scrape endpoint
pub async fn metrics(State(state): State<Arc<AppState>>) -> Response {
    match &state.metrics {
        Some(handle) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            handle.render(),
        )
            .into_response(),
        None => ApiError::new(StatusCode::NOT_FOUND, "metrics recorder not installed").into_response(),
    }
}
