//! Fan Routes

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    Json,
};
use fan_control::DutyScale;
use serde::{Deserialize, Serialize};

use super::{blocking, ApiError};
use crate::AppState;

/// One fan channel
#[derive(Debug, Serialize)]
pub struct FanRecord {
    pub channel: u8,
    pub percent: u8,
    pub scale: DutyScale,
    /// Levels the channel accepts
    pub levels: Vec<u8>,
}

/// Response for fans endpoint
#[derive(Debug, Serialize)]
pub struct FanResponse {
    pub data: Vec<FanRecord>,
    pub shut_down: bool,
}

/// Requested fan level
#[derive(Debug, Deserialize)]
pub struct FanRequest {
    pub percent: u8,
}

fn fan_response(state: &AppState) -> FanResponse {
    let fans = state.dashboard.fans();
    let data = fans
        .state()
        .into_iter()
        .filter_map(|(channel, percent)| {
            let scale = fans.scale(channel)?;
            Some(FanRecord {
                channel,
                percent,
                scale,
                levels: scale.levels().to_vec(),
            })
        })
        .collect();

    FanResponse {
        data,
        shut_down: fans.is_shut_down(),
    }
}

/// Get fan levels
pub async fn get_fans(State(state): State<Arc<AppState>>) -> Json<FanResponse> {
    Json(fan_response(&state))
}

/// Set a fan channel to one of its levels
pub async fn set_fan(
    State(state): State<Arc<AppState>>,
    Path(channel): Path<u8>,
    Json(request): Json<FanRequest>,
) -> Result<Json<FanResponse>, ApiError> {
    let dashboard = state.dashboard.clone();
    blocking(move || dashboard.fans().set_duty(channel, request.percent)).await?;
    Ok(Json(fan_response(&state)))
}

