//! Handlers for the control surface.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Json;
use tracing::info;

use crate::api::dto::*;
use crate::api::{ApiError, AppState};
use crate::channels::DeviceStatus;
use crate::connection::ConnectionStatsSnapshot;
use crate::error::IoSrvError;
use crate::model::ChannelKind;
use crate::subscriptions::Subscription;

pub async fn health_check() -> &'static str {
    "OK"
}

/// POST /api/devices
pub async fn create_device(
    State(state): State<AppState>,
    Json(request): Json<CreateDeviceRequest>,
) -> Result<(StatusCode, Json<DeviceResponse>), ApiError> {
    let new = request.into_new_device(&state.defaults);
    let device = state.channels.create_device(new).await?;
    Ok((StatusCode::CREATED, Json(DeviceResponse { device })))
}

/// POST /api/devices/{id}/test
///
/// Always answers 200 for a known device; reachability is in the body.
pub async fn test_device(
    State(state): State<AppState>,
    Path(device_id): Path<i64>,
) -> Result<Json<TestConnectionResponse>, ApiError> {
    let status = state.channels.full_status(device_id).await?;
    let device = status.device;
    let outcome = state
        .channels
        .protocol()
        .test_connection(&device.host, device.port, device.unit_id, device.io_timeout())
        .await;
    info!(
        device_id,
        connected = outcome.connected,
        elapsed_ms = outcome.elapsed_ms,
        "Connection test"
    );
    Ok(Json(TestConnectionResponse {
        connected: outcome.connected,
        elapsed_ms: outcome.elapsed_ms,
        error: outcome.error,
    }))
}

/// GET /api/devices/{id}/status
pub async fn device_status(
    State(state): State<AppState>,
    Path(device_id): Path<i64>,
) -> Result<Json<DeviceStatus>, ApiError> {
    Ok(Json(state.channels.full_status(device_id).await?))
}

/// POST /api/devices/{id}/outputs/{ch}
pub async fn set_output(
    State(state): State<AppState>,
    Path((device_id, number)): Path<(i64, u8)>,
    Json(request): Json<SetOutputRequest>,
) -> Result<Json<ChannelResponse>, ApiError> {
    let channel = state
        .channels
        .set_output(
            device_id,
            number,
            request.value,
            &request.username,
            request.reason,
        )
        .await?;
    Ok(Json(ChannelResponse { channel }))
}

/// POST /api/devices/{id}/failsafe/{ch}
pub async fn set_fail_safe(
    State(state): State<AppState>,
    Path((device_id, number)): Path<(i64, u8)>,
    Json(request): Json<SetFailSafeRequest>,
) -> Result<Json<AckResponse>, ApiError> {
    state
        .channels
        .set_fail_safe(
            device_id,
            number,
            request.enabled,
            request.value,
            &request.username,
        )
        .await?;
    Ok(Json(AckResponse::ok()))
}

/// PUT /api/devices/{id}/channels/{kind}/{ch}/label
pub async fn set_label(
    State(state): State<AppState>,
    Path((device_id, kind, number)): Path<(i64, String, u8)>,
    Json(request): Json<SetLabelRequest>,
) -> Result<Json<ChannelResponse>, ApiError> {
    let kind = ChannelKind::parse(&kind)?;
    let channel = state
        .channels
        .update_label(device_id, kind, number, &request.label)
        .await?;
    Ok(Json(ChannelResponse { channel }))
}

/// GET /api/connections/stats
pub async fn connection_stats(
    State(state): State<AppState>,
) -> Json<ConnectionStatsSnapshot> {
    Json(state.connections.stats())
}

/// POST /api/observers
pub async fn register_observer(
    State(state): State<AppState>,
    Json(request): Json<RegisterObserverRequest>,
) -> Result<(StatusCode, Json<AckResponse>), ApiError> {
    if request.observer_id.trim().is_empty() {
        return Err(IoSrvError::validation("Observer id must not be empty").into());
    }
    state.tracker.add_connection(&request.observer_id);
    Ok((StatusCode::CREATED, Json(AckResponse::ok())))
}

/// DELETE /api/observers/{id}
pub async fn remove_observer(
    State(state): State<AppState>,
    Path(observer_id): Path<String>,
) -> Json<AckResponse> {
    state.tracker.remove_connection(&observer_id);
    Json(AckResponse::ok())
}

/// POST /api/observers/{id}/subscriptions
pub async fn add_subscription(
    State(state): State<AppState>,
    Path(observer_id): Path<String>,
    Json(request): Json<SubscriptionRequest>,
) -> Json<AckResponse> {
    let subscription = match request.device_id {
        Some(id) => Subscription::Device(id),
        None => Subscription::All,
    };
    state.tracker.add_subscription(&observer_id, subscription);
    Json(AckResponse::ok())
}

/// DELETE /api/observers/{id}/subscriptions
pub async fn remove_subscription(
    State(state): State<AppState>,
    Path(observer_id): Path<String>,
    Json(request): Json<SubscriptionRequest>,
) -> Json<AckResponse> {
    let subscription = match request.device_id {
        Some(id) => Subscription::Device(id),
        None => Subscription::All,
    };
    state.tracker.remove_subscription(&observer_id, subscription);
    Json(AckResponse::ok())
}
