//! REST control surface.
//!
//! Thin layer over [`ChannelService`] and the subscription tracker:
//! handlers validate, delegate and map errors to HTTP status codes. No
//! business logic lives here.

pub mod dto;
pub mod handlers;
pub mod routes;

use std::sync::Arc;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};

use crate::channels::ChannelService;
use crate::config::DeviceDefaults;
use crate::connection::ConnectionManager;
use crate::error::IoSrvError;
use crate::subscriptions::SubscriptionTracker;

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub channels: Arc<ChannelService>,
    pub connections: Arc<ConnectionManager>,
    pub tracker: Arc<SubscriptionTracker>,
    pub defaults: DeviceDefaults,
}

/// Error wrapper giving every service error an HTTP shape
pub struct ApiError(pub IoSrvError);

impl From<IoSrvError> for ApiError {
    fn from(err: IoSrvError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            IoSrvError::Validation(_) => StatusCode::BAD_REQUEST,
            IoSrvError::Device(_) | IoSrvError::Channel(_) => StatusCode::NOT_FOUND,
            IoSrvError::Connection(_) | IoSrvError::Timeout(_) | IoSrvError::Protocol(_) => {
                StatusCode::BAD_GATEWAY
            }
            IoSrvError::Config(_)
            | IoSrvError::Storage(_)
            | IoSrvError::Notify(_)
            | IoSrvError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (
            status,
            Json(dto::ErrorResponse {
                success: false,
                error: self.0.to_string(),
            }),
        )
            .into_response()
    }
}
