//! Request and response bodies for the control surface.

use serde::{Deserialize, Serialize};

use crate::model::{Channel, Device, NewDevice};

/// Standard error envelope
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
}

/// Create-device request body
#[derive(Debug, Deserialize)]
pub struct CreateDeviceRequest {
    pub name: String,
    pub host: String,
    pub port: u16,
    #[serde(default = "default_unit_id")]
    pub unit_id: u8,
    pub poll_interval_ms: Option<u64>,
    pub timeout_ms: Option<u64>,
}

fn default_unit_id() -> u8 {
    1
}

impl CreateDeviceRequest {
    pub fn into_new_device(self, defaults: &crate::config::DeviceDefaults) -> NewDevice {
        NewDevice {
            name: self.name,
            host: self.host,
            port: self.port,
            unit_id: self.unit_id,
            poll_interval_ms: self.poll_interval_ms.unwrap_or(defaults.poll_interval_ms),
            timeout_ms: self.timeout_ms.unwrap_or(defaults.connect_timeout_ms),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct DeviceResponse {
    pub device: Device,
}

/// Connection test result; the endpoint answers 200 even when the
/// device is unreachable, the outcome is the payload
#[derive(Debug, Serialize)]
pub struct TestConnectionResponse {
    pub connected: bool,
    pub elapsed_ms: u64,
    pub error: Option<String>,
}

/// Set-output request body
#[derive(Debug, Deserialize)]
pub struct SetOutputRequest {
    pub value: bool,
    pub username: String,
    pub reason: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ChannelResponse {
    pub channel: Channel,
}

/// Fail-safe configuration request body
#[derive(Debug, Deserialize)]
pub struct SetFailSafeRequest {
    pub enabled: bool,
    pub value: bool,
    pub username: String,
}

/// Label update request body
#[derive(Debug, Deserialize)]
pub struct SetLabelRequest {
    pub label: String,
}

/// Observer registration request body
#[derive(Debug, Deserialize)]
pub struct RegisterObserverRequest {
    pub observer_id: String,
}

/// Subscription add/remove request body; `device_id: null` means the
/// all-devices wildcard
#[derive(Debug, Deserialize)]
pub struct SubscriptionRequest {
    pub device_id: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct AckResponse {
    pub success: bool,
}

impl AckResponse {
    pub fn ok() -> Self {
        Self { success: true }
    }
}
