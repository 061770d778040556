//! Error handling for the I/O service.
//!
//! All device-facing failures are converted into these typed values at
//! the component boundary; nothing below the control surface panics or
//! surfaces a raw transport error.

use thiserror::Error;

/// I/O service error type
#[derive(Error, Debug, Clone)]
pub enum IoSrvError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Request rejected before any network I/O
    #[error("Validation error: {0}")]
    Validation(String),

    /// Connection establishment and maintenance errors
    #[error("Connection error: {0}")]
    Connection(String),

    /// Protocol-level failures on a live session
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Operation timeout errors
    #[error("Timeout error: {0}")]
    Timeout(String),

    /// Persisted store errors
    #[error("Storage error: {0}")]
    Storage(String),

    /// Device lookup failures
    #[error("Device error: {0}")]
    Device(String),

    /// Channel lookup failures
    #[error("Channel error: {0}")]
    Channel(String),

    /// Notification sink errors
    #[error("Notify error: {0}")]
    Notify(String),

    /// Everything that should not happen
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for the I/O service
pub type Result<T> = std::result::Result<T, IoSrvError>;

impl IoSrvError {
    pub fn config(msg: impl Into<String>) -> Self {
        IoSrvError::Config(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        IoSrvError::Validation(msg.into())
    }

    pub fn connection(msg: impl Into<String>) -> Self {
        IoSrvError::Connection(msg.into())
    }

    pub fn protocol(msg: impl Into<String>) -> Self {
        IoSrvError::Protocol(msg.into())
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        IoSrvError::Timeout(msg.into())
    }

    pub fn storage(msg: impl Into<String>) -> Self {
        IoSrvError::Storage(msg.into())
    }

    pub fn notify(msg: impl Into<String>) -> Self {
        IoSrvError::Notify(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        IoSrvError::Internal(msg.into())
    }

    pub fn device_not_found(id: impl std::fmt::Display) -> Self {
        IoSrvError::Device(format!("Device not found: {}", id))
    }

    pub fn channel_not_found(id: impl std::fmt::Display) -> Self {
        IoSrvError::Channel(format!("Channel not found: {}", id))
    }

    /// Whether this error should be reported as a device connectivity
    /// failure rather than a caller mistake
    pub fn is_device_failure(&self) -> bool {
        matches!(
            self,
            IoSrvError::Connection(_) | IoSrvError::Protocol(_) | IoSrvError::Timeout(_)
        )
    }
}

impl From<sqlx::Error> for IoSrvError {
    fn from(err: sqlx::Error) -> Self {
        IoSrvError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for IoSrvError {
    fn from(err: serde_json::Error) -> Self {
        IoSrvError::Internal(format!("JSON: {err}"))
    }
}

impl From<fleet_modbus::ModbusError> for IoSrvError {
    fn from(err: fleet_modbus::ModbusError) -> Self {
        use fleet_modbus::ModbusError;
        match err {
            ModbusError::Timeout(msg) => IoSrvError::Timeout(msg),
            ModbusError::Connection(msg) => IoSrvError::Connection(msg),
            ModbusError::InvalidRequest(msg) => IoSrvError::Validation(msg),
            other => IoSrvError::Protocol(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn modbus_errors_map_to_taxonomy() {
        use fleet_modbus::ModbusError;

        let e: IoSrvError = ModbusError::timeout("t").into();
        assert!(matches!(e, IoSrvError::Timeout(_)));
        assert!(e.is_device_failure());

        let e: IoSrvError = ModbusError::Exception { code: 0x02 }.into();
        assert!(matches!(e, IoSrvError::Protocol(_)));
        assert!(e.is_device_failure());

        let e = IoSrvError::validation("channel 9 out of range");
        assert!(!e.is_device_failure());
    }
}
