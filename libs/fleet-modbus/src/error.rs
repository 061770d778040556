//! Error types for the Modbus TCP client.

use thiserror::Error;

/// Modbus client error type
#[derive(Error, Debug, Clone)]
pub enum ModbusError {
    /// Connection establishment and socket-level errors
    #[error("Connection error: {0}")]
    Connection(String),

    /// Request or response exceeded its deadline
    #[error("Timeout error: {0}")]
    Timeout(String),

    /// Malformed frame or PDU
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Device returned a Modbus exception response
    #[error("Modbus exception 0x{code:02X} ({})", exception_name(*.code))]
    Exception {
        /// Raw exception code from the device
        code: u8,
    },

    /// Request rejected before any I/O
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

/// Result type alias for Modbus operations
pub type ModbusResult<T> = std::result::Result<T, ModbusError>;

impl ModbusError {
    pub fn connection(msg: impl Into<String>) -> Self {
        ModbusError::Connection(msg.into())
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        ModbusError::Timeout(msg.into())
    }

    pub fn protocol(msg: impl Into<String>) -> Self {
        ModbusError::Protocol(msg.into())
    }

    pub fn invalid_request(msg: impl Into<String>) -> Self {
        ModbusError::InvalidRequest(msg.into())
    }
}

/// Human-readable name for a Modbus exception code
pub fn exception_name(code: u8) -> &'static str {
    match code {
        0x01 => "Illegal function",
        0x02 => "Illegal data address",
        0x03 => "Illegal data value",
        0x04 => "Slave device failure",
        0x05 => "Acknowledge",
        0x06 => "Slave device busy",
        0x08 => "Memory parity error",
        0x0A => "Gateway path unavailable",
        0x0B => "Gateway target failed to respond",
        _ => "Unknown exception",
    }
}

impl From<std::io::Error> for ModbusError {
    fn from(err: std::io::Error) -> Self {
        ModbusError::Connection(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exception_display_includes_name() {
        let err = ModbusError::Exception { code: 0x02 };
        let msg = err.to_string();
        assert!(msg.contains("0x02"));
        assert!(msg.contains("Illegal data address"));
    }
}
