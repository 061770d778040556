//! Domain types for devices, channels and the state log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{IoSrvError, Result};

/// Number of digital channels of each kind on a controller
pub const CHANNELS_PER_KIND: u8 = 8;

/// Digital channel kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    /// Digital input (read-only)
    Input,
    /// Digital output (read/write)
    Output,
}

impl ChannelKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelKind::Input => "input",
            ChannelKind::Output => "output",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "input" => Ok(ChannelKind::Input),
            "output" => Ok(ChannelKind::Output),
            other => Err(IoSrvError::validation(format!(
                "Unknown channel kind: {}",
                other
            ))),
        }
    }
}

impl std::fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A Modbus TCP digital I/O controller
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    pub id: i64,
    pub name: String,
    pub host: String,
    pub port: u16,
    pub unit_id: u8,
    /// Inactive devices are skipped by the poll loop
    pub enabled: bool,
    pub poll_interval_ms: u64,
    pub timeout_ms: u64,
    /// Outcome of the most recent connection attempt
    pub last_connect_ok: Option<bool>,
    pub last_connect_error: Option<String>,
    pub last_poll_at: Option<DateTime<Utc>>,
}

impl Device {
    /// Per-device I/O timeout
    pub fn io_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.timeout_ms)
    }
}

/// Parameters for creating a device
#[derive(Debug, Clone, Deserialize)]
pub struct NewDevice {
    pub name: String,
    pub host: String,
    pub port: u16,
    pub unit_id: u8,
    pub poll_interval_ms: u64,
    pub timeout_ms: u64,
}

/// One digital channel of a device
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Channel {
    pub device_id: i64,
    pub kind: ChannelKind,
    /// Channel number, 0..=7
    pub number: u8,
    pub label: String,
    pub state: bool,
    pub last_change_at: Option<DateTime<Utc>>,
    /// Fail-safe configuration, meaningful for outputs only
    pub fail_safe_enabled: bool,
    pub fail_safe_value: bool,
}

/// Who caused a state transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeSource {
    /// Operator-issued write through the control surface
    User,
    /// Change detected by the poll loop
    System,
}

impl ChangeSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeSource::User => "user",
            ChangeSource::System => "system",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "user" => Ok(ChangeSource::User),
            "system" => Ok(ChangeSource::System),
            other => Err(IoSrvError::validation(format!(
                "Unknown change source: {}",
                other
            ))),
        }
    }
}

/// Append-only record of a confirmed state transition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateLogEntry {
    pub id: i64,
    pub device_id: i64,
    pub kind: ChannelKind,
    pub number: u8,
    pub previous: bool,
    pub new: bool,
    pub source: ChangeSource,
    pub username: Option<String>,
    pub reason: Option<String>,
    pub at: DateTime<Utc>,
}

/// A channel that actually flipped during a read diff
#[derive(Debug, Clone, Serialize)]
pub struct ChangedChannel {
    pub device_id: i64,
    pub kind: ChannelKind,
    pub number: u8,
    pub label: String,
    pub state: bool,
    pub at: DateTime<Utc>,
}

/// Validate a channel number against the fixed 0..=7 range.
///
/// Performed before any network I/O; out-of-range numbers never reach
/// a device.
pub fn validate_channel_number(number: u8) -> Result<()> {
    if number >= CHANNELS_PER_KIND {
        return Err(IoSrvError::validation(format!(
            "Channel number {} out of range 0-{}",
            number,
            CHANNELS_PER_KIND - 1
        )));
    }
    Ok(())
}
