//! Persisted state store.
//!
//! The poll loop and the control surface only talk to [`DeviceStore`];
//! production uses the SQLite implementation, tests the in-memory one.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::model::{Channel, ChannelKind, Device, NewDevice, StateLogEntry};

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Parameters for one state-log append
#[derive(Debug, Clone)]
pub struct NewLogEntry {
    pub device_id: i64,
    pub kind: ChannelKind,
    pub number: u8,
    pub previous: bool,
    pub new: bool,
    pub source: crate::model::ChangeSource,
    pub username: Option<String>,
    pub reason: Option<String>,
}

/// Store abstraction over devices, channels and the state log
#[async_trait]
pub trait DeviceStore: Send + Sync {
    /// All devices flagged active, in stable id order
    async fn active_devices(&self) -> Result<Vec<Device>>;

    /// Device by id
    async fn device(&self, device_id: i64) -> Result<Option<Device>>;

    /// Insert a device plus its 16 channel rows atomically; returns the
    /// created device
    async fn insert_device_with_channels(&self, new: NewDevice) -> Result<Device>;

    /// All channels of a device, inputs first, then outputs, by number
    async fn channels(&self, device_id: i64) -> Result<Vec<Channel>>;

    /// A single channel row
    async fn channel(
        &self,
        device_id: i64,
        kind: ChannelKind,
        number: u8,
    ) -> Result<Option<Channel>>;

    /// Update a channel's current state and last-change timestamp
    async fn update_channel_state(
        &self,
        device_id: i64,
        kind: ChannelKind,
        number: u8,
        state: bool,
        at: DateTime<Utc>,
    ) -> Result<()>;

    /// Update a channel's label; returns the updated row
    async fn update_channel_label(
        &self,
        device_id: i64,
        kind: ChannelKind,
        number: u8,
        label: &str,
    ) -> Result<Channel>;

    /// Update an output channel's fail-safe configuration
    async fn update_fail_safe(
        &self,
        device_id: i64,
        number: u8,
        enabled: bool,
        value: bool,
    ) -> Result<()>;

    /// Record the outcome of a connection/poll attempt on the device row
    async fn update_connection_status(
        &self,
        device_id: i64,
        ok: bool,
        error: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<()>;

    /// Append one immutable state-log row
    async fn insert_log(&self, entry: NewLogEntry) -> Result<StateLogEntry>;
}
