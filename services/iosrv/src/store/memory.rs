//! In-memory store.
//!
//! DashMap-backed [`DeviceStore`] with the same semantics as the SQLite
//! implementation. Used by unit and integration tests, and handy for
//! running the service against simulators without a database file.

use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;

use crate::error::{IoSrvError, Result};
use crate::model::{Channel, ChannelKind, Device, NewDevice, StateLogEntry, CHANNELS_PER_KIND};
use crate::store::{DeviceStore, NewLogEntry};

type ChannelKey = (i64, ChannelKind, u8);

/// In-memory implementation of [`DeviceStore`]
#[derive(Default)]
pub struct MemoryStore {
    devices: DashMap<i64, Device>,
    channels: DashMap<ChannelKey, Channel>,
    log: Mutex<Vec<StateLogEntry>>,
    next_device_id: AtomicI64,
    next_log_id: AtomicI64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            devices: DashMap::new(),
            channels: DashMap::new(),
            log: Mutex::new(Vec::new()),
            next_device_id: AtomicI64::new(1),
            next_log_id: AtomicI64::new(1),
        }
    }

    /// Snapshot of all log entries, oldest first (test helper)
    pub fn log_entries(&self) -> Vec<StateLogEntry> {
        self.log.lock().clone()
    }

    /// Drop a channel row to model a store missing one (test helper)
    pub fn remove_channel(&self, device_id: i64, kind: ChannelKind, number: u8) {
        self.channels.remove(&(device_id, kind, number));
    }
}

#[async_trait]
impl DeviceStore for MemoryStore {
    async fn active_devices(&self) -> Result<Vec<Device>> {
        let mut devices: Vec<Device> = self
            .devices
            .iter()
            .filter(|entry| entry.value().enabled)
            .map(|entry| entry.value().clone())
            .collect();
        devices.sort_by_key(|d| d.id);
        Ok(devices)
    }

    async fn device(&self, device_id: i64) -> Result<Option<Device>> {
        Ok(self.devices.get(&device_id).map(|d| d.clone()))
    }

    async fn insert_device_with_channels(&self, new: NewDevice) -> Result<Device> {
        let id = self.next_device_id.fetch_add(1, Ordering::Relaxed);
        let device = Device {
            id,
            name: new.name,
            host: new.host,
            port: new.port,
            unit_id: new.unit_id,
            enabled: true,
            poll_interval_ms: new.poll_interval_ms,
            timeout_ms: new.timeout_ms,
            last_connect_ok: None,
            last_connect_error: None,
            last_poll_at: None,
        };
        self.devices.insert(id, device.clone());

        for kind in [ChannelKind::Input, ChannelKind::Output] {
            for number in 0..CHANNELS_PER_KIND {
                self.channels.insert(
                    (id, kind, number),
                    Channel {
                        device_id: id,
                        kind,
                        number,
                        label: format!("{} {}", kind.as_str(), number),
                        state: false,
                        last_change_at: None,
                        fail_safe_enabled: false,
                        fail_safe_value: false,
                    },
                );
            }
        }
        Ok(device)
    }

    async fn channels(&self, device_id: i64) -> Result<Vec<Channel>> {
        let mut channels: Vec<Channel> = self
            .channels
            .iter()
            .filter(|entry| entry.key().0 == device_id)
            .map(|entry| entry.value().clone())
            .collect();
        channels.sort_by_key(|c| (c.kind.as_str(), c.number));
        Ok(channels)
    }

    async fn channel(
        &self,
        device_id: i64,
        kind: ChannelKind,
        number: u8,
    ) -> Result<Option<Channel>> {
        Ok(self
            .channels
            .get(&(device_id, kind, number))
            .map(|c| c.clone()))
    }

    async fn update_channel_state(
        &self,
        device_id: i64,
        kind: ChannelKind,
        number: u8,
        state: bool,
        at: DateTime<Utc>,
    ) -> Result<()> {
        if let Some(mut ch) = self.channels.get_mut(&(device_id, kind, number)) {
            ch.state = state;
            ch.last_change_at = Some(at);
        }
        Ok(())
    }

    async fn update_channel_label(
        &self,
        device_id: i64,
        kind: ChannelKind,
        number: u8,
        label: &str,
    ) -> Result<Channel> {
        match self.channels.get_mut(&(device_id, kind, number)) {
            Some(mut ch) => {
                ch.label = label.to_string();
                Ok(ch.clone())
            }
            None => Err(IoSrvError::channel_not_found(format!(
                "{}/{}/{}",
                device_id, kind, number
            ))),
        }
    }

    async fn update_fail_safe(
        &self,
        device_id: i64,
        number: u8,
        enabled: bool,
        value: bool,
    ) -> Result<()> {
        if let Some(mut ch) = self
            .channels
            .get_mut(&(device_id, ChannelKind::Output, number))
        {
            ch.fail_safe_enabled = enabled;
            ch.fail_safe_value = value;
        }
        Ok(())
    }

    async fn update_connection_status(
        &self,
        device_id: i64,
        ok: bool,
        error: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<()> {
        if let Some(mut device) = self.devices.get_mut(&device_id) {
            device.last_connect_ok = Some(ok);
            device.last_connect_error = error.map(|s| s.to_string());
            device.last_poll_at = Some(at);
        }
        Ok(())
    }

    async fn insert_log(&self, entry: NewLogEntry) -> Result<StateLogEntry> {
        let row = StateLogEntry {
            id: self.next_log_id.fetch_add(1, Ordering::Relaxed),
            device_id: entry.device_id,
            kind: entry.kind,
            number: entry.number,
            previous: entry.previous,
            new: entry.new,
            source: entry.source,
            username: entry.username,
            reason: entry.reason,
            at: Utc::now(),
        };
        self.log.lock().push(row.clone());
        Ok(row)
    }
}
