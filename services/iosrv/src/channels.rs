//! Channel orchestration.
//!
//! [`ChannelService`] is the single write path for channel state: it talks
//! to the device through the protocol client, persists the confirmed
//! outcome, appends the audit entry and publishes the notification. The
//! HTTP surface and the poll loop both go through it, so the
//! write-then-persist-then-notify ordering holds everywhere.

use std::sync::Arc;

use chrono::Utc;
use tracing::info;

use crate::audit::AuditLogger;
use crate::connection::DeviceAddr;
use crate::error::{IoSrvError, Result};
use crate::model::{
    validate_channel_number, ChangedChannel, Channel, ChannelKind, Device, NewDevice,
    CHANNELS_PER_KIND,
};
use crate::notify::{ChannelChangeEvent, Notification, NotificationSink};
use crate::protocol::ProtocolClient;
use crate::store::DeviceStore;

/// Maximum accepted channel label length
const MAX_LABEL_LEN: usize = 64;

/// Combined device view served by the status endpoint
#[derive(Debug, Clone, serde::Serialize)]
pub struct DeviceStatus {
    pub device: Device,
    pub connected: bool,
    pub channels: Vec<Channel>,
}

pub struct ChannelService {
    store: Arc<dyn DeviceStore>,
    protocol: ProtocolClient,
    audit: AuditLogger,
    sink: Arc<dyn NotificationSink>,
}

impl ChannelService {
    pub fn new(
        store: Arc<dyn DeviceStore>,
        protocol: ProtocolClient,
        sink: Arc<dyn NotificationSink>,
    ) -> Self {
        let audit = AuditLogger::new(store.clone());
        Self {
            store,
            protocol,
            audit,
            sink,
        }
    }

    pub fn protocol(&self) -> &ProtocolClient {
        &self.protocol
    }

    /// Register a new device and its fixed set of 16 channels
    pub async fn create_device(&self, new: NewDevice) -> Result<Device> {
        if new.name.trim().is_empty() {
            return Err(IoSrvError::validation("Device name must not be empty"));
        }
        if new.host.trim().is_empty() {
            return Err(IoSrvError::validation("Device host must not be empty"));
        }
        if new.port == 0 {
            return Err(IoSrvError::validation("Device port must not be zero"));
        }
        if new.poll_interval_ms == 0 {
            return Err(IoSrvError::validation(
                "Poll interval must be at least 1 ms",
            ));
        }
        if new.timeout_ms == 0 {
            return Err(IoSrvError::validation("Timeout must be at least 1 ms"));
        }

        let device = self.store.insert_device_with_channels(new).await?;
        info!(
            device_id = device.id,
            name = %device.name,
            host = %device.host,
            port = device.port,
            "Device registered"
        );
        Ok(device)
    }

    /// Device row plus all channel rows and current connectivity
    pub async fn full_status(&self, device_id: i64) -> Result<DeviceStatus> {
        let device = self
            .store
            .device(device_id)
            .await?
            .ok_or_else(|| IoSrvError::device_not_found(device_id))?;
        let channels = self.store.channels(device_id).await?;
        let connected = device.last_connect_ok.unwrap_or(false);
        Ok(DeviceStatus {
            device,
            connected,
            channels,
        })
    }

    /// Command an output channel.
    ///
    /// The device write happens first; persisted state, audit log and
    /// notification only reflect writes the device acknowledged. Every
    /// accepted write is logged, even one that lands the channel in the
    /// state it already had: the write itself is the auditable event.
    pub async fn set_output(
        &self,
        device_id: i64,
        number: u8,
        value: bool,
        username: &str,
        reason: Option<String>,
    ) -> Result<Channel> {
        validate_channel_number(number)?;
        let device = self
            .store
            .device(device_id)
            .await?
            .ok_or_else(|| IoSrvError::device_not_found(device_id))?;
        let current = self
            .store
            .channel(device_id, ChannelKind::Output, number)
            .await?
            .ok_or_else(|| {
                IoSrvError::channel_not_found(format!("{}/output/{}", device_id, number))
            })?;

        let addr = DeviceAddr::from_device(&device);
        self.protocol.write_output(&addr, number, value).await?;

        let at = Utc::now();
        self.store
            .update_channel_state(device_id, ChannelKind::Output, number, value, at)
            .await?;
        self.audit
            .log_user_change(
                device_id,
                ChannelKind::Output,
                number,
                current.state,
                value,
                username,
                reason,
            )
            .await?;
        self.sink
            .publish(Notification::ChannelChange(ChannelChangeEvent {
                device_id,
                kind: ChannelKind::Output,
                number,
                label: current.label.clone(),
                state: value,
                at,
            }))
            .await?;

        Ok(Channel {
            state: value,
            last_change_at: Some(at),
            ..current
        })
    }

    /// Update an output channel's fail-safe configuration on the device
    /// and in the store
    pub async fn set_fail_safe(
        &self,
        device_id: i64,
        number: u8,
        enabled: bool,
        value: bool,
        username: &str,
    ) -> Result<()> {
        validate_channel_number(number)?;
        let device = self
            .store
            .device(device_id)
            .await?
            .ok_or_else(|| IoSrvError::device_not_found(device_id))?;
        self.store
            .channel(device_id, ChannelKind::Output, number)
            .await?
            .ok_or_else(|| {
                IoSrvError::channel_not_found(format!("{}/output/{}", device_id, number))
            })?;

        let addr = DeviceAddr::from_device(&device);
        self.protocol
            .write_fail_safe_setting(&addr, number, enabled, value)
            .await?;
        self.store
            .update_fail_safe(device_id, number, enabled, value)
            .await?;
        info!(device_id, number, enabled, value, username, "Fail-safe updated");
        Ok(())
    }

    /// Rename a channel; returns the updated row
    pub async fn update_label(
        &self,
        device_id: i64,
        kind: ChannelKind,
        number: u8,
        label: &str,
    ) -> Result<Channel> {
        validate_channel_number(number)?;
        let label = label.trim();
        if label.is_empty() {
            return Err(IoSrvError::validation("Channel label must not be empty"));
        }
        if label.len() > MAX_LABEL_LEN {
            return Err(IoSrvError::validation(format!(
                "Channel label exceeds {} characters",
                MAX_LABEL_LEN
            )));
        }
        self.store
            .channel(device_id, kind, number)
            .await?
            .ok_or_else(|| {
                IoSrvError::channel_not_found(format!("{}/{}/{}", device_id, kind, number))
            })?;
        self.store
            .update_channel_label(device_id, kind, number, label)
            .await
    }

    /// Reconcile one freshly read channel block against the store.
    ///
    /// Each bit that differs from the persisted state becomes a store
    /// update, a system audit entry and a notification. Returns the
    /// channels that actually flipped.
    pub async fn apply_read_diff(
        &self,
        device: &Device,
        kind: ChannelKind,
        states: [bool; CHANNELS_PER_KIND as usize],
    ) -> Result<Vec<ChangedChannel>> {
        let mut changed = Vec::new();
        for (i, &state) in states.iter().enumerate() {
            let number = i as u8;
            let current = match self.store.channel(device.id, kind, number).await? {
                Some(channel) => channel,
                None => continue,
            };
            if current.state == state {
                continue;
            }

            let at = Utc::now();
            self.store
                .update_channel_state(device.id, kind, number, state, at)
                .await?;
            self.audit
                .log_system_change(device.id, kind, number, current.state, state)
                .await?;
            self.sink
                .publish(Notification::ChannelChange(ChannelChangeEvent {
                    device_id: device.id,
                    kind,
                    number,
                    label: current.label.clone(),
                    state,
                    at,
                }))
                .await?;
            changed.push(ChangedChannel {
                device_id: device.id,
                kind,
                number,
                label: current.label,
                state,
                at,
            });
        }
        Ok(changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ConnectionManager;
    use crate::model::ChangeSource;
    use crate::notify::BroadcastSink;
    use crate::store::MemoryStore;

    fn service_with(store: Arc<MemoryStore>, sink: Arc<BroadcastSink>) -> ChannelService {
        let protocol = ProtocolClient::new(Arc::new(ConnectionManager::new()));
        ChannelService::new(store, protocol, sink)
    }

    fn sample_device() -> NewDevice {
        NewDevice {
            name: "rack 1".to_string(),
            host: "127.0.0.1".to_string(),
            port: 1, // nothing listens here
            unit_id: 1,
            poll_interval_ms: 1000,
            timeout_ms: 50,
        }
    }

    #[tokio::test]
    async fn create_device_rejects_empty_name() {
        let store = Arc::new(MemoryStore::new());
        let svc = service_with(store, Arc::new(BroadcastSink::default()));
        let err = svc
            .create_device(NewDevice {
                name: "  ".to_string(),
                ..sample_device()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, IoSrvError::Validation(_)));
    }

    #[tokio::test]
    async fn set_output_on_unreachable_device_leaves_no_trace() {
        let store = Arc::new(MemoryStore::new());
        let sink = Arc::new(BroadcastSink::default());
        let svc = service_with(store.clone(), sink.clone());
        let device = svc.create_device(sample_device()).await.unwrap();

        let err = svc
            .set_output(device.id, 0, true, "alice", None)
            .await
            .unwrap_err();
        assert!(err.is_device_failure());

        // Nothing persisted, nothing logged.
        let channel = store
            .channel(device.id, ChannelKind::Output, 0)
            .await
            .unwrap()
            .unwrap();
        assert!(!channel.state);
        assert!(channel.last_change_at.is_none());
        assert!(store.log_entries().is_empty());
    }

    #[tokio::test]
    async fn set_fail_safe_requires_an_existing_channel_row() {
        let store = Arc::new(MemoryStore::new());
        let svc = service_with(store.clone(), Arc::new(BroadcastSink::default()));
        let device = svc.create_device(sample_device()).await.unwrap();

        store.remove_channel(device.id, ChannelKind::Output, 4);
        // Without the row check the store update silently skips the
        // missing channel and the call acks a write that changed nothing.
        let err = svc
            .set_fail_safe(device.id, 4, true, false, "alice")
            .await
            .unwrap_err();
        assert!(matches!(err, IoSrvError::Channel(_)));
    }

    #[tokio::test]
    async fn set_output_rejects_channel_nine_without_device_lookup() {
        let store = Arc::new(MemoryStore::new());
        let svc = service_with(store, Arc::new(BroadcastSink::default()));
        // Device 42 does not exist; validation fires first.
        let err = svc.set_output(42, 9, true, "alice", None).await.unwrap_err();
        assert!(matches!(err, IoSrvError::Validation(_)));
    }

    #[tokio::test]
    async fn apply_read_diff_records_system_changes() {
        let store = Arc::new(MemoryStore::new());
        let sink = Arc::new(BroadcastSink::default());
        let svc = service_with(store.clone(), sink.clone());
        let device = svc.create_device(sample_device()).await.unwrap();
        let mut rx = sink.subscribe();

        let mut states = [false; 8];
        states[3] = true;
        let changed = svc
            .apply_read_diff(&device, ChannelKind::Input, states)
            .await
            .unwrap();

        assert_eq!(changed.len(), 1);
        assert_eq!(changed[0].number, 3);
        assert!(changed[0].state);

        let entries = store.log_entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].source, ChangeSource::System);
        assert!(entries[0].username.is_none());

        let event = rx.recv().await.unwrap();
        assert_eq!(event.device_id(), device.id);

        // Same block again is a no-op.
        let changed = svc
            .apply_read_diff(&device, ChannelKind::Input, states)
            .await
            .unwrap();
        assert!(changed.is_empty());
        assert_eq!(store.log_entries().len(), 1);
    }

    #[tokio::test]
    async fn update_label_trims_and_validates() {
        let store = Arc::new(MemoryStore::new());
        let svc = service_with(store, Arc::new(BroadcastSink::default()));
        let device = svc.create_device(sample_device()).await.unwrap();

        let channel = svc
            .update_label(device.id, ChannelKind::Input, 2, "  door contact  ")
            .await
            .unwrap();
        assert_eq!(channel.label, "door contact");

        let err = svc
            .update_label(device.id, ChannelKind::Input, 2, "   ")
            .await
            .unwrap_err();
        assert!(matches!(err, IoSrvError::Validation(_)));

        let err = svc
            .update_label(device.id, ChannelKind::Input, 2, &"x".repeat(65))
            .await
            .unwrap_err();
        assert!(matches!(err, IoSrvError::Validation(_)));
    }

    #[tokio::test]
    async fn full_status_reports_16_channels() {
        let store = Arc::new(MemoryStore::new());
        let svc = service_with(store, Arc::new(BroadcastSink::default()));
        let device = svc.create_device(sample_device()).await.unwrap();

        let status = svc.full_status(device.id).await.unwrap();
        assert_eq!(status.channels.len(), 16);
        assert!(!status.connected);

        let err = svc.full_status(9999).await.unwrap_err();
        assert!(matches!(err, IoSrvError::Device(_)));
    }
}
