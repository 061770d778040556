//! Background poll loop.
//!
//! One scheduler task drives all devices. Each tick it decides between
//! two states: `Idle` (demand-based polling is on and nobody is
//! listening, so no device traffic at all) and `Polling` (read every due
//! device, bounded by `max_concurrent_polls`). A failing device never
//! stalls the others; its error is recorded on the device row and a
//! connection-status event goes out on every failed poll, so an
//! observer attaching mid-outage still hears about it.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::channels::ChannelService;
use crate::config::PollingConfig;
use crate::connection::DeviceAddr;
use crate::model::{ChannelKind, Device};
use crate::notify::{
    ConnectionStatusEvent, DeviceStatusEvent, Notification, NotificationSink,
};
use crate::store::DeviceStore;
use crate::subscriptions::SubscriptionTracker;

/// Scheduler state, reported in logs on every transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SchedulerState {
    Idle,
    Polling,
}

/// Decide whether a device is due for a poll this tick.
///
/// Pure so the gating logic is testable without a running loop:
/// demand-based mode skips everything while nothing is subscribed, and a
/// specific subscription only wakes its own device. A device is due when
/// it has never been polled or its own interval has elapsed.
pub fn should_poll(
    device: &Device,
    demand_based: bool,
    has_wildcard: bool,
    subscribed: &std::collections::HashSet<i64>,
    now: DateTime<Utc>,
) -> bool {
    if !device.enabled {
        return false;
    }
    if demand_based && !has_wildcard && !subscribed.contains(&device.id) {
        return false;
    }
    match device.last_poll_at {
        None => true,
        Some(last) => {
            let elapsed = now.signed_duration_since(last);
            elapsed.num_milliseconds() >= device.poll_interval_ms as i64
        }
    }
}

pub struct PollingScheduler {
    store: Arc<dyn DeviceStore>,
    channels: Arc<ChannelService>,
    tracker: Arc<SubscriptionTracker>,
    sink: Arc<dyn NotificationSink>,
    config: PollingConfig,
}

impl PollingScheduler {
    pub fn new(
        store: Arc<dyn DeviceStore>,
        channels: Arc<ChannelService>,
        tracker: Arc<SubscriptionTracker>,
        sink: Arc<dyn NotificationSink>,
        config: PollingConfig,
    ) -> Self {
        Self {
            store,
            channels,
            tracker,
            sink,
            config,
        }
    }

    /// Run until the token is cancelled
    pub async fn run(self, shutdown: CancellationToken) {
        if !self.config.enabled {
            info!("Polling disabled by configuration");
            return;
        }

        let mut interval = tokio::time::interval(self.config.tick_interval());
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut state = SchedulerState::Idle;
        info!(
            interval_ms = self.config.interval_ms,
            demand_based = self.config.demand_based,
            max_concurrent = self.config.max_concurrent_polls,
            "Polling scheduler started"
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Polling scheduler stopping");
                    return;
                }
                _ = interval.tick() => {
                    // A tick in progress is abandoned on shutdown rather
                    // than waiting for slow device timeouts.
                    tokio::select! {
                        _ = shutdown.cancelled() => {
                            info!("Polling scheduler stopping");
                            return;
                        }
                        next = self.tick(state) => {
                            if next != state {
                                info!(from = ?state, to = ?next, "Scheduler state changed");
                                state = next;
                            }
                        }
                    }
                }
            }
        }
    }

    /// One tick: gate on demand, then poll every due device
    async fn tick(&self, state: SchedulerState) -> SchedulerState {
        if self.config.demand_based && !self.tracker.has_active_subscriptions() {
            return SchedulerState::Idle;
        }

        let devices = match self.store.active_devices().await {
            Ok(devices) => devices,
            Err(e) => {
                error!("Failed to load device list: {}", e);
                return state;
            }
        };

        let has_wildcard = self.tracker.has_wildcard();
        let subscribed = self.tracker.subscribed_device_ids();
        let now = Utc::now();
        let due: Vec<Device> = devices
            .into_iter()
            .filter(|d| {
                should_poll(d, self.config.demand_based, has_wildcard, &subscribed, now)
            })
            .collect();
        if due.is_empty() {
            return if self.config.demand_based {
                SchedulerState::Polling
            } else {
                state
            };
        }

        let limit = self.config.max_concurrent_polls.max(1);
        stream::iter(due)
            .for_each_concurrent(limit, |device| async move {
                self.poll_device(device).await;
            })
            .await;
        SchedulerState::Polling
    }

    /// Poll a single device; every failure is absorbed here
    async fn poll_device(&self, device: Device) {
        let addr = DeviceAddr::from_device(&device);
        let result = async {
            let inputs = self.channels.protocol().read_inputs(&addr).await?;
            let outputs = self.channels.protocol().read_outputs(&addr).await?;
            Ok::<_, crate::error::IoSrvError>((inputs, outputs))
        }
        .await;

        let now = Utc::now();
        let was_connected = device.last_connect_ok.unwrap_or(false);

        match result {
            Ok((inputs, outputs)) => {
                if let Err(e) = self.reconcile(&device, inputs, outputs, now).await {
                    error!(device_id = device.id, "Failed to persist poll result: {}", e);
                    return;
                }
                if !was_connected {
                    self.publish_connection_status(device.id, true, None, now)
                        .await;
                }
                self.publish_device_status(&device, now).await;
            }
            Err(e) => {
                let message = e.to_string();
                warn!(device_id = device.id, "Poll failed: {}", message);
                if let Err(e) = self
                    .store
                    .update_connection_status(device.id, false, Some(&message), now)
                    .await
                {
                    error!(device_id = device.id, "Failed to record poll failure: {}", e);
                }
                self.publish_connection_status(device.id, false, Some(message), now)
                    .await;
            }
        }
    }

    async fn reconcile(
        &self,
        device: &Device,
        inputs: [bool; 8],
        outputs: [bool; 8],
        now: DateTime<Utc>,
    ) -> crate::error::Result<()> {
        let input_changes = self
            .channels
            .apply_read_diff(device, ChannelKind::Input, inputs)
            .await?;
        let output_changes = self
            .channels
            .apply_read_diff(device, ChannelKind::Output, outputs)
            .await?;
        if !input_changes.is_empty() || !output_changes.is_empty() {
            debug!(
                device_id = device.id,
                inputs = input_changes.len(),
                outputs = output_changes.len(),
                "Poll detected channel changes"
            );
        }
        self.store
            .update_connection_status(device.id, true, None, now)
            .await
    }

    async fn publish_connection_status(
        &self,
        device_id: i64,
        connected: bool,
        error: Option<String>,
        at: DateTime<Utc>,
    ) {
        let event = Notification::ConnectionStatus(ConnectionStatusEvent {
            device_id,
            connected,
            error,
            at,
        });
        if let Err(e) = self.sink.publish(event).await {
            warn!(device_id, "Failed to publish connection status: {}", e);
        }
    }

    async fn publish_device_status(&self, device: &Device, at: DateTime<Utc>) {
        let channels = match self.store.channels(device.id).await {
            Ok(channels) => channels,
            Err(e) => {
                warn!(device_id = device.id, "Failed to load channels for status event: {}", e);
                return;
            }
        };
        let mut snapshot = device.clone();
        snapshot.last_connect_ok = Some(true);
        snapshot.last_connect_error = None;
        snapshot.last_poll_at = Some(at);
        let event = Notification::DeviceStatus(DeviceStatusEvent::new(&snapshot, true, channels));
        if let Err(e) = self.sink.publish(event).await {
            warn!(device_id = device.id, "Failed to publish device status: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn device(id: i64, enabled: bool, last_poll_at: Option<DateTime<Utc>>) -> Device {
        Device {
            id,
            name: format!("dev {}", id),
            host: "127.0.0.1".to_string(),
            port: 502,
            unit_id: 1,
            enabled,
            poll_interval_ms: 1000,
            timeout_ms: 500,
            last_connect_ok: None,
            last_connect_error: None,
            last_poll_at,
        }
    }

    #[test]
    fn demand_based_idle_when_nothing_subscribed() {
        let d = device(1, true, None);
        let none = HashSet::new();
        assert!(!should_poll(&d, true, false, &none, Utc::now()));
        // Continuous mode polls regardless.
        assert!(should_poll(&d, false, false, &none, Utc::now()));
    }

    #[test]
    fn wildcard_wakes_every_device() {
        let d = device(1, true, None);
        let none = HashSet::new();
        assert!(should_poll(&d, true, true, &none, Utc::now()));
    }

    #[test]
    fn specific_subscription_only_wakes_its_device() {
        let d1 = device(1, true, None);
        let d2 = device(2, true, None);
        let subscribed: HashSet<i64> = [1].into_iter().collect();
        assert!(should_poll(&d1, true, false, &subscribed, Utc::now()));
        assert!(!should_poll(&d2, true, false, &subscribed, Utc::now()));
    }

    #[test]
    fn disabled_devices_never_poll() {
        let d = device(1, false, None);
        let none = HashSet::new();
        assert!(!should_poll(&d, false, false, &none, Utc::now()));
    }

    #[test]
    fn device_interval_gates_repolls() {
        let now = Utc::now();
        let none = HashSet::new();

        let recent = device(1, true, Some(now - chrono::Duration::milliseconds(200)));
        assert!(!should_poll(&recent, false, false, &none, now));

        let stale = device(1, true, Some(now - chrono::Duration::milliseconds(1500)));
        assert!(should_poll(&stale, false, false, &none, now));
    }
}
