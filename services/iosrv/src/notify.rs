//! Notification fan-out.
//!
//! Every event is delivered to two audiences: the group scoped to the
//! specific device (`iosrv:device:{id}`) and the catch-all group
//! (`iosrv:device:all`). The production sink batches events through an
//! mpsc channel and publishes them to Redis pub/sub from a background
//! task; tests use the in-process broadcast sink.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, warn};

use crate::error::{IoSrvError, Result};
use crate::model::{Channel, ChannelKind, Device};

/// Full device snapshot, published after every successful poll
#[derive(Debug, Clone, Serialize)]
pub struct DeviceStatusEvent {
    pub device_id: i64,
    pub name: String,
    pub connected: bool,
    pub last_poll_at: Option<DateTime<Utc>>,
    pub channels: Vec<Channel>,
}

impl DeviceStatusEvent {
    pub fn new(device: &Device, connected: bool, channels: Vec<Channel>) -> Self {
        Self {
            device_id: device.id,
            name: device.name.clone(),
            connected,
            last_poll_at: device.last_poll_at,
            channels,
        }
    }
}

/// One channel flipped state
#[derive(Debug, Clone, Serialize)]
pub struct ChannelChangeEvent {
    pub device_id: i64,
    pub kind: ChannelKind,
    pub number: u8,
    pub label: String,
    pub state: bool,
    pub at: DateTime<Utc>,
}

/// Device became reachable/unreachable
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionStatusEvent {
    pub device_id: i64,
    pub connected: bool,
    pub error: Option<String>,
    pub at: DateTime<Utc>,
}

/// Event kinds emitted by the I/O core
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notification {
    DeviceStatus(DeviceStatusEvent),
    ChannelChange(ChannelChangeEvent),
    ConnectionStatus(ConnectionStatusEvent),
}

impl Notification {
    /// The device this notification is about
    pub fn device_id(&self) -> i64 {
        match self {
            Notification::DeviceStatus(e) => e.device_id,
            Notification::ChannelChange(e) => e.device_id,
            Notification::ConnectionStatus(e) => e.device_id,
        }
    }

    /// Pub/sub group for the specific device
    pub fn device_group(&self) -> String {
        format!("iosrv:device:{}", self.device_id())
    }

    /// Pub/sub group that receives every device's events
    pub fn all_group() -> &'static str {
        "iosrv:device:all"
    }
}

/// Where notifications go
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn publish(&self, notification: Notification) -> Result<()>;
}

/// Publisher configuration for the Redis sink
#[derive(Debug, Clone)]
pub struct PublisherConfig {
    pub batch_size: usize,
    pub flush_interval_ms: u64,
    pub channel_buffer: usize,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            flush_interval_ms: 100,
            channel_buffer: 10_000,
        }
    }
}

/// Redis pub/sub sink with buffered batch publishing
pub struct RedisSink {
    tx: mpsc::Sender<Notification>,
}

impl RedisSink {
    /// Create the sink and start its background flush task
    pub fn new(redis_url: &str, config: PublisherConfig) -> Result<Self> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| IoSrvError::notify(format!("Invalid Redis URL: {}", e)))?;
        let (tx, rx) = mpsc::channel(config.channel_buffer);

        tokio::spawn(async move {
            Self::publish_task(client, rx, config).await;
        });

        Ok(Self { tx })
    }

    async fn publish_task(
        client: redis::Client,
        mut rx: mpsc::Receiver<Notification>,
        config: PublisherConfig,
    ) {
        let mut buffer: Vec<Notification> = Vec::with_capacity(config.batch_size);
        let mut connection: Option<redis::aio::MultiplexedConnection> = None;
        let mut interval = tokio::time::interval(std::time::Duration::from_millis(
            config.flush_interval_ms,
        ));

        loop {
            tokio::select! {
                maybe = rx.recv() => {
                    match maybe {
                        Some(notification) => {
                            buffer.push(notification);
                            if buffer.len() >= config.batch_size {
                                Self::flush(&client, &mut connection, &mut buffer).await;
                            }
                        }
                        // Channel closed: final flush and exit.
                        None => {
                            Self::flush(&client, &mut connection, &mut buffer).await;
                            break;
                        }
                    }
                }
                _ = interval.tick() => {
                    if !buffer.is_empty() {
                        Self::flush(&client, &mut connection, &mut buffer).await;
                    }
                }
            }
        }
    }

    async fn flush(
        client: &redis::Client,
        connection: &mut Option<redis::aio::MultiplexedConnection>,
        buffer: &mut Vec<Notification>,
    ) {
        if buffer.is_empty() {
            return;
        }

        let conn = match connection {
            Some(conn) => conn,
            None => match client.get_multiplexed_async_connection().await {
                Ok(conn) => connection.insert(conn),
                Err(e) => {
                    error!("Failed to connect to Redis, dropping {} notifications: {}", buffer.len(), e);
                    buffer.clear();
                    return;
                }
            },
        };

        let mut pipe = redis::pipe();
        for notification in buffer.iter() {
            let payload = match serde_json::to_string(notification) {
                Ok(payload) => payload,
                Err(e) => {
                    warn!("Failed to serialize notification: {}", e);
                    continue;
                }
            };
            pipe.publish(notification.device_group(), &payload).ignore();
            pipe.publish(Notification::all_group(), &payload).ignore();
        }

        match pipe.query_async::<()>(conn).await {
            Ok(()) => {
                debug!("Published {} notifications", buffer.len());
            }
            Err(e) => {
                error!("Redis publish failed, reconnecting next flush: {}", e);
                *connection = None;
            }
        }
        buffer.clear();
    }
}

#[async_trait]
impl NotificationSink for RedisSink {
    async fn publish(&self, notification: Notification) -> Result<()> {
        self.tx
            .send(notification)
            .await
            .map_err(|_| IoSrvError::notify("Notification publisher is gone"))
    }
}

/// In-process sink over a tokio broadcast channel.
///
/// Subscribers see every event; used by tests and by anything embedding
/// the service without Redis.
pub struct BroadcastSink {
    tx: broadcast::Sender<Notification>,
}

impl Default for BroadcastSink {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl BroadcastSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.tx.subscribe()
    }
}

#[async_trait]
impl NotificationSink for BroadcastSink {
    async fn publish(&self, notification: Notification) -> Result<()> {
        // No receivers is fine; events are fire-and-forget.
        let _ = self.tx.send(notification);
        Ok(())
    }
}
