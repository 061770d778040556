//! Session cache for Modbus TCP connections.
//!
//! One persistent session per device. Lookups of a live cached session
//! are lock-free (DashMap); only the create path serializes on a mutex
//! so two concurrent pollers cannot open duplicate sockets to the same
//! device.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use fleet_modbus::ModbusTcpClient;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::protocol::INPUT_BASE_ADDRESS;

/// Network identity of one device, as the caller knows it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceAddr {
    pub device_id: i64,
    pub host: String,
    pub port: u16,
    pub unit_id: u8,
    pub timeout: Duration,
}

impl DeviceAddr {
    pub fn from_device(device: &crate::model::Device) -> Self {
        Self {
            device_id: device.id,
            host: device.host.clone(),
            port: device.port,
            unit_id: device.unit_id,
            timeout: device.io_timeout(),
        }
    }
}

/// A cached, shareable Modbus session
pub struct DeviceSession {
    pub device_id: i64,
    pub host: String,
    pub port: u16,
    /// Callers serialize request/response exchanges through this lock
    pub client: Mutex<ModbusTcpClient>,
    alive: AtomicBool,
}

impl DeviceSession {
    fn new(device_id: i64, host: String, port: u16, client: ModbusTcpClient) -> Self {
        Self {
            device_id,
            host,
            port,
            client: Mutex::new(client),
            alive: AtomicBool::new(true),
        }
    }

    /// Whether the session is still considered usable
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    /// Mark the session dead; the socket itself is closed later, when
    /// the session is superseded or evicted
    pub fn mark_dead(&self) {
        self.alive.store(false, Ordering::Release);
    }

    fn matches(&self, addr: &DeviceAddr) -> bool {
        self.host == addr.host && self.port == addr.port
    }
}

/// Process-wide session counters, observability only
#[derive(Debug, Default)]
pub struct ConnectionStats {
    total_created: AtomicU64,
    reconnected: AtomicU64,
    failed: AtomicU64,
}

/// Point-in-time view of [`ConnectionStats`]
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ConnectionStatsSnapshot {
    pub active: u64,
    pub total_created: u64,
    pub reconnected: u64,
    pub failed: u64,
}

/// Owns one session per device id
pub struct ConnectionManager {
    sessions: DashMap<i64, Arc<DeviceSession>>,
    /// Serializes session creation; cached-hit reads never take it
    create_lock: Mutex<()>,
    stats: ConnectionStats,
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
            create_lock: Mutex::new(()),
            stats: ConnectionStats::default(),
        }
    }

    /// Get the cached session for a device, dialing a new one if needed.
    ///
    /// Returns `None` on any dial failure. That is a normal outcome for
    /// flaky field devices, not an error; the failure counter and the
    /// device row carry the details.
    pub async fn get_connection(&self, addr: &DeviceAddr) -> Option<Arc<DeviceSession>> {
        if let Some(session) = self.sessions.get(&addr.device_id) {
            if session.is_alive() && session.matches(addr) {
                return Some(session.clone());
            }
        }

        let _guard = self.create_lock.lock().await;

        // Another caller may have created the session while we waited.
        let stale = match self.sessions.get(&addr.device_id) {
            Some(session) if session.is_alive() && session.matches(addr) => {
                return Some(session.clone());
            }
            Some(session) => {
                session.mark_dead();
                true
            }
            None => false,
        };

        match self.dial(addr).await {
            Some(session) => {
                if stale {
                    self.stats.reconnected.fetch_add(1, Ordering::Relaxed);
                } else {
                    self.stats.total_created.fetch_add(1, Ordering::Relaxed);
                }
                // Superseding the map entry drops the old session once
                // its last user releases it.
                self.sessions.insert(addr.device_id, session.clone());
                Some(session)
            }
            None => {
                self.stats.failed.fetch_add(1, Ordering::Relaxed);
                self.sessions.remove(&addr.device_id);
                None
            }
        }
    }

    async fn dial(&self, addr: &DeviceAddr) -> Option<Arc<DeviceSession>> {
        let mut client = match ModbusTcpClient::connect(&addr.host, addr.port, addr.timeout).await
        {
            Ok(client) => client,
            Err(e) => {
                warn!(
                    device_id = addr.device_id,
                    "Failed to connect to {}:{}: {}", addr.host, addr.port, e
                );
                return None;
            }
        };

        // Verification read. Some controllers expose a register map that
        // only partially matches expectations, so a failure here is
        // logged but the session is still cached as usable.
        if let Err(e) = client
            .read_coils(addr.unit_id, INPUT_BASE_ADDRESS, 8)
            .await
        {
            warn!(
                device_id = addr.device_id,
                "Verification read on {}:{} failed: {}", addr.host, addr.port, e
            );
        }

        info!(
            device_id = addr.device_id,
            "Session established to {}:{}", addr.host, addr.port
        );
        Some(Arc::new(DeviceSession::new(
            addr.device_id,
            addr.host.clone(),
            addr.port,
            client,
        )))
    }

    /// Mark a device's cached session dead without closing the socket.
    ///
    /// Cheap and callable from hot read/write error paths; the actual
    /// close happens when the next `get_connection` supersedes it.
    pub fn invalidate(&self, device_id: i64) {
        if let Some(session) = self.sessions.get(&device_id) {
            debug!(device_id, "Invalidating cached session");
            session.mark_dead();
        }
    }

    /// Forcibly close and evict a device's session
    pub async fn remove(&self, device_id: i64) {
        if let Some((_, session)) = self.sessions.remove(&device_id) {
            session.mark_dead();
            let mut client = session.client.lock().await;
            if let Err(e) = client.close().await {
                debug!(device_id, "Close on eviction failed: {}", e);
            }
            info!(device_id, "Session evicted");
        }
    }

    /// Current counters
    pub fn stats(&self) -> ConnectionStatsSnapshot {
        let active = self
            .sessions
            .iter()
            .filter(|entry| entry.value().is_alive())
            .count() as u64;
        ConnectionStatsSnapshot {
            active,
            total_created: self.stats.total_created.load(Ordering::Relaxed),
            reconnected: self.stats.reconnected.load(Ordering::Relaxed),
            failed: self.stats.failed.load(Ordering::Relaxed),
        }
    }
}
