//! Modbus primitives for the fleet's digital I/O controller family.
//!
//! All operations validate their inputs before touching the network and
//! convert every transport failure into a typed error. Any transport
//! failure on a cached session invalidates that session before the
//! error is returned, so a broken connection is never retried as-is.

use std::sync::Arc;
use std::time::{Duration, Instant};

use fleet_modbus::ModbusTcpClient;
use serde::Serialize;
use tracing::debug;

use crate::connection::{ConnectionManager, DeviceAddr};
use crate::error::{IoSrvError, Result};
use crate::model::{validate_channel_number, CHANNELS_PER_KIND};

/// Coil base address of the digital-input block
pub const INPUT_BASE_ADDRESS: u16 = 0x0000;
/// Coil base address of the digital-output block, a fixed offset from
/// the input base on this controller family
pub const OUTPUT_BASE_ADDRESS: u16 = 0x0010;

/// Result of an on-demand connection test
#[derive(Debug, Clone, Serialize)]
pub struct TestOutcome {
    pub connected: bool,
    pub elapsed_ms: u64,
    pub error: Option<String>,
}

/// Fail-safe register values read from a device.
///
/// The register layout for fail-safe and watchdog settings is not
/// documented for this controller family, so these reads report safe
/// defaults until the addresses are confirmed; the typed contract is
/// kept so callers do not change when real registers land.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct FailSafeSettings {
    pub enabled: [bool; CHANNELS_PER_KIND as usize],
    pub values: [bool; CHANNELS_PER_KIND as usize],
}

/// Watchdog register values; same extension-point status as
/// [`FailSafeSettings`]
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct WatchdogSettings {
    pub enabled: bool,
    pub timeout_ms: u64,
}

/// Issues Modbus primitives against pooled device sessions
pub struct ProtocolClient {
    connections: Arc<ConnectionManager>,
}

impl ProtocolClient {
    pub fn new(connections: Arc<ConnectionManager>) -> Self {
        Self { connections }
    }

    /// Read the 8 digital inputs of a device
    pub async fn read_inputs(&self, addr: &DeviceAddr) -> Result<[bool; 8]> {
        self.read_block(addr, INPUT_BASE_ADDRESS).await
    }

    /// Read the 8 digital outputs of a device
    pub async fn read_outputs(&self, addr: &DeviceAddr) -> Result<[bool; 8]> {
        self.read_block(addr, OUTPUT_BASE_ADDRESS).await
    }

    /// Write one digital output coil
    pub async fn write_output(&self, addr: &DeviceAddr, channel: u8, value: bool) -> Result<()> {
        validate_channel_number(channel)?;

        let session = self.connections.get_connection(addr).await.ok_or_else(|| {
            IoSrvError::connection(format!(
                "No session to device {} at {}:{}",
                addr.device_id, addr.host, addr.port
            ))
        })?;

        let mut client = session.client.lock().await;
        match client
            .write_single_coil(addr.unit_id, OUTPUT_BASE_ADDRESS + channel as u16, value)
            .await
        {
            Ok(()) => {
                debug!(
                    device_id = addr.device_id,
                    channel, value, "Output write confirmed"
                );
                Ok(())
            }
            Err(e) => {
                self.connections.invalidate(addr.device_id);
                Err(e.into())
            }
        }
    }

    async fn read_block(&self, addr: &DeviceAddr, base: u16) -> Result<[bool; 8]> {
        let session = self.connections.get_connection(addr).await.ok_or_else(|| {
            IoSrvError::connection(format!(
                "No session to device {} at {}:{}",
                addr.device_id, addr.host, addr.port
            ))
        })?;

        let mut client = session.client.lock().await;
        let coils = match client
            .read_coils(addr.unit_id, base, CHANNELS_PER_KIND as u16)
            .await
        {
            Ok(coils) => coils,
            Err(e) => {
                self.connections.invalidate(addr.device_id);
                return Err(e.into());
            }
        };

        let mut block = [false; 8];
        for (i, bit) in coils.into_iter().take(8).enumerate() {
            block[i] = bit;
        }
        Ok(block)
    }

    /// Read a device's fail-safe settings (extension point, see module docs)
    pub async fn read_fail_safe_settings(&self, _addr: &DeviceAddr) -> Result<FailSafeSettings> {
        Ok(FailSafeSettings::default())
    }

    /// Write a fail-safe setting (extension point, see module docs)
    pub async fn write_fail_safe_setting(
        &self,
        _addr: &DeviceAddr,
        channel: u8,
        _enabled: bool,
        _value: bool,
    ) -> Result<()> {
        validate_channel_number(channel)?;
        Ok(())
    }

    /// Read a device's watchdog settings (extension point, see module docs)
    pub async fn read_watchdog_settings(&self, _addr: &DeviceAddr) -> Result<WatchdogSettings> {
        Ok(WatchdogSettings::default())
    }

    /// Write watchdog settings (extension point, see module docs)
    pub async fn write_watchdog_settings(
        &self,
        _addr: &DeviceAddr,
        _settings: WatchdogSettings,
    ) -> Result<()> {
        Ok(())
    }

    /// Force a fresh, non-cached connection attempt plus one
    /// verification read. Never touches the shared session cache.
    pub async fn test_connection(
        &self,
        host: &str,
        port: u16,
        unit_id: u8,
        timeout: Duration,
    ) -> TestOutcome {
        let started = Instant::now();
        let result = async {
            let mut client = ModbusTcpClient::connect(host, port, timeout).await?;
            client
                .read_coils(unit_id, INPUT_BASE_ADDRESS, CHANNELS_PER_KIND as u16)
                .await?;
            client.close().await.ok();
            Ok::<(), fleet_modbus::ModbusError>(())
        }
        .await;

        let elapsed_ms = started.elapsed().as_millis() as u64;
        match result {
            Ok(()) => TestOutcome {
                connected: true,
                elapsed_ms,
                error: None,
            },
            Err(e) => TestOutcome {
                connected: false,
                elapsed_ms,
                error: Some(e.to_string()),
            },
        }
    }
}
