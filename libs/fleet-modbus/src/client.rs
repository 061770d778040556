//! Async Modbus TCP client.
//!
//! One client owns one TCP session. Requests are strictly
//! request/response; the caller serializes access.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{lookup_host, TcpSocket, TcpStream};
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::error::{ModbusError, ModbusResult};
use crate::frame::{build_frame, check_response_header, MbapHeader, MBAP_HEADER_LEN};
use crate::pdu::{
    build_read_coils, build_write_single_coil, parse_coil_response, parse_write_coil_response,
    ModbusPdu,
};

/// Modbus TCP client over a single connection
#[derive(Debug)]
pub struct ModbusTcpClient {
    stream: TcpStream,
    peer: SocketAddr,
    timeout: Duration,
    transaction_id: u16,
}

impl ModbusTcpClient {
    /// Dial a Modbus TCP endpoint.
    ///
    /// The timeout bounds name resolution, the TCP handshake and every
    /// subsequent request/response exchange. TCP keep-alive is enabled so
    /// half-dead field devices are eventually detected by the kernel.
    pub async fn connect(host: &str, port: u16, io_timeout: Duration) -> ModbusResult<Self> {
        let addr_str = format!("{}:{}", host, port);
        debug!("Connecting to Modbus TCP endpoint {}", addr_str);

        let addr = timeout(io_timeout, lookup_host(&addr_str))
            .await
            .map_err(|_| ModbusError::timeout(format!("Resolving {} timed out", addr_str)))?
            .map_err(|e| ModbusError::connection(format!("Failed to resolve {}: {}", addr_str, e)))?
            .next()
            .ok_or_else(|| {
                ModbusError::connection(format!("No address found for {}", addr_str))
            })?;

        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()
        } else {
            TcpSocket::new_v6()
        }
        .map_err(|e| ModbusError::connection(format!("Socket creation failed: {}", e)))?;

        if let Err(e) = socket.set_keepalive(true) {
            warn!("Failed to enable TCP keep-alive for {}: {}", addr_str, e);
        }

        let stream = match timeout(io_timeout, socket.connect(addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                return Err(ModbusError::connection(format!(
                    "Failed to connect to {}: {}",
                    addr_str, e
                )))
            }
            Err(_) => {
                return Err(ModbusError::timeout(format!(
                    "Connection to {} timed out after {:?}",
                    addr_str, io_timeout
                )))
            }
        };

        if let Err(e) = stream.set_nodelay(true) {
            warn!("Failed to set TCP_NODELAY for {}: {}", addr_str, e);
        }

        debug!("Connected to Modbus TCP endpoint {}", addr_str);
        Ok(Self {
            stream,
            peer: addr,
            timeout: io_timeout,
            transaction_id: 0,
        })
    }

    /// Remote endpoint this client is connected to
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Read `count` coils starting at `start_address` (function 0x01)
    pub async fn read_coils(
        &mut self,
        unit_id: u8,
        start_address: u16,
        count: u16,
    ) -> ModbusResult<Vec<bool>> {
        let pdu = build_read_coils(start_address, count)?;
        let response = self.request(unit_id, &pdu).await?;
        parse_coil_response(&response, count)
    }

    /// Write a single coil at `address` (function 0x05)
    pub async fn write_single_coil(
        &mut self,
        unit_id: u8,
        address: u16,
        value: bool,
    ) -> ModbusResult<()> {
        let pdu = build_write_single_coil(address, value)?;
        let response = self.request(unit_id, &pdu).await?;
        parse_write_coil_response(&response, address, value)
    }

    /// Shut down the underlying TCP stream
    pub async fn close(&mut self) -> ModbusResult<()> {
        self.stream
            .shutdown()
            .await
            .map_err(|e| ModbusError::connection(format!("Shutdown failed: {}", e)))
    }

    fn next_transaction_id(&mut self) -> u16 {
        self.transaction_id = self.transaction_id.wrapping_add(1);
        if self.transaction_id == 0 {
            self.transaction_id = 1;
        }
        self.transaction_id
    }

    /// Send one request PDU and read its response, bounded by the timeout
    async fn request(&mut self, unit_id: u8, pdu: &ModbusPdu) -> ModbusResult<ModbusPdu> {
        let transaction_id = self.next_transaction_id();
        let frame = build_frame(transaction_id, unit_id, pdu);

        debug!(
            "Sending {} bytes to unit {} at {}: {:02X?}",
            frame.len(),
            unit_id,
            self.peer,
            frame
        );

        let exchange = async {
            self.stream
                .write_all(&frame)
                .await
                .map_err(|e| ModbusError::connection(format!("Send failed: {}", e)))?;

            let mut header_buf = [0u8; MBAP_HEADER_LEN];
            self.stream
                .read_exact(&mut header_buf)
                .await
                .map_err(|e| ModbusError::connection(format!("Receive failed: {}", e)))?;

            let header = MbapHeader::parse(&header_buf)?;
            check_response_header(&header, transaction_id, unit_id)?;

            let mut body = vec![0u8; header.pdu_len()?];
            self.stream
                .read_exact(&mut body)
                .await
                .map_err(|e| ModbusError::connection(format!("Receive failed: {}", e)))?;

            ModbusPdu::from_slice(&body)
        };

        match timeout(self.timeout, exchange).await {
            Ok(result) => result,
            Err(_) => Err(ModbusError::timeout(format!(
                "Request to {} timed out after {:?}",
                self.peer, self.timeout
            ))),
        }
    }
}
