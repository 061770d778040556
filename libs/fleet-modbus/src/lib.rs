//! # Fleet Modbus - Async Modbus TCP client
//!
//! Minimal Modbus TCP implementation for the fleet's digital I/O
//! controllers: coil block reads and single-coil writes over a
//! long-lived TCP session, with a stack-allocated PDU and strict
//! MBAP response validation.
//!
//! ## Supported function codes
//!
//! | Code | Function |
//! |------|----------|
//! | 0x01 | Read Coils |
//! | 0x05 | Write Single Coil |
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use fleet_modbus::{ModbusTcpClient, ModbusResult};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> ModbusResult<()> {
//!     let mut client =
//!         ModbusTcpClient::connect("192.168.1.50", 502, Duration::from_secs(3)).await?;
//!
//!     let inputs = client.read_coils(1, 0x0000, 8).await?;
//!     println!("Digital inputs: {:?}", inputs);
//!
//!     client.write_single_coil(1, 0x0010, true).await?;
//!     client.close().await?;
//!     Ok(())
//! }
//! ```

/// Core error types and result handling
pub mod error;

/// Stack-allocated PDU construction and parsing
pub mod pdu;

/// MBAP (Modbus TCP) framing
pub mod frame;

/// Async TCP client
pub mod client;

pub use client::ModbusTcpClient;
pub use error::{exception_name, ModbusError, ModbusResult};
pub use pdu::{ModbusPdu, FC_READ_COILS, FC_WRITE_SINGLE_COIL};
