//! Digital I/O service (`iosrv`)
//!
//! Supervises fleets of Modbus-TCP digital I/O controllers: 8 input and
//! 8 output channels per device, read as coil blocks and written one
//! coil at a time. The service keeps one cached TCP session per device,
//! polls inputs on demand, persists channel state and an append-only
//! change log in SQLite, and fans state changes out over Redis pub/sub.
//!
//! Module map:
//! - [`connection`]: per-device session cache over `fleet-modbus`
//! - [`protocol`]: coil block reads and single-coil writes
//! - [`channels`]: the single write path (device, store, audit, notify)
//! - [`scheduler`]: demand-gated background poll loop
//! - [`subscriptions`]: who is listening, and to which devices
//! - [`store`]: SQLite persistence behind the `DeviceStore` trait
//! - [`notify`]: notification events and sinks
//! - [`api`]: axum control surface

pub mod api;
pub mod audit;
pub mod channels;
pub mod config;
pub mod connection;
pub mod error;
pub mod model;
pub mod notify;
pub mod protocol;
pub mod scheduler;
pub mod store;
pub mod subscriptions;

pub use error::{IoSrvError, Result};
