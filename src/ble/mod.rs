//! BLE Peripheral Components
//!
//! Each component owns one concern of the single-link peripheral; the
//! [`peripheral::Peripheral`] dispatcher wires them together and is the only
//! place that talks to more than one of them.

pub mod advertising;
pub mod bonding;
pub mod conn_params;
pub mod connection;
pub mod events;
pub mod gatt;
pub mod peripheral;
pub mod proto_service;
pub mod queued_write;
pub mod stack;
