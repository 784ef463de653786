#![cfg_attr(not(test), no_std)]

//! nRF52 Protocol Peripheral Library
//!
//! BLE peripheral subsystem for an nRF52 running the S140 SoftDevice:
//! advertises one vendor-specific service, accepts a single central, forwards
//! long (queued) writes to the application and sends indications back.
//!
//! - `ble`: connection registry, advertising, connection parameter
//!   negotiation, security coordination, queued writes and the protocol
//!   service, plus the [`Peripheral`] dispatcher that ties them together
//! - `config`: identifiers, timing constants and [`Config`]
//! - `error`: the [`Error`] taxonomy
//!
//! The radio stack and bonding store sit behind the [`Stack`] and
//! [`BondingStore`] traits; the firmware binary implements them over the
//! SoftDevice.

// This mod MUST go first, so that the others see its macros.
mod fmt;

pub mod ble;
pub mod config;
pub mod error;

pub use ble::events::{BleEvent, EventChannel};
pub use ble::peripheral::Peripheral;
pub use ble::proto_service::WriteCallback;
pub use ble::stack::{BondingStore, Stack};
pub use config::Config;
pub use error::{Error, StackError};
