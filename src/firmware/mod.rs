//! SoftDevice Glue
//!
//! Everything target-specific the library leaves to the firmware: the
//! [`Stack`](nrf52_proto_peripheral::Stack) implementation over raw `sd_*`
//! calls, translation of raw SoftDevice events into library events, the
//! one-shot timer task and a RAM bond table standing in for the peer manager.

pub mod bonds;
pub mod events;
pub mod stack;
pub mod timer;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use nrf52_proto_peripheral::{EventChannel, StackError};
use nrf_softdevice::raw;

/// Events from the SoftDevice callback and the timer task to the BLE task
pub static EVENTS: EventChannel<CriticalSectionRawMutex> = EventChannel::new();

/// Configuration tag the connection settings are registered under at enable
pub const CONN_CFG_TAG: u8 = 1;

/// Map an `sd_*` return code to a `Result`
pub fn check(ret: u32) -> Result<(), StackError> {
    if ret == raw::NRF_SUCCESS {
        Ok(())
    } else {
        Err(StackError(ret))
    }
}
