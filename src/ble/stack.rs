//! Stack Seams
//!
//! The [`Stack`] trait is every request this subsystem makes of the radio
//! stack, and [`BondingStore`] is the persistent peer/key store. The firmware
//! implements both over the SoftDevice; tests implement them with recorders.

use embassy_time::Duration;

use crate::ble::advertising::{AdvertisingParams, AdvertisingRequest};
use crate::ble::connection::ConnHandle;
use crate::ble::events::TimerId;
use crate::ble::gatt::{AuthorizeReply, CharacteristicConfig, CharacteristicHandles, Uuid, Uuid128};
use crate::config::{ConnParams, GapConfig, SecurityParams};
use crate::error::StackError;

/// HCI status codes used as disconnect reasons
pub mod hci {
    pub const AUTHENTICATION_FAILURE: u8 = 0x05;
    pub const CONNECTION_TIMEOUT: u8 = 0x08;
    pub const REMOTE_USER_TERMINATED_CONNECTION: u8 = 0x13;
    pub const LOCAL_HOST_TERMINATED_CONNECTION: u8 = 0x16;
    pub const CONN_INTERVAL_UNACCEPTABLE: u8 = 0x3B;
}

/// PHY preference for a PHY update reply
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Phys {
    pub tx_phys: u8,
    pub rx_phys: u8,
}

impl Phys {
    /// Let the stack pick
    pub const AUTO: Self = Self { tx_phys: 0, rx_phys: 0 };
}

/// Requests issued to the radio stack
pub trait Stack {
    /// Device name, appearance and preferred link parameters
    fn gap_configure(&mut self, gap: &GapConfig) -> Result<(), StackError>;
    /// GATT module setup with the largest supported ATT MTU
    fn gatt_init(&mut self, att_mtu: u16) -> Result<(), StackError>;
    /// Register a vendor UUID base, returning its UUID type
    fn uuid_vs_add(&mut self, base: &Uuid128) -> Result<u8, StackError>;
    /// Add a primary service, returning its handle
    fn service_add(&mut self, uuid: Uuid) -> Result<u16, StackError>;
    fn characteristic_add(
        &mut self,
        service_handle: u16,
        characteristic: &CharacteristicConfig,
    ) -> Result<CharacteristicHandles, StackError>;

    /// Load advertising parameters and encoded payloads
    fn advertising_configure(
        &mut self,
        params: &AdvertisingParams,
        adv_data: &[u8],
        scan_data: &[u8],
    ) -> Result<(), StackError>;
    fn advertising_start(&mut self, params: &AdvertisingParams) -> Result<(), StackError>;
    fn advertising_stop(&mut self) -> Result<(), StackError>;
    /// Swap payloads on a running or configured advertising set
    fn advertising_data_update(&mut self, adv_data: &[u8], scan_data: &[u8]) -> Result<(), StackError>;
    /// Answer a whitelist or peer address request with an empty reply
    fn advertising_request_reply(&mut self, request: AdvertisingRequest) -> Result<(), StackError>;

    fn disconnect(&mut self, conn: ConnHandle, reason: u8) -> Result<(), StackError>;
    fn conn_param_update(&mut self, conn: ConnHandle, params: &ConnParams) -> Result<(), StackError>;
    fn phy_update(&mut self, conn: ConnHandle, phys: Phys) -> Result<(), StackError>;
    /// Accept a data length update with automatic values
    fn data_length_update(&mut self, conn: ConnHandle) -> Result<(), StackError>;
    fn exchange_mtu_reply(&mut self, conn: ConnHandle, server_rx_mtu: u16) -> Result<(), StackError>;
    /// Hand the stack a memory block for queued writes
    fn user_mem_reply(&mut self, conn: ConnHandle, mem: &mut [u8]) -> Result<(), StackError>;
    /// Provide (empty) system attributes for the link
    fn sys_attr_set(&mut self, conn: ConnHandle) -> Result<(), StackError>;

    fn value_set(&mut self, conn: ConnHandle, handle: u16, value: &[u8]) -> Result<(), StackError>;
    fn indicate(&mut self, conn: ConnHandle, handle: u16, value: &[u8]) -> Result<(), StackError>;
    fn rw_authorize_reply(&mut self, conn: ConnHandle, reply: AuthorizeReply) -> Result<(), StackError>;

    /// Arm a one-shot timer; expiry is delivered as `BleEvent::TimerExpired`
    fn timer_start(&mut self, timer: TimerId, after: Duration) -> Result<(), StackError>;
    fn timer_stop(&mut self, timer: TimerId);
}

/// Persistent peer and key storage
pub trait BondingStore {
    fn init(&mut self, params: &SecurityParams) -> Result<(), StackError>;
    /// Answer a connection security configuration request
    fn conn_sec_config_reply(&mut self, conn: ConnHandle, allow_repairing: bool) -> Result<(), StackError>;
    /// Start reclaiming flash
    fn garbage_collect(&mut self) -> Result<(), StackError>;
}
