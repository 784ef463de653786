//! BLE Event Model
//!
//! Everything the subsystem reacts to arrives as one [`BleEvent`]: raw stack
//! events, advertising module events, peer manager (bonding store) events and
//! timer expiries. Events are queued on an [`EventChannel`] by the stack
//! binding and handed one at a time to [`crate::Peripheral::dispatch`].
//!
//! The `label()` helpers map each event to a fixed name for logging only;
//! nothing branches on them.

use embassy_sync::channel::Channel;
use heapless::Vec;

use crate::ble::connection::{ConnHandle, PeerAddress};
use crate::ble::gatt::WriteOp;
use crate::config::{ConnParams, ATT_MTU};

/// Largest attribute payload a single ATT PDU can carry (MTU - 3)
pub const MAX_ATT_PAYLOAD: usize = ATT_MTU as usize - 3;

/// Depth of the stack-to-dispatcher event queue
pub const EVENT_QUEUE_DEPTH: usize = 8;

/// Attribute data carried inside an event
pub type AttPayload = Vec<u8, MAX_ATT_PAYLOAD>;

/// Ordered queue of events awaiting dispatch
pub type EventChannel<M> = Channel<M, BleEvent, EVENT_QUEUE_DEPTH>;

/// Peer identifier assigned by the bonding store
pub type PeerId = u16;
pub const PEER_ID_INVALID: PeerId = 0xFFFF;

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BleEvent {
    Stack(StackEvent),
    Advertising(AdvEvent),
    PeerManager(PeerEvent),
    TimerExpired(TimerId),
}

impl BleEvent {
    pub fn label(&self) -> &'static str {
        match self {
            BleEvent::Stack(evt) => evt.label(),
            BleEvent::Advertising(evt) => evt.label(),
            BleEvent::PeerManager(evt) => evt.label(),
            BleEvent::TimerExpired(timer) => timer.label(),
        }
    }
}

/// One-shot timers armed through the stack
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TimerId {
    ConnParamsUpdate,
}

impl TimerId {
    pub fn label(&self) -> &'static str {
        match self {
            TimerId::ConnParamsUpdate => "TIMER_CONN_PARAMS_UPDATE",
        }
    }
}

/// Read or write access awaiting authorisation
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AuthorizeRequest {
    Read {
        handle: u16,
        offset: u16,
    },
    Write {
        handle: u16,
        op: WriteOp,
        offset: u16,
        data: AttPayload,
    },
}

/// Raw link/radio stack events
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StackEvent {
    UserMemRequest {
        conn_handle: ConnHandle,
    },
    UserMemRelease {
        conn_handle: ConnHandle,
    },
    Connected {
        conn_handle: ConnHandle,
        peer_addr: PeerAddress,
        conn_params: ConnParams,
    },
    Disconnected {
        conn_handle: ConnHandle,
        reason: u8,
    },
    ConnParamUpdate {
        conn_handle: ConnHandle,
        conn_params: ConnParams,
    },
    SecParamsRequest {
        conn_handle: ConnHandle,
    },
    SecInfoRequest {
        conn_handle: ConnHandle,
    },
    AuthStatus {
        conn_handle: ConnHandle,
        status: u8,
        bonded: bool,
    },
    ConnSecUpdate {
        conn_handle: ConnHandle,
        security_mode: u8,
        security_level: u8,
    },
    /// Generic GAP timeout (advertising, scan, auth payload)
    Timeout {
        conn_handle: ConnHandle,
        source: u8,
    },
    PhyUpdateRequest {
        conn_handle: ConnHandle,
    },
    PhyUpdate {
        conn_handle: ConnHandle,
        tx_phy: u8,
        rx_phy: u8,
    },
    DataLengthUpdateRequest {
        conn_handle: ConnHandle,
    },
    DataLengthUpdate {
        conn_handle: ConnHandle,
        max_tx_octets: u16,
        max_rx_octets: u16,
    },
    ExchangeMtuResponse {
        conn_handle: ConnHandle,
        server_rx_mtu: u16,
    },
    GattcTimeout {
        conn_handle: ConnHandle,
    },
    Write {
        conn_handle: ConnHandle,
        handle: u16,
        op: WriteOp,
        offset: u16,
        data: AttPayload,
    },
    RwAuthorizeRequest {
        conn_handle: ConnHandle,
        request: AuthorizeRequest,
    },
    SysAttrMissing {
        conn_handle: ConnHandle,
    },
    /// Handle value confirmation: the peer acknowledged an indication
    Hvc {
        conn_handle: ConnHandle,
        handle: u16,
    },
    ExchangeMtuRequest {
        conn_handle: ConnHandle,
        client_rx_mtu: u16,
    },
    GattsTimeout {
        conn_handle: ConnHandle,
    },
    HvnTxComplete {
        conn_handle: ConnHandle,
        count: u8,
    },
    /// Any stack event this subsystem does not model, by raw ID
    Other {
        id: u16,
    },
}

impl StackEvent {
    /// Raw stack event ID
    pub fn id(&self) -> u16 {
        match self {
            StackEvent::UserMemRequest { .. } => 0x01,
            StackEvent::UserMemRelease { .. } => 0x02,
            StackEvent::Connected { .. } => 0x10,
            StackEvent::Disconnected { .. } => 0x11,
            StackEvent::ConnParamUpdate { .. } => 0x12,
            StackEvent::SecParamsRequest { .. } => 0x13,
            StackEvent::SecInfoRequest { .. } => 0x14,
            StackEvent::AuthStatus { .. } => 0x19,
            StackEvent::ConnSecUpdate { .. } => 0x1A,
            StackEvent::Timeout { .. } => 0x1B,
            StackEvent::PhyUpdateRequest { .. } => 0x21,
            StackEvent::PhyUpdate { .. } => 0x22,
            StackEvent::DataLengthUpdateRequest { .. } => 0x23,
            StackEvent::DataLengthUpdate { .. } => 0x24,
            StackEvent::ExchangeMtuResponse { .. } => 0x3A,
            StackEvent::GattcTimeout { .. } => 0x3B,
            StackEvent::Write { .. } => 0x50,
            StackEvent::RwAuthorizeRequest { .. } => 0x51,
            StackEvent::SysAttrMissing { .. } => 0x52,
            StackEvent::Hvc { .. } => 0x53,
            StackEvent::ExchangeMtuRequest { .. } => 0x55,
            StackEvent::GattsTimeout { .. } => 0x56,
            StackEvent::HvnTxComplete { .. } => 0x57,
            StackEvent::Other { id } => *id,
        }
    }

    pub fn label(&self) -> &'static str {
        stack_event_name(self.id())
    }

    /// Connection the event belongs to, if any
    pub fn conn_handle(&self) -> Option<ConnHandle> {
        match self {
            StackEvent::UserMemRequest { conn_handle }
            | StackEvent::UserMemRelease { conn_handle }
            | StackEvent::Connected { conn_handle, .. }
            | StackEvent::Disconnected { conn_handle, .. }
            | StackEvent::ConnParamUpdate { conn_handle, .. }
            | StackEvent::SecParamsRequest { conn_handle }
            | StackEvent::SecInfoRequest { conn_handle }
            | StackEvent::AuthStatus { conn_handle, .. }
            | StackEvent::ConnSecUpdate { conn_handle, .. }
            | StackEvent::Timeout { conn_handle, .. }
            | StackEvent::PhyUpdateRequest { conn_handle }
            | StackEvent::PhyUpdate { conn_handle, .. }
            | StackEvent::DataLengthUpdateRequest { conn_handle }
            | StackEvent::DataLengthUpdate { conn_handle, .. }
            | StackEvent::ExchangeMtuResponse { conn_handle, .. }
            | StackEvent::GattcTimeout { conn_handle }
            | StackEvent::Write { conn_handle, .. }
            | StackEvent::RwAuthorizeRequest { conn_handle, .. }
            | StackEvent::SysAttrMissing { conn_handle }
            | StackEvent::Hvc { conn_handle, .. }
            | StackEvent::ExchangeMtuRequest { conn_handle, .. }
            | StackEvent::GattsTimeout { conn_handle }
            | StackEvent::HvnTxComplete { conn_handle, .. } => Some(*conn_handle),
            StackEvent::Other { .. } => None,
        }
    }
}

/// Name of a raw stack event ID
pub fn stack_event_name(id: u16) -> &'static str {
    match id {
        0x01 => "USER_MEM_REQUEST",
        0x02 => "USER_MEM_RELEASE",
        0x10 => "GAP_CONNECTED",
        0x11 => "GAP_DISCONNECTED",
        0x12 => "GAP_CONN_PARAM_UPDATE",
        0x13 => "GAP_SEC_PARAMS_REQUEST",
        0x14 => "GAP_SEC_INFO_REQUEST",
        0x15 => "GAP_PASSKEY_DISPLAY",
        0x16 => "GAP_KEY_PRESSED",
        0x17 => "GAP_AUTH_KEY_REQUEST",
        0x18 => "GAP_LESC_DHKEY_REQUEST",
        0x19 => "GAP_AUTH_STATUS",
        0x1A => "GAP_CONN_SEC_UPDATE",
        0x1B => "GAP_TIMEOUT",
        0x1C => "GAP_RSSI_CHANGED",
        0x1D => "GAP_ADV_REPORT",
        0x1E => "GAP_SEC_REQUEST",
        0x1F => "GAP_CONN_PARAM_UPDATE_REQUEST",
        0x20 => "GAP_SCAN_REQ_REPORT",
        0x21 => "GAP_PHY_UPDATE_REQUEST",
        0x22 => "GAP_PHY_UPDATE",
        0x23 => "GAP_DATA_LENGTH_UPDATE_REQUEST",
        0x24 => "GAP_DATA_LENGTH_UPDATE",
        0x25 => "GAP_QOS_CHANNEL_SURVEY_REPORT",
        0x26 => "GAP_ADV_SET_TERMINATED",
        0x30 => "GATTC_PRIM_SRVC_DISC_RSP",
        0x31 => "GATTC_REL_DISC_RSP",
        0x32 => "GATTC_CHAR_DISC_RSP",
        0x33 => "GATTC_DESC_DISC_RSP",
        0x34 => "GATTC_ATTR_INFO_DISC_RSP",
        0x35 => "GATTC_CHAR_VAL_BY_UUID_READ_RSP",
        0x36 => "GATTC_READ_RSP",
        0x37 => "GATTC_CHAR_VALS_READ_RSP",
        0x38 => "GATTC_WRITE_RSP",
        0x39 => "GATTC_HVX",
        0x3A => "GATTC_EXCHANGE_MTU_RSP",
        0x3B => "GATTC_TIMEOUT",
        0x3C => "GATTC_WRITE_CMD_TX_COMPLETE",
        0x50 => "GATTS_WRITE",
        0x51 => "GATTS_RW_AUTHORIZE_REQUEST",
        0x52 => "GATTS_SYS_ATTR_MISSING",
        0x53 => "GATTS_HVC",
        0x54 => "GATTS_SC_CONFIRM",
        0x55 => "GATTS_EXCHANGE_MTU_REQUEST",
        0x56 => "GATTS_TIMEOUT",
        0x57 => "GATTS_HVN_TX_COMPLETE",
        _ => "UNKNOWN",
    }
}

/// Advertising module events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AdvEvent {
    Idle,
    DirectedHighDuty,
    Directed,
    Fast,
    Slow,
    FastWhitelist,
    SlowWhitelist,
    WhitelistRequest,
    PeerAddrRequest,
}

impl AdvEvent {
    pub fn label(&self) -> &'static str {
        match self {
            AdvEvent::Idle => "ADV_EVT_IDLE",
            AdvEvent::DirectedHighDuty => "ADV_EVT_DIRECTED_HIGH_DUTY",
            AdvEvent::Directed => "ADV_EVT_DIRECTED",
            AdvEvent::Fast => "ADV_EVT_FAST",
            AdvEvent::Slow => "ADV_EVT_SLOW",
            AdvEvent::FastWhitelist => "ADV_EVT_FAST_WHITELIST",
            AdvEvent::SlowWhitelist => "ADV_EVT_SLOW_WHITELIST",
            AdvEvent::WhitelistRequest => "ADV_EVT_WHITELIST_REQUEST",
            AdvEvent::PeerAddrRequest => "ADV_EVT_PEER_ADDR_REQUEST",
        }
    }
}

/// Security procedure the peer manager ran on a link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SecurityProcedure {
    Encryption,
    Bonding,
    Pairing,
}

/// Peer manager / bonding store lifecycle events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PeerEvent {
    BondedPeerConnected { conn_handle: ConnHandle, peer_id: PeerId },
    ConnConfigReq { conn_handle: ConnHandle },
    ConnSecStart { conn_handle: ConnHandle, peer_id: PeerId, procedure: SecurityProcedure },
    ConnSecSucceeded { conn_handle: ConnHandle, peer_id: PeerId, procedure: SecurityProcedure },
    ConnSecFailed { conn_handle: ConnHandle, peer_id: PeerId, error: u16 },
    ConnSecConfigReq { conn_handle: ConnHandle, peer_id: PeerId },
    ConnSecParamsReq { conn_handle: ConnHandle },
    StorageFull,
    ErrorUnexpected { conn_handle: ConnHandle, error: u32 },
    PeerDataUpdateSucceeded { peer_id: PeerId },
    PeerDataUpdateFailed { peer_id: PeerId, error: u32 },
    PeerDeleteSucceeded { peer_id: PeerId },
    PeerDeleteFailed { peer_id: PeerId, error: u32 },
    PeersDeleteSucceeded,
    PeersDeleteFailed { error: u32 },
    LocalDbCacheApplied { conn_handle: ConnHandle },
    LocalDbCacheApplyFailed { conn_handle: ConnHandle },
    ServiceChangedIndSent { conn_handle: ConnHandle },
    ServiceChangedIndConfirmed { conn_handle: ConnHandle },
    PeripheralSecurityReq { conn_handle: ConnHandle },
    FlashGarbageCollected,
    FlashGarbageCollectionFailed { error: u32 },
}

impl PeerEvent {
    pub fn label(&self) -> &'static str {
        match self {
            PeerEvent::BondedPeerConnected { .. } => "PM_EVT_BONDED_PEER_CONNECTED",
            PeerEvent::ConnConfigReq { .. } => "PM_EVT_CONN_CONFIG_REQ",
            PeerEvent::ConnSecStart { .. } => "PM_EVT_CONN_SEC_START",
            PeerEvent::ConnSecSucceeded { .. } => "PM_EVT_CONN_SEC_SUCCEEDED",
            PeerEvent::ConnSecFailed { .. } => "PM_EVT_CONN_SEC_FAILED",
            PeerEvent::ConnSecConfigReq { .. } => "PM_EVT_CONN_SEC_CONFIG_REQ",
            PeerEvent::ConnSecParamsReq { .. } => "PM_EVT_CONN_SEC_PARAMS_REQ",
            PeerEvent::StorageFull => "PM_EVT_STORAGE_FULL",
            PeerEvent::ErrorUnexpected { .. } => "PM_EVT_ERROR_UNEXPECTED",
            PeerEvent::PeerDataUpdateSucceeded { .. } => "PM_EVT_PEER_DATA_UPDATE_SUCCEEDED",
            PeerEvent::PeerDataUpdateFailed { .. } => "PM_EVT_PEER_DATA_UPDATE_FAILED",
            PeerEvent::PeerDeleteSucceeded { .. } => "PM_EVT_PEER_DELETE_SUCCEEDED",
            PeerEvent::PeerDeleteFailed { .. } => "PM_EVT_PEER_DELETE_FAILED",
            PeerEvent::PeersDeleteSucceeded => "PM_EVT_PEERS_DELETE_SUCCEEDED",
            PeerEvent::PeersDeleteFailed { .. } => "PM_EVT_PEERS_DELETE_FAILED",
            PeerEvent::LocalDbCacheApplied { .. } => "PM_EVT_LOCAL_DB_CACHE_APPLIED",
            PeerEvent::LocalDbCacheApplyFailed { .. } => "PM_EVT_LOCAL_DB_CACHE_APPLY_FAILED",
            PeerEvent::ServiceChangedIndSent { .. } => "PM_EVT_SERVICE_CHANGED_IND_SENT",
            PeerEvent::ServiceChangedIndConfirmed { .. } => "PM_EVT_SERVICE_CHANGED_IND_CONFIRMED",
            PeerEvent::PeripheralSecurityReq { .. } => "PM_EVT_SLAVE_SECURITY_REQ",
            PeerEvent::FlashGarbageCollected => "PM_EVT_FLASH_GARBAGE_COLLECTED",
            PeerEvent::FlashGarbageCollectionFailed { .. } => "PM_EVT_FLASH_GARBAGE_COLLECTION_FAILED",
        }
    }
}

/// Build an attribute payload, failing if `data` exceeds one ATT PDU
pub fn att_payload(data: &[u8]) -> Result<AttPayload, ()> {
    let mut payload = AttPayload::new();
    payload.extend_from_slice(data).map_err(|_| ())?;
    Ok(payload)
}
