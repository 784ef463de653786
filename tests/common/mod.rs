//! Common test utilities
//!
//! Recording implementations of the stack and bonding store seams plus
//! helpers that build events and bring a peripheral up.

#![allow(dead_code)]

use std::cell::RefCell;

use embassy_time::Duration;
use nrf52_proto_peripheral::ble::advertising::{AdvertisingMode, AdvertisingParams, AdvertisingRequest};
use nrf52_proto_peripheral::ble::connection::{ConnHandle, PeerAddress};
use nrf52_proto_peripheral::ble::events::{att_payload, AuthorizeRequest, BleEvent, StackEvent, TimerId};
use nrf52_proto_peripheral::ble::gatt::{
    AuthorizeReply, CharacteristicConfig, CharacteristicHandles, Uuid, Uuid128, WriteOp, UUID_TYPE_VENDOR_BEGIN,
};
use nrf52_proto_peripheral::config::{ConnParams, GapConfig, SecurityParams};
use nrf52_proto_peripheral::{BondingStore, Config, Peripheral, Stack, StackError};

pub const SERVICE_HANDLE: u16 = 0x000C;
pub const VALUE_HANDLE: u16 = 0x000E;
pub const CCCD_HANDLE: u16 = 0x000F;
pub const USER_DESC_HANDLE: u16 = 0x0010;

pub const CONN: ConnHandle = 0;

/// Every request the peripheral made of the stack, in order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    GapConfigure { device_name: String, appearance: u16 },
    GattInit { att_mtu: u16 },
    UuidVsAdd(Uuid128),
    ServiceAdd(Uuid),
    CharacteristicAdd { service_handle: u16, config: CharacteristicConfig },
    AdvertisingConfigure { adv_data: Vec<u8>, scan_data: Vec<u8> },
    AdvertisingStart(AdvertisingParams),
    AdvertisingStop,
    AdvertisingDataUpdate { adv_data: Vec<u8>, scan_data: Vec<u8> },
    AdvertisingRequestReply(AdvertisingRequest),
    Disconnect { conn: ConnHandle, reason: u8 },
    ConnParamUpdate { conn: ConnHandle, params: ConnParams },
    PhyUpdate { conn: ConnHandle },
    DataLengthUpdate { conn: ConnHandle },
    ExchangeMtuReply { conn: ConnHandle, server_rx_mtu: u16 },
    UserMemReply { conn: ConnHandle, len: usize },
    SysAttrSet { conn: ConnHandle },
    ValueSet { conn: ConnHandle, handle: u16, value: Vec<u8> },
    Indicate { conn: ConnHandle, handle: u16, value: Vec<u8> },
    RwAuthorizeReply { conn: ConnHandle, reply: AuthorizeReply },
    TimerStart { timer: TimerId, after: Duration },
    TimerStop { timer: TimerId },
}

#[derive(Debug, Default)]
pub struct MockStack {
    pub requests: Vec<Request>,
    /// Requests (by name) that fail with the given error
    pub failures: Vec<(&'static str, StackError)>,
    next_uuid_type: u8,
}

impl MockStack {
    pub fn new() -> Self {
        Self {
            next_uuid_type: UUID_TYPE_VENDOR_BEGIN,
            ..Self::default()
        }
    }

    pub fn fail(&mut self, request: &'static str, error: StackError) {
        self.failures.push((request, error));
    }

    pub fn clear(&mut self) {
        self.requests.clear();
    }

    pub fn count(&self, pred: impl Fn(&Request) -> bool) -> usize {
        self.requests.iter().filter(|r| pred(r)).count()
    }

    pub fn disconnects(&self) -> Vec<u8> {
        self.requests
            .iter()
            .filter_map(|r| match r {
                Request::Disconnect { reason, .. } => Some(*reason),
                _ => None,
            })
            .collect()
    }

    pub fn authorize_statuses(&self) -> Vec<u16> {
        self.requests
            .iter()
            .filter_map(|r| match r {
                Request::RwAuthorizeReply { reply, .. } => Some(reply.status()),
                _ => None,
            })
            .collect()
    }

    fn check(&self, request: &'static str) -> Result<(), StackError> {
        match self.failures.iter().find(|(name, _)| *name == request) {
            Some((_, error)) => Err(*error),
            None => Ok(()),
        }
    }
}

impl Stack for MockStack {
    fn gap_configure(&mut self, gap: &GapConfig) -> Result<(), StackError> {
        self.check("gap_configure")?;
        self.requests.push(Request::GapConfigure {
            device_name: gap.device_name.as_str().to_string(),
            appearance: gap.appearance,
        });
        Ok(())
    }

    fn gatt_init(&mut self, att_mtu: u16) -> Result<(), StackError> {
        self.check("gatt_init")?;
        self.requests.push(Request::GattInit { att_mtu });
        Ok(())
    }

    fn uuid_vs_add(&mut self, base: &Uuid128) -> Result<u8, StackError> {
        self.check("uuid_vs_add")?;
        self.requests.push(Request::UuidVsAdd(*base));
        let uuid_type = self.next_uuid_type;
        self.next_uuid_type += 1;
        Ok(uuid_type)
    }

    fn service_add(&mut self, uuid: Uuid) -> Result<u16, StackError> {
        self.check("service_add")?;
        self.requests.push(Request::ServiceAdd(uuid));
        Ok(SERVICE_HANDLE)
    }

    fn characteristic_add(
        &mut self,
        service_handle: u16,
        characteristic: &CharacteristicConfig,
    ) -> Result<CharacteristicHandles, StackError> {
        self.check("characteristic_add")?;
        self.requests.push(Request::CharacteristicAdd {
            service_handle,
            config: *characteristic,
        });
        Ok(CharacteristicHandles {
            value_handle: VALUE_HANDLE,
            user_desc_handle: USER_DESC_HANDLE,
            cccd_handle: CCCD_HANDLE,
            sccd_handle: 0,
        })
    }

    fn advertising_configure(
        &mut self,
        _params: &AdvertisingParams,
        adv_data: &[u8],
        scan_data: &[u8],
    ) -> Result<(), StackError> {
        self.check("advertising_configure")?;
        self.requests.push(Request::AdvertisingConfigure {
            adv_data: adv_data.to_vec(),
            scan_data: scan_data.to_vec(),
        });
        Ok(())
    }

    fn advertising_start(&mut self, params: &AdvertisingParams) -> Result<(), StackError> {
        self.check("advertising_start")?;
        self.requests.push(Request::AdvertisingStart(*params));
        Ok(())
    }

    fn advertising_stop(&mut self) -> Result<(), StackError> {
        self.check("advertising_stop")?;
        self.requests.push(Request::AdvertisingStop);
        Ok(())
    }

    fn advertising_data_update(&mut self, adv_data: &[u8], scan_data: &[u8]) -> Result<(), StackError> {
        self.check("advertising_data_update")?;
        self.requests.push(Request::AdvertisingDataUpdate {
            adv_data: adv_data.to_vec(),
            scan_data: scan_data.to_vec(),
        });
        Ok(())
    }

    fn advertising_request_reply(&mut self, request: AdvertisingRequest) -> Result<(), StackError> {
        self.check("advertising_request_reply")?;
        self.requests.push(Request::AdvertisingRequestReply(request));
        Ok(())
    }

    fn disconnect(&mut self, conn: ConnHandle, reason: u8) -> Result<(), StackError> {
        self.check("disconnect")?;
        self.requests.push(Request::Disconnect { conn, reason });
        Ok(())
    }

    fn conn_param_update(&mut self, conn: ConnHandle, params: &ConnParams) -> Result<(), StackError> {
        self.check("conn_param_update")?;
        self.requests.push(Request::ConnParamUpdate { conn, params: *params });
        Ok(())
    }

    fn phy_update(&mut self, conn: ConnHandle, _phys: nrf52_proto_peripheral::ble::stack::Phys) -> Result<(), StackError> {
        self.check("phy_update")?;
        self.requests.push(Request::PhyUpdate { conn });
        Ok(())
    }

    fn data_length_update(&mut self, conn: ConnHandle) -> Result<(), StackError> {
        self.check("data_length_update")?;
        self.requests.push(Request::DataLengthUpdate { conn });
        Ok(())
    }

    fn exchange_mtu_reply(&mut self, conn: ConnHandle, server_rx_mtu: u16) -> Result<(), StackError> {
        self.check("exchange_mtu_reply")?;
        self.requests.push(Request::ExchangeMtuReply { conn, server_rx_mtu });
        Ok(())
    }

    fn user_mem_reply(&mut self, conn: ConnHandle, mem: &mut [u8]) -> Result<(), StackError> {
        self.check("user_mem_reply")?;
        self.requests.push(Request::UserMemReply { conn, len: mem.len() });
        Ok(())
    }

    fn sys_attr_set(&mut self, conn: ConnHandle) -> Result<(), StackError> {
        self.check("sys_attr_set")?;
        self.requests.push(Request::SysAttrSet { conn });
        Ok(())
    }

    fn value_set(&mut self, conn: ConnHandle, handle: u16, value: &[u8]) -> Result<(), StackError> {
        self.check("value_set")?;
        self.requests.push(Request::ValueSet {
            conn,
            handle,
            value: value.to_vec(),
        });
        Ok(())
    }

    fn indicate(&mut self, conn: ConnHandle, handle: u16, value: &[u8]) -> Result<(), StackError> {
        self.check("indicate")?;
        self.requests.push(Request::Indicate {
            conn,
            handle,
            value: value.to_vec(),
        });
        Ok(())
    }

    fn rw_authorize_reply(&mut self, conn: ConnHandle, reply: AuthorizeReply) -> Result<(), StackError> {
        self.check("rw_authorize_reply")?;
        self.requests.push(Request::RwAuthorizeReply { conn, reply });
        Ok(())
    }

    fn timer_start(&mut self, timer: TimerId, after: Duration) -> Result<(), StackError> {
        self.check("timer_start")?;
        self.requests.push(Request::TimerStart { timer, after });
        Ok(())
    }

    fn timer_stop(&mut self, timer: TimerId) {
        self.requests.push(Request::TimerStop { timer });
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BondRequest {
    Init(SecurityParams),
    ConnSecConfigReply { conn: ConnHandle, allow_repairing: bool },
    GarbageCollect,
}

#[derive(Debug, Default)]
pub struct MockBondStore {
    pub requests: Vec<BondRequest>,
    pub fail_init: Option<StackError>,
}

impl BondingStore for MockBondStore {
    fn init(&mut self, params: &SecurityParams) -> Result<(), StackError> {
        if let Some(error) = self.fail_init {
            return Err(error);
        }
        self.requests.push(BondRequest::Init(*params));
        Ok(())
    }

    fn conn_sec_config_reply(&mut self, conn: ConnHandle, allow_repairing: bool) -> Result<(), StackError> {
        self.requests.push(BondRequest::ConnSecConfigReply { conn, allow_repairing });
        Ok(())
    }

    fn garbage_collect(&mut self) -> Result<(), StackError> {
        self.requests.push(BondRequest::GarbageCollect);
        Ok(())
    }
}

pub type TestPeripheral = Peripheral<MockStack, MockBondStore>;

/// Peripheral with default config, initialised, request log cleared
pub fn peripheral() -> TestPeripheral {
    peripheral_with(Config::default())
}

pub fn peripheral_with(config: Config) -> TestPeripheral {
    let mut peripheral = Peripheral::new(MockStack::new(), MockBondStore::default(), config);
    peripheral.init().expect("init");
    peripheral.stack_mut().clear();
    peripheral
}

/// Initialised peripheral that is advertising
pub fn advertising_peripheral() -> TestPeripheral {
    let mut peripheral = peripheral();
    peripheral.advertising_enable(true).expect("advertising");
    peripheral.stack_mut().clear();
    peripheral
}

pub fn peer() -> PeerAddress {
    PeerAddress {
        addr_type: 1,
        addr: [0xC0, 0xFF, 0xEE, 0x00, 0x11, 0x22],
    }
}

/// Parameters a typical phone grants on connect (outside the preferred range)
pub fn phone_params() -> ConnParams {
    ConnParams {
        min_conn_interval: 24,
        max_conn_interval: 40,
        peripheral_latency: 0,
        conn_sup_timeout: 400,
    }
}

pub fn connected(conn: ConnHandle, conn_params: ConnParams) -> BleEvent {
    BleEvent::Stack(StackEvent::Connected {
        conn_handle: conn,
        peer_addr: peer(),
        conn_params,
    })
}

pub fn disconnected(conn: ConnHandle, reason: u8) -> BleEvent {
    BleEvent::Stack(StackEvent::Disconnected {
        conn_handle: conn,
        reason,
    })
}

pub fn param_update(conn: ConnHandle, conn_params: ConnParams) -> BleEvent {
    BleEvent::Stack(StackEvent::ConnParamUpdate {
        conn_handle: conn,
        conn_params,
    })
}

pub fn write(conn: ConnHandle, handle: u16, data: &[u8]) -> BleEvent {
    BleEvent::Stack(StackEvent::Write {
        conn_handle: conn,
        handle,
        op: WriteOp::Request,
        offset: 0,
        data: att_payload(data).expect("payload fits"),
    })
}

pub fn authorize_write(conn: ConnHandle, handle: u16, op: WriteOp, offset: u16, data: &[u8]) -> BleEvent {
    BleEvent::Stack(StackEvent::RwAuthorizeRequest {
        conn_handle: conn,
        request: AuthorizeRequest::Write {
            handle,
            op,
            offset,
            data: att_payload(data).expect("payload fits"),
        },
    })
}

pub fn prepare_write(conn: ConnHandle, offset: u16, data: &[u8]) -> BleEvent {
    authorize_write(conn, VALUE_HANDLE, WriteOp::PrepareRequest, offset, data)
}

pub fn execute_write(conn: ConnHandle) -> BleEvent {
    authorize_write(conn, VALUE_HANDLE, WriteOp::ExecuteNow, 0, &[])
}

pub fn cancel_write(conn: ConnHandle) -> BleEvent {
    authorize_write(conn, VALUE_HANDLE, WriteOp::ExecuteCancel, 0, &[])
}

pub fn enable_indications(conn: ConnHandle) -> BleEvent {
    write(conn, CCCD_HANDLE, &[0x02, 0x00])
}

pub fn timer_expired() -> BleEvent {
    BleEvent::TimerExpired(TimerId::ConnParamsUpdate)
}

/// Split `data` into prepare-write fragments of `chunk` bytes
pub fn long_write(conn: ConnHandle, data: &[u8], chunk: usize) -> Vec<BleEvent> {
    let mut events: Vec<BleEvent> = data
        .chunks(chunk)
        .enumerate()
        .map(|(i, fragment)| prepare_write(conn, (i * chunk) as u16, fragment))
        .collect();
    events.push(execute_write(conn));
    events
}

pub fn is_fast_start(request: &Request) -> bool {
    matches!(
        request,
        Request::AdvertisingStart(AdvertisingParams {
            mode: AdvertisingMode::Fast,
            ..
        })
    )
}

thread_local! {
    static WRITES_A: RefCell<Vec<Vec<u8>>> = RefCell::new(Vec::new());
    static WRITES_B: RefCell<Vec<Vec<u8>>> = RefCell::new(Vec::new());
}

/// Write callback recording into list A
pub fn record_a(data: &[u8]) {
    WRITES_A.with(|w| w.borrow_mut().push(data.to_vec()));
}

/// Write callback recording into list B
pub fn record_b(data: &[u8]) {
    WRITES_B.with(|w| w.borrow_mut().push(data.to_vec()));
}

pub fn writes_a() -> Vec<Vec<u8>> {
    WRITES_A.with(|w| w.borrow().clone())
}

pub fn writes_b() -> Vec<Vec<u8>> {
    WRITES_B.with(|w| w.borrow().clone())
}

pub fn reset_writes() {
    WRITES_A.with(|w| w.borrow_mut().clear());
    WRITES_B.with(|w| w.borrow_mut().clear());
}
