//! Peripheral Lifecycle and Event Dispatch
//!
//! [`Peripheral`] owns every BLE component and the stack/bonding store
//! handles. [`Peripheral::init`] registers everything with the stack in a
//! fixed order; afterwards the firmware feeds stack events through
//! [`Peripheral::dispatch`] one at a time, so each handler runs to completion
//! before the next event is looked at.

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::channel::Channel;

use crate::ble::advertising::{AdvEventKind, AdvertisingController, AdvertisingMode};
use crate::ble::bonding::SecurityCoordinator;
use crate::ble::conn_params::ConnParamsNegotiator;
use crate::ble::connection::{ConnHandle, ConnectionRegistry, PeerAddress};
use crate::ble::events::{AuthorizeRequest, BleEvent, StackEvent, TimerId};
use crate::ble::gatt::{gatt_status, AuthorizeReply, WriteOp};
use crate::ble::proto_service::{ProtoService, WriteCallback, PROTO_SERVICE_UUID, PROTO_SERVICE_UUID128};
use crate::ble::queued_write::{QueuedWriteBuffer, QueuedWriteError};
use crate::ble::stack::{hci, BondingStore, Phys, Stack};
use crate::config::{Config, ConnParams, ATT_MTU_DEFAULT, SERVICE_DATA_LEN};
use crate::error::{Error, InitContext, InitStage, StackError};

pub struct Peripheral<S: Stack, B: BondingStore> {
    stack: S,
    store: B,
    config: Config,
    initialised: bool,
    /// Application wants to be discoverable while no central is connected
    advertising_enabled: bool,
    connection: ConnectionRegistry,
    advertising: AdvertisingController,
    conn_params: ConnParamsNegotiator,
    security: SecurityCoordinator,
    queued_write: QueuedWriteBuffer,
    service: ProtoService,
}

impl<S: Stack, B: BondingStore> Peripheral<S, B> {
    pub fn new(stack: S, store: B, config: Config) -> Self {
        let advertising = AdvertisingController::new(config.advertising, PROTO_SERVICE_UUID128, PROTO_SERVICE_UUID);
        let conn_params = ConnParamsNegotiator::new(config.conn_params, config.gap.preferred_conn_params);
        let security = SecurityCoordinator::new(config.security, config.allow_repairing);
        Self {
            stack,
            store,
            config,
            initialised: false,
            advertising_enabled: false,
            connection: ConnectionRegistry::new(),
            advertising,
            conn_params,
            security,
            queued_write: QueuedWriteBuffer::new(),
            service: ProtoService::new(),
        }
    }

    /// Bring up GAP, GATT, the protocol service, advertising, connection
    /// parameter negotiation and the bonding store, in that order
    ///
    /// Any failure is returned as [`Error::Init`] naming the stage; calling
    /// again after a successful init is a no-op.
    pub fn init(&mut self) -> Result<(), Error> {
        if self.initialised {
            debug!("BLE: Already initialised");
            return Ok(());
        }

        self.stack.gap_configure(&self.config.gap).stage(InitStage::Gap)?;
        info!("BLE: GAP configured");

        self.stack.gatt_init(self.config.gap.att_mtu).stage(InitStage::Gatt)?;
        info!("BLE: GATT initialised, ATT MTU {}", self.config.gap.att_mtu);

        self.service
            .init(&mut self.stack, &mut self.queued_write)
            .map_err(|e| init_error(InitStage::Services, e))?;

        self.advertising
            .init(&mut self.stack, self.config.gap.device_name.as_str())
            .map_err(|e| init_error(InitStage::Advertising, e))?;

        let preferred = &self.config.gap.preferred_conn_params;
        if self.config.conn_params.max_attempts == 0 || preferred.min_conn_interval > preferred.max_conn_interval {
            error!("BLE: Invalid connection parameter configuration");
            return Err(Error::Init {
                stage: InitStage::ConnParams,
                cause: StackError::INVALID_PARAM,
            });
        }

        self.security.init(&mut self.store).stage(InitStage::PeerManager)?;

        self.initialised = true;
        info!("BLE: Initialised");
        Ok(())
    }

    /// Start or stop fast advertising
    ///
    /// While enabled, advertising restarts automatically after a disconnect.
    pub fn advertising_enable(&mut self, enable: bool) -> Result<(), Error> {
        if !self.initialised {
            return Err(Error::Stack(StackError::INVALID_STATE));
        }

        if enable {
            if self.connection.is_connected() {
                warn!("BLE: Not advertising while connected");
                return Err(Error::Stack(StackError::INVALID_STATE));
            }
            self.advertising.start(&mut self.stack, AdvertisingMode::Fast)?;
        } else {
            self.advertising.stop(&mut self.stack)?;
        }
        self.advertising_enabled = enable;
        Ok(())
    }

    /// Replace the 6-byte payload advertised as service data
    pub fn set_service_data(&mut self, data: [u8; SERVICE_DATA_LEN]) -> Result<(), Error> {
        self.advertising
            .set_service_data(&mut self.stack, data, self.config.gap.device_name.as_str())
    }

    /// Install the application's handler for values written by the central
    pub fn register_write_callback(&mut self, callback: Option<WriteCallback>) -> Result<(), Error> {
        self.service.register_write_callback(callback)
    }

    /// Indicate `data` on the protocol characteristic
    pub fn indicate(&mut self, data: &[u8]) -> Result<(), Error> {
        if !self.connection.is_connected() {
            return Err(Error::NotConnected);
        }
        self.service.indicate(&mut self.stack, data)
    }

    /// Handle one event to completion
    pub fn dispatch(&mut self, event: BleEvent) {
        match event {
            BleEvent::Stack(evt) => self.on_stack_event(evt),
            BleEvent::Advertising(evt) => {
                debug!("BLE: {}", evt.label());
                self.advertising.on_event(&mut self.stack, AdvEventKind::from(evt));
            }
            BleEvent::PeerManager(evt) => {
                let current = self.connection.current_handle();
                if let Err(e) = self.security.on_peer_event(&mut self.stack, &mut self.store, current, evt) {
                    warn!("BLE: {} handling failed: {:?}", evt.label(), e);
                }
            }
            BleEvent::TimerExpired(timer) => self.on_timer_expired(timer),
        }
    }

    /// Dispatch every event already queued, returning how many ran
    pub fn process_pending<M: RawMutex, const N: usize>(&mut self, events: &Channel<M, BleEvent, N>) -> usize {
        let mut handled = 0;
        while let Ok(event) = events.try_receive() {
            self.dispatch(event);
            handled += 1;
        }
        handled
    }

    /// Wait for the next event and dispatch it
    pub async fn process_next<M: RawMutex, const N: usize>(&mut self, events: &Channel<M, BleEvent, N>) {
        let event = events.receive().await;
        self.dispatch(event);
    }

    pub fn is_initialised(&self) -> bool {
        self.initialised
    }

    pub fn is_advertising_enabled(&self) -> bool {
        self.advertising_enabled
    }

    pub fn connection(&self) -> &ConnectionRegistry {
        &self.connection
    }

    pub fn advertising(&self) -> &AdvertisingController {
        &self.advertising
    }

    pub fn conn_params(&self) -> &ConnParamsNegotiator {
        &self.conn_params
    }

    pub fn security(&self) -> &SecurityCoordinator {
        &self.security
    }

    pub fn queued_write(&self) -> &QueuedWriteBuffer {
        &self.queued_write
    }

    pub fn service(&self) -> &ProtoService {
        &self.service
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn stack(&self) -> &S {
        &self.stack
    }

    pub fn stack_mut(&mut self) -> &mut S {
        &mut self.stack
    }

    pub fn store(&self) -> &B {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut B {
        &mut self.store
    }

    fn on_stack_event(&mut self, event: StackEvent) {
        debug!("BLE: {} ({:#x})", event.label(), event.id());

        // Per-link events for anything but the live link are stale
        if let Some(conn) = event.conn_handle() {
            let link_event = !matches!(event, StackEvent::Connected { .. } | StackEvent::Disconnected { .. });
            if link_event && self.connection.is_stale(conn) {
                warn!("BLE: Dropping {} for stale handle {}", event.label(), conn);
                return;
            }
        }

        match event {
            StackEvent::UserMemRequest { conn_handle } => {
                if let Err(e) = self.stack.user_mem_reply(conn_handle, self.queued_write.stack_mem_mut()) {
                    error!("BLE: User memory reply failed: {:?}", e);
                }
            }
            StackEvent::UserMemRelease { .. } => trace!("BLE: User memory released"),
            StackEvent::Connected {
                conn_handle,
                peer_addr,
                conn_params,
            } => self.on_connected(conn_handle, peer_addr, conn_params),
            StackEvent::Disconnected { conn_handle, reason } => self.on_disconnected(conn_handle, reason),
            StackEvent::ConnParamUpdate {
                conn_handle,
                conn_params,
            } => {
                let _ = self.connection.update_params(conn_handle, conn_params);
                if let Err(e) = self
                    .conn_params
                    .on_conn_param_update(&mut self.stack, conn_handle, &conn_params)
                {
                    warn!("BLE: Connection parameter update handling: {:?}", e);
                }
            }
            StackEvent::SecParamsRequest { .. }
            | StackEvent::SecInfoRequest { .. }
            | StackEvent::AuthStatus { .. }
            | StackEvent::ConnSecUpdate { .. } => self.security.on_stack_event(&event),
            StackEvent::PhyUpdateRequest { conn_handle } => {
                if let Err(e) = self.stack.phy_update(conn_handle, Phys::AUTO) {
                    error!("BLE: PHY update reply failed: {:?}", e);
                }
            }
            StackEvent::PhyUpdate {
                conn_handle,
                tx_phy,
                rx_phy,
            } => {
                let _ = self.connection.update_phy(conn_handle, tx_phy, rx_phy);
            }
            StackEvent::DataLengthUpdateRequest { conn_handle } => {
                if let Err(e) = self.stack.data_length_update(conn_handle) {
                    error!("BLE: Data length update reply failed: {:?}", e);
                }
            }
            StackEvent::DataLengthUpdate {
                conn_handle,
                max_tx_octets,
                max_rx_octets,
            } => {
                let _ = self
                    .connection
                    .update_data_length(conn_handle, max_tx_octets, max_rx_octets);
            }
            StackEvent::ExchangeMtuRequest {
                conn_handle,
                client_rx_mtu,
            } => {
                let server_rx_mtu = self.config.gap.att_mtu;
                if let Err(e) = self.stack.exchange_mtu_reply(conn_handle, server_rx_mtu) {
                    error!("BLE: MTU exchange reply failed: {:?}", e);
                    return;
                }
                let mtu = client_rx_mtu.min(server_rx_mtu).max(ATT_MTU_DEFAULT);
                let _ = self.connection.update_mtu(conn_handle, mtu);
            }
            StackEvent::ExchangeMtuResponse {
                conn_handle,
                server_rx_mtu,
            } => {
                let mtu = server_rx_mtu.min(self.config.gap.att_mtu).max(ATT_MTU_DEFAULT);
                let _ = self.connection.update_mtu(conn_handle, mtu);
            }
            StackEvent::GattcTimeout { conn_handle } | StackEvent::GattsTimeout { conn_handle } => {
                warn!("BLE: GATT timeout on {}, disconnecting", conn_handle);
                if let Err(e) = self
                    .stack
                    .disconnect(conn_handle, hci::REMOTE_USER_TERMINATED_CONNECTION)
                {
                    error!("BLE: Disconnect failed: {:?}", e);
                }
            }
            StackEvent::Write {
                conn_handle,
                handle,
                op,
                offset,
                data,
            } => match op {
                WriteOp::Request | WriteOp::Command | WriteOp::SignedCommand => {
                    if !self.service.on_write(&mut self.stack, conn_handle, handle, &data) {
                        debug!("BLE: Write to foreign handle {:#x}", handle);
                    }
                }
                WriteOp::PrepareRequest | WriteOp::ExecuteNow | WriteOp::ExecuteCancel => {
                    let _ = self.on_queued_write(conn_handle, handle, op, offset, &data);
                }
            },
            StackEvent::RwAuthorizeRequest { conn_handle, request } => self.on_authorize_request(conn_handle, request),
            StackEvent::SysAttrMissing { conn_handle } => {
                if let Err(e) = self.stack.sys_attr_set(conn_handle) {
                    error!("BLE: System attribute set failed: {:?}", e);
                }
            }
            StackEvent::Hvc { handle, .. } => self.service.on_indication_confirmed(handle),
            StackEvent::HvnTxComplete { count, .. } => trace!("BLE: {} notifications sent", count),
            StackEvent::Timeout { source, .. } => {
                warn!("BLE: {:?} (source {})", Error::UnhandledEvent, source)
            }
            StackEvent::Other { id } => debug!("BLE: {:?} {}", Error::UnhandledEvent, id),
        }
    }

    fn on_connected(&mut self, conn: ConnHandle, peer_addr: PeerAddress, conn_params: ConnParams) {
        if self.connection.on_connected(conn, peer_addr, conn_params).is_err() {
            return;
        }

        self.advertising.on_connected();
        self.queued_write.cancel();
        self.service.on_connected(conn);
        self.security.on_connected(conn);
        if let Err(e) = self.conn_params.on_connected(&mut self.stack, &conn_params) {
            error!("BLE: Could not arm connection parameter timer: {:?}", e);
        }
    }

    fn on_disconnected(&mut self, conn: ConnHandle, reason: u8) {
        if self.connection.on_disconnected(conn, reason).is_err() {
            return;
        }

        // Every per-link component forgets the handle before the next event
        self.queued_write.cancel();
        self.conn_params.reset(&mut self.stack);
        self.service.on_disconnected();
        self.security.on_disconnected();

        if self.advertising_enabled && self.config.advertising.restart_on_disconnect {
            if let Err(e) = self.advertising.start(&mut self.stack, AdvertisingMode::Fast) {
                error!("BLE: Advertising restart failed: {:?}", e);
            }
        }
    }

    fn on_timer_expired(&mut self, timer: TimerId) {
        match timer {
            TimerId::ConnParamsUpdate => {
                if !self.connection.is_connected() {
                    debug!("BLE: Timer expired with no link");
                    return;
                }
                let conn = self.connection.current_handle();
                if let Err(e) = self.conn_params.on_timer_expired(&mut self.stack, conn) {
                    warn!("BLE: Connection parameter timer handling: {:?}", e);
                }
            }
        }
    }

    fn on_authorize_request(&mut self, conn: ConnHandle, request: AuthorizeRequest) {
        let reply = match request {
            AuthorizeRequest::Read { handle, .. } => {
                trace!("BLE: Read of {:#x} authorised", handle);
                AuthorizeReply::Read {
                    status: gatt_status::SUCCESS,
                }
            }
            AuthorizeRequest::Write {
                handle,
                op,
                offset,
                data,
            } => {
                let status = match op {
                    WriteOp::Request | WriteOp::Command | WriteOp::SignedCommand => {
                        if self.service.on_write(&mut self.stack, conn, handle, &data) {
                            gatt_status::SUCCESS
                        } else {
                            gatt_status::ATTERR_INVALID_HANDLE
                        }
                    }
                    WriteOp::PrepareRequest | WriteOp::ExecuteNow | WriteOp::ExecuteCancel => {
                        self.on_queued_write(conn, handle, op, offset, &data)
                    }
                };
                AuthorizeReply::Write { status }
            }
        };

        if let Err(e) = self.stack.rw_authorize_reply(conn, reply) {
            error!("BLE: Authorise reply failed: {:?}", e);
        }
    }

    /// Prepare, execute or cancel a long write; returns the GATT status
    fn on_queued_write(&mut self, conn: ConnHandle, handle: u16, op: WriteOp, offset: u16, data: &[u8]) -> u16 {
        match op {
            WriteOp::PrepareRequest => match self.queued_write.prepare_write(handle, offset, data) {
                Ok(()) => gatt_status::SUCCESS,
                // Accepted fragments stay queued until the client executes or cancels
                Err(QueuedWriteError::Capacity { .. }) => gatt_status::ATTERR_PREPARE_QUEUE_FULL,
                Err(QueuedWriteError::NotBound | QueuedWriteError::UnknownAttribute { .. }) => {
                    gatt_status::ATTERR_INVALID_HANDLE
                }
            },
            WriteOp::ExecuteNow => {
                let stack = &mut self.stack;
                let service = &mut self.service;
                self.queued_write
                    .commit(|handle, value| service.on_write(stack, conn, handle, value));
                gatt_status::SUCCESS
            }
            WriteOp::ExecuteCancel => {
                self.queued_write.cancel();
                gatt_status::SUCCESS
            }
            WriteOp::Request | WriteOp::Command | WriteOp::SignedCommand => gatt_status::SUCCESS,
        }
    }
}

/// Stack failures during init become [`Error::Init`] for `stage`
fn init_error(stage: InitStage, error: Error) -> Error {
    match error {
        Error::Stack(cause) => Error::Init { stage, cause },
        Error::Init { .. } => error,
        _ => Error::Init {
            stage,
            cause: StackError::INVALID_PARAM,
        },
    }
}
