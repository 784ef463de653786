//! SoftDevice implementation of the stack seam
//!
//! Every request is a single raw `sd_*` call. The SoftDevice keeps pointers
//! to advertising payloads while it advertises, so they live in a
//! double-buffered static block and updates always go to the idle half.

use core::{mem, ptr};

use defmt::{debug, info, warn};
use embassy_time::Duration;
use nrf52_proto_peripheral::ble::advertising::{AdvertisingParams, AdvertisingRequest, MAX_ADV_DATA_LEN};
use nrf52_proto_peripheral::ble::connection::ConnHandle;
use nrf52_proto_peripheral::ble::events::TimerId;
use nrf52_proto_peripheral::ble::gatt::{
    char_properties, gatt_status, AuthorizeReply, CharacteristicConfig, CharacteristicHandles, SecurityMode, Uuid,
    Uuid128,
};
use nrf52_proto_peripheral::ble::stack::Phys;
use nrf52_proto_peripheral::config::{ConnParams, GapConfig, ATT_MTU};
use nrf52_proto_peripheral::{Stack, StackError};
use nrf_softdevice::raw;

use super::timer::{TimerCommand, TIMER_COMMANDS};
use super::{check, CONN_CFG_TAG};

/// Advertising and scan response payloads, two of each
pub struct AdvBuffers {
    adv: [[u8; MAX_ADV_DATA_LEN]; 2],
    scan: [[u8; MAX_ADV_DATA_LEN]; 2],
    adv_len: [u16; 2],
    scan_len: [u16; 2],
    active: usize,
}

impl AdvBuffers {
    pub const fn new() -> Self {
        Self {
            adv: [[0; MAX_ADV_DATA_LEN]; 2],
            scan: [[0; MAX_ADV_DATA_LEN]; 2],
            adv_len: [0; 2],
            scan_len: [0; 2],
            active: 0,
        }
    }

    fn load(&mut self, slot: usize, adv_data: &[u8], scan_data: &[u8]) -> Result<(), StackError> {
        if adv_data.len() > MAX_ADV_DATA_LEN || scan_data.len() > MAX_ADV_DATA_LEN {
            return Err(StackError::INVALID_PARAM);
        }
        self.adv[slot][..adv_data.len()].copy_from_slice(adv_data);
        self.scan[slot][..scan_data.len()].copy_from_slice(scan_data);
        self.adv_len[slot] = adv_data.len() as u16;
        self.scan_len[slot] = scan_data.len() as u16;
        Ok(())
    }

    fn raw(&mut self, slot: usize) -> raw::ble_gap_adv_data_t {
        raw::ble_gap_adv_data_t {
            adv_data: raw::ble_data_t {
                p_data: self.adv[slot].as_mut_ptr(),
                len: self.adv_len[slot],
            },
            scan_rsp_data: raw::ble_data_t {
                p_data: self.scan[slot].as_mut_ptr(),
                len: self.scan_len[slot],
            },
        }
    }
}

pub struct SoftdeviceStack {
    adv_handle: u8,
    buffers: &'static mut AdvBuffers,
}

impl SoftdeviceStack {
    pub fn new(buffers: &'static mut AdvBuffers) -> Self {
        Self {
            adv_handle: raw::BLE_GAP_ADV_SET_HANDLE_NOT_SET as u8,
            buffers,
        }
    }
}

fn sec_mode(mode: SecurityMode) -> raw::ble_gap_conn_sec_mode_t {
    let (sm, lv) = match mode {
        SecurityMode::NoAccess => (0, 0),
        SecurityMode::Open => (1, 1),
        SecurityMode::EncryptedNoMitm => (1, 2),
        SecurityMode::EncryptedMitm => (1, 3),
    };
    let mut raw_mode: raw::ble_gap_conn_sec_mode_t = unsafe { mem::zeroed() };
    raw_mode.set_sm(sm);
    raw_mode.set_lv(lv);
    raw_mode
}

fn raw_conn_params(params: &ConnParams) -> raw::ble_gap_conn_params_t {
    raw::ble_gap_conn_params_t {
        min_conn_interval: params.min_conn_interval,
        max_conn_interval: params.max_conn_interval,
        slave_latency: params.peripheral_latency,
        conn_sup_timeout: params.conn_sup_timeout,
    }
}

fn raw_adv_params(params: &AdvertisingParams) -> raw::ble_gap_adv_params_t {
    let mut adv_params: raw::ble_gap_adv_params_t = unsafe { mem::zeroed() };
    adv_params.properties.type_ = raw::BLE_GAP_ADV_TYPE_CONNECTABLE_SCANNABLE_UNDIRECTED as u8;
    adv_params.primary_phy = raw::BLE_GAP_PHY_1MBPS as u8;
    adv_params.secondary_phy = raw::BLE_GAP_PHY_1MBPS as u8;
    adv_params.interval = u32::from(params.interval);
    adv_params.duration = params.duration;
    adv_params.filter_policy = if params.whitelist {
        raw::BLE_GAP_ADV_FP_FILTER_CONNREQ as u8
    } else {
        raw::BLE_GAP_ADV_FP_ANY as u8
    };
    adv_params
}

impl Stack for SoftdeviceStack {
    fn gap_configure(&mut self, gap: &GapConfig) -> Result<(), StackError> {
        let open = sec_mode(SecurityMode::Open);
        let name = gap.device_name.as_bytes();
        check(unsafe { raw::sd_ble_gap_device_name_set(&open, name.as_ptr(), name.len() as u16) })?;
        check(unsafe { raw::sd_ble_gap_appearance_set(gap.appearance) })?;
        let ppcp = raw_conn_params(&gap.preferred_conn_params);
        check(unsafe { raw::sd_ble_gap_ppcp_set(&ppcp) })
    }

    fn gatt_init(&mut self, att_mtu: u16) -> Result<(), StackError> {
        // The MTU itself is fixed when the SoftDevice is enabled
        if att_mtu > ATT_MTU {
            warn!("SD: ATT MTU {} exceeds the enabled {}", att_mtu, ATT_MTU);
            return Err(StackError::INVALID_PARAM);
        }
        Ok(())
    }

    fn uuid_vs_add(&mut self, base: &Uuid128) -> Result<u8, StackError> {
        let base = raw::ble_uuid128_t { uuid128: *base };
        let mut uuid_type = 0u8;
        check(unsafe { raw::sd_ble_uuid_vs_add(&base, &mut uuid_type) })?;
        Ok(uuid_type)
    }

    fn service_add(&mut self, uuid: Uuid) -> Result<u16, StackError> {
        let uuid = raw::ble_uuid_t {
            uuid: uuid.uuid,
            type_: uuid.uuid_type,
        };
        let mut handle = 0u16;
        check(unsafe { raw::sd_ble_gatts_service_add(raw::BLE_GATTS_SRVC_TYPE_PRIMARY as u8, &uuid, &mut handle) })?;
        Ok(handle)
    }

    fn characteristic_add(
        &mut self,
        service_handle: u16,
        characteristic: &CharacteristicConfig,
    ) -> Result<CharacteristicHandles, StackError> {
        let properties = characteristic.properties;
        let flag = |bit: u8| u8::from(properties & bit != 0);

        let mut char_md: raw::ble_gatts_char_md_t = unsafe { mem::zeroed() };
        char_md.char_props.set_broadcast(flag(char_properties::BROADCAST));
        char_md.char_props.set_read(flag(char_properties::READ));
        char_md.char_props.set_write_wo_resp(flag(char_properties::WRITE_WITHOUT_RESPONSE));
        char_md.char_props.set_write(flag(char_properties::WRITE));
        char_md.char_props.set_notify(flag(char_properties::NOTIFY));
        char_md.char_props.set_indicate(flag(char_properties::INDICATE));
        char_md.char_props.set_auth_signed_wr(flag(char_properties::AUTH_SIGNED_WRITES));

        if let Some(description) = characteristic.user_description {
            char_md.p_char_user_desc = description.as_ptr();
            char_md.char_user_desc_size = description.len() as u16;
            char_md.char_user_desc_max_size = description.len() as u16;
        }

        let mut cccd_md: raw::ble_gatts_attr_md_t = unsafe { mem::zeroed() };
        cccd_md.read_perm = sec_mode(SecurityMode::Open);
        cccd_md.write_perm = sec_mode(characteristic.cccd_perm);
        cccd_md.set_vloc(raw::BLE_GATTS_VLOC_STACK as u8);
        if characteristic.has_cccd() {
            char_md.p_cccd_md = &cccd_md;
        }

        let mut attr_md: raw::ble_gatts_attr_md_t = unsafe { mem::zeroed() };
        attr_md.read_perm = sec_mode(characteristic.read_perm);
        attr_md.write_perm = sec_mode(characteristic.write_perm);
        attr_md.set_vloc(raw::BLE_GATTS_VLOC_STACK as u8);
        attr_md.set_vlen(u8::from(characteristic.variable_len));
        // Prepare and execute writes then reach the peripheral as authorisation requests
        attr_md.set_wr_auth(u8::from(characteristic.write_authorization));

        let uuid = raw::ble_uuid_t {
            uuid: characteristic.uuid.uuid,
            type_: characteristic.uuid.uuid_type,
        };
        let attr = raw::ble_gatts_attr_t {
            p_uuid: &uuid,
            p_attr_md: &attr_md,
            init_len: 0,
            init_offs: 0,
            max_len: characteristic.max_len,
            p_value: ptr::null_mut(),
        };

        let mut handles: raw::ble_gatts_char_handles_t = unsafe { mem::zeroed() };
        check(unsafe { raw::sd_ble_gatts_characteristic_add(service_handle, &char_md, &attr, &mut handles) })?;
        debug!(
            "SD: Characteristic {:#x} value handle {}, cccd handle {}",
            characteristic.uuid.uuid, handles.value_handle, handles.cccd_handle
        );

        Ok(CharacteristicHandles {
            value_handle: handles.value_handle,
            user_desc_handle: handles.user_desc_handle,
            cccd_handle: handles.cccd_handle,
            sccd_handle: handles.sccd_handle,
        })
    }

    fn advertising_configure(
        &mut self,
        params: &AdvertisingParams,
        adv_data: &[u8],
        scan_data: &[u8],
    ) -> Result<(), StackError> {
        let slot = self.buffers.active;
        self.buffers.load(slot, adv_data, scan_data)?;
        let data = self.buffers.raw(slot);
        let adv_params = raw_adv_params(params);
        check(unsafe { raw::sd_ble_gap_adv_set_configure(&mut self.adv_handle, &data, &adv_params) })
    }

    fn advertising_start(&mut self, params: &AdvertisingParams) -> Result<(), StackError> {
        let adv_params = raw_adv_params(params);
        check(unsafe { raw::sd_ble_gap_adv_set_configure(&mut self.adv_handle, ptr::null(), &adv_params) })?;
        check(unsafe { raw::sd_ble_gap_adv_start(self.adv_handle, CONN_CFG_TAG) })
    }

    fn advertising_stop(&mut self) -> Result<(), StackError> {
        check(unsafe { raw::sd_ble_gap_adv_stop(self.adv_handle) })
    }

    fn advertising_data_update(&mut self, adv_data: &[u8], scan_data: &[u8]) -> Result<(), StackError> {
        let slot = self.buffers.active ^ 1;
        self.buffers.load(slot, adv_data, scan_data)?;
        let data = self.buffers.raw(slot);
        check(unsafe { raw::sd_ble_gap_adv_set_configure(&mut self.adv_handle, &data, ptr::null()) })?;
        self.buffers.active = slot;
        Ok(())
    }

    fn advertising_request_reply(&mut self, request: AdvertisingRequest) -> Result<(), StackError> {
        match request {
            AdvertisingRequest::Whitelist => check(unsafe { raw::sd_ble_gap_whitelist_set(ptr::null_mut(), 0) }),
            AdvertisingRequest::PeerAddress => {
                check(unsafe { raw::sd_ble_gap_device_identities_set(ptr::null_mut(), ptr::null_mut(), 0) })
            }
        }
    }

    fn disconnect(&mut self, conn: ConnHandle, reason: u8) -> Result<(), StackError> {
        info!("SD: Disconnecting {}, reason {:#x}", conn, reason);
        check(unsafe { raw::sd_ble_gap_disconnect(conn, reason) })
    }

    fn conn_param_update(&mut self, conn: ConnHandle, params: &ConnParams) -> Result<(), StackError> {
        let params = raw_conn_params(params);
        check(unsafe { raw::sd_ble_gap_conn_param_update(conn, &params) })
    }

    fn phy_update(&mut self, conn: ConnHandle, phys: Phys) -> Result<(), StackError> {
        let phys = raw::ble_gap_phys_t {
            tx_phys: phys.tx_phys,
            rx_phys: phys.rx_phys,
        };
        check(unsafe { raw::sd_ble_gap_phy_update(conn, &phys) })
    }

    fn data_length_update(&mut self, conn: ConnHandle) -> Result<(), StackError> {
        check(unsafe { raw::sd_ble_gap_data_length_update(conn, ptr::null(), ptr::null_mut()) })
    }

    fn exchange_mtu_reply(&mut self, conn: ConnHandle, server_rx_mtu: u16) -> Result<(), StackError> {
        check(unsafe { raw::sd_ble_gatts_exchange_mtu_reply(conn, server_rx_mtu) })
    }

    fn user_mem_reply(&mut self, conn: ConnHandle, mem: &mut [u8]) -> Result<(), StackError> {
        // The block belongs to the peripheral, which lives in a static cell
        let block = raw::ble_user_mem_block_t {
            p_mem: mem.as_mut_ptr(),
            len: mem.len() as u16,
        };
        check(unsafe { raw::sd_ble_user_mem_reply(conn, &block) })
    }

    fn sys_attr_set(&mut self, conn: ConnHandle) -> Result<(), StackError> {
        check(unsafe { raw::sd_ble_gatts_sys_attr_set(conn, ptr::null(), 0, 0) })
    }

    fn value_set(&mut self, conn: ConnHandle, handle: u16, value: &[u8]) -> Result<(), StackError> {
        let mut value = raw::ble_gatts_value_t {
            len: value.len() as u16,
            offset: 0,
            p_value: value.as_ptr() as *mut u8,
        };
        check(unsafe { raw::sd_ble_gatts_value_set(conn, handle, &mut value) })
    }

    fn indicate(&mut self, conn: ConnHandle, handle: u16, value: &[u8]) -> Result<(), StackError> {
        let mut len = value.len() as u16;
        let params = raw::ble_gatts_hvx_params_t {
            handle,
            type_: raw::BLE_GATT_HVX_INDICATION as u8,
            offset: 0,
            p_len: &mut len,
            p_data: value.as_ptr(),
        };
        check(unsafe { raw::sd_ble_gatts_hvx(conn, &params) })
    }

    fn rw_authorize_reply(&mut self, conn: ConnHandle, reply: AuthorizeReply) -> Result<(), StackError> {
        let mut params: raw::ble_gatts_authorize_params_t = unsafe { mem::zeroed() };
        params.gatt_status = reply.status();
        params.set_update(u8::from(reply.status() == gatt_status::SUCCESS));

        let mut raw_reply: raw::ble_gatts_rw_authorize_reply_params_t = unsafe { mem::zeroed() };
        match reply {
            AuthorizeReply::Read { .. } => {
                raw_reply.type_ = raw::BLE_GATTS_AUTHORIZE_TYPE_READ as u8;
                raw_reply.params.read = params;
            }
            AuthorizeReply::Write { .. } => {
                raw_reply.type_ = raw::BLE_GATTS_AUTHORIZE_TYPE_WRITE as u8;
                raw_reply.params.write = params;
            }
        }
        check(unsafe { raw::sd_ble_gatts_rw_authorize_reply(conn, &raw_reply) })
    }

    fn timer_start(&mut self, timer: TimerId, after: Duration) -> Result<(), StackError> {
        TIMER_COMMANDS.signal(TimerCommand::Start(timer, after));
        Ok(())
    }

    fn timer_stop(&mut self, timer: TimerId) {
        TIMER_COMMANDS.signal(TimerCommand::Stop(timer));
    }
}
