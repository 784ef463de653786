//! Raw SoftDevice event translation
//!
//! Converts `ble_evt_t` into [`BleEvent`] and queues it for the BLE task.
//! Events the peripheral does not model are passed on as
//! [`StackEvent::Other`] so they still show up in the logs.

use core::slice;

use defmt::{trace, warn};
use nrf52_proto_peripheral::ble::connection::PeerAddress;
use nrf52_proto_peripheral::ble::events::{att_payload, AdvEvent, AuthorizeRequest, StackEvent};
use nrf52_proto_peripheral::ble::gatt::WriteOp;
use nrf52_proto_peripheral::config::ConnParams;
use nrf52_proto_peripheral::BleEvent;
use nrf_softdevice::raw;

use super::{bonds, EVENTS};

fn conn_params(params: &raw::ble_gap_conn_params_t) -> ConnParams {
    ConnParams {
        min_conn_interval: params.min_conn_interval,
        max_conn_interval: params.max_conn_interval,
        peripheral_latency: params.slave_latency,
        conn_sup_timeout: params.conn_sup_timeout,
    }
}

fn write_op(op: u8) -> Option<WriteOp> {
    match u32::from(op) {
        raw::BLE_GATTS_OP_WRITE_REQ => Some(WriteOp::Request),
        raw::BLE_GATTS_OP_WRITE_CMD => Some(WriteOp::Command),
        raw::BLE_GATTS_OP_SIGN_WRITE_CMD => Some(WriteOp::SignedCommand),
        raw::BLE_GATTS_OP_PREP_WRITE_REQ => Some(WriteOp::PrepareRequest),
        raw::BLE_GATTS_OP_EXEC_WRITE_REQ_NOW => Some(WriteOp::ExecuteNow),
        raw::BLE_GATTS_OP_EXEC_WRITE_REQ_CANCEL => Some(WriteOp::ExecuteCancel),
        _ => None,
    }
}

/// The write parameters shared by plain writes and write authorisations
fn write_parts(write: &raw::ble_gatts_evt_write_t) -> Option<(WriteOp, &[u8])> {
    let op = write_op(write.op)?;
    let data = unsafe { slice::from_raw_parts(write.data.as_ptr(), usize::from(write.len)) };
    Some((op, data))
}

fn gap_event(evt_id: u32, gap: &raw::ble_gap_evt_t) -> Option<BleEvent> {
    let conn_handle = gap.conn_handle;
    let event = match evt_id {
        raw::BLE_GAP_EVTS_BLE_GAP_EVT_CONNECTED => {
            let connected = unsafe { &gap.params.connected };
            StackEvent::Connected {
                conn_handle,
                peer_addr: PeerAddress {
                    addr_type: connected.peer_addr.addr_type(),
                    addr: connected.peer_addr.addr,
                },
                conn_params: conn_params(&connected.conn_params),
            }
        }
        raw::BLE_GAP_EVTS_BLE_GAP_EVT_DISCONNECTED => StackEvent::Disconnected {
            conn_handle,
            reason: unsafe { gap.params.disconnected.reason },
        },
        raw::BLE_GAP_EVTS_BLE_GAP_EVT_CONN_PARAM_UPDATE => StackEvent::ConnParamUpdate {
            conn_handle,
            conn_params: conn_params(unsafe { &gap.params.conn_param_update.conn_params }),
        },
        raw::BLE_GAP_EVTS_BLE_GAP_EVT_SEC_PARAMS_REQUEST => StackEvent::SecParamsRequest { conn_handle },
        raw::BLE_GAP_EVTS_BLE_GAP_EVT_SEC_INFO_REQUEST => StackEvent::SecInfoRequest { conn_handle },
        raw::BLE_GAP_EVTS_BLE_GAP_EVT_AUTH_STATUS => {
            let status = unsafe { &gap.params.auth_status };
            StackEvent::AuthStatus {
                conn_handle,
                status: status.auth_status,
                bonded: status.bonded() != 0,
            }
        }
        raw::BLE_GAP_EVTS_BLE_GAP_EVT_CONN_SEC_UPDATE => {
            let sec_mode = unsafe { &gap.params.conn_sec_update.conn_sec.sec_mode };
            StackEvent::ConnSecUpdate {
                conn_handle,
                security_mode: sec_mode.sm(),
                security_level: sec_mode.lv(),
            }
        }
        raw::BLE_GAP_EVTS_BLE_GAP_EVT_TIMEOUT => StackEvent::Timeout {
            conn_handle,
            source: unsafe { gap.params.timeout.src },
        },
        raw::BLE_GAP_EVTS_BLE_GAP_EVT_PHY_UPDATE_REQUEST => StackEvent::PhyUpdateRequest { conn_handle },
        raw::BLE_GAP_EVTS_BLE_GAP_EVT_PHY_UPDATE => {
            let update = unsafe { &gap.params.phy_update };
            StackEvent::PhyUpdate {
                conn_handle,
                tx_phy: update.tx_phy,
                rx_phy: update.rx_phy,
            }
        }
        raw::BLE_GAP_EVTS_BLE_GAP_EVT_DATA_LENGTH_UPDATE_REQUEST => {
            StackEvent::DataLengthUpdateRequest { conn_handle }
        }
        raw::BLE_GAP_EVTS_BLE_GAP_EVT_DATA_LENGTH_UPDATE => {
            let effective = unsafe { &gap.params.data_length_update.effective_params };
            StackEvent::DataLengthUpdate {
                conn_handle,
                max_tx_octets: effective.max_tx_octets,
                max_rx_octets: effective.max_rx_octets,
            }
        }
        // Advertising timed out without a connection
        raw::BLE_GAP_EVTS_BLE_GAP_EVT_ADV_SET_TERMINATED => return Some(BleEvent::Advertising(AdvEvent::Idle)),
        _ => StackEvent::Other { id: evt_id as u16 },
    };
    Some(BleEvent::Stack(event))
}

fn gatts_event(evt_id: u32, gatts: &raw::ble_gatts_evt_t) -> Option<BleEvent> {
    let conn_handle = gatts.conn_handle;
    let event = match evt_id {
        raw::BLE_GATTS_EVTS_BLE_GATTS_EVT_WRITE => {
            let write = unsafe { &gatts.params.write };
            let (op, data) = write_parts(write)?;
            let Ok(data) = att_payload(data) else {
                warn!("SD: Dropping {} byte write to {}", write.len, write.handle);
                return None;
            };
            StackEvent::Write {
                conn_handle,
                handle: write.handle,
                op,
                offset: write.offset,
                data,
            }
        }
        raw::BLE_GATTS_EVTS_BLE_GATTS_EVT_RW_AUTHORIZE_REQUEST => {
            let authorize = unsafe { &gatts.params.authorize_request };
            let request = if u32::from(authorize.type_) == raw::BLE_GATTS_AUTHORIZE_TYPE_READ {
                let read = unsafe { &authorize.request.read };
                AuthorizeRequest::Read {
                    handle: read.handle,
                    offset: read.offset,
                }
            } else {
                let write = unsafe { &authorize.request.write };
                let (op, data) = write_parts(write)?;
                let Ok(data) = att_payload(data) else {
                    warn!("SD: Dropping {} byte authorised write", write.len);
                    return None;
                };
                AuthorizeRequest::Write {
                    handle: write.handle,
                    op,
                    offset: write.offset,
                    data,
                }
            };
            StackEvent::RwAuthorizeRequest { conn_handle, request }
        }
        raw::BLE_GATTS_EVTS_BLE_GATTS_EVT_SYS_ATTR_MISSING => StackEvent::SysAttrMissing { conn_handle },
        raw::BLE_GATTS_EVTS_BLE_GATTS_EVT_HVC => StackEvent::Hvc {
            conn_handle,
            handle: unsafe { gatts.params.hvc.handle },
        },
        raw::BLE_GATTS_EVTS_BLE_GATTS_EVT_EXCHANGE_MTU_REQUEST => StackEvent::ExchangeMtuRequest {
            conn_handle,
            client_rx_mtu: unsafe { gatts.params.exchange_mtu_request.client_rx_mtu },
        },
        raw::BLE_GATTS_EVTS_BLE_GATTS_EVT_TIMEOUT => StackEvent::GattsTimeout { conn_handle },
        raw::BLE_GATTS_EVTS_BLE_GATTS_EVT_HVN_TX_COMPLETE => StackEvent::HvnTxComplete {
            conn_handle,
            count: unsafe { gatts.params.hvn_tx_complete.count },
        },
        _ => StackEvent::Other { id: evt_id as u16 },
    };
    Some(BleEvent::Stack(event))
}

/// Translate a raw event, or `None` when it carries nothing usable
pub fn translate(ble_evt: &raw::ble_evt_t) -> Option<BleEvent> {
    let evt_id = u32::from(ble_evt.header.evt_id);
    match evt_id {
        raw::BLE_EVTS_BLE_EVT_USER_MEM_REQUEST => Some(BleEvent::Stack(StackEvent::UserMemRequest {
            conn_handle: unsafe { ble_evt.evt.common_evt.conn_handle },
        })),
        raw::BLE_EVTS_BLE_EVT_USER_MEM_RELEASE => Some(BleEvent::Stack(StackEvent::UserMemRelease {
            conn_handle: unsafe { ble_evt.evt.common_evt.conn_handle },
        })),
        raw::BLE_GAP_EVT_BASE..=raw::BLE_GAP_EVT_LAST => gap_event(evt_id, unsafe { &ble_evt.evt.gap_evt }),
        raw::BLE_GATTC_EVTS_BLE_GATTC_EVT_EXCHANGE_MTU_RSP => {
            let gattc = unsafe { &ble_evt.evt.gattc_evt };
            Some(BleEvent::Stack(StackEvent::ExchangeMtuResponse {
                conn_handle: gattc.conn_handle,
                server_rx_mtu: unsafe { gattc.params.exchange_mtu_rsp.server_rx_mtu },
            }))
        }
        raw::BLE_GATTC_EVTS_BLE_GATTC_EVT_TIMEOUT => Some(BleEvent::Stack(StackEvent::GattcTimeout {
            conn_handle: unsafe { ble_evt.evt.gattc_evt.conn_handle },
        })),
        raw::BLE_GATTS_EVT_BASE..=raw::BLE_GATTS_EVT_LAST => gatts_event(evt_id, unsafe { &ble_evt.evt.gatts_evt }),
        _ => Some(BleEvent::Stack(StackEvent::Other { id: evt_id as u16 })),
    }
}

/// SoftDevice event callback: queue the event, then let the bond table see it
pub fn on_sd_event(ble_evt: *const raw::ble_evt_t) {
    let ble_evt = unsafe { &*ble_evt };

    if let Some(event) = translate(ble_evt) {
        trace!("SD: {}", event.label());
        if EVENTS.try_send(event).is_err() {
            warn!("SD: Event queue full, dropped event {:#x}", ble_evt.header.evt_id);
        }
    }

    bonds::on_sd_event(ble_evt);
}
