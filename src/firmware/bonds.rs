//! RAM Bond Table
//!
//! Stands in for a flash-backed peer manager: answers SoftDevice security
//! requests from a small bond table and reports progress as [`PeerEvent`]s.
//! Bonds do not survive a reset.

use core::cell::RefCell;
use core::{mem, ptr};

use defmt::{debug, error, info, warn};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;
use heapless::Vec;
use nrf52_proto_peripheral::ble::connection::{ConnHandle, PeerAddress};
use nrf52_proto_peripheral::ble::events::{PeerEvent, PeerId, SecurityProcedure, PEER_ID_INVALID};
use nrf52_proto_peripheral::config::{IoCapabilities, KeyDistribution, SecurityParams};
use nrf52_proto_peripheral::{BleEvent, BondingStore, StackError};
use nrf_softdevice::raw;

use super::{check, EVENTS};

/// Maximum number of bonded centrals
const MAX_BONDS: usize = 4;

#[derive(Clone, Copy)]
struct BondRecord {
    peer_id: PeerId,
    peer_addr: PeerAddress,
    enc_key: raw::ble_gap_enc_key_t,
}

/// Security state of the live link
struct LinkSecurity {
    conn_handle: ConnHandle,
    peer_addr: PeerAddress,
    procedure: Option<SecurityProcedure>,
    /// Our keys, filled in by the SoftDevice during bonding
    own_enc_key: raw::ble_gap_enc_key_t,
    /// Security parameters request waiting on the application's answer
    config_pending: bool,
}

struct PeerTable {
    params: Option<SecurityParams>,
    bonds: Vec<BondRecord, MAX_BONDS>,
    next_peer_id: PeerId,
    link: Option<LinkSecurity>,
}

impl PeerTable {
    const fn new() -> Self {
        Self {
            params: None,
            bonds: Vec::new(),
            next_peer_id: 0,
            link: None,
        }
    }

    fn find_by_addr(&self, addr: &PeerAddress) -> Option<&BondRecord> {
        self.bonds.iter().find(|bond| bond.peer_addr == *addr)
    }

    fn link_mut(&mut self, conn: ConnHandle) -> Option<&mut LinkSecurity> {
        self.link.as_mut().filter(|link| link.conn_handle == conn)
    }

    fn peer_id(&self, conn: ConnHandle) -> PeerId {
        self.link
            .as_ref()
            .filter(|link| link.conn_handle == conn)
            .and_then(|link| self.find_by_addr(&link.peer_addr))
            .map_or(PEER_ID_INVALID, |bond| bond.peer_id)
    }

    /// Store or refresh the bond for the live link
    fn save_bond(&mut self, conn: ConnHandle) -> Result<PeerId, ()> {
        let link = self.link.as_ref().filter(|link| link.conn_handle == conn).ok_or(())?;
        let (peer_addr, enc_key) = (link.peer_addr, link.own_enc_key);

        if let Some(bond) = self.bonds.iter_mut().find(|bond| bond.peer_addr == peer_addr) {
            bond.enc_key = enc_key;
            return Ok(bond.peer_id);
        }

        let peer_id = self.next_peer_id;
        self.bonds
            .push(BondRecord {
                peer_id,
                peer_addr,
                enc_key,
            })
            .map_err(|_| ())?;
        self.next_peer_id = self.next_peer_id.wrapping_add(1);
        Ok(peer_id)
    }
}

static PEERS: Mutex<CriticalSectionRawMutex, RefCell<PeerTable>> = Mutex::new(RefCell::new(PeerTable::new()));

fn emit(event: PeerEvent) {
    if EVENTS.try_send(BleEvent::PeerManager(event)).is_err() {
        warn!("PEERS: Event queue full, dropped {}", event.label());
    }
}

fn raw_kdist(kdist: KeyDistribution) -> raw::ble_gap_sec_kdist_t {
    let mut raw_kdist: raw::ble_gap_sec_kdist_t = unsafe { mem::zeroed() };
    raw_kdist.set_enc(u8::from(kdist.enc));
    raw_kdist.set_id(u8::from(kdist.id));
    raw_kdist.set_sign(u8::from(kdist.sign));
    raw_kdist.set_link(u8::from(kdist.link));
    raw_kdist
}

fn raw_sec_params(params: &SecurityParams) -> raw::ble_gap_sec_params_t {
    let io_caps = match params.io_caps {
        IoCapabilities::DisplayOnly => raw::BLE_GAP_IO_CAPS_DISPLAY_ONLY,
        IoCapabilities::DisplayYesNo => raw::BLE_GAP_IO_CAPS_DISPLAY_YESNO,
        IoCapabilities::KeyboardOnly => raw::BLE_GAP_IO_CAPS_KEYBOARD_ONLY,
        IoCapabilities::None => raw::BLE_GAP_IO_CAPS_NONE,
        IoCapabilities::KeyboardDisplay => raw::BLE_GAP_IO_CAPS_KEYBOARD_DISPLAY,
    };
    let mut sec_params: raw::ble_gap_sec_params_t = unsafe { mem::zeroed() };
    sec_params.set_bond(u8::from(params.bond));
    sec_params.set_mitm(u8::from(params.mitm));
    sec_params.set_lesc(u8::from(params.lesc));
    sec_params.set_keypress(u8::from(params.keypress));
    sec_params.set_io_caps(io_caps as u8);
    sec_params.set_oob(u8::from(params.oob));
    sec_params.min_key_size = params.min_key_size;
    sec_params.max_key_size = params.max_key_size;
    sec_params.kdist_own = raw_kdist(params.kdist_own);
    sec_params.kdist_peer = raw_kdist(params.kdist_peer);
    sec_params
}

/// Answer a security parameters request with the configured parameters
fn sec_params_reply(table: &mut PeerTable, conn: ConnHandle) -> Result<(), StackError> {
    let params = table.params.ok_or(StackError::INVALID_STATE)?;
    let link = table.link_mut(conn).ok_or(StackError::INVALID_STATE)?;
    let procedure = if params.bond {
        SecurityProcedure::Bonding
    } else {
        SecurityProcedure::Pairing
    };
    link.procedure = Some(procedure);

    let sec_params = raw_sec_params(&params);
    let mut keyset: raw::ble_gap_sec_keyset_t = unsafe { mem::zeroed() };
    keyset.keys_own.p_enc_key = &mut link.own_enc_key;
    // The table is static, so the key pointer stays valid until AUTH_STATUS
    check(unsafe {
        raw::sd_ble_gap_sec_params_reply(conn, raw::BLE_GAP_SEC_STATUS_SUCCESS as u8, &sec_params, &keyset)
    })
}

fn reject_pairing(conn: ConnHandle) -> Result<(), StackError> {
    check(unsafe {
        raw::sd_ble_gap_sec_params_reply(
            conn,
            raw::BLE_GAP_SEC_STATUS_PAIRING_NOT_SUPP as u8,
            ptr::null(),
            ptr::null(),
        )
    })
}

/// Feed one raw SoftDevice event through the bond table
///
/// Runs in the SoftDevice event callback, after the event itself has been
/// queued for the BLE task.
pub fn on_sd_event(ble_evt: &raw::ble_evt_t) {
    let evt_id = u32::from(ble_evt.header.evt_id);
    let gap_evt = unsafe { &ble_evt.evt.gap_evt };
    let conn = gap_evt.conn_handle;

    PEERS.lock(|peers| {
        let mut table = peers.borrow_mut();
        match evt_id {
            raw::BLE_GAP_EVTS_BLE_GAP_EVT_CONNECTED => {
                let addr = unsafe { gap_evt.params.connected.peer_addr };
                let peer_addr = PeerAddress {
                    addr_type: addr.addr_type(),
                    addr: addr.addr,
                };
                table.link = Some(LinkSecurity {
                    conn_handle: conn,
                    peer_addr,
                    procedure: None,
                    own_enc_key: unsafe { mem::zeroed() },
                    config_pending: false,
                });
                if let Some(bond) = table.find_by_addr(&peer_addr) {
                    emit(PeerEvent::BondedPeerConnected {
                        conn_handle: conn,
                        peer_id: bond.peer_id,
                    });
                }
            }
            raw::BLE_GAP_EVTS_BLE_GAP_EVT_DISCONNECTED => {
                if table.link_mut(conn).is_some() {
                    table.link = None;
                }
            }
            raw::BLE_GAP_EVTS_BLE_GAP_EVT_SEC_PARAMS_REQUEST => {
                let peer_id = table.peer_id(conn);
                if peer_id != PEER_ID_INVALID {
                    // Re-pairing a bonded peer needs the application's consent
                    if let Some(link) = table.link_mut(conn) {
                        link.config_pending = true;
                    }
                    emit(PeerEvent::ConnSecConfigReq {
                        conn_handle: conn,
                        peer_id,
                    });
                    return;
                }
                match sec_params_reply(&mut table, conn) {
                    Ok(()) => {
                        let procedure = table
                            .link
                            .as_ref()
                            .and_then(|link| link.procedure)
                            .unwrap_or(SecurityProcedure::Pairing);
                        emit(PeerEvent::ConnSecStart {
                            conn_handle: conn,
                            peer_id,
                            procedure,
                        });
                    }
                    Err(e) => {
                        error!("PEERS: Security parameters reply failed: {:?}", e);
                        emit(PeerEvent::ErrorUnexpected {
                            conn_handle: conn,
                            error: e.code(),
                        });
                    }
                }
            }
            raw::BLE_GAP_EVTS_BLE_GAP_EVT_SEC_INFO_REQUEST => {
                let request = unsafe { gap_evt.params.sec_info_request };
                let bond = table.bonds.iter().find(|bond| {
                    bond.enc_key.master_id.ediv == request.master_id.ediv
                        && bond.enc_key.master_id.rand == request.master_id.rand
                });
                let (enc_info, peer_id) = match bond {
                    Some(bond) => (&bond.enc_key.enc_info as *const raw::ble_gap_enc_info_t, bond.peer_id),
                    None => (ptr::null(), PEER_ID_INVALID),
                };
                if let Err(e) =
                    check(unsafe { raw::sd_ble_gap_sec_info_reply(conn, enc_info, ptr::null(), ptr::null()) })
                {
                    error!("PEERS: Security info reply failed: {:?}", e);
                    return;
                }
                if !enc_info.is_null() {
                    if let Some(link) = table.link_mut(conn) {
                        link.procedure = Some(SecurityProcedure::Encryption);
                    }
                    emit(PeerEvent::ConnSecStart {
                        conn_handle: conn,
                        peer_id,
                        procedure: SecurityProcedure::Encryption,
                    });
                }
            }
            raw::BLE_GAP_EVTS_BLE_GAP_EVT_CONN_SEC_UPDATE => {
                let peer_id = table.peer_id(conn);
                let encrypted = table
                    .link_mut(conn)
                    .and_then(|link| link.procedure.take_if(|p| *p == SecurityProcedure::Encryption));
                if encrypted.is_some() {
                    emit(PeerEvent::ConnSecSucceeded {
                        conn_handle: conn,
                        peer_id,
                        procedure: SecurityProcedure::Encryption,
                    });
                }
            }
            raw::BLE_GAP_EVTS_BLE_GAP_EVT_AUTH_STATUS => {
                let status = unsafe { gap_evt.params.auth_status };
                let procedure = table
                    .link_mut(conn)
                    .and_then(|link| link.procedure.take())
                    .unwrap_or(SecurityProcedure::Pairing);

                if status.auth_status != raw::BLE_GAP_SEC_STATUS_SUCCESS as u8 {
                    emit(PeerEvent::ConnSecFailed {
                        conn_handle: conn,
                        peer_id: table.peer_id(conn),
                        error: u16::from(status.auth_status),
                    });
                    return;
                }

                if status.bonded() == 0 {
                    emit(PeerEvent::ConnSecSucceeded {
                        conn_handle: conn,
                        peer_id: PEER_ID_INVALID,
                        procedure,
                    });
                    return;
                }

                match table.save_bond(conn) {
                    Ok(peer_id) => {
                        info!("PEERS: Bonded peer {}", peer_id);
                        emit(PeerEvent::ConnSecSucceeded {
                            conn_handle: conn,
                            peer_id,
                            procedure,
                        });
                    }
                    Err(()) => {
                        warn!("PEERS: Bond table full");
                        emit(PeerEvent::StorageFull);
                    }
                }
            }
            _ => {}
        }
    });
}

/// [`BondingStore`] handle held by the peripheral
pub struct RamBondStore {
    _private: (),
}

impl RamBondStore {
    pub const fn new() -> Self {
        Self { _private: () }
    }
}

impl BondingStore for RamBondStore {
    fn init(&mut self, params: &SecurityParams) -> Result<(), StackError> {
        PEERS.lock(|peers| peers.borrow_mut().params = Some(*params));
        info!("PEERS: Bond table ready, {} slots", MAX_BONDS);
        Ok(())
    }

    fn conn_sec_config_reply(&mut self, conn: ConnHandle, allow_repairing: bool) -> Result<(), StackError> {
        PEERS.lock(|peers| {
            let mut table = peers.borrow_mut();
            let pending = table
                .link_mut(conn)
                .map(|link| mem::replace(&mut link.config_pending, false))
                .unwrap_or(false);
            if !pending {
                return Ok(());
            }

            if allow_repairing {
                debug!("PEERS: Re-pairing bonded peer on {}", conn);
                sec_params_reply(&mut table, conn)
            } else {
                debug!("PEERS: Re-pairing refused on {}", conn);
                reject_pairing(conn)
            }
        })
    }

    fn garbage_collect(&mut self) -> Result<(), StackError> {
        PEERS.lock(|peers| {
            let mut table = peers.borrow_mut();
            if table.bonds.is_empty() {
                return;
            }
            // Oldest bond makes room
            let evicted = table.bonds.remove(0);
            info!("PEERS: Evicted peer {}", evicted.peer_id);
        });
        emit(PeerEvent::FlashGarbageCollected);
        Ok(())
    }
}
