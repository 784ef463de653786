mod common;

use common::*;
use nrf52_proto_peripheral::ble::bonding::PairingOutcome;
use nrf52_proto_peripheral::ble::events::{BleEvent, PeerEvent, SecurityProcedure, StackEvent, PEER_ID_INVALID};
use nrf52_proto_peripheral::ble::stack::hci;
use nrf52_proto_peripheral::config::{Config, SecurityParams};
use nrf52_proto_peripheral::error::InitStage;
use nrf52_proto_peripheral::{Error, Peripheral, StackError};

fn peer_event(event: PeerEvent) -> BleEvent {
    BleEvent::PeerManager(event)
}

#[test]
fn test_security_failure_disconnects() {
    let mut peripheral = peripheral();
    peripheral.dispatch(connected(CONN, phone_params()));
    peripheral.dispatch(peer_event(PeerEvent::ConnSecFailed {
        conn_handle: CONN,
        peer_id: 0,
        error: 0x85,
    }));

    assert_eq!(peripheral.stack().disconnects(), vec![hci::AUTHENTICATION_FAILURE]);
    assert_eq!(
        peripheral.security().context().unwrap().outcome,
        PairingOutcome::Failed { error: 0x85 }
    );
}

#[test]
fn test_failure_for_other_link_ignored() {
    let mut peripheral = peripheral();
    peripheral.dispatch(connected(CONN, phone_params()));
    peripheral.dispatch(peer_event(PeerEvent::ConnSecFailed {
        conn_handle: 4,
        peer_id: 0,
        error: 0x85,
    }));
    assert!(peripheral.stack().disconnects().is_empty());
    assert_eq!(peripheral.security().context().unwrap().outcome, PairingOutcome::None);
}

#[test]
fn test_repairing_request_answered_from_config() {
    let mut peripheral = peripheral();
    peripheral.dispatch(connected(CONN, phone_params()));
    peripheral.dispatch(peer_event(PeerEvent::ConnSecConfigReq {
        conn_handle: CONN,
        peer_id: 2,
    }));

    let config = Config {
        allow_repairing: true,
        ..Config::default()
    };
    let mut permissive = peripheral_with(config);
    permissive.dispatch(connected(CONN, phone_params()));
    permissive.dispatch(peer_event(PeerEvent::ConnSecConfigReq {
        conn_handle: CONN,
        peer_id: 2,
    }));

    assert_eq!(
        peripheral.store().requests.last(),
        Some(&BondRequest::ConnSecConfigReply {
            conn: CONN,
            allow_repairing: false
        })
    );
    assert_eq!(
        permissive.store().requests.last(),
        Some(&BondRequest::ConnSecConfigReply {
            conn: CONN,
            allow_repairing: true
        })
    );
}

#[test]
fn test_storage_full_collects_garbage() {
    let mut peripheral = peripheral();
    peripheral.dispatch(peer_event(PeerEvent::StorageFull));
    assert_eq!(peripheral.store().requests.last(), Some(&BondRequest::GarbageCollect));
}

#[test]
fn test_bonding_progress_tracked() {
    let mut peripheral = peripheral();
    peripheral.dispatch(connected(CONN, phone_params()));
    let context = peripheral.security().context().unwrap();
    assert_eq!(context.peer_id, PEER_ID_INVALID);
    assert!(!context.bonded);

    peripheral.dispatch(peer_event(PeerEvent::ConnSecStart {
        conn_handle: CONN,
        peer_id: 3,
        procedure: SecurityProcedure::Bonding,
    }));
    assert_eq!(
        peripheral.security().context().unwrap().outcome,
        PairingOutcome::InProgress(SecurityProcedure::Bonding)
    );

    peripheral.dispatch(peer_event(PeerEvent::ConnSecSucceeded {
        conn_handle: CONN,
        peer_id: 3,
        procedure: SecurityProcedure::Bonding,
    }));
    let context = peripheral.security().context().unwrap();
    assert_eq!(context.peer_id, 3);
    assert!(context.bonded);
    assert!(peripheral.stack().disconnects().is_empty());
}

#[test]
fn test_bonded_peer_reconnect() {
    let mut peripheral = peripheral();
    peripheral.dispatch(connected(CONN, phone_params()));
    peripheral.dispatch(peer_event(PeerEvent::BondedPeerConnected {
        conn_handle: CONN,
        peer_id: 1,
    }));
    let context = peripheral.security().context().unwrap();
    assert!(context.bonded);
    assert_eq!(context.peer_id, 1);

    peripheral.dispatch(disconnected(CONN, hci::REMOTE_USER_TERMINATED_CONNECTION));
    assert!(peripheral.security().context().is_none());
}

#[test]
fn test_security_stack_events_are_informational() {
    let mut peripheral = peripheral();
    peripheral.dispatch(connected(CONN, phone_params()));
    peripheral.stack_mut().clear();

    peripheral.dispatch(BleEvent::Stack(StackEvent::SecParamsRequest { conn_handle: CONN }));
    peripheral.dispatch(BleEvent::Stack(StackEvent::AuthStatus {
        conn_handle: CONN,
        status: 0,
        bonded: true,
    }));
    peripheral.dispatch(BleEvent::Stack(StackEvent::ConnSecUpdate {
        conn_handle: CONN,
        security_mode: 1,
        security_level: 2,
    }));
    assert!(peripheral.stack().requests.is_empty());
}

#[test]
fn test_informational_peer_events() {
    let mut peripheral = peripheral();
    let store_requests = peripheral.store().requests.len();
    for event in [
        PeerEvent::FlashGarbageCollected,
        PeerEvent::PeersDeleteSucceeded,
        PeerEvent::PeerDataUpdateFailed { peer_id: 1, error: 0x8 },
        PeerEvent::ErrorUnexpected {
            conn_handle: CONN,
            error: 0x3,
        },
    ] {
        peripheral.dispatch(peer_event(event));
    }
    assert_eq!(peripheral.store().requests.len(), store_requests);
    assert!(peripheral.stack().requests.is_empty());
}

#[test]
fn test_invalid_security_params_fail_init() {
    let config = Config {
        security: SecurityParams {
            min_key_size: 6,
            ..SecurityParams::default()
        },
        ..Config::default()
    };
    let mut peripheral = Peripheral::new(MockStack::new(), MockBondStore::default(), config);
    assert_eq!(
        peripheral.init(),
        Err(Error::Init {
            stage: InitStage::PeerManager,
            cause: StackError::INVALID_PARAM
        })
    );
    assert!(peripheral.store().requests.is_empty());
}
