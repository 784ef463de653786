mod common;

use common::*;
use nrf52_proto_peripheral::ble::advertising::{AdvertisingMode, AdvertisingParams, AdvertisingState};
use nrf52_proto_peripheral::ble::gatt::{char_properties, Uuid};
use nrf52_proto_peripheral::ble::proto_service::{
    PROTO_CHAR_BASE_UUID, PROTO_CHAR_UUID, PROTO_SERVICE_BASE_UUID, PROTO_SERVICE_UUID,
};
use nrf52_proto_peripheral::config::{Config, ConnParamsConfig, SecurityParams, ADVERTISING_INTERVAL_UNITS};
use nrf52_proto_peripheral::error::InitStage;
use nrf52_proto_peripheral::{Error, Peripheral, StackError};

fn fresh(config: Config) -> TestPeripheral {
    Peripheral::new(MockStack::new(), MockBondStore::default(), config)
}

#[test]
fn test_init_registers_in_order() {
    let mut peripheral = fresh(Config::default());
    peripheral.init().unwrap();
    assert!(peripheral.is_initialised());

    let requests = &peripheral.stack().requests;
    assert_eq!(
        requests[0],
        Request::GapConfigure {
            device_name: "DEEZNUTZ".to_string(),
            appearance: 128,
        }
    );
    assert_eq!(requests[1], Request::GattInit { att_mtu: 247 });
    assert_eq!(requests[2], Request::UuidVsAdd(PROTO_SERVICE_BASE_UUID));
    assert_eq!(
        requests[3],
        Request::ServiceAdd(Uuid {
            uuid_type: 2,
            uuid: PROTO_SERVICE_UUID,
        })
    );
    assert_eq!(requests[4], Request::UuidVsAdd(PROTO_CHAR_BASE_UUID));
    match &requests[5] {
        Request::CharacteristicAdd { service_handle, config } => {
            assert_eq!(*service_handle, SERVICE_HANDLE);
            assert_eq!(config.uuid, Uuid { uuid_type: 3, uuid: PROTO_CHAR_UUID });
            assert_eq!(
                config.properties,
                char_properties::READ | char_properties::WRITE | char_properties::INDICATE
            );
            assert_eq!(config.max_len, 512);
            assert_eq!(config.user_description, Some("Protocol"));
            assert!(config.write_authorization);
        }
        other => panic!("unexpected request {:?}", other),
    }
    assert!(matches!(requests[6], Request::AdvertisingConfigure { .. }));
    assert_eq!(requests.len(), 7);

    assert_eq!(
        peripheral.store().requests,
        vec![BondRequest::Init(SecurityParams::default())]
    );
    assert_eq!(peripheral.queued_write().attr_handle(), Some(VALUE_HANDLE));
    assert_eq!(peripheral.service().handles().cccd_handle, CCCD_HANDLE);
}

#[test]
fn test_init_is_idempotent() {
    let mut peripheral = fresh(Config::default());
    peripheral.init().unwrap();
    let count = peripheral.stack().requests.len();

    peripheral.init().unwrap();
    assert_eq!(peripheral.stack().requests.len(), count);
    assert_eq!(peripheral.store().requests.len(), 1);
}

#[test]
fn test_init_failure_names_stage() {
    let cases = [
        ("gap_configure", InitStage::Gap),
        ("gatt_init", InitStage::Gatt),
        ("uuid_vs_add", InitStage::Services),
        ("characteristic_add", InitStage::Services),
        ("advertising_configure", InitStage::Advertising),
    ];
    for (request, stage) in cases {
        let mut peripheral = fresh(Config::default());
        peripheral.stack_mut().fail(request, StackError::NO_MEM);
        let error = peripheral.init().unwrap_err();
        assert_eq!(
            error,
            Error::Init {
                stage,
                cause: StackError::NO_MEM
            }
        );
        assert!(error.is_fatal());
        assert!(!peripheral.is_initialised());
    }
}

#[test]
fn test_init_rejects_bad_negotiation_config() {
    let config = Config {
        conn_params: ConnParamsConfig {
            max_attempts: 0,
            ..ConnParamsConfig::default()
        },
        ..Config::default()
    };
    let mut peripheral = fresh(config);
    assert_eq!(
        peripheral.init(),
        Err(Error::Init {
            stage: InitStage::ConnParams,
            cause: StackError::INVALID_PARAM
        })
    );
}

#[test]
fn test_init_bonding_store_failure() {
    let mut peripheral = fresh(Config::default());
    peripheral.store_mut().fail_init = Some(StackError::INTERNAL);
    assert_eq!(
        peripheral.init(),
        Err(Error::Init {
            stage: InitStage::PeerManager,
            cause: StackError::INTERNAL
        })
    );
}

#[test]
fn test_advertising_payload() {
    let peripheral = peripheral();
    let adv = peripheral.advertising().adv_data();
    assert_eq!(adv.len(), 31);
    // Flags: LE general discoverable, BR/EDR not supported
    assert_eq!(&adv[0..3], &[0x02, 0x01, 0x06]);
    // Complete list of 128-bit service UUIDs
    assert_eq!(&adv[3..5], &[0x11, 0x07]);
    assert_eq!(&adv[5..21], &PROTO_SERVICE_BASE_UUID);
    // Service data: 16-bit UUID then six zero bytes
    assert_eq!(&adv[21..25], &[0x09, 0x16, 0xFC, 0xC0]);
    assert_eq!(&adv[25..31], &[0; 6]);

    let scan = peripheral.advertising().scan_data();
    assert_eq!(&scan[..2], &[0x09, 0x09]);
    assert_eq!(&scan[2..], b"DEEZNUTZ");
}

#[test]
fn test_advertising_requires_init() {
    let mut peripheral = fresh(Config::default());
    assert_eq!(
        peripheral.advertising_enable(true),
        Err(Error::Stack(StackError::INVALID_STATE))
    );
}

#[test]
fn test_advertising_enable_starts_fast_mode() {
    let mut peripheral = peripheral();
    peripheral.advertising_enable(true).unwrap();
    assert_eq!(
        peripheral.stack().requests,
        vec![Request::AdvertisingStart(AdvertisingParams {
            mode: AdvertisingMode::Fast,
            interval: ADVERTISING_INTERVAL_UNITS,
            duration: 0,
            whitelist: false,
        })]
    );
    assert_eq!(peripheral.advertising().state(), AdvertisingState::Fast);

    // Starting the running mode again is a no-op
    peripheral.advertising_enable(true).unwrap();
    assert_eq!(peripheral.stack().count(is_fast_start), 1);

    peripheral.advertising_enable(false).unwrap();
    assert_eq!(peripheral.advertising().state(), AdvertisingState::Idle);
    assert_eq!(peripheral.stack().requests.last(), Some(&Request::AdvertisingStop));
}

#[test]
fn test_advertising_start_failure_propagates() {
    let mut peripheral = peripheral();
    peripheral.stack_mut().fail("advertising_start", StackError::INVALID_STATE);
    assert_eq!(
        peripheral.advertising_enable(true),
        Err(Error::Stack(StackError::INVALID_STATE))
    );
    assert!(!peripheral.is_advertising_enabled());
    assert_eq!(peripheral.advertising().state(), AdvertisingState::Idle);
}

#[test]
fn test_set_service_data_updates_payload() {
    let mut peripheral = advertising_peripheral();
    peripheral.set_service_data([1, 2, 3, 4, 5, 6]).unwrap();

    assert_eq!(&peripheral.advertising().adv_data()[25..31], &[1, 2, 3, 4, 5, 6]);
    match peripheral.stack().requests.last() {
        Some(Request::AdvertisingDataUpdate { adv_data, .. }) => {
            assert_eq!(&adv_data[25..31], &[1, 2, 3, 4, 5, 6]);
        }
        other => panic!("unexpected request {:?}", other),
    }
}

#[test]
fn test_long_device_name_rejected() {
    let mut config = Config::default();
    config.gap.device_name.clear();
    config
        .gap
        .device_name
        .push_str("a-device-name-of-thirty-one-byt")
        .unwrap();
    let mut peripheral = fresh(config);
    assert_eq!(
        peripheral.init(),
        Err(Error::Init {
            stage: InitStage::Advertising,
            cause: StackError::INVALID_PARAM
        })
    );
}
