#![no_std]
#![no_main]

use defmt::*;
use defmt_rtt as _;
use embassy_executor::Spawner;
use embassy_futures::select::{select, Either};
use embassy_nrf::{config::Config as NrfConfig, interrupt};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use embassy_time::{Duration, Timer};
use heapless::Vec;
use nrf52_proto_peripheral::{Config, Peripheral};
use nrf_softdevice::{raw, Config as SdConfig, Softdevice};
use panic_probe as _;
use static_cell::StaticCell;

mod firmware;

use firmware::bonds::RamBondStore;
use firmware::stack::{AdvBuffers, SoftdeviceStack};
use firmware::EVENTS;

type BlePeripheral = Peripheral<SoftdeviceStack, RamBondStore>;

/// Longest command echoed back as an indication
const ECHO_LEN: usize = 64;

/// Commands received from the central, waiting to be answered
static COMMANDS: Channel<CriticalSectionRawMutex, Vec<u8, ECHO_LEN>, 2> = Channel::new();

fn on_command(data: &[u8]) {
    info!("PROTO: Received {} bytes", data.len());
    let mut command = Vec::new();
    // Longer commands are answered with their first ECHO_LEN bytes
    let _ = command.extend_from_slice(&data[..data.len().min(ECHO_LEN)]);
    if COMMANDS.try_send(command).is_err() {
        warn!("PROTO: Response pending, command dropped");
    }
}

#[embassy_executor::main]
async fn main(spawner: Spawner) {
    info!("Starting nRF52 protocol peripheral");

    // Configure interrupt priorities to avoid SoftDevice reserved levels (0, 1, 4)
    let mut nrf_config = NrfConfig::default();
    nrf_config.gpiote_interrupt_priority = interrupt::Priority::P2;
    nrf_config.time_interrupt_priority = interrupt::Priority::P2;
    let _peripherals = embassy_nrf::init(nrf_config);

    let config = Config::default();

    let sd_config = SdConfig {
        clock: Some(raw::nrf_clock_lf_cfg_t {
            source: raw::NRF_CLOCK_LF_SRC_RC as u8,
            rc_ctiv: 16,
            rc_temp_ctiv: 2,
            accuracy: raw::NRF_CLOCK_LF_ACCURACY_500_PPM as u8,
        }),
        conn_gap: Some(raw::ble_gap_conn_cfg_t {
            conn_count: 1,
            event_length: 24,
        }),
        conn_gatt: Some(raw::ble_gatt_conn_cfg_t {
            att_mtu: config.gap.att_mtu,
        }),
        gatts_attr_tab_size: Some(raw::ble_gatts_cfg_attr_tab_size_t { attr_tab_size: 1408 }),
        gap_role_count: Some(raw::ble_gap_cfg_role_count_t {
            adv_set_count: 1,
            periph_role_count: 1,
            central_role_count: 0,
            central_sec_count: 0,
            _bitfield_1: Default::default(),
        }),
        ..Default::default()
    };

    let sd = Softdevice::enable(&sd_config);
    info!("SoftDevice enabled");

    // The SoftDevice must be running before any sd_* call below
    unwrap!(spawner.spawn(softdevice_task(sd)));
    unwrap!(spawner.spawn(firmware::timer::timer_task()));

    static ADV_BUFFERS: StaticCell<AdvBuffers> = StaticCell::new();
    static PERIPHERAL: StaticCell<BlePeripheral> = StaticCell::new();
    let stack = SoftdeviceStack::new(ADV_BUFFERS.init(AdvBuffers::new()));
    let peripheral = PERIPHERAL.init(Peripheral::new(stack, RamBondStore::new(), config));

    if let Err(e) = peripheral.init() {
        defmt::panic!("BLE init failed: {:?}", e);
    }
    unwrap!(peripheral.register_write_callback(Some(on_command)));
    unwrap!(peripheral.advertising_enable(true));

    unwrap!(spawner.spawn(ble_task(peripheral)));

    loop {
        Timer::after(Duration::from_secs(10)).await;
        info!("Heartbeat - system running");
    }
}

/// Dispatch stack events and answer commands
#[embassy_executor::task]
async fn ble_task(peripheral: &'static mut BlePeripheral) -> ! {
    loop {
        match select(peripheral.process_next(&EVENTS), COMMANDS.receive()).await {
            Either::First(()) => {}
            Either::Second(command) => {
                if let Err(e) = peripheral.indicate(&command) {
                    warn!("PROTO: Response not sent: {:?}", e);
                }
            }
        }
    }
}

#[embassy_executor::task]
async fn softdevice_task(sd: &'static Softdevice) -> ! {
    sd.run_with_callback(firmware::events::on_sd_event).await
}
