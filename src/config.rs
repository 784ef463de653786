//! Peripheral Configuration
//!
//! Interoperability identifiers and timing constants, plus the [`Config`]
//! struct the firmware hands to [`crate::Peripheral::new`].

use embassy_time::Duration;

/// 0.625 ms, in microseconds
pub const UNIT_0_625_MS: u32 = 625;
/// 1.25 ms, in microseconds
pub const UNIT_1_25_MS: u32 = 1250;
/// 10 ms, in microseconds
pub const UNIT_10_MS: u32 = 10_000;

/// Convert a time in microseconds to stack units
pub const fn us_to_units(us: u32, unit_us: u32) -> u16 {
    (us / unit_us) as u16
}

/// Advertising interval: 417.5 ms in 0.625 ms units
pub const ADVERTISING_INTERVAL_UNITS: u16 = us_to_units(417_500, UNIT_0_625_MS);
/// Advertising duration in 10 ms units, 0 = forever
pub const ADVERTISING_DURATION_UNITS: u16 = 0;
/// Length of the advertised service data payload
pub const SERVICE_DATA_LEN: usize = 6;

pub const MIN_CONN_INTERVAL_UNITS: u16 = us_to_units(7_500, UNIT_1_25_MS);
pub const MAX_CONN_INTERVAL_UNITS: u16 = us_to_units(10_000, UNIT_1_25_MS);
pub const PERIPHERAL_LATENCY: u16 = 0;
pub const CONN_SUP_TIMEOUT_UNITS: u16 = us_to_units(8_000_000, UNIT_10_MS);

/// Delay from connection to the first parameter update request
pub const FIRST_CONN_PARAMS_UPDATE_DELAY: Duration = Duration::from_millis(5_000);
/// Delay between subsequent parameter update requests
pub const NEXT_CONN_PARAMS_UPDATE_DELAY: Duration = Duration::from_millis(30_000);
/// Update requests before giving up the negotiation
pub const MAX_CONN_PARAMS_UPDATE_ATTEMPTS: u8 = 3;

/// Largest ATT MTU the stack is configured for
pub const ATT_MTU: u16 = 247;
pub const ATT_MTU_DEFAULT: u16 = 23;

/// BLE appearance: generic computer
pub const APPEARANCE_GENERIC_COMPUTER: u16 = 128;
pub const DEFAULT_DEVICE_NAME: &str = "DEEZNUTZ";
pub const MAX_DEVICE_NAME_LEN: usize = 31;

/// Link timing parameters (mirrors `ble_gap_conn_params_t`)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ConnParams {
    /// Minimum connection interval (1.25 ms units)
    pub min_conn_interval: u16,
    /// Maximum connection interval (1.25 ms units)
    pub max_conn_interval: u16,
    pub peripheral_latency: u16,
    /// Supervision timeout (10 ms units)
    pub conn_sup_timeout: u16,
}

impl ConnParams {
    /// Whether parameters granted by the central satisfy these preferred ones
    pub fn accepts(&self, granted: &ConnParams) -> bool {
        granted.max_conn_interval >= self.min_conn_interval
            && granted.max_conn_interval <= self.max_conn_interval
            && granted.peripheral_latency == self.peripheral_latency
            && granted.conn_sup_timeout == self.conn_sup_timeout
    }
}

impl Default for ConnParams {
    fn default() -> Self {
        Self {
            min_conn_interval: MIN_CONN_INTERVAL_UNITS,
            max_conn_interval: MAX_CONN_INTERVAL_UNITS,
            peripheral_latency: PERIPHERAL_LATENCY,
            conn_sup_timeout: CONN_SUP_TIMEOUT_UNITS,
        }
    }
}

/// GAP identity and link preferences
#[derive(Debug, Clone)]
pub struct GapConfig {
    pub device_name: heapless::String<MAX_DEVICE_NAME_LEN>,
    pub appearance: u16,
    pub preferred_conn_params: ConnParams,
    pub att_mtu: u16,
}

impl Default for GapConfig {
    fn default() -> Self {
        let mut device_name = heapless::String::new();
        // Fits: the default name is shorter than MAX_DEVICE_NAME_LEN
        let _ = device_name.push_str(DEFAULT_DEVICE_NAME);
        Self {
            device_name,
            appearance: APPEARANCE_GENERIC_COMPUTER,
            preferred_conn_params: ConnParams::default(),
            att_mtu: ATT_MTU,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdvertisingConfig {
    /// Fast advertising interval (0.625 ms units)
    pub interval: u16,
    /// Fast advertising duration (10 ms units), 0 = forever
    pub duration: u16,
    /// Restart fast advertising after the link drops
    pub restart_on_disconnect: bool,
    pub whitelist_enabled: bool,
    pub service_data: [u8; SERVICE_DATA_LEN],
}

impl Default for AdvertisingConfig {
    fn default() -> Self {
        Self {
            interval: ADVERTISING_INTERVAL_UNITS,
            duration: ADVERTISING_DURATION_UNITS,
            restart_on_disconnect: true,
            whitelist_enabled: false,
            service_data: [0; SERVICE_DATA_LEN],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnParamsConfig {
    pub first_update_delay: Duration,
    pub next_update_delay: Duration,
    pub max_attempts: u8,
}

impl Default for ConnParamsConfig {
    fn default() -> Self {
        Self {
            first_update_delay: FIRST_CONN_PARAMS_UPDATE_DELAY,
            next_update_delay: NEXT_CONN_PARAMS_UPDATE_DELAY,
            max_attempts: MAX_CONN_PARAMS_UPDATE_ATTEMPTS,
        }
    }
}

/// Which keys each side distributes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct KeyDistribution {
    pub enc: bool,
    pub id: bool,
    pub sign: bool,
    pub link: bool,
}

impl KeyDistribution {
    pub const ENC_AND_ID: Self = Self {
        enc: true,
        id: true,
        sign: false,
        link: false,
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum IoCapabilities {
    DisplayOnly,
    DisplayYesNo,
    KeyboardOnly,
    None,
    KeyboardDisplay,
}

/// Security parameters used for every security procedure (mirrors `ble_gap_sec_params_t`)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SecurityParams {
    pub bond: bool,
    pub mitm: bool,
    pub lesc: bool,
    pub keypress: bool,
    pub io_caps: IoCapabilities,
    pub oob: bool,
    pub min_key_size: u8,
    pub max_key_size: u8,
    pub kdist_own: KeyDistribution,
    pub kdist_peer: KeyDistribution,
}

impl SecurityParams {
    /// Key sizes must satisfy 7 <= min <= max <= 16
    pub fn is_valid(&self) -> bool {
        (7..=16).contains(&self.min_key_size)
            && (7..=16).contains(&self.max_key_size)
            && self.min_key_size <= self.max_key_size
    }
}

impl Default for SecurityParams {
    fn default() -> Self {
        Self {
            bond: true,
            mitm: false,
            lesc: false,
            keypress: false,
            io_caps: IoCapabilities::None,
            oob: false,
            min_key_size: 7,
            max_key_size: 16,
            kdist_own: KeyDistribution::ENC_AND_ID,
            kdist_peer: KeyDistribution::ENC_AND_ID,
        }
    }
}

/// Everything the peripheral needs at construction
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub gap: GapConfig,
    pub advertising: AdvertisingConfig,
    pub conn_params: ConnParamsConfig,
    pub security: SecurityParams,
    /// Accept re-pairing requests from an already bonded peer
    pub allow_repairing: bool,
}
