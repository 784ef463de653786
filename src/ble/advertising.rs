//! BLE Advertising Controller
//!
//! Builds the advertising and scan response payloads and drives the
//! advertising state machine. The stack stops advertising by itself when a
//! central connects; [`AdvertisingController::on_connected`] mirrors that so
//! a later restart is not rejected as "already advertising".

use heapless::Vec;

use crate::ble::gatt::Uuid128;
use crate::ble::stack::Stack;
use crate::config::{AdvertisingConfig, SERVICE_DATA_LEN};
use crate::error::Error;

/// Legacy advertising payload limit
pub const MAX_ADV_DATA_LEN: usize = 31;

pub const LE_GENERAL_DISCOVERABLE: u8 = 0b0000_0010;
pub const BR_EDR_NOT_SUPPORTED: u8 = 0b0000_0100;

/// AD types
pub const AD_TYPE_FLAGS: u8 = 0x01;
pub const AD_TYPE_COMPLETE_UUIDS_128: u8 = 0x07;
pub const AD_TYPE_COMPLETE_LOCAL_NAME: u8 = 0x09;
pub const AD_TYPE_SERVICE_DATA_16: u8 = 0x16;

pub type AdvPayload = Vec<u8, MAX_ADV_DATA_LEN>;

/// One AD structure inside an advertising or scan response payload
#[derive(Debug, Clone, Copy)]
pub enum AdStructure<'a> {
    Flags(u8),
    ServiceUuids128(&'a [Uuid128]),
    /// Service data with a 16-bit service UUID
    ServiceData16 { uuid: u16, data: &'a [u8] },
    CompleteLocalName(&'a str),
}

impl AdStructure<'_> {
    fn encode(&self, out: &mut AdvPayload) -> Result<(), Error> {
        let too_long = |_| Error::AdvertisingDataTooLong;
        match self {
            AdStructure::Flags(flags) => {
                out.extend_from_slice(&[0x02, AD_TYPE_FLAGS, *flags]).map_err(too_long)?;
            }
            AdStructure::ServiceUuids128(uuids) => {
                let len = u8::try_from(uuids.len() * 16 + 1).map_err(|_| Error::AdvertisingDataTooLong)?;
                out.extend_from_slice(&[len, AD_TYPE_COMPLETE_UUIDS_128]).map_err(too_long)?;
                for uuid in uuids.iter() {
                    out.extend_from_slice(uuid).map_err(too_long)?;
                }
            }
            AdStructure::ServiceData16 { uuid, data } => {
                let len = u8::try_from(data.len() + 3).map_err(|_| Error::AdvertisingDataTooLong)?;
                out.extend_from_slice(&[len, AD_TYPE_SERVICE_DATA_16]).map_err(too_long)?;
                out.extend_from_slice(&uuid.to_le_bytes()).map_err(too_long)?;
                out.extend_from_slice(data).map_err(too_long)?;
            }
            AdStructure::CompleteLocalName(name) => {
                let len = u8::try_from(name.len() + 1).map_err(|_| Error::AdvertisingDataTooLong)?;
                out.extend_from_slice(&[len, AD_TYPE_COMPLETE_LOCAL_NAME]).map_err(too_long)?;
                out.extend_from_slice(name.as_bytes()).map_err(too_long)?;
            }
        }
        Ok(())
    }
}

/// Encode AD structures into a single payload of at most 31 bytes
pub fn encode_ad_structures(structures: &[AdStructure]) -> Result<AdvPayload, Error> {
    let mut out = AdvPayload::new();
    for structure in structures.iter() {
        structure.encode(&mut out)?;
    }
    Ok(out)
}

/// Advertising mode requested by the application
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AdvertisingMode {
    Fast,
    Slow,
}

/// Current advertising state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AdvertisingState {
    Idle,
    DirectedHighDuty,
    Directed,
    Fast,
    Slow,
    FastWhitelist,
    SlowWhitelist,
}

impl AdvertisingState {
    fn mode(&self) -> Option<AdvertisingMode> {
        match self {
            AdvertisingState::Fast | AdvertisingState::FastWhitelist => Some(AdvertisingMode::Fast),
            AdvertisingState::Slow | AdvertisingState::SlowWhitelist => Some(AdvertisingMode::Slow),
            _ => None,
        }
    }
}

/// Request the advertising module forwards to the application
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AdvertisingRequest {
    Whitelist,
    PeerAddress,
}

/// Parameters handed to the stack when advertising starts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AdvertisingParams {
    pub mode: AdvertisingMode,
    /// Interval (0.625 ms units)
    pub interval: u16,
    /// Duration (10 ms units), 0 = forever
    pub duration: u16,
    pub whitelist: bool,
}

/// Advertising state machine and payload owner
#[derive(Debug)]
pub struct AdvertisingController {
    config: AdvertisingConfig,
    service_uuid: Uuid128,
    service_short_uuid: u16,
    state: AdvertisingState,
    adv_data: AdvPayload,
    scan_data: AdvPayload,
}

impl AdvertisingController {
    pub fn new(config: AdvertisingConfig, service_uuid: Uuid128, service_short_uuid: u16) -> Self {
        Self {
            config,
            service_uuid,
            service_short_uuid,
            state: AdvertisingState::Idle,
            adv_data: AdvPayload::new(),
            scan_data: AdvPayload::new(),
        }
    }

    /// Encode payloads for `device_name` and load them into the stack
    pub fn init<S: Stack>(&mut self, stack: &mut S, device_name: &str) -> Result<(), Error> {
        self.encode(device_name)?;
        let params = self.params(AdvertisingMode::Fast);
        stack.advertising_configure(&params, &self.adv_data, &self.scan_data)?;
        info!(
            "ADV: Configured, {} bytes adv data, {} bytes scan response",
            self.adv_data.len(),
            self.scan_data.len()
        );
        Ok(())
    }

    /// Start advertising in `mode`
    ///
    /// Starting the mode that is already running is a no-op; starting a
    /// different one while active returns [`Error::AdvertisingBusy`].
    pub fn start<S: Stack>(&mut self, stack: &mut S, mode: AdvertisingMode) -> Result<(), Error> {
        match self.state.mode() {
            Some(current) if current == mode => {
                debug!("ADV: Already advertising in {:?} mode", mode);
                return Ok(());
            }
            Some(current) => {
                warn!("ADV: Cannot start {:?}, {:?} mode active", mode, current);
                return Err(Error::AdvertisingBusy);
            }
            None if self.state != AdvertisingState::Idle => return Err(Error::AdvertisingBusy),
            None => {}
        }

        let params = self.params(mode);
        if let Err(e) = stack.advertising_start(&params) {
            error!("ADV: Start failed: {:?}", e);
            return Err(Error::Stack(e));
        }
        self.state = match (mode, params.whitelist) {
            (AdvertisingMode::Fast, false) => AdvertisingState::Fast,
            (AdvertisingMode::Fast, true) => AdvertisingState::FastWhitelist,
            (AdvertisingMode::Slow, false) => AdvertisingState::Slow,
            (AdvertisingMode::Slow, true) => AdvertisingState::SlowWhitelist,
        };
        info!("ADV: Started {:?} advertising", mode);
        Ok(())
    }

    pub fn stop<S: Stack>(&mut self, stack: &mut S) -> Result<(), Error> {
        if self.state == AdvertisingState::Idle {
            return Ok(());
        }
        stack.advertising_stop()?;
        self.state = AdvertisingState::Idle;
        info!("ADV: Stopped");
        Ok(())
    }

    /// The stack ends advertising when a central connects
    pub fn on_connected(&mut self) {
        if self.state != AdvertisingState::Idle {
            debug!("ADV: Connection ended advertising");
        }
        self.state = AdvertisingState::Idle;
    }

    /// Apply an advertising module event
    pub fn on_event<S: Stack>(&mut self, stack: &mut S, event: AdvEventKind) {
        let next = match event {
            AdvEventKind::State(state) => state,
            AdvEventKind::Request(request) => {
                debug!("ADV: {:?} request, replying empty", request);
                if let Err(e) = stack.advertising_request_reply(request) {
                    error!("ADV: Request reply failed: {:?}", e);
                }
                return;
            }
        };

        match next {
            AdvertisingState::Idle => info!("ADV: Idle"),
            AdvertisingState::DirectedHighDuty => info!("ADV: Directed high duty advertising"),
            AdvertisingState::Directed => info!("ADV: Directed advertising"),
            AdvertisingState::Fast => info!("ADV: Fast advertising"),
            AdvertisingState::Slow => info!("ADV: Slow advertising"),
            AdvertisingState::FastWhitelist => info!("ADV: Fast advertising with whitelist"),
            AdvertisingState::SlowWhitelist => info!("ADV: Slow advertising with whitelist"),
        }
        self.state = next;
    }

    /// Replace the advertised service data
    pub fn set_service_data<S: Stack>(
        &mut self,
        stack: &mut S,
        service_data: [u8; SERVICE_DATA_LEN],
        device_name: &str,
    ) -> Result<(), Error> {
        let previous = self.config.service_data;
        self.config.service_data = service_data;
        if let Err(e) = self.encode(device_name) {
            self.config.service_data = previous;
            return Err(e);
        }
        stack.advertising_data_update(&self.adv_data, &self.scan_data)?;
        debug!("ADV: Service data updated");
        Ok(())
    }

    pub fn state(&self) -> AdvertisingState {
        self.state
    }

    pub fn is_advertising(&self) -> bool {
        self.state != AdvertisingState::Idle
    }

    pub fn adv_data(&self) -> &[u8] {
        &self.adv_data
    }

    pub fn scan_data(&self) -> &[u8] {
        &self.scan_data
    }

    pub fn config(&self) -> &AdvertisingConfig {
        &self.config
    }

    fn params(&self, mode: AdvertisingMode) -> AdvertisingParams {
        AdvertisingParams {
            mode,
            interval: self.config.interval,
            duration: self.config.duration,
            whitelist: self.config.whitelist_enabled,
        }
    }

    fn encode(&mut self, device_name: &str) -> Result<(), Error> {
        let uuids = [self.service_uuid];
        self.adv_data = encode_ad_structures(&[
            AdStructure::Flags(LE_GENERAL_DISCOVERABLE | BR_EDR_NOT_SUPPORTED),
            AdStructure::ServiceUuids128(&uuids),
            AdStructure::ServiceData16 {
                uuid: self.service_short_uuid,
                data: &self.config.service_data,
            },
        ])?;
        self.scan_data = encode_ad_structures(&[AdStructure::CompleteLocalName(device_name)])?;
        Ok(())
    }
}

/// Advertising event split into state changes and requests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvEventKind {
    State(AdvertisingState),
    Request(AdvertisingRequest),
}

impl From<crate::ble::events::AdvEvent> for AdvEventKind {
    fn from(event: crate::ble::events::AdvEvent) -> Self {
        use crate::ble::events::AdvEvent;
        match event {
            AdvEvent::Idle => AdvEventKind::State(AdvertisingState::Idle),
            AdvEvent::DirectedHighDuty => AdvEventKind::State(AdvertisingState::DirectedHighDuty),
            AdvEvent::Directed => AdvEventKind::State(AdvertisingState::Directed),
            AdvEvent::Fast => AdvEventKind::State(AdvertisingState::Fast),
            AdvEvent::Slow => AdvEventKind::State(AdvertisingState::Slow),
            AdvEvent::FastWhitelist => AdvEventKind::State(AdvertisingState::FastWhitelist),
            AdvEvent::SlowWhitelist => AdvEventKind::State(AdvertisingState::SlowWhitelist),
            AdvEvent::WhitelistRequest => AdvEventKind::Request(AdvertisingRequest::Whitelist),
            AdvEvent::PeerAddrRequest => AdvEventKind::Request(AdvertisingRequest::PeerAddress),
        }
    }
}
