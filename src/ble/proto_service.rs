//! Protocol Service
//!
//! One vendor-specific primary service with a single "Protocol"
//! characteristic (read, write, indicate; variable length up to 512 bytes).
//! Writes to the value are forwarded to the registered callback; writes to
//! the CCCD toggle indications; [`ProtoService::indicate`] sends the
//! application's data back, one unacknowledged indication at a time.

use crate::ble::connection::{ConnHandle, CONN_HANDLE_INVALID};
use crate::ble::gatt::{
    char_properties, vendor_uuid, CharacteristicConfig, CharacteristicHandles, SecurityMode, Uuid, Uuid128,
    CCCD_INDICATION,
};
use crate::ble::queued_write::QueuedWriteBuffer;
use crate::ble::stack::Stack;
use crate::error::Error;

/// Vendor base UUID of the protocol service
pub const PROTO_SERVICE_BASE_UUID: Uuid128 = [
    0xFC, 0x10, 0x2C, 0xE9, 0xC2, 0x4B, 0x42, 0x52, 0x9A, 0xDE, 0xEE, 0x03, 0xFC, 0xC0, 0x80, 0x6A,
];
pub const PROTO_SERVICE_UUID: u16 = 0xC0FC;

/// Vendor base UUID of the protocol characteristic
pub const PROTO_CHAR_BASE_UUID: Uuid128 = [
    0x24, 0x79, 0x1F, 0x49, 0x4F, 0x3A, 0x42, 0xF5, 0x99, 0x22, 0x42, 0x37, 0x84, 0x89, 0xE8, 0x87,
];
pub const PROTO_CHAR_UUID: u16 = 0x8984;

pub const PROTO_CHAR_MAX_LEN: u16 = 512;
pub const PROTO_CHAR_USER_DESC: &str = "Protocol";

/// Full 128-bit service UUID as advertised
pub const PROTO_SERVICE_UUID128: Uuid128 = vendor_uuid(&PROTO_SERVICE_BASE_UUID, PROTO_SERVICE_UUID);

/// Receives every value written to the protocol characteristic
pub type WriteCallback = fn(&[u8]);

#[derive(Debug)]
pub struct ProtoService {
    service_handle: u16,
    handles: CharacteristicHandles,
    conn_handle: ConnHandle,
    indications_enabled: bool,
    /// Indication sent, confirmation not yet received
    indication_pending: bool,
    write_callback: Option<WriteCallback>,
}

impl Default for ProtoService {
    fn default() -> Self {
        Self::new()
    }
}

impl ProtoService {
    pub const fn new() -> Self {
        Self {
            service_handle: 0,
            handles: CharacteristicHandles {
                value_handle: 0,
                user_desc_handle: 0,
                cccd_handle: 0,
                sccd_handle: 0,
            },
            conn_handle: CONN_HANDLE_INVALID,
            indications_enabled: false,
            indication_pending: false,
            write_callback: None,
        }
    }

    /// Characteristic definition registered with the stack
    pub fn characteristic_config(uuid_type: u8) -> CharacteristicConfig {
        CharacteristicConfig {
            uuid: Uuid {
                uuid_type,
                uuid: PROTO_CHAR_UUID,
            },
            properties: char_properties::READ | char_properties::WRITE | char_properties::INDICATE,
            max_len: PROTO_CHAR_MAX_LEN,
            variable_len: true,
            read_perm: SecurityMode::Open,
            write_perm: SecurityMode::Open,
            cccd_perm: SecurityMode::Open,
            user_description: Some(PROTO_CHAR_USER_DESC),
            write_authorization: true,
        }
    }

    /// Register the service and characteristic, then bind the queued write
    /// buffer to the characteristic value
    pub fn init<S: Stack>(&mut self, stack: &mut S, queued_write: &mut QueuedWriteBuffer) -> Result<(), Error> {
        let service_type = stack.uuid_vs_add(&PROTO_SERVICE_BASE_UUID)?;
        self.service_handle = stack.service_add(Uuid {
            uuid_type: service_type,
            uuid: PROTO_SERVICE_UUID,
        })?;

        let char_type = stack.uuid_vs_add(&PROTO_CHAR_BASE_UUID)?;
        self.handles = stack.characteristic_add(self.service_handle, &Self::characteristic_config(char_type))?;
        queued_write.bind(self.handles.value_handle)?;

        info!(
            "PROTO: Service {:#x} registered, value {:#x}, cccd {:#x}",
            self.service_handle, self.handles.value_handle, self.handles.cccd_handle
        );
        Ok(())
    }

    /// Install (or replace) the write callback
    pub fn register_write_callback(&mut self, callback: Option<WriteCallback>) -> Result<(), Error> {
        let callback = callback.ok_or(Error::Parameter)?;
        if self.write_callback.is_some() {
            debug!("PROTO: Replacing write callback");
        }
        self.write_callback = Some(callback);
        Ok(())
    }

    pub fn on_connected(&mut self, conn: ConnHandle) {
        self.conn_handle = conn;
        self.indications_enabled = false;
        self.indication_pending = false;
    }

    pub fn on_disconnected(&mut self) {
        self.conn_handle = CONN_HANDLE_INVALID;
        self.indications_enabled = false;
        self.indication_pending = false;
    }

    /// Handle a completed write to one of our attributes
    ///
    /// Returns `false` when `handle` is not part of this service.
    pub fn on_write<S: Stack>(&mut self, stack: &mut S, conn: ConnHandle, handle: u16, data: &[u8]) -> bool {
        if handle == 0 {
            return false;
        }

        if handle == self.handles.cccd_handle {
            let enabled = data
                .first()
                .map_or(false, |b| u16::from(*b) & CCCD_INDICATION != 0);
            if enabled != self.indications_enabled {
                info!("PROTO: Indications {}", if enabled { "enabled" } else { "disabled" });
            }
            // An outstanding indication stays pending until confirmed or the link drops
            self.indications_enabled = enabled;
            return true;
        }

        if handle == self.handles.value_handle {
            if let Err(e) = stack.value_set(conn, handle, data) {
                error!("PROTO: Value update failed: {:?}", e);
            }
            debug!("PROTO: Received {} bytes", data.len());
            match self.write_callback {
                Some(callback) => callback(data),
                None => warn!("PROTO: No write callback, dropping {} bytes", data.len()),
            }
            return true;
        }

        false
    }

    /// Send `data` to the connected central as an indication
    pub fn indicate<S: Stack>(&mut self, stack: &mut S, data: &[u8]) -> Result<(), Error> {
        if self.conn_handle == CONN_HANDLE_INVALID {
            return Err(Error::NotConnected);
        }
        if !self.indications_enabled {
            return Err(Error::NotSubscribed);
        }
        if self.indication_pending {
            return Err(Error::IndicationPending);
        }
        if data.len() > usize::from(PROTO_CHAR_MAX_LEN) {
            return Err(Error::Parameter);
        }

        stack.indicate(self.conn_handle, self.handles.value_handle, data)?;
        self.indication_pending = true;
        debug!("PROTO: Indicated {} bytes", data.len());
        Ok(())
    }

    /// The central acknowledged an indication
    pub fn on_indication_confirmed(&mut self, handle: u16) {
        if handle == self.handles.value_handle && self.indication_pending {
            self.indication_pending = false;
            trace!("PROTO: Indication confirmed");
        } else {
            warn!("PROTO: Unexpected confirmation for handle {:#x}", handle);
        }
    }

    pub fn service_handle(&self) -> u16 {
        self.service_handle
    }

    pub fn handles(&self) -> &CharacteristicHandles {
        &self.handles
    }

    pub fn indications_enabled(&self) -> bool {
        self.indications_enabled
    }

    pub fn indication_pending(&self) -> bool {
        self.indication_pending
    }

    pub fn has_write_callback(&self) -> bool {
        self.write_callback.is_some()
    }
}
