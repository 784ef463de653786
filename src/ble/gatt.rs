//! GATT attribute definitions
//!
//! UUIDs, characteristic metadata and the read/write authorisation types
//! exchanged with the stack.

/// Vendor-specific UUID base, little-endian as the stack expects it
pub type Uuid128 = [u8; 16];

/// UUID type assigned by the stack to 16-bit SIG UUIDs
pub const UUID_TYPE_BLE: u8 = 0x01;
/// First UUID type the stack hands out for registered vendor bases
pub const UUID_TYPE_VENDOR_BEGIN: u8 = 0x02;

/// ATT handle 0 is reserved and never assigned
pub const HANDLE_INVALID: u16 = 0x0000;

/// Stack UUID reference: a base type plus the 16-bit short UUID
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Uuid {
    pub uuid_type: u8,
    pub uuid: u16,
}

/// Expand a vendor base with a 16-bit short UUID (octets 12 and 13)
pub const fn vendor_uuid(base: &Uuid128, short: u16) -> Uuid128 {
    let mut full = *base;
    let bytes = short.to_le_bytes();
    full[12] = bytes[0];
    full[13] = bytes[1];
    full
}

/// Characteristic properties (matches BLE specification)
pub mod char_properties {
    pub const BROADCAST: u8 = 0x01;
    pub const READ: u8 = 0x02;
    pub const WRITE_WITHOUT_RESPONSE: u8 = 0x04;
    pub const WRITE: u8 = 0x08;
    pub const NOTIFY: u8 = 0x10;
    pub const INDICATE: u8 = 0x20;
    pub const AUTH_SIGNED_WRITES: u8 = 0x40;
    pub const EXTENDED_PROPERTIES: u8 = 0x80;
}

/// CCCD value bits
pub const CCCD_NOTIFICATION: u16 = 0x0001;
pub const CCCD_INDICATION: u16 = 0x0002;

/// GATT status codes used in authorisation replies
pub mod gatt_status {
    pub const SUCCESS: u16 = 0x0000;
    pub const ATTERR_INVALID_HANDLE: u16 = 0x0101;
    pub const ATTERR_INVALID_OFFSET: u16 = 0x0107;
    pub const ATTERR_PREPARE_QUEUE_FULL: u16 = 0x0109;
    pub const ATTERR_INVALID_ATT_VAL_LENGTH: u16 = 0x010D;
}

/// Link security an attribute access requires
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SecurityMode {
    NoAccess,
    Open,
    EncryptedNoMitm,
    EncryptedMitm,
}

/// Characteristic registration request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CharacteristicConfig {
    pub uuid: Uuid,
    pub properties: u8,
    pub max_len: u16,
    pub variable_len: bool,
    pub read_perm: SecurityMode,
    pub write_perm: SecurityMode,
    /// CCCD permissions, present when NOTIFY or INDICATE is set
    pub cccd_perm: SecurityMode,
    pub user_description: Option<&'static str>,
    /// Route writes to the value through authorisation requests, so long
    /// writes arrive fragment by fragment
    pub write_authorization: bool,
}

impl CharacteristicConfig {
    pub fn has_cccd(&self) -> bool {
        self.properties & (char_properties::NOTIFY | char_properties::INDICATE) != 0
    }
}

/// Handles assigned by the stack to a registered characteristic
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CharacteristicHandles {
    pub value_handle: u16,
    pub user_desc_handle: u16,
    pub cccd_handle: u16,
    pub sccd_handle: u16,
}

/// Write operation carried by a write or authorisation event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum WriteOp {
    Request,
    Command,
    SignedCommand,
    PrepareRequest,
    ExecuteNow,
    ExecuteCancel,
}

impl WriteOp {
    pub fn label(&self) -> &'static str {
        match self {
            WriteOp::Request => "WRITE_REQ",
            WriteOp::Command => "WRITE_CMD",
            WriteOp::SignedCommand => "SIGN_WRITE_CMD",
            WriteOp::PrepareRequest => "PREP_WRITE_REQ",
            WriteOp::ExecuteNow => "EXEC_WRITE_REQ_NOW",
            WriteOp::ExecuteCancel => "EXEC_WRITE_REQ_CANCEL",
        }
    }
}

/// Reply to a read/write authorisation request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AuthorizeReply {
    Read { status: u16 },
    Write { status: u16 },
}

impl AuthorizeReply {
    pub fn status(&self) -> u16 {
        match self {
            AuthorizeReply::Read { status } | AuthorizeReply::Write { status } => *status,
        }
    }
}
