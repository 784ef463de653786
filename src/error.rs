//! Error taxonomy
//!
//! Only [`Error::Init`] is fatal: it is returned from [`crate::Peripheral::init`]
//! and the embedding firmware decides whether to halt. Everything else is a
//! runtime outcome that handlers log and recover from.

use core::fmt;

/// Raw status code returned by a failed stack request (`NRF_ERROR_*`)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct StackError(pub u32);

impl StackError {
    pub const INTERNAL: Self = Self(0x03);
    pub const NO_MEM: Self = Self(0x04);
    pub const INVALID_STATE: Self = Self(0x08);
    pub const INVALID_PARAM: Self = Self(0x07);
    pub const BUSY: Self = Self(0x11);

    pub fn code(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for StackError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stack error {:#x}", self.0)
    }
}

/// Initialisation step that failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum InitStage {
    Gap,
    Gatt,
    Services,
    Advertising,
    ConnParams,
    PeerManager,
}

impl InitStage {
    pub fn label(&self) -> &'static str {
        match self {
            InitStage::Gap => "GAP",
            InitStage::Gatt => "GATT",
            InitStage::Services => "SERVICES",
            InitStage::Advertising => "ADVERTISING",
            InitStage::ConnParams => "CONN_PARAMS",
            InitStage::PeerManager => "PEER_MANAGER",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// Null or invalid argument to an init or registration call
    Parameter,
    /// Queued write would overflow the backing buffer
    Capacity { offset: u16, len: u16, capacity: u16 },
    /// Connection parameter retries exhausted
    NegotiationFailure,
    /// Pairing or bonding failed for the current link
    SecurityFailure,
    /// Event category without an explicit handler
    UnhandledEvent,
    /// Stack initialisation call failed; unrecoverable at this layer
    Init { stage: InitStage, cause: StackError },
    /// Non-fatal stack request failure
    Stack(StackError),
    NotConnected,
    NotSubscribed,
    IndicationPending,
    AdvertisingBusy,
    AdvertisingDataTooLong,
}

impl Error {
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Init { .. })
    }
}

impl From<StackError> for Error {
    fn from(error: StackError) -> Self {
        Self::Stack(error)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Parameter => write!(f, "invalid parameter"),
            Error::Capacity { offset, len, capacity } => write!(
                f,
                "queued write of {} bytes at offset {} exceeds capacity {}",
                len, offset, capacity
            ),
            Error::NegotiationFailure => write!(f, "connection parameter negotiation failed"),
            Error::SecurityFailure => write!(f, "security procedure failed"),
            Error::UnhandledEvent => write!(f, "unhandled event"),
            Error::Init { stage, cause } => write!(f, "{} init failed: {}", stage.label(), cause),
            Error::Stack(e) => write!(f, "{}", e),
            Error::NotConnected => write!(f, "not connected"),
            Error::NotSubscribed => write!(f, "indications not enabled"),
            Error::IndicationPending => write!(f, "indication already outstanding"),
            Error::AdvertisingBusy => write!(f, "already advertising in another mode"),
            Error::AdvertisingDataTooLong => write!(f, "advertising data too long"),
        }
    }
}

impl core::error::Error for Error {}

/// Attach the failing init stage to a stack result
pub(crate) trait InitContext<T> {
    fn stage(self, stage: InitStage) -> Result<T, Error>;
}

impl<T> InitContext<T> for Result<T, StackError> {
    fn stage(self, stage: InitStage) -> Result<T, Error> {
        self.map_err(|cause| Error::Init { stage, cause })
    }
}
