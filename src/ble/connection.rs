//! Connection Registry
//!
//! Tracks the single link the peripheral supports. The handle is
//! [`CONN_HANDLE_INVALID`] whenever no central is connected; every other
//! component reads the current handle from here instead of keeping its own
//! copy, so a stale handle can never outlive the link it belonged to.

use crate::config::{ConnParams, ATT_MTU_DEFAULT};

pub type ConnHandle = u16;

/// Sentinel handle meaning "no connection"
pub const CONN_HANDLE_INVALID: ConnHandle = 0xFFFF;

/// 1M PHY, the link default
pub const PHY_1M: u8 = 0x01;

/// Default LL data channel PDU payload (octets)
pub const DATA_LENGTH_DEFAULT: u16 = 27;

/// Bluetooth device address of the connected central
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PeerAddress {
    pub addr_type: u8,
    pub addr: [u8; 6],
}

/// Connection information
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ConnectionInfo {
    /// Connection handle
    pub handle: ConnHandle,
    pub peer_addr: PeerAddress,
    /// Parameters last granted by the central
    pub conn_params: ConnParams,
    /// Effective ATT MTU
    pub mtu: u16,
    pub tx_phy: u8,
    pub rx_phy: u8,
    pub max_tx_octets: u16,
    pub max_rx_octets: u16,
}

impl ConnectionInfo {
    fn new(handle: ConnHandle, peer_addr: PeerAddress, conn_params: ConnParams) -> Self {
        Self {
            handle,
            peer_addr,
            conn_params,
            mtu: ATT_MTU_DEFAULT,
            tx_phy: PHY_1M,
            rx_phy: PHY_1M,
            max_tx_octets: DATA_LENGTH_DEFAULT,
            max_rx_octets: DATA_LENGTH_DEFAULT,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConnectionState {
    Disconnected,
    Connected,
}

/// Connection management errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConnectionError {
    /// A second connect arrived while a link is live
    AlreadyConnected { current: ConnHandle },
    NotConnected,
    /// Event names a handle other than the live one
    UnknownHandle { handle: ConnHandle },
    InvalidHandle,
}

/// Single-link connection state
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    current: Option<ConnectionInfo>,
}

impl ConnectionRegistry {
    pub const fn new() -> Self {
        Self { current: None }
    }

    /// Record a new link
    pub fn on_connected(
        &mut self,
        handle: ConnHandle,
        peer_addr: PeerAddress,
        conn_params: ConnParams,
    ) -> Result<(), ConnectionError> {
        if handle == CONN_HANDLE_INVALID {
            error!("CONN: Invalid connection handle {:#x}", handle);
            return Err(ConnectionError::InvalidHandle);
        }

        if let Some(current) = &self.current {
            warn!(
                "CONN: Connect on handle {} while handle {} is live, ignoring",
                handle, current.handle
            );
            return Err(ConnectionError::AlreadyConnected {
                current: current.handle,
            });
        }

        self.current = Some(ConnectionInfo::new(handle, peer_addr, conn_params));
        info!("CONN: Connected, handle {}", handle);
        Ok(())
    }

    /// Drop the link, returning what was known about it
    pub fn on_disconnected(&mut self, handle: ConnHandle, reason: u8) -> Result<ConnectionInfo, ConnectionError> {
        let info = self.current_for(handle)?;
        self.current = None;
        info!("CONN: Disconnected, handle {} (reason: {:#x})", handle, reason);
        Ok(info)
    }

    pub fn state(&self) -> ConnectionState {
        match self.current {
            Some(_) => ConnectionState::Connected,
            None => ConnectionState::Disconnected,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.current.is_some()
    }

    /// Live handle, or [`CONN_HANDLE_INVALID`]
    pub fn current_handle(&self) -> ConnHandle {
        self.current.map_or(CONN_HANDLE_INVALID, |info| info.handle)
    }

    /// Whether `handle` names the live link
    pub fn is_current(&self, handle: ConnHandle) -> bool {
        self.current.map_or(false, |info| info.handle == handle)
    }

    /// Whether an event for `handle` belongs to a link that is gone
    ///
    /// Events outside any link carry [`CONN_HANDLE_INVALID`] and are never stale.
    pub fn is_stale(&self, handle: ConnHandle) -> bool {
        handle != CONN_HANDLE_INVALID && !self.is_current(handle)
    }

    pub fn info(&self) -> Option<&ConnectionInfo> {
        self.current.as_ref()
    }

    /// Update connection parameters
    pub fn update_params(&mut self, handle: ConnHandle, conn_params: ConnParams) -> Result<(), ConnectionError> {
        let info = self.current_mut(handle)?;
        info.conn_params = conn_params;
        debug!(
            "CONN: Params for handle {}: interval {}-{}, latency {}, timeout {}",
            handle,
            conn_params.min_conn_interval,
            conn_params.max_conn_interval,
            conn_params.peripheral_latency,
            conn_params.conn_sup_timeout
        );
        Ok(())
    }

    /// Update the effective ATT MTU
    pub fn update_mtu(&mut self, handle: ConnHandle, mtu: u16) -> Result<(), ConnectionError> {
        let info = self.current_mut(handle)?;
        info.mtu = mtu;
        debug!("CONN: MTU for handle {} is now {}", handle, mtu);
        Ok(())
    }

    pub fn update_phy(&mut self, handle: ConnHandle, tx_phy: u8, rx_phy: u8) -> Result<(), ConnectionError> {
        let info = self.current_mut(handle)?;
        info.tx_phy = tx_phy;
        info.rx_phy = rx_phy;
        debug!("CONN: PHY for handle {}: tx {:#x}, rx {:#x}", handle, tx_phy, rx_phy);
        Ok(())
    }

    pub fn update_data_length(
        &mut self,
        handle: ConnHandle,
        max_tx_octets: u16,
        max_rx_octets: u16,
    ) -> Result<(), ConnectionError> {
        let info = self.current_mut(handle)?;
        info.max_tx_octets = max_tx_octets;
        info.max_rx_octets = max_rx_octets;
        debug!(
            "CONN: Data length for handle {}: tx {}, rx {}",
            handle, max_tx_octets, max_rx_octets
        );
        Ok(())
    }

    fn current_for(&self, handle: ConnHandle) -> Result<ConnectionInfo, ConnectionError> {
        match self.current {
            Some(info) if info.handle == handle => Ok(info),
            Some(_) => {
                warn!("CONN: Event for unknown handle {}", handle);
                Err(ConnectionError::UnknownHandle { handle })
            }
            None => {
                warn!("CONN: Event for handle {} with no live link", handle);
                Err(ConnectionError::NotConnected)
            }
        }
    }

    fn current_mut(&mut self, handle: ConnHandle) -> Result<&mut ConnectionInfo, ConnectionError> {
        self.current_for(handle)?;
        // current_for just confirmed the link is present
        self.current.as_mut().ok_or(ConnectionError::NotConnected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer() -> PeerAddress {
        PeerAddress {
            addr_type: 1,
            addr: [0x11, 0x22, 0x33, 0x44, 0x55, 0x66],
        }
    }

    #[test]
    fn test_starts_disconnected() {
        let registry = ConnectionRegistry::new();
        assert_eq!(registry.state(), ConnectionState::Disconnected);
        assert_eq!(registry.current_handle(), CONN_HANDLE_INVALID);
        assert!(registry.info().is_none());
    }

    #[test]
    fn test_connect_disconnect_cycle() {
        let mut registry = ConnectionRegistry::new();
        registry.on_connected(3, peer(), ConnParams::default()).unwrap();
        assert!(registry.is_connected());
        assert_eq!(registry.current_handle(), 3);
        assert_eq!(registry.info().unwrap().mtu, ATT_MTU_DEFAULT);

        let info = registry.on_disconnected(3, 0x13).unwrap();
        assert_eq!(info.handle, 3);
        assert_eq!(info.peer_addr, peer());
        assert_eq!(registry.current_handle(), CONN_HANDLE_INVALID);
    }

    #[test]
    fn test_second_connect_rejected() {
        let mut registry = ConnectionRegistry::new();
        registry.on_connected(1, peer(), ConnParams::default()).unwrap();
        assert_eq!(
            registry.on_connected(2, peer(), ConnParams::default()),
            Err(ConnectionError::AlreadyConnected { current: 1 })
        );
        assert_eq!(registry.current_handle(), 1);
    }

    #[test]
    fn test_stray_disconnect_ignored() {
        let mut registry = ConnectionRegistry::new();
        assert_eq!(registry.on_disconnected(1, 0x13), Err(ConnectionError::NotConnected));

        registry.on_connected(1, peer(), ConnParams::default()).unwrap();
        assert_eq!(
            registry.on_disconnected(7, 0x13),
            Err(ConnectionError::UnknownHandle { handle: 7 })
        );
        assert!(registry.is_current(1));
    }

    #[test]
    fn test_stale_handles() {
        let mut registry = ConnectionRegistry::new();
        assert!(registry.is_stale(0));
        assert!(!registry.is_stale(CONN_HANDLE_INVALID));

        registry.on_connected(0, peer(), ConnParams::default()).unwrap();
        assert!(!registry.is_stale(0));
        assert!(registry.is_stale(1));
        assert!(!registry.is_stale(CONN_HANDLE_INVALID));
    }

    #[test]
    fn test_invalid_handle_rejected() {
        let mut registry = ConnectionRegistry::new();
        assert_eq!(
            registry.on_connected(CONN_HANDLE_INVALID, peer(), ConnParams::default()),
            Err(ConnectionError::InvalidHandle)
        );
        assert!(!registry.is_connected());
    }

    #[test]
    fn test_link_updates_require_live_handle() {
        let mut registry = ConnectionRegistry::new();
        assert!(registry.update_mtu(0, 247).is_err());

        registry.on_connected(0, peer(), ConnParams::default()).unwrap();
        registry.update_mtu(0, 247).unwrap();
        registry.update_phy(0, 2, 2).unwrap();
        registry.update_data_length(0, 251, 251).unwrap();
        assert!(registry.update_mtu(1, 100).is_err());

        let info = registry.info().unwrap();
        assert_eq!(info.mtu, 247);
        assert_eq!((info.tx_phy, info.rx_phy), (2, 2));
        assert_eq!((info.max_tx_octets, info.max_rx_octets), (251, 251));
    }
}
