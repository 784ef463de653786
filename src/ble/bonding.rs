//! Security Coordinator
//!
//! Reacts to bonding store (peer manager) events: tracks the pairing outcome
//! of the live link, disconnects it when a security procedure fails, answers
//! re-pairing configuration requests and reclaims flash when storage fills.
//! The pairing itself runs inside the stack and bonding store.

use crate::ble::connection::{ConnHandle, CONN_HANDLE_INVALID};
use crate::ble::events::{PeerEvent, PeerId, SecurityProcedure, StackEvent, PEER_ID_INVALID};
use crate::ble::stack::{hci, BondingStore, Stack};
use crate::config::SecurityParams;
use crate::error::{Error, StackError};

/// Pairing progress of the live link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PairingOutcome {
    None,
    InProgress(SecurityProcedure),
    Succeeded(SecurityProcedure),
    Failed { error: u16 },
}

/// Security state for one connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SecurityContext {
    pub conn_handle: ConnHandle,
    pub peer_id: PeerId,
    /// Keys for this peer are stored
    pub bonded: bool,
    pub outcome: PairingOutcome,
}

impl SecurityContext {
    fn new(conn_handle: ConnHandle) -> Self {
        Self {
            conn_handle,
            peer_id: PEER_ID_INVALID,
            bonded: false,
            outcome: PairingOutcome::None,
        }
    }
}

#[derive(Debug)]
pub struct SecurityCoordinator {
    params: SecurityParams,
    allow_repairing: bool,
    context: Option<SecurityContext>,
}

impl SecurityCoordinator {
    pub fn new(params: SecurityParams, allow_repairing: bool) -> Self {
        Self {
            params,
            allow_repairing,
            context: None,
        }
    }

    /// Validate the security parameters and hand them to the bonding store
    pub fn init<B: BondingStore>(&mut self, store: &mut B) -> Result<(), StackError> {
        if !self.params.is_valid() {
            error!(
                "SECURITY: Invalid key sizes {}..{}",
                self.params.min_key_size, self.params.max_key_size
            );
            return Err(StackError::INVALID_PARAM);
        }
        store.init(&self.params)?;
        info!(
            "SECURITY: Bonding {}, MITM {}, LESC {}",
            self.params.bond, self.params.mitm, self.params.lesc
        );
        Ok(())
    }

    pub fn params(&self) -> &SecurityParams {
        &self.params
    }

    pub fn context(&self) -> Option<&SecurityContext> {
        self.context.as_ref()
    }

    pub fn on_connected(&mut self, conn: ConnHandle) {
        self.context = Some(SecurityContext::new(conn));
    }

    pub fn on_disconnected(&mut self) {
        self.context = None;
    }

    /// Security related stack events are informational here; the bonding
    /// store answers them
    pub fn on_stack_event(&self, event: &StackEvent) {
        match event {
            StackEvent::SecParamsRequest { conn_handle } => {
                debug!("SECURITY: Security parameters requested on {}", conn_handle)
            }
            StackEvent::SecInfoRequest { conn_handle } => {
                debug!("SECURITY: Security info requested on {}", conn_handle)
            }
            StackEvent::AuthStatus {
                conn_handle,
                status,
                bonded,
            } => info!(
                "SECURITY: Auth status {:#x} on {} (bonded: {})",
                status, conn_handle, bonded
            ),
            StackEvent::ConnSecUpdate {
                conn_handle,
                security_mode,
                security_level,
            } => info!(
                "SECURITY: Link {} now mode {} level {}",
                conn_handle, security_mode, security_level
            ),
            _ => {}
        }
    }

    /// Apply a bonding store event
    ///
    /// Returns [`Error::SecurityFailure`] when the live link failed a security
    /// procedure and a disconnect was requested.
    pub fn on_peer_event<S: Stack, B: BondingStore>(
        &mut self,
        stack: &mut S,
        store: &mut B,
        current: ConnHandle,
        event: PeerEvent,
    ) -> Result<(), Error> {
        match event {
            PeerEvent::BondedPeerConnected { conn_handle, peer_id } => {
                info!("SECURITY: Bonded peer {} connected on {}", peer_id, conn_handle);
                if let Some(ctx) = self.context_for(conn_handle) {
                    ctx.peer_id = peer_id;
                    ctx.bonded = true;
                }
            }
            PeerEvent::ConnSecStart {
                conn_handle,
                peer_id,
                procedure,
            } => {
                info!("SECURITY: {:?} started on {}", procedure, conn_handle);
                if let Some(ctx) = self.context_for(conn_handle) {
                    ctx.peer_id = peer_id;
                    ctx.outcome = PairingOutcome::InProgress(procedure);
                }
            }
            PeerEvent::ConnSecSucceeded {
                conn_handle,
                peer_id,
                procedure,
            } => {
                info!("SECURITY: {:?} succeeded on {}", procedure, conn_handle);
                if let Some(ctx) = self.context_for(conn_handle) {
                    ctx.peer_id = peer_id;
                    ctx.outcome = PairingOutcome::Succeeded(procedure);
                    if procedure == SecurityProcedure::Bonding {
                        ctx.bonded = true;
                    }
                }
            }
            PeerEvent::ConnSecFailed {
                conn_handle,
                peer_id,
                error,
            } => {
                warn!(
                    "SECURITY: Security failed on {} (peer {}, error {:#x})",
                    conn_handle, peer_id, error
                );
                if let Some(ctx) = self.context_for(conn_handle) {
                    ctx.outcome = PairingOutcome::Failed { error };
                }
                if conn_handle == current && current != CONN_HANDLE_INVALID {
                    if let Err(e) = stack.disconnect(conn_handle, hci::AUTHENTICATION_FAILURE) {
                        error!("SECURITY: Disconnect failed: {:?}", e);
                    }
                    return Err(Error::SecurityFailure);
                }
            }
            PeerEvent::ConnSecConfigReq { conn_handle, peer_id } => {
                debug!(
                    "SECURITY: Re-pairing request from peer {}, allow: {}",
                    peer_id, self.allow_repairing
                );
                store.conn_sec_config_reply(conn_handle, self.allow_repairing)?;
            }
            PeerEvent::StorageFull => {
                warn!("SECURITY: Peer storage full, collecting garbage");
                store.garbage_collect()?;
            }
            PeerEvent::FlashGarbageCollected => info!("SECURITY: Flash garbage collected"),
            PeerEvent::FlashGarbageCollectionFailed { error } => {
                error!("SECURITY: Flash garbage collection failed: {:#x}", error)
            }
            PeerEvent::ErrorUnexpected { conn_handle, error } => {
                error!("SECURITY: Unexpected error {:#x} on {}", error, conn_handle)
            }
            PeerEvent::PeerDataUpdateFailed { peer_id, error } => {
                error!("SECURITY: Data update for peer {} failed: {:#x}", peer_id, error)
            }
            PeerEvent::PeerDeleteFailed { peer_id, error } => {
                error!("SECURITY: Delete of peer {} failed: {:#x}", peer_id, error)
            }
            PeerEvent::PeersDeleteFailed { error } => {
                error!("SECURITY: Delete of all peers failed: {:#x}", error)
            }
            other => debug!("SECURITY: {}", other.label()),
        }
        Ok(())
    }

    fn context_for(&mut self, conn: ConnHandle) -> Option<&mut SecurityContext> {
        self.context.as_mut().filter(|ctx| ctx.conn_handle == conn)
    }
}
