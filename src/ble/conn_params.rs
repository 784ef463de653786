//! Connection Parameter Negotiation
//!
//! After a central connects, waits `first_update_delay` and then asks for the
//! preferred parameters, retrying every `next_update_delay` until the central
//! grants acceptable ones. Once `max_attempts` requests have been answered
//! with unacceptable values the link is dropped with
//! `CONN_INTERVAL_UNACCEPTABLE`.

use crate::ble::connection::ConnHandle;
use crate::ble::events::TimerId;
use crate::ble::stack::{hci, Stack};
use crate::config::{ConnParams, ConnParamsConfig};
use crate::error::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum NegotiationState {
    /// No link
    Idle,
    /// Connected, first-update timer armed
    AwaitingFirstUpdate,
    /// Update request sent, waiting for the central's answer
    AwaitingResponse,
    /// Previous answer unacceptable, retry timer armed
    Retrying,
    Succeeded,
    /// Retries exhausted, disconnect requested
    Failed,
}

#[derive(Debug)]
pub struct ConnParamsNegotiator {
    config: ConnParamsConfig,
    preferred: ConnParams,
    /// Parameters currently in force on the link
    current: ConnParams,
    state: NegotiationState,
    attempts: u8,
}

impl ConnParamsNegotiator {
    pub fn new(config: ConnParamsConfig, preferred: ConnParams) -> Self {
        Self {
            config,
            preferred,
            current: preferred,
            state: NegotiationState::Idle,
            attempts: 0,
        }
    }

    pub fn state(&self) -> NegotiationState {
        self.state
    }

    /// Update requests sent on this link
    pub fn attempts(&self) -> u8 {
        self.attempts
    }

    pub fn preferred(&self) -> &ConnParams {
        &self.preferred
    }

    /// Arm the first-update timer for a new link
    pub fn on_connected<S: Stack>(&mut self, stack: &mut S, granted: &ConnParams) -> Result<(), Error> {
        self.current = *granted;
        self.attempts = 0;
        self.state = NegotiationState::AwaitingFirstUpdate;
        stack.timer_start(TimerId::ConnParamsUpdate, self.config.first_update_delay)?;
        debug!(
            "CONN_PARAMS: First update in {} ms",
            self.config.first_update_delay.as_millis()
        );
        Ok(())
    }

    /// Update timer fired: send the next request, or settle if the link is
    /// already acceptable
    pub fn on_timer_expired<S: Stack>(&mut self, stack: &mut S, conn: ConnHandle) -> Result<(), Error> {
        if !matches!(
            self.state,
            NegotiationState::AwaitingFirstUpdate | NegotiationState::Retrying
        ) {
            debug!("CONN_PARAMS: Stale timer in {:?}", self.state);
            return Ok(());
        }

        if self.preferred.accepts(&self.current) {
            self.state = NegotiationState::Succeeded;
            info!("CONN_PARAMS: Current parameters acceptable, no update needed");
            return Ok(());
        }

        self.attempts = self.attempts.saturating_add(1);
        info!(
            "CONN_PARAMS: Requesting update, attempt {}/{}",
            self.attempts, self.config.max_attempts
        );
        match stack.conn_param_update(conn, &self.preferred) {
            Ok(()) => {
                self.state = NegotiationState::AwaitingResponse;
                Ok(())
            }
            Err(e) => {
                warn!("CONN_PARAMS: Update request failed: {:?}", e);
                self.on_rejected(stack, conn)
            }
        }
    }

    /// The central changed (or refused to change) the link parameters
    pub fn on_conn_param_update<S: Stack>(
        &mut self,
        stack: &mut S,
        conn: ConnHandle,
        granted: &ConnParams,
    ) -> Result<(), Error> {
        self.current = *granted;
        let acceptable = self.preferred.accepts(granted);

        match self.state {
            NegotiationState::Idle | NegotiationState::Failed => Ok(()),
            NegotiationState::AwaitingFirstUpdate | NegotiationState::Retrying if acceptable => {
                stack.timer_stop(TimerId::ConnParamsUpdate);
                self.state = NegotiationState::Succeeded;
                info!("CONN_PARAMS: Central granted acceptable parameters");
                Ok(())
            }
            // Timer still armed, the request goes out when it fires
            NegotiationState::AwaitingFirstUpdate | NegotiationState::Retrying => Ok(()),
            NegotiationState::AwaitingResponse | NegotiationState::Succeeded if acceptable => {
                if self.state != NegotiationState::Succeeded {
                    info!("CONN_PARAMS: Negotiation succeeded after {} attempts", self.attempts);
                }
                self.state = NegotiationState::Succeeded;
                Ok(())
            }
            NegotiationState::AwaitingResponse | NegotiationState::Succeeded => {
                warn!(
                    "CONN_PARAMS: Unacceptable parameters: interval {}-{}, latency {}, timeout {}",
                    granted.min_conn_interval,
                    granted.max_conn_interval,
                    granted.peripheral_latency,
                    granted.conn_sup_timeout
                );
                self.on_rejected(stack, conn)
            }
        }
    }

    /// Forget the link; stops a pending timer
    pub fn reset<S: Stack>(&mut self, stack: &mut S) {
        if matches!(
            self.state,
            NegotiationState::AwaitingFirstUpdate | NegotiationState::Retrying
        ) {
            stack.timer_stop(TimerId::ConnParamsUpdate);
        }
        self.state = NegotiationState::Idle;
        self.attempts = 0;
        self.current = self.preferred;
    }

    fn on_rejected<S: Stack>(&mut self, stack: &mut S, conn: ConnHandle) -> Result<(), Error> {
        if self.attempts < self.config.max_attempts {
            self.state = NegotiationState::Retrying;
            stack.timer_start(TimerId::ConnParamsUpdate, self.config.next_update_delay)?;
            debug!(
                "CONN_PARAMS: Retrying in {} ms",
                self.config.next_update_delay.as_millis()
            );
            return Ok(());
        }

        self.state = NegotiationState::Failed;
        error!(
            "CONN_PARAMS: Negotiation failed after {} attempts, disconnecting",
            self.attempts
        );
        if let Err(e) = stack.disconnect(conn, hci::CONN_INTERVAL_UNACCEPTABLE) {
            error!("CONN_PARAMS: Disconnect failed: {:?}", e);
        }
        Err(Error::NegotiationFailure)
    }
}
