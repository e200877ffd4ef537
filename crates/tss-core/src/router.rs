//! Outbound message routing
//!
//! Turns one engine message into transport sends. Broadcasts fan out to every
//! other participant of the phase and silently skip the origin; a
//! point-to-point message addressed to its own origin is an error and is
//! never sent.

use crate::transport::{Envelope, TransportSender};
use crate::types::{Destination, PartyIdentity, Phase, ProtocolMessage};
use crate::{Error, Result};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Routes the outbound messages of one phase
pub struct Router {
    phase: Phase,
    /// Parties taking part in the phase
    participants: Vec<PartyIdentity>,
    transport: Arc<dyn TransportSender>,
}

impl Router {
    pub fn new(
        phase: Phase,
        participants: Vec<PartyIdentity>,
        transport: Arc<dyn TransportSender>,
    ) -> Self {
        Self {
            phase,
            participants,
            transport,
        }
    }

    /// Resolve the parties a message must be sent to
    pub fn resolve(&self, message: &ProtocolMessage) -> Result<Vec<PartyIdentity>> {
        let origin = &message.origin;
        if !self.is_participant(&origin.id) {
            return Err(Error::NotParticipant {
                party: origin.id.clone(),
                phase: self.phase,
            });
        }

        match &message.destination {
            Destination::All => Ok(self
                .participants
                .iter()
                .filter(|party| party.id != origin.id)
                .cloned()
                .collect()),
            Destination::Party(to) => {
                if to.id == origin.id {
                    return Err(Error::SelfAddressed(origin.id.clone()));
                }
                if !self.is_participant(&to.id) {
                    return Err(Error::NotParticipant {
                        party: to.id.clone(),
                        phase: self.phase,
                    });
                }
                Ok(vec![to.clone()])
            }
        }
    }

    /// Hand a message to the transport without waiting for delivery
    ///
    /// Each send runs on its own task. A failed send does not affect the
    /// others; every failure is logged and pushed to `failures`. Returns the
    /// number of sends issued.
    pub fn dispatch(
        &self,
        message: ProtocolMessage,
        failures: &mpsc::UnboundedSender<Error>,
    ) -> Result<usize> {
        let destinations = self.resolve(&message)?;
        let is_broadcast = message.is_broadcast();

        debug!(
            phase = %self.phase,
            from = %message.origin.id,
            is_broadcast,
            destinations = destinations.len(),
            "Routing message"
        );

        for to in &destinations {
            let envelope = Envelope {
                phase: self.phase,
                from: message.origin.id.clone(),
                is_broadcast,
                payload: message.payload.clone(),
            };
            let transport = Arc::clone(&self.transport);
            let failures = failures.clone();
            let phase = self.phase;
            let to = to.clone();

            tokio::spawn(async move {
                if let Err(e) = transport.send(&to, envelope).await {
                    warn!(phase = %phase, to = %to.id, error = %e, "Send failed");
                    let _ = failures.send(e);
                }
            });
        }

        Ok(destinations.len())
    }

    fn is_participant(&self, id: &str) -> bool {
        self.participants.iter().any(|party| party.id == id)
    }
}
