//! In-memory transport for local clusters and tests

use super::{Envelope, TransportReceiver, TransportSender};
use crate::types::PartyIdentity;
use crate::{Error, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::{Arc, Weak};
use tracing::{trace, warn};

/// Process-local network connecting receivers by party id
#[derive(Default)]
pub struct MemoryNetwork {
    /// Registered receivers: party_id -> receiver
    nodes: DashMap<String, Weak<dyn TransportReceiver>>,
}

impl MemoryNetwork {
    /// Create a new in-memory network
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Attach a receiver under a party id
    ///
    /// Only a weak reference is kept so that a receiver owning a sender into
    /// this network does not keep itself alive.
    pub fn register<R: TransportReceiver + 'static>(&self, party_id: &str, receiver: &Arc<R>) {
        let weak = Arc::downgrade(receiver);
        let weak: Weak<dyn TransportReceiver> = weak;
        self.nodes.insert(party_id.to_string(), weak);
    }

    /// Detach a party, making it unreachable
    pub fn disconnect(&self, party_id: &str) {
        self.nodes.remove(party_id);
    }

    /// Sender handle into this network
    pub fn transport(self: &Arc<Self>) -> MemoryTransport {
        MemoryTransport {
            network: Arc::clone(self),
        }
    }

    fn receiver(&self, party_id: &str) -> Option<Arc<dyn TransportReceiver>> {
        self.nodes.get(party_id).and_then(|entry| entry.upgrade())
    }
}

/// [`TransportSender`] backed by a [`MemoryNetwork`]
#[derive(Clone)]
pub struct MemoryTransport {
    network: Arc<MemoryNetwork>,
}

#[async_trait]
impl TransportSender for MemoryTransport {
    async fn send(&self, to: &PartyIdentity, envelope: Envelope) -> Result<()> {
        let receiver = self.network.receiver(&to.id).ok_or_else(|| Error::Transport {
            to: to.id.clone(),
            reason: "peer unreachable".into(),
        })?;

        trace!(to = %to.id, phase = %envelope.phase, from = %envelope.from, "Delivering");

        // The receiver may hold the message behind its readiness gate, so
        // delivery continues without the sender.
        let to = to.id.clone();
        tokio::spawn(async move {
            if let Err(e) = receiver.on_message(envelope).await {
                warn!(to = %to, error = %e, "Receiver rejected message");
            }
        });
        Ok(())
    }
}
