//! Transport boundary
//!
//! The orchestrator only needs to hand an [`Envelope`] to a named peer and to
//! be told about envelopes addressed to it. Wire format and connection
//! management belong to implementations such as [`MemoryNetwork`] or an HTTP
//! transport.

use crate::types::{PartyIdentity, Phase};
use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub mod memory;

pub use memory::{MemoryNetwork, MemoryTransport};

/// One protocol message on the wire
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Phase the payload belongs to
    pub phase: Phase,
    /// Origin party id
    pub from: String,
    /// Whether the origin broadcast the payload
    pub is_broadcast: bool,
    /// Opaque engine payload
    pub payload: Vec<u8>,
}

/// Outbound half of the transport
#[async_trait]
pub trait TransportSender: Send + Sync {
    /// Send an envelope to one peer. Failures are reported, not retried.
    async fn send(&self, to: &PartyIdentity, envelope: Envelope) -> Result<()>;
}

/// Inbound half of the transport, implemented by the orchestrator
///
/// Must tolerate concurrent calls.
#[async_trait]
pub trait TransportReceiver: Send + Sync {
    /// Checks that need no running session, such as whether the sender is
    /// known. Transports that answer before delivery finishes report these.
    fn admit(&self, _envelope: &Envelope) -> Result<()> {
        Ok(())
    }

    /// Deliver an envelope, waiting for its phase to be ready if needed
    async fn on_message(&self, envelope: Envelope) -> Result<()>;
}
