//! HTTP transport
//!
//! Peers exchange session messages by POSTing a JSON envelope to
//! `/v1/msg`; the payload travels base64-encoded.

pub mod client;
pub mod server;

pub use client::HttpTransport;
pub use server::router;

use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{Deserialize, Serialize};
use tss_core::{Envelope, Phase};

/// Envelope as it appears on the wire
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireEnvelope {
    pub phase: Phase,
    pub from: String,
    pub is_broadcast: bool,
    /// Base64-encoded engine payload
    pub payload: String,
}

impl From<&Envelope> for WireEnvelope {
    fn from(envelope: &Envelope) -> Self {
        Self {
            phase: envelope.phase,
            from: envelope.from.clone(),
            is_broadcast: envelope.is_broadcast,
            payload: STANDARD.encode(&envelope.payload),
        }
    }
}

impl TryFrom<WireEnvelope> for Envelope {
    type Error = base64::DecodeError;

    fn try_from(wire: WireEnvelope) -> Result<Self, Self::Error> {
        Ok(Envelope {
            phase: wire.phase,
            from: wire.from,
            is_broadcast: wire.is_broadcast,
            payload: STANDARD.decode(wire.payload)?,
        })
    }
}
