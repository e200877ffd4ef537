//! Protocol engine contract
//!
//! The threshold cryptography itself lives behind [`ProtocolEngine`]: an
//! engine instance is started once, fed inbound payloads, and reports its
//! progress as a stream of [`EngineEvent`]s. The session layer never looks
//! inside payloads.

use crate::types::{KeyMaterial, PartyIdentity, Phase, ProtocolMessage, RawSignature};
use crate::Result;
use std::sync::Arc;
use tokio::sync::mpsc;

pub mod adapter;
pub mod reference;

pub use adapter::EngineAdapter;
pub use reference::ReferenceEngine;

/// Phase-specific engine parameters
#[derive(Debug, Clone)]
pub enum PhaseParams {
    Keygen,
    Signing {
        /// Message to sign
        message: Vec<u8>,
        /// Output of the keygen this signing builds on
        key: Arc<KeyMaterial>,
    },
}

/// Everything an engine instance needs to run one phase
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Parties taking part in this phase, in directory order
    pub parties: Vec<PartyIdentity>,
    /// This party
    pub local: PartyIdentity,
    /// Threshold (t+1 parties are needed to sign)
    pub threshold: usize,
    pub params: PhaseParams,
}

impl EngineConfig {
    pub fn phase(&self) -> Phase {
        match self.params {
            PhaseParams::Keygen => Phase::Keygen,
            PhaseParams::Signing { .. } => Phase::Signing,
        }
    }
}

/// Successful result of a phase
#[derive(Debug, Clone)]
pub enum PhaseOutput {
    Key(KeyMaterial),
    Signature(RawSignature),
}

/// Event produced by a running engine instance
#[derive(Debug)]
pub enum EngineEvent {
    /// Message to route to other parties
    Outbound(ProtocolMessage),
    /// Phase finished
    Completed(PhaseOutput),
    /// Phase cannot finish
    Failed(crate::Error),
}

/// Outbound event stream of one engine instance
pub type EventStream = mpsc::UnboundedReceiver<EngineEvent>;

/// Factory for engine instances
pub trait ProtocolEngine: Send + Sync {
    /// Create an instance for one phase; does not start it
    fn new_instance(&self, config: EngineConfig) -> Result<Box<dyn EngineInstance>>;
}

/// One running protocol instance
pub trait EngineInstance: Send + Sync {
    /// Begin the protocol. Can only succeed once.
    fn start(&self) -> Result<EventStream>;

    /// Apply an inbound payload. `Ok(false)` means the update was not accepted.
    fn update_from_bytes(
        &self,
        payload: &[u8],
        from: &PartyIdentity,
        is_broadcast: bool,
    ) -> Result<bool>;

    /// Identity the instance runs as
    fn identity(&self) -> &PartyIdentity;
}
