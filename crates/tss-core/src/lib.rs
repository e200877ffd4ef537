//! # TSS Core
//!
//! Session orchestration and message routing for threshold ECDSA parties.
//!
//! This crate provides:
//! - A deterministic party directory every node agrees on
//! - An engine contract and adapter around the threshold cryptography
//! - Routing of engine output over a pluggable transport
//! - Per-phase sessions with an exactly-once terminal transition
//! - A readiness gate holding inbound messages until a phase is running
//!
//! ## Example
//!
//! ```rust,ignore
//! use tss_core::{Orchestrator, OrchestratorConfig, ReferenceEngine};
//!
//! let node = Orchestrator::new(directory, "p1", OrchestratorConfig::new(2), engine, transport)?;
//! network.register("p1", &node);
//!
//! let key = node.keygen().await?;
//! let signature = node.sign(b"hey this is a test").await?;
//! assert!(signature.valid);
//! ```

pub mod config;
pub mod directory;
pub mod engine;
pub mod error;
pub mod gate;
pub mod orchestrator;
pub mod router;
pub mod session;
pub mod store;
pub mod transport;
pub mod types;

#[cfg(test)]
mod testing;

pub use config::OrchestratorConfig;
pub use directory::{PartyDirectory, PartyIdentifier};
pub use engine::{EngineAdapter, ProtocolEngine, ReferenceEngine};
pub use error::{Error, ErrorKind, Result};
pub use orchestrator::Orchestrator;
pub use session::{PhaseOutcome, Session, SessionState};
pub use store::{KeyStore, MemoryKeyStore};
pub use transport::{Envelope, MemoryNetwork, TransportReceiver, TransportSender};
pub use types::{KeyMaterial, PartyIdentity, Phase, SignatureResult};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
