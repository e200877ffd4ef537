//! Error types for session orchestration

use crate::types::Phase;
use thiserror::Error;

/// Result type alias for orchestration operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while driving a threshold session
///
/// Cloneable so that the failure that ends a session can be handed to its
/// waiter and returned to whichever caller triggered it.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum Error {
    /// Invalid party or orchestrator configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Threshold requirements not met
    #[error("Threshold not met: required {required}, got {actual}")]
    ThresholdNotMet { required: usize, actual: usize },

    /// Party id not present in the directory
    #[error("Unknown party: {0}")]
    UnknownParty(String),

    /// Point-to-point message addressed to its own origin
    #[error("Party {0} tried to send a message to itself")]
    SelfAddressed(String),

    /// Party outside the participant set of a phase
    #[error("Party {party} does not participate in {phase}")]
    NotParticipant { party: String, phase: Phase },

    /// Inbound message for a phase whose engine will never be constructed
    #[error("No {0} session will accept messages")]
    GateClosed(Phase),

    /// Signing requested before keygen produced key material
    #[error("Keygen has not completed")]
    KeygenIncomplete,

    /// Waiting on a phase that was never started
    #[error("{0} session has not been started")]
    NotStarted(Phase),

    /// Phase already running or completed
    #[error("{0} session already started")]
    AlreadyStarted(Phase),

    /// Session reached a terminal state
    #[error("{0} session is closed")]
    SessionClosed(Phase),

    /// Transport could not deliver a message
    #[error("Transport error sending to {to}: {reason}")]
    Transport { to: String, reason: String },

    /// Engine refused an inbound payload
    #[error("Engine rejected message from {from}: {reason}")]
    EngineRejected { from: String, reason: String },

    /// Engine reported a setup or runtime failure
    #[error("Engine error: {0}")]
    Engine(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Deserialization error
    #[error("Deserialization error: {0}")]
    Deserialization(String),

    /// Key store error
    #[error("Key store error: {0}")]
    Store(String),

    /// Timeout waiting for a phase
    #[error("Timeout waiting for {0}")]
    Timeout(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Coarse classification of [`Error`] for callers deciding whether to re-run
/// a phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Configuration,
    ProtocolViolation,
    Precondition,
    Transport,
    Engine,
    Timeout,
    Internal,
}

impl Error {
    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidConfig(_) | Error::ThresholdNotMet { .. } => ErrorKind::Configuration,
            Error::UnknownParty(_)
            | Error::SelfAddressed(_)
            | Error::NotParticipant { .. }
            | Error::GateClosed(_) => ErrorKind::ProtocolViolation,
            Error::KeygenIncomplete
            | Error::NotStarted(_)
            | Error::AlreadyStarted(_)
            | Error::SessionClosed(_) => ErrorKind::Precondition,
            Error::Transport { .. } => ErrorKind::Transport,
            Error::EngineRejected { .. }
            | Error::Engine(_)
            | Error::Serialization(_)
            | Error::Deserialization(_) => ErrorKind::Engine,
            Error::Timeout(_) => ErrorKind::Timeout,
            Error::Store(_) | Error::Internal(_) => ErrorKind::Internal,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}
