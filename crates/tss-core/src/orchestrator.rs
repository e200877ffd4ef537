//! Per-party orchestrator
//!
//! Owns one party's view of the cluster: the directory, its own identity, the
//! signing subset, and the current session of each phase. It is also the
//! transport receiver, so inbound messages are checked against the
//! directory, held at the phase's readiness gate and then handed to the
//! session.

use crate::config::{quorum, OrchestratorConfig};
use crate::directory::PartyDirectory;
use crate::engine::{PhaseParams, ProtocolEngine};
use crate::gate::ReadinessGate;
use crate::session::{PhaseOutcome, Session, SessionState};
use crate::store::KeyStore;
use crate::transport::{Envelope, TransportReceiver, TransportSender};
use crate::types::{KeyMaterial, PartyIdentity, Phase, SignatureResult};
use crate::{Error, Result};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, instrument, warn};

/// Drives keygen and signing for the local party
pub struct Orchestrator {
    directory: Arc<PartyDirectory>,
    local: PartyIdentity,
    config: OrchestratorConfig,
    /// Signing subset, in directory order
    signers: Vec<PartyIdentity>,
    engine: Arc<dyn ProtocolEngine>,
    transport: Arc<dyn TransportSender>,
    key_store: Option<Arc<dyn KeyStore>>,
    keygen: ReadinessGate<Session>,
    signing: ReadinessGate<Session>,
    /// Serializes phase starts
    starting: Mutex<()>,
}

impl Orchestrator {
    pub fn new(
        directory: Arc<PartyDirectory>,
        local_id: &str,
        config: OrchestratorConfig,
        engine: Arc<dyn ProtocolEngine>,
        transport: Arc<dyn TransportSender>,
    ) -> Result<Self> {
        config.validate(&directory)?;
        let local = directory.require(local_id)?.clone();
        let signers = config.signing_parties(&directory)?;

        Ok(Self {
            keygen: ReadinessGate::new(Phase::Keygen, config.readiness_retry),
            signing: ReadinessGate::new(Phase::Signing, config.readiness_retry),
            directory,
            local,
            config,
            signers,
            engine,
            transport,
            key_store: None,
            starting: Mutex::new(()),
        })
    }

    /// Hand completed key material to `store`
    pub fn with_key_store(mut self, store: Arc<dyn KeyStore>) -> Self {
        self.key_store = Some(store);
        self
    }

    pub fn local(&self) -> &PartyIdentity {
        &self.local
    }

    pub fn directory(&self) -> &PartyDirectory {
        &self.directory
    }

    pub fn signers(&self) -> &[PartyIdentity] {
        &self.signers
    }

    /// Whether the local party is in the signing subset
    pub fn is_signer(&self) -> bool {
        self.signers.iter().any(|signer| signer.id == self.local.id)
    }

    /// State of the current session of `phase`, if one was started
    pub fn state(&self, phase: Phase) -> Option<SessionState> {
        self.gate(phase).current().map(|session| session.state())
    }

    /// Key material from a completed keygen
    pub fn key_material(&self) -> Option<Arc<KeyMaterial>> {
        self.keygen.current().and_then(|session| session.key_material())
    }

    /// Start keygen across the whole directory
    #[instrument(skip_all, fields(party = %self.local.id))]
    pub fn start_keygen(&self) -> Result<()> {
        let params = PhaseParams::Keygen;
        self.start_phase(self.directory.parties().to_vec(), self.config.threshold, params)
    }

    /// Block until keygen completes or fails
    pub async fn wait_for_keygen(&self) -> Result<Arc<KeyMaterial>> {
        match self.wait_for(Phase::Keygen).await? {
            PhaseOutcome::Keygen(key) => Ok(key),
            PhaseOutcome::Signing(_) => Err(Error::Internal("keygen produced a signature".into())),
        }
    }

    /// Start keygen and wait for its key material
    pub async fn keygen(&self) -> Result<Arc<KeyMaterial>> {
        self.start_keygen()?;
        self.wait_for_keygen().await
    }

    /// Start signing `message` across the signing subset
    ///
    /// Requires completed keygen and a local party inside the subset.
    #[instrument(skip_all, fields(party = %self.local.id, bytes = message.len()))]
    pub fn start_signing(&self, message: &[u8]) -> Result<()> {
        if !self.is_signer() {
            return Err(Error::NotParticipant {
                party: self.local.id.clone(),
                phase: Phase::Signing,
            });
        }
        let key = self.key_material().ok_or(Error::KeygenIncomplete)?;
        let required = quorum(key.threshold)?;
        if self.signers.len() < required {
            return Err(Error::ThresholdNotMet {
                required,
                actual: self.signers.len(),
            });
        }

        let threshold = key.threshold;
        let params = PhaseParams::Signing {
            message: message.to_vec(),
            key,
        };
        self.start_phase(self.signers.clone(), threshold, params)
    }

    /// Block until signing completes or fails
    pub async fn wait_for_signing(&self) -> Result<SignatureResult> {
        match self.wait_for(Phase::Signing).await? {
            PhaseOutcome::Signing(signature) => Ok(signature),
            PhaseOutcome::Keygen(_) => Err(Error::Internal("signing produced key material".into())),
        }
    }

    /// Start signing and wait for the signature
    pub async fn sign(&self, message: &[u8]) -> Result<SignatureResult> {
        self.start_signing(message)?;
        self.wait_for_signing().await
    }

    fn gate(&self, phase: Phase) -> &ReadinessGate<Session> {
        match phase {
            Phase::Keygen => &self.keygen,
            Phase::Signing => &self.signing,
        }
    }

    /// Create, start and publish a session
    ///
    /// A phase can be started again only after its previous session failed.
    /// The session is published even when its engine fails to start, so held
    /// inbound messages see it closed instead of waiting forever.
    fn start_phase(
        &self,
        participants: Vec<PartyIdentity>,
        threshold: usize,
        params: PhaseParams,
    ) -> Result<()> {
        let _starting = self
            .starting
            .lock()
            .map_err(|_| Error::Internal("phase start lock poisoned".into()))?;

        let mut session = Session::new(self.local.clone(), participants, threshold, params);
        let phase = session.phase();
        let gate = self.gate(phase);

        if let Some(previous) = gate.current() {
            if previous.state() != SessionState::Failed {
                return Err(Error::AlreadyStarted(phase));
            }
            info!(phase = %phase, previous = %previous.id(), "Retrying failed phase");
        }

        if let Some(store) = &self.key_store {
            session = session.with_key_store(Arc::clone(store));
        }
        let session = Arc::new(session);
        let started = session.start(self.engine.as_ref(), Arc::clone(&self.transport));
        gate.open(Arc::clone(&session));
        started
    }

    async fn wait_for(&self, phase: Phase) -> Result<PhaseOutcome> {
        let session = self.gate(phase).current().ok_or(Error::NotStarted(phase))?;
        session.wait(self.config.phase_timeout).await
    }
}

impl Orchestrator {
    /// Resolve the sender of an inbound envelope
    ///
    /// `None` means the envelope is our own and needs no delivery.
    fn screen(&self, envelope: &Envelope) -> Result<Option<PartyIdentity>> {
        if envelope.from == self.local.id {
            debug!("Own message looped back, ignoring");
            return Ok(None);
        }
        let from = self.directory.require(&envelope.from)?.clone();

        if envelope.phase == Phase::Signing {
            if !self.signers.iter().any(|signer| signer.id == from.id) {
                warn!("Signing message from outside the signing subset");
                return Err(Error::NotParticipant {
                    party: from.id,
                    phase: Phase::Signing,
                });
            }
            if !self.is_signer() {
                warn!("Signing message for a party that never signs");
                return Err(Error::GateClosed(Phase::Signing));
            }
        }
        Ok(Some(from))
    }
}

#[async_trait]
impl TransportReceiver for Orchestrator {
    #[instrument(
        skip_all,
        fields(party = %self.local.id, phase = %envelope.phase, from = %envelope.from)
    )]
    fn admit(&self, envelope: &Envelope) -> Result<()> {
        self.screen(envelope).map(|_| ())
    }

    #[instrument(
        skip_all,
        fields(party = %self.local.id, phase = %envelope.phase, from = %envelope.from)
    )]
    async fn on_message(&self, envelope: Envelope) -> Result<()> {
        let Some(from) = self.screen(&envelope)? else {
            return Ok(());
        };

        let session = self.gate(envelope.phase).wait().await?;
        session.deliver(&from, &envelope.payload, envelope.is_broadcast)
    }
}
