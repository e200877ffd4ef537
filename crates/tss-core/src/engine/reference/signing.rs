//! Signing by key reconstruction over the signing subset

use super::messages::{decode_point, decode_scalar, encode_scalar, WireMessage};
use super::{lock, Outbox};
use crate::config::quorum;
use crate::engine::{EngineConfig, EngineEvent, EngineInstance, EventStream, PhaseOutput};
use crate::types::{KeyMaterial, PartyIdentity, Phase, ProtocolMessage, RawSignature};
use crate::{Error, Result};
use k256::{
    ecdsa::{signature::Signer, Signature, SigningKey},
    elliptic_curve::{bigint::U256, ops::Reduce},
    ProjectivePoint, Scalar,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

#[derive(Default)]
struct SigningState {
    /// Weighted shares per signer id
    partials: HashMap<String, Scalar>,
    started: bool,
    finished: bool,
}

pub(super) struct SigningInstance {
    config: EngineConfig,
    message: Vec<u8>,
    key: Arc<KeyMaterial>,
    public_key: ProjectivePoint,
    outbox: Outbox,
    state: Mutex<SigningState>,
}

impl SigningInstance {
    pub(super) fn new(config: EngineConfig, message: Vec<u8>, key: Arc<KeyMaterial>) -> Result<Self> {
        let required = quorum(key.threshold)?;
        if config.parties.len() < required {
            return Err(Error::ThresholdNotMet {
                required,
                actual: config.parties.len(),
            });
        }
        if let Some(stranger) = config
            .parties
            .iter()
            .find(|signer| !key.parties.iter().any(|holder| holder.id == signer.id))
        {
            return Err(Error::NotParticipant {
                party: stranger.id.clone(),
                phase: Phase::Signing,
            });
        }
        let public_key = decode_point(&key.public_key)?;

        Ok(Self {
            config,
            message,
            key,
            public_key,
            outbox: Outbox::new(),
            state: Mutex::new(SigningState::default()),
        })
    }

    /// `λ_i = Π x_j / (x_j - x_i)` over the other signers
    fn lagrange_coefficient(&self) -> Result<Scalar> {
        let x_i = self.config.local.scalar();
        let mut coefficient = Scalar::ONE;
        for signer in &self.config.parties {
            if signer.id == self.config.local.id {
                continue;
            }
            let x_j = signer.scalar();
            let denominator: Option<Scalar> = (x_j - x_i).invert().into();
            let denominator = denominator
                .ok_or_else(|| Error::Engine(format!("{} shares an evaluation point", signer.id)))?;
            coefficient *= x_j * denominator;
        }
        Ok(coefficient)
    }

    fn try_finish(&self, state: &mut SigningState) {
        if !state.started || state.finished || state.partials.len() < self.config.parties.len() {
            return;
        }
        state.finished = true;

        let secret: Scalar = state.partials.values().fold(Scalar::ZERO, |acc, p| acc + p);
        state.partials.clear();

        if ProjectivePoint::GENERATOR * secret != self.public_key {
            warn!(party = %self.config.local.id, "Reconstructed key does not match the group key");
            self.outbox.emit(EngineEvent::Failed(Error::Engine(
                "reconstructed key does not match the group public key".into(),
            )));
            return;
        }

        let signing_key = match SigningKey::from_bytes(&secret.to_bytes()) {
            Ok(signing_key) => signing_key,
            Err(e) => {
                self.outbox
                    .emit(EngineEvent::Failed(Error::Engine(format!("invalid signing key: {e}"))));
                return;
            }
        };
        let signature: Signature = signing_key.sign(&self.message);
        let (r, s) = signature.split_bytes();

        debug!(party = %self.config.local.id, "Signature assembled");
        self.outbox
            .emit(EngineEvent::Completed(PhaseOutput::Signature(RawSignature {
                r: r.into(),
                s: s.into(),
            })));
    }
}

impl EngineInstance for SigningInstance {
    fn start(&self) -> Result<EventStream> {
        let stream = self.outbox.take_stream(Phase::Signing)?;
        let local = &self.config.local;

        let share = <Scalar as Reduce<U256>>::reduce_bytes(&self.key.secret_share.into());
        let weighted = self.lagrange_coefficient()? * share;

        let partial = WireMessage::Partial {
            share: encode_scalar(&weighted),
        };
        self.outbox.emit(EngineEvent::Outbound(ProtocolMessage::broadcast(
            local.clone(),
            partial.to_bytes()?,
        )));

        let mut state = lock(&self.state)?;
        state.partials.insert(local.id.clone(), weighted);
        state.started = true;
        self.try_finish(&mut state);

        Ok(stream)
    }

    fn update_from_bytes(
        &self,
        payload: &[u8],
        from: &PartyIdentity,
        is_broadcast: bool,
    ) -> Result<bool> {
        let message = WireMessage::from_bytes(payload)?;
        let is_signer = self.config.parties.iter().any(|signer| signer.id == from.id);
        if !is_signer || from.id == self.config.local.id {
            return Ok(false);
        }

        let mut state = lock(&self.state)?;
        if state.finished {
            return Ok(true);
        }

        let WireMessage::Partial { share } = message else {
            return Ok(false);
        };
        if !is_broadcast || state.partials.contains_key(&from.id) {
            return Ok(false);
        }
        state.partials.insert(from.id.clone(), decode_scalar(&share)?);

        self.try_finish(&mut state);
        Ok(true)
    }

    fn identity(&self) -> &PartyIdentity {
        &self.config.local
    }
}
