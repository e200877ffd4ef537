//! Feldman-VSS distributed key generation

use super::messages::{decode_point, decode_scalar, encode_point, encode_scalar, WireMessage};
use super::{lock, Outbox};
use crate::engine::{EngineConfig, EngineEvent, EngineInstance, EventStream, PhaseOutput};
use crate::types::{KeyMaterial, PartyIdentity, Phase, ProtocolMessage};
use crate::{Error, Result};
use k256::{elliptic_curve::Field, ProjectivePoint, Scalar};
use rand::rngs::OsRng;
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::{debug, warn};

#[derive(Default)]
struct KeygenState {
    /// Commitments per party id
    commitments: HashMap<String, Vec<ProjectivePoint>>,
    /// Shares addressed to this party, per sender id
    shares: HashMap<String, Scalar>,
    started: bool,
    finished: bool,
}

pub(super) struct KeygenInstance {
    config: EngineConfig,
    outbox: Outbox,
    state: Mutex<KeygenState>,
}

impl KeygenInstance {
    pub(super) fn new(config: EngineConfig) -> Self {
        Self {
            config,
            outbox: Outbox::new(),
            state: Mutex::new(KeygenState::default()),
        }
    }

    fn is_party(&self, id: &str) -> bool {
        self.config.parties.iter().any(|party| party.id == id)
    }

    /// Complete once every party's commitments and share are in
    fn try_finish(&self, state: &mut KeygenState) {
        let n = self.config.parties.len();
        if !state.started
            || state.finished
            || state.commitments.len() < n
            || state.shares.len() < n
        {
            return;
        }
        state.finished = true;

        let x = self.config.local.scalar();
        let mut secret = Scalar::ZERO;
        let mut public_key = ProjectivePoint::IDENTITY;

        for party in &self.config.parties {
            let (Some(commitments), Some(share)) = (
                state.commitments.get(&party.id),
                state.shares.get(&party.id),
            ) else {
                return;
            };

            if ProjectivePoint::GENERATOR * share != evaluate_commitments(commitments, &x) {
                warn!(from = %party.id, "Keygen share does not match its commitments");
                self.outbox.emit(EngineEvent::Failed(Error::Engine(format!(
                    "share from {} does not match its commitments",
                    party.id
                ))));
                return;
            }

            secret += share;
            public_key += commitments[0];
        }

        let key = KeyMaterial {
            party_id: self.config.local.id.clone(),
            threshold: self.config.threshold,
            public_key: encode_point(&public_key),
            secret_share: secret.to_bytes().into(),
            parties: self.config.parties.clone(),
        };
        state.shares.clear();

        debug!(party = %self.config.local.id, "Keygen shares verified");
        self.outbox.emit(EngineEvent::Completed(PhaseOutput::Key(key)));
    }
}

impl EngineInstance for KeygenInstance {
    fn start(&self) -> Result<EventStream> {
        let stream = self.outbox.take_stream(Phase::Keygen)?;
        let local = &self.config.local;

        let mut rng = OsRng;
        let polynomial: Vec<Scalar> = (0..=self.config.threshold)
            .map(|_| Scalar::random(&mut rng))
            .collect();
        let commitments: Vec<ProjectivePoint> = polynomial
            .iter()
            .map(|coefficient| ProjectivePoint::GENERATOR * coefficient)
            .collect();

        let round1 = WireMessage::Commitments {
            commitments: commitments.iter().map(encode_point).collect(),
        };
        self.outbox.emit(EngineEvent::Outbound(ProtocolMessage::broadcast(
            local.clone(),
            round1.to_bytes()?,
        )));

        for party in &self.config.parties {
            if party.id == local.id {
                continue;
            }
            let share = evaluate_polynomial(&polynomial, &party.scalar());
            let round2 = WireMessage::Share {
                share: encode_scalar(&share),
            };
            self.outbox.emit(EngineEvent::Outbound(ProtocolMessage::direct(
                local.clone(),
                party.clone(),
                round2.to_bytes()?,
            )));
        }

        let mut state = lock(&self.state)?;
        let own_share = evaluate_polynomial(&polynomial, &local.scalar());
        state.commitments.insert(local.id.clone(), commitments);
        state.shares.insert(local.id.clone(), own_share);
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
        if !self.is_party(&from.id) || from.id == self.config.local.id {
            return Ok(false);
        }

        let mut state = lock(&self.state)?;
        if state.finished {
            return Ok(true);
        }

        match message {
            WireMessage::Commitments { commitments } => {
                if !is_broadcast
                    || commitments.len() != self.config.threshold + 1
                    || state.commitments.contains_key(&from.id)
                {
                    return Ok(false);
                }
                let points = commitments
                    .iter()
                    .map(|bytes| decode_point(bytes))
                    .collect::<Result<Vec<_>>>()?;
                state.commitments.insert(from.id.clone(), points);
            }
            WireMessage::Share { share } => {
                if is_broadcast || state.shares.contains_key(&from.id) {
                    return Ok(false);
                }
                state.shares.insert(from.id.clone(), decode_scalar(&share)?);
            }
            WireMessage::Partial { .. } => return Ok(false),
        }

        self.try_finish(&mut state);
        Ok(true)
    }

    fn identity(&self) -> &PartyIdentity {
        &self.config.local
    }
}

/// Evaluate `f(x)` by Horner's rule
fn evaluate_polynomial(coefficients: &[Scalar], x: &Scalar) -> Scalar {
    coefficients
        .iter()
        .rev()
        .fold(Scalar::ZERO, |acc, coefficient| acc * x + coefficient)
}

/// Evaluate `f(x)·G` from the commitments `a_k·G`
fn evaluate_commitments(commitments: &[ProjectivePoint], x: &Scalar) -> ProjectivePoint {
    commitments
        .iter()
        .rev()
        .fold(ProjectivePoint::IDENTITY, |acc, commitment| {
            acc * x + commitment
        })
}
