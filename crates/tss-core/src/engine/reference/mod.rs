//! Reference engine
//!
//! A small working engine behind [`ProtocolEngine`] so that clusters can run
//! end to end:
//!
//! - keygen is a dealerless Feldman-VSS DKG: every party broadcasts
//!   commitments to a random degree-`t` polynomial, sends each peer the
//!   polynomial evaluated at the peer's key scalar, verifies what it receives
//!   and sums it into its secret share.
//! - signing has each signer broadcast its Lagrange-weighted share; every
//!   signer reconstructs the key, checks it against the group public key and
//!   signs deterministically (RFC 6979, SHA-256).
//!
//! Signing reveals the key to the signing subset. Use it for local clusters
//! and tests only.
//!
//! Inbound messages may arrive in any order; instances buffer until they have
//! everything a round needs.

mod keygen;
mod messages;
mod signing;

pub use messages::WireMessage;

use super::{EngineConfig, EngineEvent, EngineInstance, EventStream, PhaseParams, ProtocolEngine};
use crate::config::quorum;
use crate::types::Phase;
use crate::{Error, Result};
use keygen::KeygenInstance;
use signing::SigningInstance;
use std::sync::{Mutex, MutexGuard};
use tokio::sync::mpsc;

/// Feldman DKG plus key-reconstructing signer
#[derive(Debug, Default, Clone, Copy)]
pub struct ReferenceEngine;

impl ReferenceEngine {
    pub fn new() -> Self {
        Self
    }
}

impl ProtocolEngine for ReferenceEngine {
    fn new_instance(&self, config: EngineConfig) -> Result<Box<dyn EngineInstance>> {
        if !config.parties.iter().any(|party| party.id == config.local.id) {
            return Err(Error::NotParticipant {
                party: config.local.id.clone(),
                phase: config.phase(),
            });
        }

        match config.params.clone() {
            PhaseParams::Keygen => {
                let required = quorum(config.threshold)?;
                if config.parties.len() < required {
                    return Err(Error::ThresholdNotMet {
                        required,
                        actual: config.parties.len(),
                    });
                }
                Ok(Box::new(KeygenInstance::new(config)))
            }
            PhaseParams::Signing { message, key } => {
                Ok(Box::new(SigningInstance::new(config, message, key)?))
            }
        }
    }
}

/// Event channel of one instance; the receiving half is handed out once
struct Outbox {
    events: mpsc::UnboundedSender<EngineEvent>,
    stream: Mutex<Option<EventStream>>,
}

impl Outbox {
    fn new() -> Self {
        let (events, stream) = mpsc::unbounded_channel();
        Self {
            events,
            stream: Mutex::new(Some(stream)),
        }
    }

    fn take_stream(&self, phase: Phase) -> Result<EventStream> {
        lock(&self.stream)?
            .take()
            .ok_or_else(|| Error::Engine(format!("{phase} instance already started")))
    }

    fn emit(&self, event: EngineEvent) {
        // The session may already have dropped the stream after a terminal event.
        let _ = self.events.send(event);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>> {
    mutex
        .lock()
        .map_err(|_| Error::Internal("engine state lock poisoned".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::PhaseOutput;
    use crate::testing::parties;
    use crate::types::{Destination, KeyMaterial, PartyIdentity, RawSignature};
    use std::sync::Arc;

    /// Run instances to quiescence, routing outbound messages by hand
    fn run(
        instances: &[Box<dyn EngineInstance>],
        streams: &mut [EventStream],
        tamper: impl Fn(&PartyIdentity, &PartyIdentity, Vec<u8>) -> Vec<u8>,
    ) -> Vec<Option<EngineEvent>> {
        let mut results: Vec<Option<EngineEvent>> = (0..instances.len()).map(|_| None).collect();
        loop {
            let mut progressed = false;
            for i in 0..instances.len() {
                while let Ok(event) = streams[i].try_recv() {
                    progressed = true;
                    match event {
                        EngineEvent::Outbound(message) => {
                            let is_broadcast = message.is_broadcast();
                            for target in instances.iter() {
                                let to = target.identity();
                                let addressed = match &message.destination {
                                    Destination::All => to.id != message.origin.id,
                                    Destination::Party(party) => party.id == to.id,
                                };
                                if addressed {
                                    let payload =
                                        tamper(&message.origin, to, message.payload.clone());
                                    target
                                        .update_from_bytes(&payload, &message.origin, is_broadcast)
                                        .unwrap();
                                }
                            }
                        }
                        terminal => results[i] = Some(terminal),
                    }
                }
            }
            if !progressed {
                return results;
            }
        }
    }

    fn keygen(ids: &[&str], threshold: usize) -> Vec<KeyMaterial> {
        let all = parties(ids);
        let instances: Vec<_> = all
            .iter()
            .map(|local| {
                ReferenceEngine
                    .new_instance(EngineConfig {
                        parties: all.clone(),
                        local: local.clone(),
                        threshold,
                        params: PhaseParams::Keygen,
                    })
                    .unwrap()
            })
            .collect();
        let mut streams: Vec<_> = instances.iter().map(|i| i.start().unwrap()).collect();

        run(&instances, &mut streams, |_, _, payload| payload)
            .into_iter()
            .map(|result| match result {
                Some(EngineEvent::Completed(PhaseOutput::Key(key))) => key,
                other => panic!("keygen did not complete: {other:?}"),
            })
            .collect()
    }

    fn sign(keys: &[KeyMaterial], signer_ids: &[&str], message: &[u8]) -> Vec<RawSignature> {
        let signers: Vec<_> = keys[0]
            .parties
            .iter()
            .filter(|party| signer_ids.contains(&party.id.as_str()))
            .cloned()
            .collect();
        let instances: Vec<_> = signers
            .iter()
            .map(|local| {
                let key = keys.iter().find(|k| k.party_id == local.id).unwrap();
                ReferenceEngine
                    .new_instance(EngineConfig {
                        parties: signers.clone(),
                        local: local.clone(),
                        threshold: key.threshold,
                        params: PhaseParams::Signing {
                            message: message.to_vec(),
                            key: Arc::new(key.clone()),
                        },
                    })
                    .unwrap()
            })
            .collect();
        let mut streams: Vec<_> = instances.iter().map(|i| i.start().unwrap()).collect();

        run(&instances, &mut streams, |_, _, payload| payload)
            .into_iter()
            .map(|result| match result {
                Some(EngineEvent::Completed(PhaseOutput::Signature(signature))) => signature,
                other => panic!("signing did not complete: {other:?}"),
            })
            .collect()
    }

    #[test]
    fn test_keygen_agrees_on_public_key() {
        let keys = keygen(&["p1", "p2", "p3", "p4"], 2);
        assert_eq!(keys.len(), 4);
        for key in &keys {
            assert_eq!(key.public_key, keys[0].public_key);
            assert_eq!(key.public_key.len(), 33);
            assert_eq!(key.threshold, 2);
            assert_eq!(key.parties.len(), 4);
        }
        let shares: std::collections::HashSet<_> = keys.iter().map(|k| k.secret_share).collect();
        assert_eq!(shares.len(), 4);
    }

    #[test]
    fn test_any_threshold_subset_signs() {
        let keys = keygen(&["p1", "p2", "p3", "p4"], 2);
        let message = b"hey this is a test";

        let subsets: [&[&str]; 3] = [
            &["p1", "p2", "p3"],
            &["p2", "p3", "p4"],
            &["p1", "p2", "p3", "p4"],
        ];
        for subset in subsets {
            let signatures = sign(&keys, subset, message);
            assert_eq!(signatures.len(), subset.len());
            for signature in &signatures {
                assert!(keys[0].verify(message, &signature.r, &signature.s));
                assert_eq!(signature, &signatures[0]);
            }
        }
    }

    #[test]
    fn test_signing_below_threshold_refused() {
        let keys = keygen(&["p1", "p2", "p3"], 2);
        let signers: Vec<_> = keys[0].parties[..2].to_vec();
        let err = ReferenceEngine
            .new_instance(EngineConfig {
                parties: signers.clone(),
                local: signers[0].clone(),
                threshold: 2,
                params: PhaseParams::Signing {
                    message: b"m".to_vec(),
                    key: Arc::new(keys[0].clone()),
                },
            })
            .err()
            .unwrap();
        assert_eq!(
            err,
            Error::ThresholdNotMet {
                required: 3,
                actual: 2
            }
        );
    }

    #[test]
    fn test_tampered_share_fails_keygen() {
        let all = parties(&["a", "b", "c"]);
        let instances: Vec<_> = all
            .iter()
            .map(|local| {
                ReferenceEngine
                    .new_instance(EngineConfig {
                        parties: all.clone(),
                        local: local.clone(),
                        threshold: 1,
                        params: PhaseParams::Keygen,
                    })
                    .unwrap()
            })
            .collect();
        let mut streams: Vec<_> = instances.iter().map(|i| i.start().unwrap()).collect();

        let results = run(&instances, &mut streams, |from, to, payload| {
            if from.id == "a" && to.id == "c" {
                if let Ok(WireMessage::Share { .. }) = WireMessage::from_bytes(&payload) {
                    let forged = messages::encode_scalar(&k256::Scalar::from(42u64));
                    return WireMessage::Share { share: forged }.to_bytes().unwrap();
                }
            }
            payload
        });

        assert!(matches!(results[2], Some(EngineEvent::Failed(Error::Engine(_)))));
        assert!(matches!(
            results[1],
            Some(EngineEvent::Completed(PhaseOutput::Key(_)))
        ));
    }

    #[test]
    fn test_unexpected_updates_not_accepted() {
        let all = parties(&["a", "b", "c"]);
        let config = |local: &PartyIdentity| EngineConfig {
            parties: all.clone(),
            local: local.clone(),
            threshold: 1,
            params: PhaseParams::Keygen,
        };
        let instance = ReferenceEngine.new_instance(config(&all[0])).unwrap();
        let _stream = instance.start().unwrap();

        let share = WireMessage::Share {
            share: messages::encode_scalar(&k256::Scalar::ONE),
        }
        .to_bytes()
        .unwrap();
        // Shares travel point-to-point only.
        assert!(!instance.update_from_bytes(&share, &all[1], true).unwrap());
        assert!(instance.update_from_bytes(&share, &all[1], false).unwrap());
        // Second share from the same party.
        assert!(!instance.update_from_bytes(&share, &all[1], false).unwrap());

        let outsider = crate::testing::party("z", 9);
        assert!(!instance.update_from_bytes(&share, &outsider, false).unwrap());

        assert!(matches!(
            instance.update_from_bytes(b"\xff\x00", &all[2], false),
            Err(Error::Deserialization(_))
        ));
        assert!(instance.start().is_err());
    }

    #[test]
    fn test_early_messages_buffered_before_start() {
        let all = parties(&["a", "b"]);
        let instances: Vec<_> = all
            .iter()
            .map(|local| {
                ReferenceEngine
                    .new_instance(EngineConfig {
                        parties: all.clone(),
                        local: local.clone(),
                        threshold: 1,
                        params: PhaseParams::Keygen,
                    })
                    .unwrap()
            })
            .collect();

        // "a" runs and its output reaches "b" before "b" starts.
        let mut a_stream = instances[0].start().unwrap();
        while let Ok(EngineEvent::Outbound(message)) = a_stream.try_recv() {
            assert!(instances[1]
                .update_from_bytes(&message.payload, &all[0], message.is_broadcast())
                .unwrap());
        }

        let b_stream = instances[1].start().unwrap();
        let mut streams = vec![a_stream, b_stream];
        let results = run(&instances, &mut streams, |_, _, payload| payload);
        for result in results {
            assert!(matches!(
                result,
                Some(EngineEvent::Completed(PhaseOutput::Key(_)))
            ));
        }
    }
}
