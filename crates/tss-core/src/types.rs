//! Core types shared by the directory, router and sessions

use k256::{
    ecdsa::{self, signature::Verifier, VerifyingKey},
    elliptic_curve::{bigint::U256, ops::Reduce},
    Scalar,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Protocol phase a session or message belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Keygen,
    Signing,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Keygen => "keygen",
            Phase::Signing => "signing",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of one participant, fixed once the directory is built
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PartyIdentity {
    /// Stable unique id
    pub id: String,
    /// Display name
    pub name: String,
    /// Sort key (big-endian scalar bytes)
    pub key: [u8; 32],
    /// Position in the sorted party sequence
    pub index: usize,
}

impl PartyIdentity {
    /// The sort key as a curve scalar
    pub fn scalar(&self) -> Scalar {
        <Scalar as Reduce<U256>>::reduce_bytes(&self.key.into())
    }
}

impl fmt::Display for PartyIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.id, self.index)
    }
}

/// Where an outbound message is headed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    /// Every other party taking part in the phase
    All,
    /// Exactly one peer
    Party(PartyIdentity),
}

/// Outbound message produced by an engine
#[derive(Debug, Clone)]
pub struct ProtocolMessage {
    pub origin: PartyIdentity,
    pub destination: Destination,
    pub payload: Vec<u8>,
}

impl ProtocolMessage {
    pub fn broadcast(origin: PartyIdentity, payload: Vec<u8>) -> Self {
        Self {
            origin,
            destination: Destination::All,
            payload,
        }
    }

    pub fn direct(origin: PartyIdentity, to: PartyIdentity, payload: Vec<u8>) -> Self {
        Self {
            origin,
            destination: Destination::Party(to),
            payload,
        }
    }

    pub fn is_broadcast(&self) -> bool {
        matches!(self.destination, Destination::All)
    }
}

/// Key material held by a party after keygen
#[derive(Clone, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct KeyMaterial {
    /// Owning party id
    #[zeroize(skip)]
    pub party_id: String,

    /// Threshold the key was generated for
    pub threshold: usize,

    /// Group public key (compressed SEC1)
    #[zeroize(skip)]
    pub public_key: Vec<u8>,

    /// This party's secret share
    pub secret_share: [u8; 32],

    /// Parties holding shares of this key, in sorted order
    #[zeroize(skip)]
    pub parties: Vec<PartyIdentity>,
}

impl KeyMaterial {
    /// Verify an ECDSA signature over `message` (SHA-256) against the group key
    pub fn verify(&self, message: &[u8], r: &[u8; 32], s: &[u8; 32]) -> bool {
        let Ok(key) = VerifyingKey::from_sec1_bytes(&self.public_key) else {
            return false;
        };
        let Ok(signature) = ecdsa::Signature::from_scalars(
            *k256::FieldBytes::from_slice(r),
            *k256::FieldBytes::from_slice(s),
        ) else {
            return false;
        };
        key.verify(message, &signature).is_ok()
    }
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("party_id", &self.party_id)
            .field("threshold", &self.threshold)
            .field("public_key", &hex::encode(&self.public_key))
            .field("parties", &self.parties.len())
            .finish_non_exhaustive()
    }
}

/// Raw signature as emitted by an engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawSignature {
    pub r: [u8; 32],
    pub s: [u8; 32],
}

/// Signature produced by a signing session, with its locally derived validity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureResult {
    /// R component
    pub r: [u8; 32],
    /// S component
    pub s: [u8; 32],
    /// Whether the signature verifies against the keygen public key
    pub valid: bool,
}

impl SignatureResult {
    /// Convert to bytes (r || s)
    pub fn to_bytes(&self) -> [u8; 64] {
        let mut bytes = [0u8; 64];
        bytes[..32].copy_from_slice(&self.r);
        bytes[32..].copy_from_slice(&self.s);
        bytes
    }

    /// Convert to DER format
    pub fn to_der(&self) -> crate::Result<Vec<u8>> {
        let sig = ecdsa::Signature::from_scalars(
            *k256::FieldBytes::from_slice(&self.r),
            *k256::FieldBytes::from_slice(&self.s),
        )
        .map_err(|e| crate::Error::Serialization(e.to_string()))?;
        Ok(sig.to_der().as_bytes().to_vec())
    }
}
