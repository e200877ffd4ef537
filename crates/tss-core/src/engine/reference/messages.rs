//! Reference engine wire messages and curve encodings

use crate::{Error, Result};
use k256::{
    elliptic_curve::{
        bigint::U256,
        ops::Reduce,
        sec1::{FromEncodedPoint, ToEncodedPoint},
    },
    AffinePoint, ProjectivePoint, Scalar,
};
use serde::{Deserialize, Serialize};

/// Payload carried by one protocol message
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WireMessage {
    /// Keygen round 1 (broadcast): Feldman commitments to the polynomial
    Commitments { commitments: Vec<Vec<u8>> },
    /// Keygen round 2 (point-to-point): polynomial evaluated for the receiver
    Share { share: Vec<u8> },
    /// Signing (broadcast): Lagrange-weighted secret share
    Partial { share: Vec<u8> },
}

impl WireMessage {
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| Error::Deserialization(e.to_string()))
    }
}

pub(crate) fn encode_point(point: &ProjectivePoint) -> Vec<u8> {
    point.to_affine().to_encoded_point(true).as_bytes().to_vec()
}

pub(crate) fn decode_point(bytes: &[u8]) -> Result<ProjectivePoint> {
    let encoded = k256::EncodedPoint::from_bytes(bytes)
        .map_err(|e| Error::Deserialization(format!("invalid point encoding: {e}")))?;
    let affine: AffinePoint = Option::from(AffinePoint::from_encoded_point(&encoded))
        .ok_or_else(|| Error::Deserialization("point not on curve".into()))?;
    Ok(ProjectivePoint::from(affine))
}

pub(crate) fn encode_scalar(scalar: &Scalar) -> Vec<u8> {
    scalar.to_bytes().to_vec()
}

pub(crate) fn decode_scalar(bytes: &[u8]) -> Result<Scalar> {
    let bytes: [u8; 32] = bytes
        .try_into()
        .map_err(|_| Error::Deserialization("invalid scalar length".into()))?;
    Ok(<Scalar as Reduce<U256>>::reduce_bytes(&bytes.into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_format_is_tagged() {
        let message = WireMessage::Share {
            share: vec![1, 2, 3],
        };
        let bytes = message.to_bytes().unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["type"], "share");

        assert!(matches!(
            WireMessage::from_bytes(&bytes).unwrap(),
            WireMessage::Share { share } if share == vec![1, 2, 3]
        ));
    }

    #[test]
    fn test_malformed_inputs_rejected() {
        assert!(matches!(
            WireMessage::from_bytes(b"\xff\x00"),
            Err(Error::Deserialization(_))
        ));
        assert!(decode_scalar(&[1; 31]).is_err());
        assert!(decode_point(&[0; 33]).is_err());
        assert!(decode_point(&[9; 5]).is_err());
    }

    #[test]
    fn test_point_encoding() {
        let point = ProjectivePoint::GENERATOR * Scalar::from(5u64);
        let bytes = encode_point(&point);
        assert_eq!(bytes.len(), 33);
        assert_eq!(decode_point(&bytes).unwrap(), point);
    }
}
