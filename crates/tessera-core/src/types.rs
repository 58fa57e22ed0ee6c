//! Wire types shared by the coordinator and the participant agent
//!
//! Points and scalars travel as fixed-size byte arrays (compressed SEC1 points,
//! big-endian scalars) and are parsed into curve types only where arithmetic
//! happens.

use bitcode::{Decode, Encode};
use k256::{
    elliptic_curve::{sec1::ToEncodedPoint, Field, PrimeField},
    FieldBytes, ProjectivePoint, Scalar as FieldScalar,
};
use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

use crate::error::{Error, Result};

/// Member identifier inside a group (1-indexed, dense)
pub type MemberId = u64;

/// Group identifier (1-indexed, monotonic)
pub type GroupId = u64;

/// Signing identifier (1-indexed, monotonic)
pub type SigningId = u64;

/// Size of a compressed secp256k1 point
pub const POINT_SIZE: usize = 33;

/// Size of a secp256k1 scalar
pub const SCALAR_SIZE: usize = 32;

/// Compressed secp256k1 point (33 bytes)
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Encode, Decode)]
pub struct Point(#[serde(with = "hex_bytes_33")] pub [u8; POINT_SIZE]);

impl Point {
    /// Create a point from compressed bytes without validating it
    pub fn new(bytes: [u8; POINT_SIZE]) -> Self {
        Self(bytes)
    }

    /// Encode a curve point. The identity has no compressed form and is rejected.
    pub fn from_projective(point: &ProjectivePoint) -> Result<Self> {
        if *point == ProjectivePoint::IDENTITY {
            return Err(Error::InvalidPoint("point at infinity".to_string()));
        }
        let encoded = point.to_affine().to_encoded_point(true);
        let mut bytes = [0u8; POINT_SIZE];
        bytes.copy_from_slice(encoded.as_bytes());
        Ok(Self(bytes))
    }

    /// Parse into a curve point
    pub fn to_projective(&self) -> Result<ProjectivePoint> {
        let key = k256::PublicKey::from_sec1_bytes(&self.0)
            .map_err(|e| Error::InvalidPoint(format!("{}: {}", self.short(), e)))?;
        Ok(key.to_projective())
    }

    pub fn as_bytes(&self) -> &[u8; POINT_SIZE] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self> {
        let mut bytes = [0u8; POINT_SIZE];
        hex::decode_to_slice(s, &mut bytes)?;
        Ok(Self(bytes))
    }

    /// Short display format (first 4 bytes as hex)
    pub fn short(&self) -> String {
        hex::encode(&self.0[..4])
    }
}

impl std::fmt::Debug for Point {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Point({})", self.to_hex())
    }
}

impl AsRef<[u8]> for Point {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// secp256k1 scalar in big-endian form (32 bytes)
#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Encode, Decode, Zeroize)]
pub struct Scalar(#[serde(with = "hex_bytes_32")] pub [u8; SCALAR_SIZE]);

impl Scalar {
    pub fn new(bytes: [u8; SCALAR_SIZE]) -> Self {
        Self(bytes)
    }

    /// Encode a field scalar
    pub fn from_field(scalar: &FieldScalar) -> Self {
        let mut bytes = [0u8; SCALAR_SIZE];
        bytes.copy_from_slice(&scalar.to_bytes());
        Self(bytes)
    }

    /// Parse into a field scalar, rejecting values not below the group order
    pub fn to_field(&self) -> Result<FieldScalar> {
        Option::<FieldScalar>::from(FieldScalar::from_repr(FieldBytes::from(self.0)))
            .ok_or_else(|| Error::InvalidScalar("value exceeds group order".to_string()))
    }

    /// Parse into a non-zero field scalar (private keys and nonces)
    pub fn to_nonzero_field(&self) -> Result<FieldScalar> {
        let scalar = self.to_field()?;
        if bool::from(scalar.is_zero()) {
            return Err(Error::ZeroScalar);
        }
        Ok(scalar)
    }

    /// Public point `self · G`
    pub fn public_point(&self) -> Result<Point> {
        let scalar = self.to_nonzero_field()?;
        Point::from_projective(&(ProjectivePoint::GENERATOR * scalar))
    }

    pub fn as_bytes(&self) -> &[u8; SCALAR_SIZE] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self> {
        let mut bytes = [0u8; SCALAR_SIZE];
        hex::decode_to_slice(s, &mut bytes)?;
        Ok(Self(bytes))
    }
}

impl std::fmt::Debug for Scalar {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Scalars are frequently secret; never print them
        write!(f, "Scalar(..)")
    }
}

impl AsRef<[u8]> for Scalar {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Schnorr signature: nonce commitment `R` and response `s` (65 bytes on the wire)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Encode, Decode)]
pub struct Signature {
    pub r: Point,
    pub s: Scalar,
}

impl Signature {
    pub const SIZE: usize = POINT_SIZE + SCALAR_SIZE;

    pub fn new(r: Point, s: Scalar) -> Self {
        Self { r, s }
    }

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut out = [0u8; Self::SIZE];
        out[..POINT_SIZE].copy_from_slice(&self.r.0);
        out[POINT_SIZE..].copy_from_slice(&self.s.0);
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != Self::SIZE {
            return Err(Error::InvalidLength {
                expected: Self::SIZE,
                got: bytes.len(),
            });
        }
        let mut r = [0u8; POINT_SIZE];
        let mut s = [0u8; SCALAR_SIZE];
        r.copy_from_slice(&bytes[..POINT_SIZE]);
        s.copy_from_slice(&bytes[POINT_SIZE..]);
        Ok(Self::new(Point(r), Scalar(s)))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.to_bytes())
    }
}

/// Complaint signature proving knowledge of the one-time key behind `key_sym`
///
/// `a1 = k·G`, `a2 = k·P_j` and `z = k + c·x_i`, so a single response answers
/// both the base-point check and the Diffie-Hellman check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Encode, Decode)]
pub struct ComplaintSignature {
    pub a1: Point,
    pub a2: Point,
    pub z: Scalar,
}

impl ComplaintSignature {
    pub const SIZE: usize = 2 * POINT_SIZE + SCALAR_SIZE;

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut out = [0u8; Self::SIZE];
        out[..POINT_SIZE].copy_from_slice(&self.a1.0);
        out[POINT_SIZE..2 * POINT_SIZE].copy_from_slice(&self.a2.0);
        out[2 * POINT_SIZE..].copy_from_slice(&self.z.0);
        out
    }
}

/// Public nonce pair committed ahead of a signing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Encode, Decode)]
pub struct PubDe {
    pub pub_d: Point,
    pub pub_e: Point,
}

impl PubDe {
    pub fn new(pub_d: Point, pub_e: Point) -> Self {
        Self { pub_d, pub_e }
    }

    /// Stable identifier used as a storage key
    pub fn key_hex(&self) -> String {
        format!("{}{}", self.pub_d.to_hex(), self.pub_e.to_hex())
    }
}

/// Random non-zero field scalar
pub fn random_scalar<R: rand::RngCore + rand::CryptoRng>(rng: &mut R) -> FieldScalar {
    loop {
        let scalar = FieldScalar::random(&mut *rng);
        if !bool::from(scalar.is_zero()) {
            return scalar;
        }
    }
}

/// Serde helper for 32-byte arrays as hex strings
pub mod hex_bytes_32 {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8; 32], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<[u8; 32], D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(&s, &mut bytes).map_err(serde::de::Error::custom)?;
        Ok(bytes)
    }
}

/// Serde helper for 33-byte arrays as hex strings
pub mod hex_bytes_33 {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8; 33], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<[u8; 33], D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let mut bytes = [0u8; 33];
        hex::decode_to_slice(&s, &mut bytes).map_err(serde::de::Error::custom)?;
        Ok(bytes)
    }
}

/// Serde helper for variable-length byte strings as hex
pub mod hex_vec {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        hex::decode(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::OsRng;

    #[test]
    fn test_point_roundtrip_through_curve() {
        let scalar = random_scalar(&mut OsRng);
        let point = ProjectivePoint::GENERATOR * scalar;
        let encoded = Point::from_projective(&point).unwrap();
        assert_eq!(encoded.to_projective().unwrap(), point);
    }

    #[test]
    fn test_identity_is_rejected() {
        assert!(Point::from_projective(&ProjectivePoint::IDENTITY).is_err());
    }

    #[test]
    fn test_invalid_point_bytes() {
        let mut bytes = [0xffu8; POINT_SIZE];
        bytes[0] = 0x02;
        assert!(Point::new(bytes).to_projective().is_err());
    }

    #[test]
    fn test_scalar_above_order_is_rejected() {
        assert!(Scalar::new([0xff; 32]).to_field().is_err());
    }

    #[test]
    fn test_zero_scalar_has_no_public_point() {
        assert!(matches!(
            Scalar::new([0u8; 32]).public_point(),
            Err(Error::ZeroScalar)
        ));
    }

    #[test]
    fn test_signature_bytes() {
        let point = Scalar::from_field(&FieldScalar::from(7u64))
            .public_point()
            .unwrap();
        let sig = Signature::new(point, Scalar::from_field(&FieldScalar::from(9u64)));
        let parsed = Signature::from_bytes(&sig.to_bytes()).unwrap();
        assert_eq!(parsed, sig);
        assert!(Signature::from_bytes(&[0u8; 10]).is_err());
    }

    #[test]
    fn test_scalar_debug_hides_value() {
        let s = Scalar::new([0xab; 32]);
        assert!(!format!("{:?}", s).contains("ab"));
    }
}
