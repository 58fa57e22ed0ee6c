//! Schnorr signatures over secp256k1 with an optional custom generator
//!
//! A signature is `(R, s)` with `R = k·B` and `s = k + c·λ·x`, where `B` is the
//! generator (the base point unless given), `c` the caller-computed challenge
//! and `λ` an optional Lagrange multiplier used by partial signatures.

use k256::{ProjectivePoint, Scalar as FieldScalar};
use rand::rngs::OsRng;
use rand::RngCore;

use crate::error::{Error, Result};
use crate::hash::hash_nonce;
use crate::types::{Point, Scalar, Signature};

/// Fresh nonce bound to the signer's secret and the message digest
///
/// Returns the nonce scalar and its public commitment `k·G`.
pub fn generate_nonce(secret: &Scalar, message_digest: &[u8]) -> Result<(FieldScalar, Point)> {
    loop {
        let mut random = [0u8; 32];
        OsRng.fill_bytes(&mut random);
        let nonce = hash_nonce(&random, &[secret.as_ref(), message_digest].concat());
        if bool::from(k256::elliptic_curve::Field::is_zero(&nonce)) {
            continue;
        }
        let pub_nonce = Point::from_projective(&(ProjectivePoint::GENERATOR * nonce))?;
        return Ok((nonce, pub_nonce));
    }
}

/// Produce `(k·B, k + c·λ·x)`
pub fn sign(
    private_key: &FieldScalar,
    challenge: &FieldScalar,
    nonce: &FieldScalar,
    generator: Option<&ProjectivePoint>,
    lagrange: Option<&FieldScalar>,
) -> Result<Signature> {
    if bool::from(k256::elliptic_curve::Field::is_zero(private_key)) {
        return Err(Error::ZeroScalar);
    }
    let base = generator.copied().unwrap_or(ProjectivePoint::GENERATOR);
    let r = Point::from_projective(&(base * nonce))?;

    let mut weighted = *challenge * private_key;
    if let Some(lambda) = lagrange {
        weighted *= lambda;
    }
    let s = *nonce + weighted;
    Ok(Signature::new(r, Scalar::from_field(&s)))
}

/// Check `s·B == R + c·λ·P`
pub fn verify(
    r: &Point,
    s: &Scalar,
    challenge: &FieldScalar,
    public_key: &Point,
    generator: Option<&ProjectivePoint>,
    lagrange: Option<&FieldScalar>,
) -> Result<()> {
    let base = generator.copied().unwrap_or(ProjectivePoint::GENERATOR);
    let r_point = r.to_projective()?;
    let pub_point = public_key.to_projective()?;
    let s_scalar = s.to_field()?;

    let mut weight = *challenge;
    if let Some(lambda) = lagrange {
        weight *= lambda;
    }

    if base * s_scalar == r_point + pub_point * weight {
        Ok(())
    } else {
        Err(Error::VerificationFailed("schnorr equation does not hold".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::random_scalar;

    #[test]
    fn test_sign_verify() {
        let x = random_scalar(&mut OsRng);
        let k = random_scalar(&mut OsRng);
        let c = FieldScalar::from(42u64);
        let pubkey = Point::from_projective(&(ProjectivePoint::GENERATOR * x)).unwrap();

        let sig = sign(&x, &c, &k, None, None).unwrap();
        verify(&sig.r, &sig.s, &c, &pubkey, None, None).unwrap();
    }

    #[test]
    fn test_wrong_challenge_fails() {
        let x = random_scalar(&mut OsRng);
        let k = random_scalar(&mut OsRng);
        let pubkey = Point::from_projective(&(ProjectivePoint::GENERATOR * x)).unwrap();

        let sig = sign(&x, &FieldScalar::from(1u64), &k, None, None).unwrap();
        assert!(verify(&sig.r, &sig.s, &FieldScalar::from(2u64), &pubkey, None, None).is_err());
    }

    #[test]
    fn test_custom_generator_and_lagrange() {
        let x = random_scalar(&mut OsRng);
        let k = random_scalar(&mut OsRng);
        let base = ProjectivePoint::GENERATOR * random_scalar(&mut OsRng);
        let lambda = FieldScalar::from(5u64);
        let c = FieldScalar::from(77u64);
        let pubkey = Point::from_projective(&(base * x)).unwrap();

        let sig = sign(&x, &c, &k, Some(&base), Some(&lambda)).unwrap();
        verify(&sig.r, &sig.s, &c, &pubkey, Some(&base), Some(&lambda)).unwrap();
        assert!(verify(&sig.r, &sig.s, &c, &pubkey, Some(&base), None).is_err());
    }

    #[test]
    fn test_zero_private_key_rejected() {
        let k = random_scalar(&mut OsRng);
        assert_eq!(
            sign(&FieldScalar::ZERO, &FieldScalar::ONE, &k, None, None),
            Err(Error::ZeroScalar)
        );
    }

    #[test]
    fn test_generated_nonces_differ() {
        let secret = Scalar::from_field(&FieldScalar::from(11u64));
        let (a, _) = generate_nonce(&secret, b"m").unwrap();
        let (b, _) = generate_nonce(&secret, b"m").unwrap();
        assert_ne!(a, b);
    }
}
