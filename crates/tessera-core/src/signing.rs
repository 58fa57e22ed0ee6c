//! FROST-style threshold signing
//!
//! Each assigned member contributes `R_i = D_i + ρ_i·E_i`; the group nonce is
//! `R = Σ R_i` and member `i` answers with `z_i = d_i + ρ_i·e_i + λ_i·s_i·c`.
//! The aggregate `(R, Σ z_i)` verifies as a plain Schnorr signature under the
//! group key.

use k256::{elliptic_curve::Field, ProjectivePoint, Scalar as FieldScalar};

use crate::error::{Error, Result};
use crate::hash::{hash_binding_factor, hash_challenge, hash_to_scalar, CONTEXT_STRING};
use crate::schnorr;
use crate::types::{MemberId, Point, PubDe, Scalar, Signature};

/// Private nonce pair with its public commitment
#[derive(Debug, Clone)]
pub struct PrivateDe {
    pub priv_d: Scalar,
    pub priv_e: Scalar,
    pub pub_de: PubDe,
}

/// Derive the nonce pair number `index` from a long-lived secret
///
/// The derivation is deterministic so a pair can be regenerated for audit,
/// while remaining unpredictable without the secret.
pub fn derive_de(secret: &[u8], index: u64) -> Result<PrivateDe> {
    let d = derive_nonzero(secret, b"deD", index);
    let e = derive_nonzero(secret, b"deE", index);
    let pub_d = Point::from_projective(&(ProjectivePoint::GENERATOR * d))?;
    let pub_e = Point::from_projective(&(ProjectivePoint::GENERATOR * e))?;
    Ok(PrivateDe {
        priv_d: Scalar::from_field(&d),
        priv_e: Scalar::from_field(&e),
        pub_de: PubDe::new(pub_d, pub_e),
    })
}

fn derive_nonzero(secret: &[u8], label: &[u8], index: u64) -> FieldScalar {
    let mut counter = 0u32;
    loop {
        let scalar = hash_to_scalar(&[
            CONTEXT_STRING,
            label,
            secret,
            &index.to_be_bytes(),
            &counter.to_be_bytes(),
        ]);
        if !bool::from(scalar.is_zero()) {
            return scalar;
        }
        counter += 1;
    }
}

/// Lagrange coefficient of `mid` at zero over `members`
pub fn compute_lagrange_coefficient(mid: MemberId, members: &[MemberId]) -> Result<Scalar> {
    if !members.contains(&mid) {
        return Err(Error::InvalidMemberId(mid));
    }
    let distinct: std::collections::BTreeSet<&MemberId> = members.iter().collect();
    if distinct.len() != members.len() {
        return Err(Error::InvalidOrder(format!("duplicate member in {:?}", members)));
    }
    let xi = FieldScalar::from(mid);
    let mut numerator = FieldScalar::ONE;
    let mut denominator = FieldScalar::ONE;
    for &other in members {
        if other == mid {
            continue;
        }
        if other == 0 {
            return Err(Error::InvalidMemberId(other));
        }
        let xj = FieldScalar::from(other);
        numerator *= xj;
        denominator *= xj - xi;
    }
    let inverse = Option::<FieldScalar>::from(denominator.invert())
        .ok_or_else(|| Error::InvalidOrder("singular denominator".to_string()))?;
    Ok(Scalar::from_field(&(numerator * inverse)))
}

/// Commitment `B = ‖ BE(mid) ‖ D ‖ E` over strictly increasing member ids
pub fn compute_commitment(mids: &[MemberId], des: &[PubDe]) -> Result<Vec<u8>> {
    if mids.len() != des.len() {
        return Err(Error::InvalidLength {
            expected: mids.len(),
            got: des.len(),
        });
    }
    let mut commitment = Vec::with_capacity(mids.len() * (8 + 2 * crate::types::POINT_SIZE));
    let mut prev = 0u64;
    for (mid, de) in mids.iter().zip(des) {
        if *mid <= prev {
            return Err(Error::InvalidOrder(format!("member {} follows {}", mid, prev)));
        }
        commitment.extend_from_slice(&mid.to_be_bytes());
        commitment.extend_from_slice(de.pub_d.as_ref());
        commitment.extend_from_slice(de.pub_e.as_ref());
        prev = *mid;
    }
    Ok(commitment)
}

pub fn compute_own_binding_factor(mid: MemberId, data: &[u8], commitment: &[u8]) -> Scalar {
    Scalar::from_field(&hash_binding_factor(mid, data, commitment))
}

/// `D + ρ·E`
pub fn compute_own_pub_nonce(pub_de: &PubDe, binding_factor: &Scalar) -> Result<Point> {
    let rho = binding_factor.to_field()?;
    let nonce = pub_de.pub_d.to_projective()? + pub_de.pub_e.to_projective()? * rho;
    Point::from_projective(&nonce)
}

/// `d + ρ·e`
pub fn compute_own_priv_nonce(priv_d: &Scalar, priv_e: &Scalar, binding_factor: &Scalar) -> Result<Scalar> {
    let nonce = priv_d.to_field()? + binding_factor.to_field()? * priv_e.to_field()?;
    Ok(Scalar::from_field(&nonce))
}

/// `R = Σ R_i`
pub fn compute_group_public_nonce(own_pub_nonces: &[Point]) -> Result<Point> {
    crate::dkg::sum_points(own_pub_nonces)
}

/// Partial signature of one assigned member
pub fn sign_signing(
    group_pub_nonce: &Point,
    group_pub_key: &Point,
    data: &[u8],
    lagrange: &Scalar,
    own_priv_nonce: &Scalar,
    own_priv_key: &Scalar,
) -> Result<Signature> {
    let challenge = hash_challenge(group_pub_nonce, group_pub_key, data);
    schnorr::sign(
        &own_priv_key.to_nonzero_field()?,
        &challenge,
        &own_priv_nonce.to_nonzero_field()?,
        None,
        Some(&lagrange.to_field()?),
    )
}

/// Check one partial signature against the member's own public key
pub fn verify_signing_signature(
    group_pub_nonce: &Point,
    group_pub_key: &Point,
    data: &[u8],
    lagrange: &Scalar,
    signature: &Signature,
    own_pub_key: &Point,
) -> Result<()> {
    let challenge = hash_challenge(group_pub_nonce, group_pub_key, data);
    schnorr::verify(
        &signature.r,
        &signature.s,
        &challenge,
        own_pub_key,
        None,
        Some(&lagrange.to_field()?),
    )
}

/// Sum the `R` and `s` halves of the partial signatures
pub fn combine_signatures(signatures: &[Signature]) -> Result<Signature> {
    if signatures.is_empty() {
        return Err(Error::InvalidLength {
            expected: 1,
            got: 0,
        });
    }
    let rs: Vec<Point> = signatures.iter().map(|s| s.r).collect();
    let r = crate::dkg::sum_points(&rs)?;
    let mut s = FieldScalar::ZERO;
    for sig in signatures {
        s += sig.s.to_field()?;
    }
    Ok(Signature::new(r, Scalar::from_field(&s)))
}

/// Verify an aggregate signature under the group key
pub fn verify_group_signing_signature(group_pub_key: &Point, data: &[u8], signature: &Signature) -> Result<()> {
    let challenge = hash_challenge(&signature.r, group_pub_key, data);
    schnorr::verify(&signature.r, &signature.s, &challenge, group_pub_key, None, None)
}
