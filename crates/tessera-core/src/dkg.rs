//! Pedersen-style DKG primitives
//!
//! Each member samples a polynomial of degree `T − 1`, commits to its
//! coefficients, proves knowledge of the constant term and of a one-time key,
//! and hands every other member an evaluation of its polynomial encrypted under
//! an ECDH key. Misbehaviour is proven with a complaint signature that lets
//! anyone recompute the shared key and check the decrypted share.

use k256::{ProjectivePoint, Scalar as FieldScalar};
use rand::rngs::OsRng;
use zeroize::Zeroize;

use crate::error::{Error, Result};
use crate::hash::{
    hash, hash_round1_a0, hash_round1_one_time, hash_round3_complaint, hash_round3_own_pub_key,
    hash_to_scalar,
};
use crate::schnorr::{self, generate_nonce};
use crate::types::{random_scalar, ComplaintSignature, MemberId, Point, Scalar, Signature};

/// Private key and its public point
#[derive(Debug, Clone)]
pub struct KeyPair {
    pub private_key: Scalar,
    pub public_key: Point,
}

impl KeyPair {
    /// Sample a random key pair
    pub fn generate() -> Result<Self> {
        let private = random_scalar(&mut OsRng);
        let public_key = Point::from_projective(&(ProjectivePoint::GENERATOR * private))?;
        Ok(Self {
            private_key: Scalar::from_field(&private),
            public_key,
        })
    }
}

impl Drop for KeyPair {
    fn drop(&mut self) {
        self.private_key.zeroize();
    }
}

/// Everything a member produces in round 1, secret and public halves together
#[derive(Debug, Clone)]
pub struct Round1Data {
    pub one_time_priv: Scalar,
    pub one_time_pub: Point,
    pub one_time_sig: Signature,
    pub a0_sig: Signature,
    /// Polynomial coefficients `a_0 .. a_{T-1}`
    pub coefficients: Vec<Scalar>,
    /// Commitments `a_k·G`
    pub coefficient_commits: Vec<Point>,
}

impl Drop for Round1Data {
    fn drop(&mut self) {
        self.one_time_priv.zeroize();
        for c in &mut self.coefficients {
            c.zeroize();
        }
    }
}

/// Generate round-1 material for member `mid` of a `threshold`-of-N group
pub fn generate_round1_data(mid: MemberId, threshold: u64, dkg_context: &[u8]) -> Result<Round1Data> {
    if threshold == 0 {
        return Err(Error::InvalidLength {
            expected: 1,
            got: 0,
        });
    }

    let one_time = KeyPair::generate()?;
    let one_time_sig = sign_one_time(mid, dkg_context, &one_time.public_key, &one_time.private_key)?;

    let mut coefficients = Vec::with_capacity(threshold as usize);
    let mut coefficient_commits = Vec::with_capacity(threshold as usize);
    for _ in 0..threshold {
        let kp = KeyPair::generate()?;
        coefficients.push(kp.private_key);
        coefficient_commits.push(kp.public_key);
    }

    let a0_sig = sign_a0(mid, dkg_context, &coefficient_commits[0], &coefficients[0])?;

    Ok(Round1Data {
        one_time_priv: one_time.private_key,
        one_time_pub: one_time.public_key,
        one_time_sig,
        a0_sig,
        coefficients,
        coefficient_commits,
    })
}

/// Proof of knowledge of `a_0`
pub fn sign_a0(mid: MemberId, dkg_context: &[u8], a0_pub: &Point, a0_priv: &Scalar) -> Result<Signature> {
    let digest = hash(&[b"round1A0", &mid.to_be_bytes(), dkg_context, a0_pub.as_ref()]);
    let (nonce, pub_nonce) = generate_nonce(a0_priv, &digest)?;
    let challenge = hash_round1_a0(&pub_nonce, mid, dkg_context, a0_pub);
    schnorr::sign(&a0_priv.to_nonzero_field()?, &challenge, &nonce, None, None)
}

pub fn verify_a0_signature(mid: MemberId, dkg_context: &[u8], signature: &Signature, a0_pub: &Point) -> Result<()> {
    let challenge = hash_round1_a0(&signature.r, mid, dkg_context, a0_pub);
    schnorr::verify(&signature.r, &signature.s, &challenge, a0_pub, None, None)
}

/// Proof of knowledge of the one-time private key
pub fn sign_one_time(
    mid: MemberId,
    dkg_context: &[u8],
    one_time_pub: &Point,
    one_time_priv: &Scalar,
) -> Result<Signature> {
    let digest = hash(&[b"round1OneTime", &mid.to_be_bytes(), dkg_context, one_time_pub.as_ref()]);
    let (nonce, pub_nonce) = generate_nonce(one_time_priv, &digest)?;
    let challenge = hash_round1_one_time(&pub_nonce, mid, dkg_context, one_time_pub);
    schnorr::sign(&one_time_priv.to_nonzero_field()?, &challenge, &nonce, None, None)
}

pub fn verify_one_time_signature(
    mid: MemberId,
    dkg_context: &[u8],
    signature: &Signature,
    one_time_pub: &Point,
) -> Result<()> {
    let challenge = hash_round1_one_time(&signature.r, mid, dkg_context, one_time_pub);
    schnorr::verify(&signature.r, &signature.s, &challenge, one_time_pub, None, None)
}

/// Position of the share for `to` inside the share list sent by `from`
///
/// A sender skips itself, so receivers below it shift down by one and
/// receivers above it by two (ids are 1-indexed, slots 0-indexed).
pub fn find_member_slot(from: MemberId, to: MemberId) -> Result<usize> {
    if from == 0 || to == 0 || from == to {
        return Err(Error::InvalidMemberId(to));
    }
    if to < from {
        Ok((to - 1) as usize)
    } else {
        Ok((to - 2) as usize)
    }
}

/// Evaluate the polynomial at `x`
fn solve_scalar_polynomial(coefficients: &[FieldScalar], x: &FieldScalar) -> FieldScalar {
    // Horner, highest degree first
    coefficients
        .iter()
        .rev()
        .fold(FieldScalar::ZERO, |acc, c| acc * x + c)
}

/// Evaluate the committed polynomial `Σ C_k·x^k`
fn solve_point_polynomial(commits: &[ProjectivePoint], x: &FieldScalar) -> ProjectivePoint {
    commits
        .iter()
        .rev()
        .fold(ProjectivePoint::IDENTITY, |acc, c| acc * x + c)
}

fn parse_scalars(values: &[Scalar]) -> Result<Vec<FieldScalar>> {
    values.iter().map(Scalar::to_field).collect()
}

fn parse_points(values: &[Point]) -> Result<Vec<ProjectivePoint>> {
    values.iter().map(Point::to_projective).collect()
}

/// Share `f(mid)` of a polynomial given by its coefficients
pub fn compute_secret_share(coefficients: &[Scalar], mid: MemberId) -> Result<Scalar> {
    if mid == 0 {
        return Err(Error::InvalidMemberId(mid));
    }
    let mut coeffs = parse_scalars(coefficients)?;
    let share = solve_scalar_polynomial(&coeffs, &FieldScalar::from(mid));
    coeffs.zeroize();
    Ok(Scalar::from_field(&share))
}

/// ECDH key `priv·other_pub`
pub fn compute_key_sym(private_key: &Scalar, other_pub: &Point) -> Result<Point> {
    let private = private_key.to_nonzero_field()?;
    Point::from_projective(&(other_pub.to_projective()? * private))
}

/// `H(key_sym) + value`
pub fn encrypt(value: &Scalar, key_sym: &Point) -> Result<Scalar> {
    let k = hash_to_scalar(&[key_sym.as_ref()]);
    Ok(Scalar::from_field(&(k + value.to_field()?)))
}

/// `enc − H(key_sym)`
pub fn decrypt(enc_value: &Scalar, key_sym: &Point) -> Result<Scalar> {
    let k = hash_to_scalar(&[key_sym.as_ref()]);
    Ok(Scalar::from_field(&(enc_value.to_field()? - k)))
}

/// Encrypted shares for every other member, ordered by [`find_member_slot`]
///
/// `one_time_pubs[i]` is the one-time key of member `i + 1`.
pub fn compute_encrypted_secret_shares(
    mid: MemberId,
    one_time_priv: &Scalar,
    one_time_pubs: &[Point],
    coefficients: &[Scalar],
) -> Result<Vec<Scalar>> {
    let size = one_time_pubs.len() as u64;
    if mid == 0 || mid > size {
        return Err(Error::InvalidMemberId(mid));
    }

    let mut shares = Vec::with_capacity(one_time_pubs.len().saturating_sub(1));
    for to in 1..=size {
        if to == mid {
            continue;
        }
        let share = compute_secret_share(coefficients, to)?;
        let key_sym = compute_key_sym(one_time_priv, &one_time_pubs[(to - 1) as usize])?;
        shares.push(encrypt(&share, &key_sym)?);
    }
    Ok(shares)
}

/// `Σ C_k·mid^k`, the public image of the share destined to `mid`
pub fn compute_secret_share_commit(commits: &[Point], mid: MemberId) -> Result<Point> {
    let points = parse_points(commits)?;
    Point::from_projective(&solve_point_polynomial(&points, &FieldScalar::from(mid)))
}

/// Check `share·G == Σ C_k·mid^k`
pub fn verify_secret_share(mid: MemberId, share: &Scalar, commits: &[Point]) -> Result<()> {
    let lhs = ProjectivePoint::GENERATOR * share.to_field()?;
    let points = parse_points(commits)?;
    if lhs == solve_point_polynomial(&points, &FieldScalar::from(mid)) {
        Ok(())
    } else {
        Err(Error::InvalidSecretShare)
    }
}

/// Point-wise sum, used to accumulate commitments across members
pub fn sum_points(points: &[Point]) -> Result<Point> {
    let total = parse_points(points)?
        .into_iter()
        .fold(ProjectivePoint::IDENTITY, |acc, p| acc + p);
    Point::from_projective(&total)
}

/// Add two points
pub fn add_points(a: &Point, b: &Point) -> Result<Point> {
    Point::from_projective(&(a.to_projective()? + b.to_projective()?))
}

/// `Y_i = Σ_k mid^k · AccCommit_k`
pub fn compute_own_public_key(accumulated_commits: &[Point], mid: MemberId) -> Result<Point> {
    if mid == 0 {
        return Err(Error::InvalidMemberId(mid));
    }
    compute_secret_share_commit(accumulated_commits, mid)
}

/// `Y = Σ_j C_{j,0}`
pub fn compute_group_public_key(a0_commits: &[Point]) -> Result<Point> {
    sum_points(a0_commits)
}

/// `s_i = Σ_j f_j(i)`
pub fn compute_own_private_key(shares: &[Scalar]) -> Result<Scalar> {
    let mut values = parse_scalars(shares)?;
    let sum = values.iter().fold(FieldScalar::ZERO, |acc, s| acc + s);
    values.zeroize();
    if bool::from(k256::elliptic_curve::Field::is_zero(&sum)) {
        return Err(Error::ZeroScalar);
    }
    Ok(Scalar::from_field(&sum))
}

/// Signature over the member's own public key, the round-3 confirm
pub fn sign_own_pub_key(
    mid: MemberId,
    dkg_context: &[u8],
    own_pub: &Point,
    own_priv: &Scalar,
) -> Result<Signature> {
    let digest = hash(&[b"round3OwnPubKey", &mid.to_be_bytes(), dkg_context, own_pub.as_ref()]);
    let (nonce, pub_nonce) = generate_nonce(own_priv, &digest)?;
    let challenge = hash_round3_own_pub_key(&pub_nonce, mid, dkg_context, own_pub);
    schnorr::sign(&own_priv.to_nonzero_field()?, &challenge, &nonce, None, None)
}

pub fn verify_own_pub_key_sig(mid: MemberId, dkg_context: &[u8], signature: &Signature, own_pub: &Point) -> Result<()> {
    let challenge = hash_round3_own_pub_key(&signature.r, mid, dkg_context, own_pub);
    schnorr::verify(&signature.r, &signature.s, &challenge, own_pub, None, None)
}

/// Complaint by `i` against `j`: reveals `key_sym = x_i·P_j` with a proof
pub fn sign_complaint(
    one_time_pub_i: &Point,
    one_time_pub_j: &Point,
    one_time_priv_i: &Scalar,
) -> Result<(ComplaintSignature, Point)> {
    let key_sym = compute_key_sym(one_time_priv_i, one_time_pub_j)?;
    let digest = hash(&[
        b"round3Complain",
        one_time_pub_i.as_ref(),
        one_time_pub_j.as_ref(),
        key_sym.as_ref(),
    ]);
    let (nonce, a1) = generate_nonce(one_time_priv_i, &digest)?;
    let a2 = Point::from_projective(&(one_time_pub_j.to_projective()? * nonce))?;

    let challenge = hash_round3_complaint(&a1, &a2, one_time_pub_i, one_time_pub_j, &key_sym);
    let z = nonce + challenge * one_time_priv_i.to_nonzero_field()?;

    Ok((
        ComplaintSignature {
            a1,
            a2,
            z: Scalar::from_field(&z),
        },
        key_sym,
    ))
}

/// Check `z·G == A1 + c·P_i` and `z·P_j == A2 + c·key_sym`
pub fn verify_complaint_signature(
    one_time_pub_i: &Point,
    one_time_pub_j: &Point,
    key_sym: &Point,
    signature: &ComplaintSignature,
) -> Result<()> {
    let challenge = hash_round3_complaint(
        &signature.a1,
        &signature.a2,
        one_time_pub_i,
        one_time_pub_j,
        key_sym,
    );
    schnorr::verify(&signature.a1, &signature.z, &challenge, one_time_pub_i, None, None)?;
    let generator = one_time_pub_j.to_projective()?;
    schnorr::verify(&signature.a2, &signature.z, &challenge, key_sym, Some(&generator), None)
}

/// Succeeds only when the complaint is substantiated
///
/// The complaint signature must verify and the share decrypted with `key_sym`
/// must fail verification against the respondent's commitments.
pub fn verify_complaint(
    one_time_pub_i: &Point,
    one_time_pub_j: &Point,
    key_sym: &Point,
    signature: &ComplaintSignature,
    enc_share: &Scalar,
    mid_i: MemberId,
    commits_j: &[Point],
) -> Result<()> {
    verify_complaint_signature(one_time_pub_i, one_time_pub_j, key_sym, signature)?;
    let share = decrypt(enc_share, key_sym)?;
    match verify_secret_share(mid_i, &share, commits_j) {
        Ok(()) => Err(Error::ShareIsCorrect),
        Err(Error::InvalidSecretShare) => Ok(()),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CTX: &[u8] = b"dkg-context";

    #[test]
    fn test_member_slot() {
        assert_eq!(find_member_slot(1, 2).unwrap(), 0);
        assert_eq!(find_member_slot(1, 4).unwrap(), 2);
        assert_eq!(find_member_slot(3, 1).unwrap(), 0);
        assert_eq!(find_member_slot(3, 2).unwrap(), 1);
        assert_eq!(find_member_slot(3, 4).unwrap(), 2);
        assert!(find_member_slot(2, 2).is_err());
        assert!(find_member_slot(0, 1).is_err());
    }

    #[test]
    fn test_round1_signatures_verify() {
        let data = generate_round1_data(2, 3, CTX).unwrap();
        assert_eq!(data.coefficients.len(), 3);
        assert_eq!(data.coefficient_commits.len(), 3);
        verify_one_time_signature(2, CTX, &data.one_time_sig, &data.one_time_pub).unwrap();
        verify_a0_signature(2, CTX, &data.a0_sig, &data.coefficient_commits[0]).unwrap();

        // Bound to the member id and the context
        assert!(verify_a0_signature(3, CTX, &data.a0_sig, &data.coefficient_commits[0]).is_err());
        assert!(verify_one_time_signature(2, b"other", &data.one_time_sig, &data.one_time_pub).is_err());
    }

    #[test]
    fn test_share_verifies_against_commits() {
        let data = generate_round1_data(1, 2, CTX).unwrap();
        for mid in 1..=4 {
            let share = compute_secret_share(&data.coefficients, mid).unwrap();
            verify_secret_share(mid, &share, &data.coefficient_commits).unwrap();
        }
        let share = compute_secret_share(&data.coefficients, 2).unwrap();
        assert_eq!(
            verify_secret_share(3, &share, &data.coefficient_commits),
            Err(Error::InvalidSecretShare)
        );
    }

    #[test]
    fn test_encrypt_decrypt() {
        let a = KeyPair::generate().unwrap();
        let b = KeyPair::generate().unwrap();
        let ab = compute_key_sym(&a.private_key, &b.public_key).unwrap();
        let ba = compute_key_sym(&b.private_key, &a.public_key).unwrap();
        assert_eq!(ab, ba);

        let value = Scalar::from_field(&FieldScalar::from(1234u64));
        let enc = encrypt(&value, &ab).unwrap();
        assert_ne!(enc, value);
        assert_eq!(decrypt(&enc, &ba).unwrap(), value);
    }

    #[test]
    fn test_own_key_matches_group_key() {
        // Three members, threshold two: every share sums to a key on the group polynomial
        let n = 3u64;
        let members: Vec<Round1Data> = (1..=n)
            .map(|mid| generate_round1_data(mid, 2, CTX).unwrap())
            .collect();

        let mut acc = members[0].coefficient_commits.clone();
        for m in &members[1..] {
            for (k, c) in m.coefficient_commits.iter().enumerate() {
                acc[k] = add_points(&acc[k], c).unwrap();
            }
        }

        for mid in 1..=n {
            let shares: Vec<Scalar> = members
                .iter()
                .map(|m| compute_secret_share(&m.coefficients, mid).unwrap())
                .collect();
            let own_priv = compute_own_private_key(&shares).unwrap();
            let own_pub = compute_own_public_key(&acc, mid).unwrap();
            assert_eq!(own_priv.public_point().unwrap(), own_pub);

            let sig = sign_own_pub_key(mid, CTX, &own_pub, &own_priv).unwrap();
            verify_own_pub_key_sig(mid, CTX, &sig, &own_pub).unwrap();
        }

        let a0s: Vec<Point> = members.iter().map(|m| m.coefficient_commits[0]).collect();
        assert_eq!(compute_group_public_key(&a0s).unwrap(), acc[0]);
    }

    #[test]
    fn test_encrypted_shares_in_slot_order() {
        let n = 4u64;
        let members: Vec<Round1Data> = (1..=n)
            .map(|mid| generate_round1_data(mid, 2, CTX).unwrap())
            .collect();
        let otps: Vec<Point> = members.iter().map(|m| m.one_time_pub).collect();

        let sender = 3u64;
        let sent = &members[(sender - 1) as usize];
        let enc = compute_encrypted_secret_shares(sender, &sent.one_time_priv, &otps, &sent.coefficients)
            .unwrap();
        assert_eq!(enc.len(), 3);

        for receiver in [1u64, 2, 4] {
            let slot = find_member_slot(sender, receiver).unwrap();
            let key_sym = compute_key_sym(&members[(receiver - 1) as usize].one_time_priv, &sent.one_time_pub)
                .unwrap();
            let share = decrypt(&enc[slot], &key_sym).unwrap();
            verify_secret_share(receiver, &share, &sent.coefficient_commits).unwrap();
        }
    }

    #[test]
    fn test_complaint_against_tampered_share() {
        let i = generate_round1_data(1, 2, CTX).unwrap();
        let j = generate_round1_data(2, 2, CTX).unwrap();

        let honest_share = compute_secret_share(&j.coefficients, 1).unwrap();
        let key_sym = compute_key_sym(&j.one_time_priv, &i.one_time_pub).unwrap();
        let honest_enc = encrypt(&honest_share, &key_sym).unwrap();
        let tampered_enc = encrypt(&Scalar::from_field(&FieldScalar::from(99u64)), &key_sym).unwrap();

        let (sig, revealed) = sign_complaint(&i.one_time_pub, &j.one_time_pub, &i.one_time_priv).unwrap();
        assert_eq!(revealed, key_sym);
        verify_complaint_signature(&i.one_time_pub, &j.one_time_pub, &revealed, &sig).unwrap();

        verify_complaint(
            &i.one_time_pub,
            &j.one_time_pub,
            &revealed,
            &sig,
            &tampered_enc,
            1,
            &j.coefficient_commits,
        )
        .unwrap();

        assert_eq!(
            verify_complaint(
                &i.one_time_pub,
                &j.one_time_pub,
                &revealed,
                &sig,
                &honest_enc,
                1,
                &j.coefficient_commits,
            ),
            Err(Error::ShareIsCorrect)
        );
    }

    #[test]
    fn test_complaint_with_forged_key_sym_fails() {
        let i = generate_round1_data(1, 2, CTX).unwrap();
        let j = generate_round1_data(2, 2, CTX).unwrap();
        let (sig, _) = sign_complaint(&i.one_time_pub, &j.one_time_pub, &i.one_time_priv).unwrap();
        let forged = KeyPair::generate().unwrap().public_key;
        assert!(verify_complaint_signature(&i.one_time_pub, &j.one_time_pub, &forged, &sig).is_err());
    }
}
