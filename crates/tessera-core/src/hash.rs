//! Domain-separated Keccak-256 hashing
//!
//! Every protocol hash starts with [`CONTEXT_STRING`] followed by a label, so a
//! digest produced for one purpose can never be replayed as another.

use k256::{elliptic_curve::ops::Reduce, FieldBytes, Scalar as FieldScalar, U256};
use sha3::{Digest, Keccak256};

use crate::types::{MemberId, Point};

/// Domain separation prefix for every protocol hash
pub const CONTEXT_STRING: &[u8] = b"TESSERA-TSS-secp256k1-v0";

/// Keccak-256 over the concatenation of `parts`
pub fn hash(parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().into()
}

/// Hash reduced modulo the group order
pub fn hash_to_scalar(parts: &[&[u8]]) -> FieldScalar {
    let digest = hash(parts);
    <FieldScalar as Reduce<U256>>::reduce_bytes(&FieldBytes::from(digest))
}

fn labelled(label: &[u8], parts: &[&[u8]]) -> FieldScalar {
    let mut all: Vec<&[u8]> = Vec::with_capacity(parts.len() + 2);
    all.push(CONTEXT_STRING);
    all.push(label);
    all.extend_from_slice(parts);
    hash_to_scalar(&all)
}

/// Challenge for the proof of knowledge of the first coefficient
pub fn hash_round1_a0(
    pub_nonce: &Point,
    mid: MemberId,
    dkg_context: &[u8],
    a0_pub: &Point,
) -> FieldScalar {
    labelled(
        b"round1A0",
        &[
            pub_nonce.as_ref(),
            &mid.to_be_bytes(),
            dkg_context,
            a0_pub.as_ref(),
        ],
    )
}

/// Challenge for the proof of knowledge of the one-time key
pub fn hash_round1_one_time(
    pub_nonce: &Point,
    mid: MemberId,
    dkg_context: &[u8],
    one_time_pub: &Point,
) -> FieldScalar {
    labelled(
        b"round1OneTime",
        &[
            pub_nonce.as_ref(),
            &mid.to_be_bytes(),
            dkg_context,
            one_time_pub.as_ref(),
        ],
    )
}

/// Challenge for a complaint signature
pub fn hash_round3_complaint(
    a1: &Point,
    a2: &Point,
    one_time_pub_i: &Point,
    one_time_pub_j: &Point,
    key_sym: &Point,
) -> FieldScalar {
    labelled(
        b"round3Complain",
        &[
            a1.as_ref(),
            a2.as_ref(),
            one_time_pub_i.as_ref(),
            one_time_pub_j.as_ref(),
            key_sym.as_ref(),
        ],
    )
}

/// Challenge for the signature over a member's own public key
pub fn hash_round3_own_pub_key(
    pub_nonce: &Point,
    mid: MemberId,
    dkg_context: &[u8],
    own_pub: &Point,
) -> FieldScalar {
    labelled(
        b"round3OwnPubKey",
        &[
            pub_nonce.as_ref(),
            &mid.to_be_bytes(),
            dkg_context,
            own_pub.as_ref(),
        ],
    )
}

pub fn hash_sign_msg(data: &[u8]) -> [u8; 32] {
    hash(&[CONTEXT_STRING, b"signMsg", data])
}

pub fn hash_sign_commitment(data: &[u8]) -> [u8; 32] {
    hash(&[CONTEXT_STRING, b"signCommitment", data])
}

/// Binding factor `ρ_i = H(i, H(msg), H(B))`
pub fn hash_binding_factor(mid: MemberId, data: &[u8], commitment: &[u8]) -> FieldScalar {
    labelled(
        b"bindingFactor",
        &[
            &mid.to_be_bytes(),
            &hash_sign_msg(data),
            &hash_sign_commitment(commitment),
        ],
    )
}

/// Signing challenge `c = H(R, Y, H(msg))`
pub fn hash_challenge(group_pub_nonce: &Point, group_pub_key: &Point, data: &[u8]) -> FieldScalar {
    labelled(
        b"challenge",
        &[
            group_pub_nonce.as_ref(),
            group_pub_key.as_ref(),
            &hash(&[data]),
        ],
    )
}

/// Nonce derived from fresh randomness and the signer's secret
pub fn hash_nonce(random: &[u8], secret: &[u8]) -> FieldScalar {
    labelled(b"nonce", &[random, secret])
}
