//! Deterministic random bit generator for reproducible member selection
//!
//! Seeded from `(entropy, nonce, personalization)` through SHA-256 into a
//! ChaCha20 stream, so every validator draws the same sequence from the same
//! chain state.

use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha20Rng;
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

/// Minimum entropy length accepted as a seed
pub const MIN_ENTROPY_LEN: usize = 16;

pub struct Drbg {
    rng: ChaCha20Rng,
}

impl Drbg {
    /// Instantiate from chain-derived inputs
    ///
    /// Each input is length-prefixed before hashing so that moving bytes
    /// between fields changes the seed.
    pub fn new(entropy: &[u8], nonce: &[u8], personalization: &[u8]) -> Result<Self> {
        if entropy.len() < MIN_ENTROPY_LEN {
            return Err(Error::Drbg(format!(
                "entropy too short: {} < {}",
                entropy.len(),
                MIN_ENTROPY_LEN
            )));
        }
        if nonce.is_empty() {
            return Err(Error::Drbg("empty nonce".to_string()));
        }

        let mut hasher = Sha256::new();
        for part in [entropy, nonce, personalization] {
            hasher.update((part.len() as u64).to_be_bytes());
            hasher.update(part);
        }
        let seed: [u8; 32] = hasher.finalize().into();

        Ok(Self {
            rng: ChaCha20Rng::from_seed(seed),
        })
    }

    pub fn next_u64(&mut self) -> u64 {
        self.rng.next_u64()
    }
}
