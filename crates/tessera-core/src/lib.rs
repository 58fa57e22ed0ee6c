//! Tessera Core - curve arithmetic, hashing and storage primitives
//!
//! This crate provides the cryptographic capability shared by the on-chain
//! coordinator and the off-chain participant agent: secp256k1 wire types,
//! domain-separated hashing, DKG and FROST-style signing math, a
//! deterministic random bit generator and the ordered key-value store seam.

pub mod dkg;
pub mod drbg;
pub mod error;
pub mod hash;
pub mod metrics;
pub mod schnorr;
pub mod signing;
pub mod store;
pub mod types;

pub use drbg::Drbg;
pub use error::{Error, Result};
pub use metrics::{MemoryMetrics, MetricsSink, NoopMetrics};
pub use store::{CacheStore, KvStore, MemStore};
pub use types::{
    ComplaintSignature, GroupId, MemberId, Point, PubDe, Scalar, Signature, SigningId,
};
