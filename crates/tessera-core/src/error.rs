//! Error types for Tessera primitives

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("Invalid point: {0}")]
    InvalidPoint(String),

    #[error("Invalid scalar: {0}")]
    InvalidScalar(String),

    #[error("Scalar must be non-zero")]
    ZeroScalar,

    #[error("Invalid length: expected {expected}, got {got}")]
    InvalidLength { expected: usize, got: usize },

    #[error("Invalid order: {0}")]
    InvalidOrder(String),

    #[error("Invalid member id: {0}")]
    InvalidMemberId(u64),

    #[error("Signature verification failed: {0}")]
    VerificationFailed(String),

    #[error("Secret share does not match its commitments")]
    InvalidSecretShare,

    #[error("Encrypted secret share is correct")]
    ShareIsCorrect,

    #[error("DRBG initialization failed: {0}")]
    Drbg(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Hex error: {0}")]
    Hex(String),
}

impl From<bitcode::Error> for Error {
    fn from(e: bitcode::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<hex::FromHexError> for Error {
    fn from(e: hex::FromHexError) -> Self {
        Error::Hex(e.to_string())
    }
}
