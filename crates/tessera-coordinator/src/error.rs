//! Error types for the coordinator state machine

use thiserror::Error;

use tessera_core::{GroupId, MemberId, SigningId};

/// Result type for coordinator operations
pub type Result<T> = std::result::Result<T, TssError>;

/// Every way a protocol message or end-block step can be rejected
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TssError {
    /// Group size exceeds the configured maximum
    #[error("Group size too large: {size} > {max}")]
    GroupSizeTooLarge { size: u64, max: u64 },

    /// Threshold is zero or larger than the group
    #[error("Invalid threshold: {threshold} for group of {size}")]
    InvalidThreshold { threshold: u64, size: u64 },

    /// Same address listed twice in one group
    #[error("Duplicate member: {0}")]
    DuplicateMember(String),

    #[error("Group not found: {0}")]
    GroupNotFound(GroupId),

    #[error("Member {member_id} not found in group {group_id}")]
    MemberNotFound { group_id: GroupId, member_id: MemberId },

    /// Sender address does not own the member slot
    #[error("Member not authorized: {0}")]
    MemberNotAuthorized(String),

    /// Message arrived for a round the group is not in
    #[error("Invalid group status: {0}")]
    InvalidStatus(String),

    #[error("Member {0} already submitted")]
    MemberAlreadySubmit(MemberId),

    #[error("Invalid number of coefficient commits: expected {expected}, got {got}")]
    InvalidLengthCoefCommits { expected: u64, got: u64 },

    #[error("Invalid number of encrypted secret shares: expected {expected}, got {got}")]
    InvalidLengthEncryptedSecretShares { expected: u64, got: u64 },

    #[error("One-time signature verification failed for member {0}")]
    VerifyOneTimeSignatureFailed(MemberId),

    #[error("A0 signature verification failed for member {0}")]
    VerifyA0SignatureFailed(MemberId),

    #[error("Member {0} already complained or confirmed")]
    MemberIsAlreadyComplainOrConfirm(MemberId),

    #[error("Complaint rejected: {0}")]
    ComplainFailed(String),

    #[error("Confirm rejected: {0}")]
    ConfirmFailed(String),

    #[error("No DE available for {0}")]
    DENotFound(String),

    #[error("DE limit exceeded for {address}: {len} > {max}")]
    DELimitExceeded { address: String, len: u64, max: u64 },

    /// The same public DE was submitted before
    #[error("DE already submitted: {0}")]
    DEAlreadySubmitted(String),

    #[error("Group {0} is not active")]
    GroupIsNotActive(GroupId),

    #[error("Insufficient signers: need {need}, available {available}")]
    InsufficientSigners { need: u64, available: u64 },

    #[error("No active member in group {0}")]
    NoActiveMember(GroupId),

    #[error("Signing {signing_id} reached max attempt {max}")]
    MaxSigningAttemptReached { signing_id: SigningId, max: u64 },

    #[error("Signing not found: {0}")]
    SigningNotFound(SigningId),

    #[error("Signing attempt {attempt} of {signing_id} is not found")]
    SigningAttemptNotFound { signing_id: SigningId, attempt: u64 },

    /// Partial signature targets an attempt that is no longer current
    #[error("Signing {signing_id} attempt {attempt} expired")]
    SigningExpired { signing_id: SigningId, attempt: u64 },

    #[error("Signing {0} already succeeded")]
    SigningAlreadySuccess(SigningId),

    #[error("Signing {0} has fallen")]
    SigningFallen(SigningId),

    #[error("Member {member_id} is not assigned to signing {signing_id}")]
    MemberNotAssigned { signing_id: SigningId, member_id: MemberId },

    #[error("Member {member_id} already signed signing {signing_id}")]
    AlreadySigned { signing_id: SigningId, member_id: MemberId },

    #[error("Public nonce does not match signature R")]
    PubNonceNotEqualToSigR,

    #[error("Partial signature verification failed: {0}")]
    VerifySigningSigFailed(String),

    #[error("Combining signatures failed: {0}")]
    CombineSigsFailed(String),

    #[error("Group signature verification failed: {0}")]
    VerifyGroupSigningSigFailed(String),

    #[error("Bad DRBG initialization: {0}")]
    BadDrbgInitialization(String),

    #[error("Invalid parameters: {0}")]
    InvalidParams(String),

    /// Stored state could not be read back or is inconsistent
    #[error("Corrupted state: {0}")]
    Corrupted(String),

    #[error(transparent)]
    Crypto(#[from] tessera_core::Error),
}

impl From<bitcode::Error> for TssError {
    fn from(e: bitcode::Error) -> Self {
        TssError::Corrupted(e.to_string())
    }
}
