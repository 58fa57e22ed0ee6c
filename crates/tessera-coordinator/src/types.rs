//! Persisted coordinator records

use bitcode::{Decode, Encode};
use serde::{Deserialize, Serialize};

use tessera_core::{
    hash, ComplaintSignature, GroupId, MemberId, Point, PubDe, Scalar, Signature, SigningId,
};

/// Account address of a participant (bech32-style string)
pub type Address = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Encode, Decode)]
pub enum GroupStatus {
    Round1,
    Round2,
    Round3,
    Active,
    Fallen,
    Expired,
}

impl GroupStatus {
    /// Still running the DKG
    pub fn in_dkg(&self) -> bool {
        matches!(self, GroupStatus::Round1 | GroupStatus::Round2 | GroupStatus::Round3)
    }
}

impl std::fmt::Display for GroupStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            GroupStatus::Round1 => "ROUND_1",
            GroupStatus::Round2 => "ROUND_2",
            GroupStatus::Round3 => "ROUND_3",
            GroupStatus::Active => "ACTIVE",
            GroupStatus::Fallen => "FALLEN",
            GroupStatus::Expired => "EXPIRED",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Encode, Decode)]
pub struct Group {
    pub id: GroupId,
    pub size: u64,
    pub threshold: u64,
    /// Set to the first accumulated commit after round 1
    pub pub_key: Option<Point>,
    pub status: GroupStatus,
    pub created_height: u64,
    /// Tag of the module that requested the group; routes callbacks
    pub module_owner: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Encode, Decode)]
pub struct Member {
    pub id: MemberId,
    pub group_id: GroupId,
    pub address: Address,
    pub pub_key: Option<Point>,
    pub is_malicious: bool,
    pub is_active: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Encode, Decode)]
pub struct Round1Info {
    pub member_id: MemberId,
    pub coefficient_commits: Vec<Point>,
    pub one_time_pub_key: Point,
    pub a0_signature: Signature,
    pub one_time_signature: Signature,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Encode, Decode)]
pub struct Round2Info {
    pub member_id: MemberId,
    /// Ordered by `find_member_slot(member_id, receiver)`
    pub encrypted_secret_shares: Vec<Scalar>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Encode, Decode)]
pub struct Complaint {
    pub complainant: MemberId,
    pub respondent: MemberId,
    pub key_sym: Point,
    pub signature: ComplaintSignature,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Encode, Decode)]
pub enum ComplaintStatus {
    /// Respondent sent a bad share
    Success,
    /// Complainant could not back the claim
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Encode, Decode)]
pub struct ComplaintWithStatus {
    pub complaint: Complaint,
    pub status: ComplaintStatus,
}

/// All complaints one member filed in round 3
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Encode, Decode)]
pub struct ComplaintsWithStatus {
    pub member_id: MemberId,
    pub complaints: Vec<ComplaintWithStatus>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Encode, Decode)]
pub struct Confirm {
    pub member_id: MemberId,
    pub own_pub_key_sig: Signature,
}

/// Head/tail cursor of one address's DE queue
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Encode, Decode)]
pub struct DeQueue {
    pub head: u64,
    pub tail: u64,
}

impl DeQueue {
    pub fn len(&self) -> u64 {
        self.tail - self.head
    }

    pub fn is_empty(&self) -> bool {
        self.head == self.tail
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Encode, Decode)]
pub enum SigningStatus {
    Waiting,
    Success,
    Fallen,
}

/// Who asked for a signature
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Encode, Decode)]
pub struct Originator {
    pub module: String,
    pub requester: Address,
    pub memo: String,
}

impl Originator {
    pub fn new(module: impl Into<String>, requester: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            requester: requester.into(),
            memo: String::new(),
        }
    }

    /// Canonical encoding hashed into the signing message
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for part in [&self.module, &self.requester, &self.memo] {
            out.extend_from_slice(&(part.len() as u32).to_be_bytes());
            out.extend_from_slice(part.as_bytes());
        }
        out
    }
}

/// `Keccak256(BE(gid) ‖ BE(sid) ‖ Keccak256(originator) ‖ content)`
pub fn signing_message(
    group_id: GroupId,
    signing_id: SigningId,
    originator: &Originator,
    content: &[u8],
) -> Vec<u8> {
    hash::hash(&[
        &group_id.to_be_bytes(),
        &signing_id.to_be_bytes(),
        &hash::hash(&[&originator.encode()]),
        content,
    ])
    .to_vec()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Encode, Decode)]
pub struct Signing {
    pub id: SigningId,
    pub group_id: GroupId,
    pub group_pub_key: Point,
    pub originator: Originator,
    pub content: Vec<u8>,
    pub message: Vec<u8>,
    pub current_attempt: u64,
    pub group_pub_nonce: Option<Point>,
    pub signature: Option<Signature>,
    pub status: SigningStatus,
    pub created_height: u64,
}

/// A member drawn for one attempt, with the nonce material it must use
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Encode, Decode)]
pub struct AssignedMember {
    pub member_id: MemberId,
    pub address: Address,
    pub pub_key: Point,
    pub pub_de: PubDe,
    pub binding_factor: Scalar,
    pub pub_nonce: Point,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Encode, Decode)]
pub struct SigningAttempt {
    pub signing_id: SigningId,
    pub attempt: u64,
    pub expired_height: u64,
    pub group_pub_nonce: Point,
    pub assigned_members: Vec<AssignedMember>,
}

impl SigningAttempt {
    pub fn member_ids(&self) -> Vec<MemberId> {
        self.assigned_members.iter().map(|m| m.member_id).collect()
    }

    pub fn find(&self, member_id: MemberId) -> Option<&AssignedMember> {
        self.assigned_members.iter().find(|m| m.member_id == member_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Encode, Decode)]
pub struct PartialSignature {
    pub signing_id: SigningId,
    pub attempt: u64,
    pub member_id: MemberId,
    pub signature: Signature,
}

/// Entry of the expiration schedule, kept ordered by `expired_height`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Encode, Decode)]
pub struct SigningExpiration {
    pub signing_id: SigningId,
    pub attempt: u64,
    pub expired_height: u64,
}

/// Chain data visible to the state machine for the current block
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockContext {
    pub height: u64,
    pub chain_id: String,
    /// Changes every block; DRBG entropy for member selection
    pub rolling_seed: [u8; 32],
    pub last_commit_hash: [u8; 32],
}

impl BlockContext {
    pub fn new(chain_id: impl Into<String>) -> Self {
        Self {
            height: 1,
            chain_id: chain_id.into(),
            rolling_seed: [0u8; 32],
            last_commit_hash: [0u8; 32],
        }
    }

    /// Context of the following block, with seed and commit hash chained
    pub fn next(&self) -> Self {
        let height = self.height + 1;
        let last_commit_hash = hash::hash(&[&self.last_commit_hash, &height.to_be_bytes()]);
        let rolling_seed = hash::hash(&[&self.rolling_seed, &last_commit_hash]);
        Self {
            height,
            chain_id: self.chain_id.clone(),
            rolling_seed,
            last_commit_hash,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signing_message_binds_every_input() {
        let origin = Originator::new("bridge", "band1alice");
        let base = signing_message(1, 1, &origin, b"payload");
        assert_eq!(base.len(), 32);
        assert_ne!(base, signing_message(2, 1, &origin, b"payload"));
        assert_ne!(base, signing_message(1, 2, &origin, b"payload"));
        assert_ne!(base, signing_message(1, 1, &Originator::new("bridge", "band1bob"), b"payload"));
        assert_ne!(base, signing_message(1, 1, &origin, b"other"));
        assert_eq!(base, signing_message(1, 1, &origin, b"payload"));
    }

    #[test]
    fn test_originator_encoding_is_unambiguous() {
        let a = Originator::new("ab", "c");
        let b = Originator::new("a", "bc");
        assert_ne!(a.encode(), b.encode());
    }

    #[test]
    fn test_block_context_chain() {
        let first = BlockContext::new("tessera-devnet");
        let second = first.next();
        assert_eq!(second.height, 2);
        assert_ne!(second.rolling_seed, first.rolling_seed);
        assert_eq!(second, first.next());
    }

    #[test]
    fn test_de_queue_len() {
        let queue = DeQueue { head: 3, tail: 7 };
        assert_eq!(queue.len(), 4);
        assert!(!queue.is_empty());
        assert!(DeQueue::default().is_empty());
    }
}
