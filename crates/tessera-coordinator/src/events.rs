//! Typed events emitted by message handlers and end-block sweeps

use serde::{Deserialize, Serialize};

use tessera_core::{GroupId, MemberId, Point, PubDe, Scalar, Signature, SigningId};

use crate::types::{Address, ComplaintStatus};

/// Per-member data a signer needs to produce its share
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssignedMemberEvent {
    pub member_id: MemberId,
    pub address: Address,
    pub pub_de: PubDe,
    pub binding_factor: Scalar,
    pub pub_nonce: Point,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    GroupCreated {
        group_id: GroupId,
        size: u64,
        threshold: u64,
        #[serde(with = "tessera_core::types::hex_vec")]
        dkg_context: Vec<u8>,
        members: Vec<Address>,
    },
    Round1Complete {
        group_id: GroupId,
    },
    Round2Complete {
        group_id: GroupId,
    },
    Round3Complete {
        group_id: GroupId,
        pub_key: Point,
    },
    Round3Failed {
        group_id: GroupId,
        malicious: Vec<MemberId>,
    },
    GroupExpired {
        group_id: GroupId,
    },
    ComplaintResolved {
        group_id: GroupId,
        complainant: MemberId,
        respondent: MemberId,
        outcome: ComplaintStatus,
    },
    ConfirmSuccess {
        group_id: GroupId,
        member_id: MemberId,
    },
    DESubmitted {
        address: Address,
        count: u64,
    },
    DEDequeued {
        address: Address,
        pub_de: PubDe,
    },
    RequestSignature {
        signing_id: SigningId,
        group_id: GroupId,
        attempt: u64,
        #[serde(with = "tessera_core::types::hex_vec")]
        message: Vec<u8>,
        group_pub_key: Point,
        group_pub_nonce: Point,
        assigned_members: Vec<AssignedMemberEvent>,
    },
    SubmitSignature {
        signing_id: SigningId,
        attempt: u64,
        member_id: MemberId,
        address: Address,
        pub_de: PubDe,
    },
    SigningSuccess {
        signing_id: SigningId,
        group_id: GroupId,
        signature: Signature,
    },
    SigningTimeout {
        signing_id: SigningId,
        attempt: u64,
        idle_members: Vec<Address>,
    },
    SigningFailed {
        signing_id: SigningId,
        group_id: GroupId,
        reason: String,
    },
}

impl Event {
    /// Stable name used for subscription filters and logs
    pub fn kind(&self) -> &'static str {
        match self {
            Event::GroupCreated { .. } => "group_created",
            Event::Round1Complete { .. } => "round1_complete",
            Event::Round2Complete { .. } => "round2_complete",
            Event::Round3Complete { .. } => "round3_complete",
            Event::Round3Failed { .. } => "round3_failed",
            Event::GroupExpired { .. } => "group_expired",
            Event::ComplaintResolved { .. } => "complaint_resolved",
            Event::ConfirmSuccess { .. } => "confirm_success",
            Event::DESubmitted { .. } => "de_submitted",
            Event::DEDequeued { .. } => "de_dequeued",
            Event::RequestSignature { .. } => "request_signature",
            Event::SubmitSignature { .. } => "submit_signature",
            Event::SigningSuccess { .. } => "signing_success",
            Event::SigningTimeout { .. } => "signing_timeout",
            Event::SigningFailed { .. } => "signing_failed",
        }
    }

    pub fn group_id(&self) -> Option<GroupId> {
        match self {
            Event::GroupCreated { group_id, .. }
            | Event::Round1Complete { group_id }
            | Event::Round2Complete { group_id }
            | Event::Round3Complete { group_id, .. }
            | Event::Round3Failed { group_id, .. }
            | Event::GroupExpired { group_id }
            | Event::ComplaintResolved { group_id, .. }
            | Event::ConfirmSuccess { group_id, .. }
            | Event::RequestSignature { group_id, .. }
            | Event::SigningSuccess { group_id, .. }
            | Event::SigningFailed { group_id, .. } => Some(*group_id),
            _ => None,
        }
    }

    pub fn signing_id(&self) -> Option<SigningId> {
        match self {
            Event::RequestSignature { signing_id, .. }
            | Event::SubmitSignature { signing_id, .. }
            | Event::SigningSuccess { signing_id, .. }
            | Event::SigningTimeout { signing_id, .. }
            | Event::SigningFailed { signing_id, .. } => Some(*signing_id),
            _ => None,
        }
    }

    /// Whether `address` is named by the event payload
    pub fn mentions(&self, address: &str) -> bool {
        match self {
            Event::GroupCreated { members, .. } => members.iter().any(|m| m == address),
            Event::DESubmitted { address: a, .. }
            | Event::DEDequeued { address: a, .. }
            | Event::SubmitSignature { address: a, .. } => a == address,
            Event::RequestSignature { assigned_members, .. } => {
                assigned_members.iter().any(|m| m.address == address)
            }
            Event::SigningTimeout { idle_members, .. } => idle_members.iter().any(|m| m == address),
            _ => false,
        }
    }
}
