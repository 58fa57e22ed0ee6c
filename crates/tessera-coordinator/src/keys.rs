//! Store key layout
//!
//! One prefix byte per entity followed by big-endian ids, so prefix scans
//! return records in id order. Addresses are length-prefixed.

use tessera_core::{GroupId, MemberId, PubDe, SigningId};

pub const GLOBAL_PREFIX: u8 = 0x00;
pub const GROUP_PREFIX: u8 = 0x01;
pub const MEMBER_PREFIX: u8 = 0x02;
pub const DKG_CONTEXT_PREFIX: u8 = 0x03;
pub const ROUND1_INFO_PREFIX: u8 = 0x04;
pub const ROUND1_COUNT_PREFIX: u8 = 0x05;
pub const ACCUMULATED_COMMIT_PREFIX: u8 = 0x06;
pub const ROUND2_INFO_PREFIX: u8 = 0x07;
pub const ROUND2_COUNT_PREFIX: u8 = 0x08;
pub const COMPLAINTS_PREFIX: u8 = 0x09;
pub const CONFIRM_PREFIX: u8 = 0x0a;
pub const CONFIRM_COMPLAIN_COUNT_PREFIX: u8 = 0x0b;

pub const DE_QUEUE_PREFIX: u8 = 0x10;
pub const DE_PREFIX: u8 = 0x11;
pub const DE_SEEN_PREFIX: u8 = 0x12;

pub const SIGNING_PREFIX: u8 = 0x20;
pub const SIGNING_ATTEMPT_PREFIX: u8 = 0x21;
pub const PARTIAL_SIG_PREFIX: u8 = 0x22;
pub const PARTIAL_SIG_COUNT_PREFIX: u8 = 0x23;

pub fn group_count() -> Vec<u8> {
    vec![GLOBAL_PREFIX, 0x01]
}

pub fn signing_count() -> Vec<u8> {
    vec![GLOBAL_PREFIX, 0x02]
}

pub fn last_expired_group_id() -> Vec<u8> {
    vec![GLOBAL_PREFIX, 0x03]
}

pub fn pending_process_groups() -> Vec<u8> {
    vec![GLOBAL_PREFIX, 0x04]
}

pub fn pending_process_signings() -> Vec<u8> {
    vec![GLOBAL_PREFIX, 0x05]
}

pub fn signing_expirations() -> Vec<u8> {
    vec![GLOBAL_PREFIX, 0x06]
}

fn with_ids(prefix: u8, ids: &[u64]) -> Vec<u8> {
    let mut key = Vec::with_capacity(1 + 8 * ids.len());
    key.push(prefix);
    for id in ids {
        key.extend_from_slice(&id.to_be_bytes());
    }
    key
}

fn with_address(prefix: u8, address: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(2 + address.len());
    key.push(prefix);
    key.push(address.len() as u8);
    key.extend_from_slice(address.as_bytes());
    key
}

pub fn group(group_id: GroupId) -> Vec<u8> {
    with_ids(GROUP_PREFIX, &[group_id])
}

pub fn members_of(group_id: GroupId) -> Vec<u8> {
    with_ids(MEMBER_PREFIX, &[group_id])
}

pub fn member(group_id: GroupId, member_id: MemberId) -> Vec<u8> {
    with_ids(MEMBER_PREFIX, &[group_id, member_id])
}

pub fn dkg_context(group_id: GroupId) -> Vec<u8> {
    with_ids(DKG_CONTEXT_PREFIX, &[group_id])
}

pub fn round1_infos_of(group_id: GroupId) -> Vec<u8> {
    with_ids(ROUND1_INFO_PREFIX, &[group_id])
}

pub fn round1_info(group_id: GroupId, member_id: MemberId) -> Vec<u8> {
    with_ids(ROUND1_INFO_PREFIX, &[group_id, member_id])
}

pub fn round1_count(group_id: GroupId) -> Vec<u8> {
    with_ids(ROUND1_COUNT_PREFIX, &[group_id])
}

pub fn accumulated_commits_of(group_id: GroupId) -> Vec<u8> {
    with_ids(ACCUMULATED_COMMIT_PREFIX, &[group_id])
}

pub fn accumulated_commit(group_id: GroupId, index: u64) -> Vec<u8> {
    with_ids(ACCUMULATED_COMMIT_PREFIX, &[group_id, index])
}

pub fn round2_infos_of(group_id: GroupId) -> Vec<u8> {
    with_ids(ROUND2_INFO_PREFIX, &[group_id])
}

pub fn round2_info(group_id: GroupId, member_id: MemberId) -> Vec<u8> {
    with_ids(ROUND2_INFO_PREFIX, &[group_id, member_id])
}

pub fn round2_count(group_id: GroupId) -> Vec<u8> {
    with_ids(ROUND2_COUNT_PREFIX, &[group_id])
}

pub fn complaints_of(group_id: GroupId) -> Vec<u8> {
    with_ids(COMPLAINTS_PREFIX, &[group_id])
}

pub fn complaints(group_id: GroupId, member_id: MemberId) -> Vec<u8> {
    with_ids(COMPLAINTS_PREFIX, &[group_id, member_id])
}

pub fn confirms_of(group_id: GroupId) -> Vec<u8> {
    with_ids(CONFIRM_PREFIX, &[group_id])
}

pub fn confirm(group_id: GroupId, member_id: MemberId) -> Vec<u8> {
    with_ids(CONFIRM_PREFIX, &[group_id, member_id])
}

pub fn confirm_complain_count(group_id: GroupId) -> Vec<u8> {
    with_ids(CONFIRM_COMPLAIN_COUNT_PREFIX, &[group_id])
}

pub fn de_queue(address: &str) -> Vec<u8> {
    with_address(DE_QUEUE_PREFIX, address)
}

pub fn de(address: &str, index: u64) -> Vec<u8> {
    let mut key = with_address(DE_PREFIX, address);
    key.extend_from_slice(&index.to_be_bytes());
    key
}

/// Tombstone of a DE `address` has ever enqueued
///
/// Never deleted: a dequeued nonce pair must not come back into the same
/// queue. Grows by one empty value per accepted DE, each paid for by a
/// `SubmitDEs` message.
pub fn de_seen(address: &str, de: &PubDe) -> Vec<u8> {
    let mut key = with_address(DE_SEEN_PREFIX, address);
    key.extend_from_slice(de.pub_d.as_ref());
    key.extend_from_slice(de.pub_e.as_ref());
    key
}

pub fn signing(signing_id: SigningId) -> Vec<u8> {
    with_ids(SIGNING_PREFIX, &[signing_id])
}

pub fn signing_attempt(signing_id: SigningId, attempt: u64) -> Vec<u8> {
    with_ids(SIGNING_ATTEMPT_PREFIX, &[signing_id, attempt])
}

pub fn partial_sigs_of(signing_id: SigningId, attempt: u64) -> Vec<u8> {
    with_ids(PARTIAL_SIG_PREFIX, &[signing_id, attempt])
}

pub fn partial_sig(signing_id: SigningId, attempt: u64, member_id: MemberId) -> Vec<u8> {
    with_ids(PARTIAL_SIG_PREFIX, &[signing_id, attempt, member_id])
}

pub fn partial_sig_count(signing_id: SigningId, attempt: u64) -> Vec<u8> {
    with_ids(PARTIAL_SIG_COUNT_PREFIX, &[signing_id, attempt])
}
