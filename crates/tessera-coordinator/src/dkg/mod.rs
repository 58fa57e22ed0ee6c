//! Distributed key generation state machine
//!
//! A group moves `ROUND_1 → ROUND_2 → ROUND_3 → {ACTIVE | FALLEN}` and may
//! expire from any DKG status once its creation period has passed.
//!
//! - **Round 1**: each member commits to `T` polynomial coefficients and a
//!   one-time key, with proofs of knowledge of both.
//! - **Round 2**: each member posts `N−1` shares encrypted under ECDH keys
//!   derived from the one-time keys.
//! - **Round 3**: each member either confirms its own public key or files
//!   complaints, which the coordinator adjudicates on chain.
//!
//! Round transitions happen in the end-block pass once the last member of a
//! round has submitted.

mod end_block;
mod round1;
mod round2;
mod round3;

use std::collections::BTreeSet;

use tracing::info;

use tessera_core::{hash, GroupId, KvStore};

use crate::coordinator::Coordinator;
use crate::error::{Result, TssError};
use crate::events::Event;
use crate::types::{Address, Group, GroupStatus, Member};

/// `H(BE(groupID), H(chainID), lastCommitHash)`
pub fn compute_dkg_context(group_id: GroupId, chain_id: &str, last_commit_hash: &[u8]) -> Vec<u8> {
    hash::hash(&[
        &group_id.to_be_bytes(),
        &hash::hash(&[chain_id.as_bytes()]),
        last_commit_hash,
    ])
    .to_vec()
}

impl<S: KvStore> Coordinator<S> {
    /// Register a new group and open round 1
    ///
    /// Member ids are assigned 1..N in the order of `members`.
    pub fn create_group(&mut self, members: &[Address], threshold: u64, module: &str) -> Result<GroupId> {
        let size = members.len() as u64;
        if size > self.params.max_group_size {
            return Err(TssError::GroupSizeTooLarge {
                size,
                max: self.params.max_group_size,
            });
        }
        if threshold == 0 || threshold > size {
            return Err(TssError::InvalidThreshold { threshold, size });
        }
        let mut distinct = BTreeSet::new();
        for address in members {
            if !distinct.insert(address.as_str()) {
                return Err(TssError::DuplicateMember(address.clone()));
            }
        }

        let group_id = self.group_count()? + 1;
        self.set_group_count(group_id);
        self.set_group(&Group {
            id: group_id,
            size,
            threshold,
            pub_key: None,
            status: GroupStatus::Round1,
            created_height: self.block.height,
            module_owner: module.to_string(),
        });

        for (index, address) in members.iter().enumerate() {
            self.set_member(&Member {
                id: index as u64 + 1,
                group_id,
                address: address.clone(),
                pub_key: None,
                is_malicious: false,
                is_active: true,
            });
        }

        let dkg_context = compute_dkg_context(group_id, &self.block.chain_id, &self.block.last_commit_hash);
        self.set_dkg_context(group_id, &dkg_context);

        info!(
            group_id,
            size,
            threshold,
            module,
            context = %hex::encode(&dkg_context),
            "group created"
        );
        self.metrics.increment("tss_group_created", 1);
        self.emit(Event::GroupCreated {
            group_id,
            size,
            threshold,
            dkg_context,
            members: members.to_vec(),
        });
        Ok(group_id)
    }

    /// Toggle whether `address` may be drawn for signings in `group_id`
    ///
    /// Deactivation also drains the address's DE queue so stale nonces are
    /// never handed out after the member comes back.
    pub fn set_member_active(&mut self, group_id: GroupId, address: &str, active: bool) -> Result<()> {
        let mut member = self
            .get_members(group_id)?
            .into_iter()
            .find(|m| m.address == address)
            .ok_or_else(|| TssError::MemberNotAuthorized(format!("{} is not in group {}", address, group_id)))?;
        if member.is_active == active {
            return Ok(());
        }
        member.is_active = active;
        self.set_member(&member);
        if !active {
            self.reset_de(address)?;
        }
        info!(group_id, address, active, "member activity changed");
        Ok(())
    }

    /// Flag `member_id` as malicious; permanent for the group
    pub(crate) fn mark_malicious(&mut self, group_id: GroupId, member_id: u64) -> Result<()> {
        let mut member = self.get_member(group_id, member_id)?;
        if !member.is_malicious {
            member.is_malicious = true;
            self.set_member(&member);
            tracing::warn!(group_id, member_id, address = %member.address, "member marked malicious");
            self.metrics.increment("tss_member_malicious", 1);
        }
        Ok(())
    }

    pub(crate) fn require_status(&self, group: &Group, status: GroupStatus) -> Result<()> {
        if group.status != status {
            return Err(TssError::InvalidStatus(format!(
                "group {} is {}, expected {}",
                group.id, group.status, status
            )));
        }
        Ok(())
    }
}
