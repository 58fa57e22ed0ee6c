//! Read-only views used by participant agents

use serde::{Deserialize, Serialize};

use tessera_core::{GroupId, KvStore, SigningId};

use crate::coordinator::Coordinator;
use crate::error::Result;
use crate::types::{GroupStatus, Member, SigningStatus};

/// A group in DKG still waiting on a given address
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingGroup {
    pub group_id: GroupId,
    pub member_id: u64,
    pub status: GroupStatus,
}

impl<S: KvStore> Coordinator<S> {
    pub fn get_member_by_address(&self, group_id: GroupId, address: &str) -> Result<Option<Member>> {
        Ok(self
            .get_members(group_id)?
            .into_iter()
            .find(|m| m.address == address))
    }

    /// Groups whose current DKG round lacks a submission from `address`
    ///
    /// Only groups past the expiry cursor are considered.
    pub fn pending_groups(&self, address: &str) -> Result<Vec<PendingGroup>> {
        let mut pending = Vec::new();
        let first = self.last_expired_group_id()? + 1;
        for group_id in first..=self.group_count()? {
            let group = self.get_group(group_id)?;
            if !group.status.in_dkg() {
                continue;
            }
            let Some(member) = self.get_member_by_address(group_id, address)? else {
                continue;
            };
            let submitted = match group.status {
                GroupStatus::Round1 => self.get_round1_info(group_id, member.id)?.is_some(),
                GroupStatus::Round2 => self.get_round2_info(group_id, member.id)?.is_some(),
                _ => {
                    self.get_confirm(group_id, member.id)?.is_some()
                        || self.get_complaints_with_status(group_id, member.id)?.is_some()
                }
            };
            if !submitted {
                pending.push(PendingGroup {
                    group_id,
                    member_id: member.id,
                    status: group.status,
                });
            }
        }
        Ok(pending)
    }

    /// Waiting signings whose current attempt still needs `address`'s share
    pub fn pending_signings(&self, address: &str) -> Result<Vec<SigningId>> {
        let mut pending = Vec::new();
        for entry in self.signing_expirations()? {
            let signing = self.get_signing(entry.signing_id)?;
            if signing.status != SigningStatus::Waiting || signing.current_attempt != entry.attempt {
                continue;
            }
            let Ok(attempt) = self.get_signing_attempt(entry.signing_id, entry.attempt) else {
                continue;
            };
            for member in &attempt.assigned_members {
                if member.address == address
                    && self
                        .get_partial_signature(entry.signing_id, entry.attempt, member.member_id)?
                        .is_none()
                {
                    pending.push(entry.signing_id);
                }
            }
        }
        Ok(pending)
    }
}
