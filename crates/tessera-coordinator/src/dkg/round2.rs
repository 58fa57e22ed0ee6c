use tracing::debug;

use tessera_core::{dkg, GroupId, KvStore};

use crate::coordinator::Coordinator;
use crate::error::{Result, TssError};
use crate::types::{GroupStatus, Round2Info};

impl<S: KvStore> Coordinator<S> {
    /// Accept one member's encrypted shares and derive its public key
    pub fn submit_round2(&mut self, group_id: GroupId, info: Round2Info, sender: &str) -> Result<()> {
        let group = self.get_group(group_id)?;
        self.require_status(&group, GroupStatus::Round2)?;
        let member_id = info.member_id;
        let mut member = self.get_authorized_member(group_id, member_id, sender)?;

        if self.get_round2_info(group_id, member_id)?.is_some() {
            return Err(TssError::MemberAlreadySubmit(member_id));
        }
        let expected = group.size - 1;
        let got = info.encrypted_secret_shares.len() as u64;
        if got != expected {
            return Err(TssError::InvalidLengthEncryptedSecretShares { expected, got });
        }

        let accumulated = self.get_accumulated_commits(group_id)?;
        member.pub_key = Some(dkg::compute_own_public_key(&accumulated, member_id)?);
        self.set_member(&member);
        self.set_round2_info(group_id, &info);

        let count = self.round2_count(group_id)? + 1;
        self.set_round2_count(group_id, count);
        debug!(group_id, member_id, count, size = group.size, "round 2 info accepted");
        if count == group.size {
            self.add_pending_process_group(group_id)?;
        }
        Ok(())
    }
}
