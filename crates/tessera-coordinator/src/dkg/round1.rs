use tracing::debug;

use tessera_core::{dkg, GroupId, KvStore};

use crate::coordinator::Coordinator;
use crate::error::{Result, TssError};
use crate::types::{GroupStatus, Round1Info};

impl<S: KvStore> Coordinator<S> {
    /// Accept one member's coefficient commitments and one-time key
    pub fn submit_round1(&mut self, group_id: GroupId, info: Round1Info, sender: &str) -> Result<()> {
        let group = self.get_group(group_id)?;
        self.require_status(&group, GroupStatus::Round1)?;
        let member_id = info.member_id;
        self.get_authorized_member(group_id, member_id, sender)?;

        if self.get_round1_info(group_id, member_id)?.is_some() {
            return Err(TssError::MemberAlreadySubmit(member_id));
        }
        let got = info.coefficient_commits.len() as u64;
        if got != group.threshold {
            return Err(TssError::InvalidLengthCoefCommits {
                expected: group.threshold,
                got,
            });
        }

        let dkg_context = self.get_dkg_context(group_id)?;
        dkg::verify_one_time_signature(member_id, &dkg_context, &info.one_time_signature, &info.one_time_pub_key)
            .map_err(|_| TssError::VerifyOneTimeSignatureFailed(member_id))?;
        dkg::verify_a0_signature(member_id, &dkg_context, &info.a0_signature, &info.coefficient_commits[0])
            .map_err(|_| TssError::VerifyA0SignatureFailed(member_id))?;

        for (index, commit) in info.coefficient_commits.iter().enumerate() {
            let index = index as u64;
            let accumulated = match self.get_accumulated_commit(group_id, index)? {
                Some(sum) => dkg::add_points(&sum, commit)?,
                None => *commit,
            };
            self.set_accumulated_commit(group_id, index, &accumulated);
        }
        self.set_round1_info(group_id, &info);

        let count = self.round1_count(group_id)? + 1;
        self.set_round1_count(group_id, count);
        debug!(group_id, member_id, count, size = group.size, "round 1 info accepted");
        if count == group.size {
            self.add_pending_process_group(group_id)?;
        }
        Ok(())
    }
}
