use tracing::{error, info, warn};

use tessera_core::{GroupId, KvStore};

use crate::coordinator::Coordinator;
use crate::error::{Result, TssError};
use crate::events::Event;
use crate::types::GroupStatus;

impl<S: KvStore> Coordinator<S> {
    /// Advance every group whose current round filled up during this block
    pub(crate) fn process_pending_groups(&mut self) -> Result<()> {
        let pending = self.pending_process_groups()?;
        self.set_pending_process_groups(&Vec::new());
        for group_id in pending {
            if let Err(e) = self.with_transaction(|tx| tx.process_group(group_id)) {
                error!(group_id, error = %e, "failed to process group");
            }
        }
        Ok(())
    }

    fn process_group(&mut self, group_id: GroupId) -> Result<()> {
        let mut group = self.get_group(group_id)?;
        match group.status {
            GroupStatus::Round1 => {
                let a0_sum = self
                    .get_accumulated_commit(group_id, 0)?
                    .ok_or_else(|| TssError::Corrupted(format!("group {} has no accumulated commit", group_id)))?;
                group.status = GroupStatus::Round2;
                group.pub_key = Some(a0_sum);
                self.set_group(&group);
                info!(group_id, pub_key = %a0_sum.short(), "round 1 complete");
                self.emit(Event::Round1Complete { group_id });
            }
            GroupStatus::Round2 => {
                group.status = GroupStatus::Round3;
                self.set_group(&group);
                info!(group_id, "round 2 complete");
                self.emit(Event::Round2Complete { group_id });
            }
            GroupStatus::Round3 => {
                let malicious: Vec<u64> = self
                    .get_members(group_id)?
                    .into_iter()
                    .filter(|m| m.is_malicious)
                    .map(|m| m.id)
                    .collect();
                if malicious.is_empty() {
                    let pub_key = group
                        .pub_key
                        .ok_or_else(|| TssError::Corrupted(format!("group {} has no public key", group_id)))?;
                    group.status = GroupStatus::Active;
                    info!(group_id, pub_key = %pub_key.to_hex(), "group is active");
                    self.metrics.increment("tss_group_active", 1);
                    self.emit(Event::Round3Complete { group_id, pub_key });
                } else {
                    group.status = GroupStatus::Fallen;
                    warn!(group_id, ?malicious, "group fell");
                    self.metrics.increment("tss_group_fallen", 1);
                    self.emit(Event::Round3Failed { group_id, malicious });
                }
                self.set_group(&group);
                self.delete_interim_dkg_data(group_id);
            }
            status => {
                warn!(group_id, %status, "queued group is no longer in DKG");
            }
        }
        Ok(())
    }

    /// Expire groups stuck in DKG past the creation period
    ///
    /// Walks group ids from the persisted cursor and stops at the first group
    /// that is still within its period, so re-running at the same height is a
    /// no-op.
    pub(crate) fn handle_expired_groups(&mut self) -> Result<()> {
        let count = self.group_count()?;
        let mut group_id = self.last_expired_group_id()? + 1;
        while group_id <= count {
            let mut group = self.get_group(group_id)?;
            if group.created_height + self.params.creation_period > self.block.height {
                break;
            }
            if group.status.in_dkg() {
                group.status = GroupStatus::Expired;
                self.set_group(&group);
                info!(group_id, "group expired");
                self.metrics.increment("tss_group_expired", 1);
                self.emit(Event::GroupExpired { group_id });
            }
            self.delete_interim_dkg_data(group_id);
            self.set_last_expired_group_id(group_id);
            group_id += 1;
        }
        Ok(())
    }
}
