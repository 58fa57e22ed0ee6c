use std::collections::BTreeSet;

use tracing::{debug, info};

use tessera_core::{dkg, GroupId, KvStore, MemberId};

use crate::coordinator::Coordinator;
use crate::error::{Result, TssError};
use crate::events::Event;
use crate::types::{
    Complaint, ComplaintStatus, ComplaintWithStatus, ComplaintsWithStatus, Confirm, Group,
    GroupStatus,
};

impl<S: KvStore> Coordinator<S> {
    /// Adjudicate complaints filed by one member
    ///
    /// A substantiated complaint marks the respondent malicious; one that
    /// cannot be substantiated marks the complainant instead.
    pub fn submit_complaints(&mut self, group_id: GroupId, complaints: Vec<Complaint>, sender: &str) -> Result<()> {
        let group = self.get_group(group_id)?;
        self.require_status(&group, GroupStatus::Round3)?;

        let complainant = complaints
            .first()
            .map(|c| c.complainant)
            .ok_or_else(|| TssError::ComplainFailed("no complaint submitted".to_string()))?;
        self.get_authorized_member(group_id, complainant, sender)?;
        self.require_no_round3_submission(group_id, complainant)?;

        let mut respondents = BTreeSet::new();
        let mut resolved = Vec::with_capacity(complaints.len());
        for complaint in complaints {
            if complaint.complainant != complainant {
                return Err(TssError::ComplainFailed(format!(
                    "complainant {} differs from {}",
                    complaint.complainant, complainant
                )));
            }
            if complaint.respondent == complainant {
                return Err(TssError::ComplainFailed("member complained about itself".to_string()));
            }
            if !respondents.insert(complaint.respondent) {
                return Err(TssError::ComplainFailed(format!(
                    "respondent {} listed twice",
                    complaint.respondent
                )));
            }
            self.get_member(group_id, complaint.respondent)
                .map_err(|e| TssError::ComplainFailed(e.to_string()))?;

            let status = self.resolve_complaint(&group, &complaint)?;
            resolved.push(ComplaintWithStatus { complaint, status });
        }

        self.set_complaints_with_status(
            group_id,
            &ComplaintsWithStatus {
                member_id: complainant,
                complaints: resolved,
            },
        );
        self.count_round3_submission(&group)
    }

    fn resolve_complaint(&mut self, group: &Group, complaint: &Complaint) -> Result<ComplaintStatus> {
        let group_id = group.id;
        let (i, j) = (complaint.complainant, complaint.respondent);
        let round1_i = self.round1_of(group_id, i)?;
        let round1_j = self.round1_of(group_id, j)?;
        let round2_j = self
            .get_round2_info(group_id, j)?
            .ok_or_else(|| TssError::Corrupted(format!("missing round 2 info of member {}", j)))?;
        let slot = dkg::find_member_slot(j, i)?;
        let enc_share = round2_j
            .encrypted_secret_shares
            .get(slot)
            .ok_or_else(|| TssError::Corrupted(format!("missing share slot {} of member {}", slot, j)))?;

        let verdict = dkg::verify_complaint(
            &round1_i.one_time_pub_key,
            &round1_j.one_time_pub_key,
            &complaint.key_sym,
            &complaint.signature,
            enc_share,
            i,
            &round1_j.coefficient_commits,
        );
        let status = match verdict {
            Ok(()) => {
                self.mark_malicious(group_id, j)?;
                ComplaintStatus::Success
            }
            Err(reason) => {
                debug!(group_id, complainant = i, respondent = j, %reason, "complaint rejected");
                self.mark_malicious(group_id, i)?;
                ComplaintStatus::Failed
            }
        };
        info!(group_id, complainant = i, respondent = j, ?status, "complaint resolved");
        self.emit(Event::ComplaintResolved {
            group_id,
            complainant: i,
            respondent: j,
            outcome: status,
        });
        Ok(status)
    }

    /// Accept a member's signature over its own public key
    pub fn submit_confirm(&mut self, group_id: GroupId, confirm: Confirm, sender: &str) -> Result<()> {
        let group = self.get_group(group_id)?;
        self.require_status(&group, GroupStatus::Round3)?;
        let member_id = confirm.member_id;
        let member = self.get_authorized_member(group_id, member_id, sender)?;
        self.require_no_round3_submission(group_id, member_id)?;

        let own_pub = member
            .pub_key
            .ok_or_else(|| TssError::ConfirmFailed(format!("member {} has no public key", member_id)))?;
        let dkg_context = self.get_dkg_context(group_id)?;
        dkg::verify_own_pub_key_sig(member_id, &dkg_context, &confirm.own_pub_key_sig, &own_pub)
            .map_err(|e| TssError::ConfirmFailed(e.to_string()))?;

        self.set_confirm(group_id, &confirm);
        self.emit(Event::ConfirmSuccess { group_id, member_id });
        debug!(group_id, member_id, "confirm accepted");
        self.count_round3_submission(&group)
    }

    fn round1_of(&self, group_id: GroupId, member_id: MemberId) -> Result<crate::types::Round1Info> {
        self.get_round1_info(group_id, member_id)?
            .ok_or_else(|| TssError::Corrupted(format!("missing round 1 info of member {}", member_id)))
    }

    fn require_no_round3_submission(&self, group_id: GroupId, member_id: MemberId) -> Result<()> {
        if self.get_confirm(group_id, member_id)?.is_some()
            || self.get_complaints_with_status(group_id, member_id)?.is_some()
        {
            return Err(TssError::MemberIsAlreadyComplainOrConfirm(member_id));
        }
        Ok(())
    }

    fn count_round3_submission(&mut self, group: &Group) -> Result<()> {
        let count = self.confirm_complain_count(group.id)? + 1;
        self.set_confirm_complain_count(group.id, count);
        if count == group.size {
            self.add_pending_process_group(group.id)?;
        }
        Ok(())
    }
}
