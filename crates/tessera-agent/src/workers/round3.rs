//! Round 3: verify received shares, then confirm or complain

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use tessera_coordinator::{Complaint, Confirm, Event, GroupStatus, Msg, Round2Info};
use tessera_core::{dkg, GroupId, MemberId, Scalar};

use crate::agent_store::{DkgRecord, GroupRecord};
use crate::error::{AgentError, Result};
use crate::relay::EventFilter;
use crate::sender::{Request, RequestKind};
use crate::workers::{event_loop, WorkerContext};

pub struct Round3Worker {
    ctx: WorkerContext,
}

/// What round 3 decided for one member
enum Verdict {
    Complain(Vec<Complaint>),
    Confirm(Confirm),
}

impl Round3Worker {
    pub fn new(ctx: WorkerContext) -> Self {
        Self { ctx }
    }

    pub async fn run(self) -> Result<()> {
        let stream = self.ctx.subscribe(EventFilter::kinds(&["round2_complete"])).await?;
        let worker = Arc::new(self);
        worker.catch_up().await?;

        let shutdown = worker.ctx.shutdown.clone();
        event_loop("round3", stream, shutdown, move |event| {
            let worker = Arc::clone(&worker);
            async move {
                match event {
                    Event::Round2Complete { group_id } => worker.handle_group(group_id).await,
                    _ => Ok(()),
                }
            }
        })
        .await;
        Ok(())
    }

    async fn catch_up(&self) -> Result<()> {
        for pending in self.ctx.relay.query_pending_groups(&self.ctx.address).await? {
            if pending.status == GroupStatus::Round3 {
                info!(group_id = pending.group_id, "catching up on round 3");
                self.handle_group(pending.group_id).await?;
            }
        }
        Ok(())
    }

    async fn handle_group(&self, group_id: GroupId) -> Result<()> {
        let verdict = match self.ctx.store.get_dkg(group_id)? {
            Some(record) => {
                let _guard = self.ctx.locks.lock(group_id, record.member_id).await;
                self.verify_shares(&record).await?
            }
            // Key already derived before a restart: confirm again from it
            None => match self.ctx.store.get_group(group_id)? {
                Some(group) => Verdict::Confirm(self.reconfirm(&group).await?),
                None => {
                    debug!(group_id, "no DKG record, skipping round 3");
                    return Ok(());
                }
            },
        };

        let msg = match verdict {
            Verdict::Complain(complaints) => {
                let respondents: Vec<MemberId> = complaints.iter().map(|c| c.respondent).collect();
                warn!(group_id, ?respondents, "invalid shares received, complaining");
                self.ctx.metrics.increment("agent_complaints_submitted", 1);
                Msg::SubmitComplaints {
                    group_id,
                    complaints,
                    sender: self.ctx.address.clone(),
                }
            }
            Verdict::Confirm(confirm) => {
                info!(group_id, member_id = confirm.member_id, "confirming group key");
                self.ctx.metrics.increment("agent_confirms_submitted", 1);
                Msg::SubmitConfirm {
                    group_id,
                    confirm,
                    sender: self.ctx.address.clone(),
                }
            }
        };
        self.ctx
            .sender
            .send(Request::new(RequestKind::Round3, group_id, msg))
            .await
    }

    /// Decrypt and check every share addressed to us
    ///
    /// All good: derive our key share, store it and drop the DKG secrets.
    async fn verify_shares(&self, record: &DkgRecord) -> Result<Verdict> {
        let group_id = record.group_id;
        let me = record.member_id;
        let round1_infos = self.ctx.relay.query_round1_infos(group_id).await?;
        let round2_infos: BTreeMap<MemberId, Round2Info> = self
            .ctx
            .relay
            .query_round2_infos(group_id)
            .await?
            .into_iter()
            .map(|info| (info.member_id, info))
            .collect();

        let mut shares: Vec<Scalar> = vec![dkg::compute_secret_share(&record.coefficients, me)?];
        let mut complaints = Vec::new();
        for sender in &round1_infos {
            let j = sender.member_id;
            if j == me {
                continue;
            }
            let round2 = round2_infos
                .get(&j)
                .ok_or_else(|| AgentError::NotFound(format!("round 2 info of member {} in group {}", j, group_id)))?;
            let slot = dkg::find_member_slot(j, me)?;
            let encrypted = round2.encrypted_secret_shares.get(slot).ok_or_else(|| {
                AgentError::NotFound(format!("share slot {} of member {}", slot, j))
            })?;
            let key_sym = dkg::compute_key_sym(&record.one_time_priv, &sender.one_time_pub_key)?;
            let share = dkg::decrypt(encrypted, &key_sym)?;
            if dkg::verify_secret_share(me, &share, &sender.coefficient_commits).is_ok() {
                shares.push(share);
                continue;
            }
            let (signature, key_sym) =
                dkg::sign_complaint(&record.one_time_pub, &sender.one_time_pub_key, &record.one_time_priv)?;
            complaints.push(Complaint {
                complainant: me,
                respondent: j,
                key_sym,
                signature,
            });
        }
        if !complaints.is_empty() {
            return Ok(Verdict::Complain(complaints));
        }

        let private_key = dkg::compute_own_private_key(&shares)?;
        let own_pub_key = private_key.public_point()?;
        let own_pub_key_sig = dkg::sign_own_pub_key(me, &record.dkg_context, &own_pub_key, &private_key)?;
        let group_pub_key = self
            .ctx
            .relay
            .query_group(group_id)
            .await?
            .pub_key
            .ok_or_else(|| AgentError::NotFound(format!("public key of group {}", group_id)))?;

        self.ctx.store.set_group(&GroupRecord {
            group_id,
            member_id: me,
            group_pub_key,
            private_key,
            created_at: Utc::now(),
        })?;
        self.ctx.store.delete_dkg(group_id)?;
        Ok(Verdict::Confirm(Confirm {
            member_id: me,
            own_pub_key_sig,
        }))
    }

    async fn reconfirm(&self, group: &GroupRecord) -> Result<Confirm> {
        let dkg_context = self.ctx.relay.query_dkg_context(group.group_id).await?;
        let own_pub_key = group.private_key.public_point()?;
        let own_pub_key_sig =
            dkg::sign_own_pub_key(group.member_id, &dkg_context, &own_pub_key, &group.private_key)?;
        Ok(Confirm {
            member_id: group.member_id,
            own_pub_key_sig,
        })
    }
}
