//! Round 1: commit to a polynomial and a one-time key

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info};

use tessera_coordinator::{Event, GroupStatus, Msg, Round1Info};
use tessera_core::{dkg, GroupId, MemberId};

use crate::agent_store::DkgRecord;
use crate::error::Result;
use crate::relay::EventFilter;
use crate::sender::{Request, RequestKind};
use crate::workers::{event_loop, member_id_of, WorkerContext};

pub struct Round1Worker {
    ctx: WorkerContext,
}

impl Round1Worker {
    pub fn new(ctx: WorkerContext) -> Self {
        Self { ctx }
    }

    pub async fn run(self) -> Result<()> {
        let stream = self
            .ctx
            .subscribe(EventFilter::kinds(&["group_created"]).mentioning(self.ctx.address.clone()))
            .await?;
        let worker = Arc::new(self);
        worker.catch_up().await?;

        let shutdown = worker.ctx.shutdown.clone();
        event_loop("round1", stream, shutdown, move |event| {
            let worker = Arc::clone(&worker);
            async move { worker.handle_event(event).await }
        })
        .await;
        Ok(())
    }

    async fn catch_up(&self) -> Result<()> {
        for pending in self.ctx.relay.query_pending_groups(&self.ctx.address).await? {
            if pending.status != GroupStatus::Round1 {
                continue;
            }
            let group = self.ctx.relay.query_group(pending.group_id).await?;
            let dkg_context = self.ctx.relay.query_dkg_context(pending.group_id).await?;
            info!(group_id = pending.group_id, "catching up on round 1");
            self.handle_group(pending.group_id, pending.member_id, group.threshold, dkg_context)
                .await?;
        }
        Ok(())
    }

    async fn handle_event(&self, event: Event) -> Result<()> {
        let Event::GroupCreated {
            group_id,
            threshold,
            dkg_context,
            members,
            ..
        } = event
        else {
            return Ok(());
        };
        let Some(member_id) = member_id_of(&members, &self.ctx.address) else {
            return Ok(());
        };
        self.handle_group(group_id, member_id, threshold, dkg_context).await
    }

    /// Generate and persist round-1 secrets, then submit the public half
    ///
    /// Secrets already on disk for the group are reused, so a replayed event
    /// submits the same data again.
    async fn handle_group(
        &self,
        group_id: GroupId,
        member_id: MemberId,
        threshold: u64,
        dkg_context: Vec<u8>,
    ) -> Result<()> {
        let _guard = self.ctx.locks.lock(group_id, member_id).await;

        let round1_info = match self.ctx.store.get_dkg(group_id)? {
            Some(record) => {
                debug!(group_id, member_id, "round 1 data already generated");
                record.round1_info.clone()
            }
            None => {
                let data = dkg::generate_round1_data(member_id, threshold, &dkg_context)?;
                let round1_info = Round1Info {
                    member_id,
                    coefficient_commits: data.coefficient_commits.clone(),
                    one_time_pub_key: data.one_time_pub,
                    a0_signature: data.a0_sig,
                    one_time_signature: data.one_time_sig,
                };
                self.ctx.store.set_dkg(&DkgRecord {
                    group_id,
                    member_id,
                    threshold,
                    dkg_context,
                    one_time_priv: data.one_time_priv,
                    one_time_pub: data.one_time_pub,
                    coefficients: data.coefficients.clone(),
                    round1_info: round1_info.clone(),
                    created_at: Utc::now(),
                })?;
                round1_info
            }
        };

        info!(group_id, member_id, "submitting round 1");
        self.ctx.metrics.increment("agent_round1_submitted", 1);
        self.ctx
            .sender
            .send(Request::new(
                RequestKind::Round1,
                group_id,
                Msg::SubmitRound1Info {
                    group_id,
                    round1_info,
                    sender: self.ctx.address.clone(),
                },
            ))
            .await
    }
}
