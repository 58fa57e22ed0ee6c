//! Round 2: encrypted shares for every other member

use std::sync::Arc;

use tracing::{debug, info};

use tessera_coordinator::{Event, GroupStatus, Msg, Round2Info};
use tessera_core::{dkg, GroupId, Point};

use crate::error::Result;
use crate::relay::EventFilter;
use crate::sender::{Request, RequestKind};
use crate::workers::{event_loop, WorkerContext};

pub struct Round2Worker {
    ctx: WorkerContext,
}

impl Round2Worker {
    pub fn new(ctx: WorkerContext) -> Self {
        Self { ctx }
    }

    pub async fn run(self) -> Result<()> {
        let stream = self.ctx.subscribe(EventFilter::kinds(&["round1_complete"])).await?;
        let worker = Arc::new(self);
        worker.catch_up().await?;

        let shutdown = worker.ctx.shutdown.clone();
        event_loop("round2", stream, shutdown, move |event| {
            let worker = Arc::clone(&worker);
            async move {
                match event {
                    Event::Round1Complete { group_id } => worker.handle_group(group_id).await,
                    _ => Ok(()),
                }
            }
        })
        .await;
        Ok(())
    }

    async fn catch_up(&self) -> Result<()> {
        for pending in self.ctx.relay.query_pending_groups(&self.ctx.address).await? {
            if pending.status == GroupStatus::Round2 {
                info!(group_id = pending.group_id, "catching up on round 2");
                self.handle_group(pending.group_id).await?;
            }
        }
        Ok(())
    }

    /// Encrypt a share of our polynomial for each other member
    ///
    /// Groups without local DKG secrets are not ours and are skipped.
    async fn handle_group(&self, group_id: GroupId) -> Result<()> {
        let Some(record) = self.ctx.store.get_dkg(group_id)? else {
            debug!(group_id, "no DKG record, skipping round 2");
            return Ok(());
        };
        let _guard = self.ctx.locks.lock(group_id, record.member_id).await;

        let mut round1_infos = self.ctx.relay.query_round1_infos(group_id).await?;
        round1_infos.sort_by_key(|info| info.member_id);
        let one_time_pubs: Vec<Point> = round1_infos.iter().map(|info| info.one_time_pub_key).collect();

        let encrypted_secret_shares = dkg::compute_encrypted_secret_shares(
            record.member_id,
            &record.one_time_priv,
            &one_time_pubs,
            &record.coefficients,
        )?;

        info!(group_id, member_id = record.member_id, "submitting round 2");
        self.ctx.metrics.increment("agent_round2_submitted", 1);
        self.ctx
            .sender
            .send(Request::new(
                RequestKind::Round2,
                group_id,
                Msg::SubmitRound2Info {
                    group_id,
                    round2_info: Round2Info {
                        member_id: record.member_id,
                        encrypted_secret_shares,
                    },
                    sender: self.ctx.address.clone(),
                },
            ))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::local::LocalChain;
    use crate::relay::MessageRelay;
    use crate::workers::round1::Round1Worker;
    use crate::workers::test_support::Harness;
    use tessera_coordinator::Params;

    #[tokio::test]
    async fn test_shares_follow_round1() {
        let chain = Arc::new(LocalChain::new(Params::default(), "test").unwrap());
        let alice = Harness::with_chain("alice", Arc::clone(&chain));
        let bob = Harness::with_chain("bob", Arc::clone(&chain));
        for harness in [&alice, &bob] {
            tokio::spawn(Round1Worker::new(harness.ctx.clone()).run());
            tokio::spawn(Round2Worker::new(harness.ctx.clone()).run());
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        chain
            .submit(
                "gov",
                vec![Msg::CreateGroup {
                    members: vec!["alice".into(), "bob".into()],
                    threshold: 2,
                    module: "test".into(),
                }],
                2.0,
            )
            .await
            .unwrap();

        alice
            .eventually("both round 2 infos", |h| {
                h.chain.with_coordinator(|c| c.round2_count(1).unwrap() == 2).unwrap()
            })
            .await;
        let status = chain.with_coordinator(|c| c.get_group(1).unwrap().status).unwrap();
        assert_eq!(status, GroupStatus::Round3);
    }

    #[tokio::test]
    async fn test_foreign_group_is_ignored() {
        let harness = Harness::new("carol", Params::default());
        let worker = Round2Worker::new(harness.ctx.clone());
        worker.handle_group(42).await.unwrap();
        assert_eq!(harness.chain.mempool_len().unwrap(), 0);
    }
}
