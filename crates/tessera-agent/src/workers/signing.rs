//! Partial signatures for signing requests that drew this member

use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use tessera_coordinator::{AssignedMemberEvent, Event, Msg, Signing, SigningAttempt};
use tessera_core::{signing, GroupId, MemberId, Point, SigningId};

use crate::error::{AgentError, Result};
use crate::relay::EventFilter;
use crate::sender::{Request, RequestKind, Response};
use crate::workers::{event_loop, WorkerContext};

/// Everything needed to produce one partial signature
#[derive(Debug, Clone)]
struct SigningTask {
    signing_id: SigningId,
    group_id: GroupId,
    attempt: u64,
    message: Vec<u8>,
    group_pub_key: Point,
    group_pub_nonce: Point,
    assigned_members: Vec<AssignedMemberEvent>,
}

impl SigningTask {
    fn from_event(event: Event) -> Option<Self> {
        match event {
            Event::RequestSignature {
                signing_id,
                group_id,
                attempt,
                message,
                group_pub_key,
                group_pub_nonce,
                assigned_members,
            } => Some(Self {
                signing_id,
                group_id,
                attempt,
                message,
                group_pub_key,
                group_pub_nonce,
                assigned_members,
            }),
            _ => None,
        }
    }

    fn from_query(signing: Signing, attempt: SigningAttempt) -> Self {
        Self {
            signing_id: signing.id,
            group_id: signing.group_id,
            attempt: attempt.attempt,
            message: signing.message,
            group_pub_key: signing.group_pub_key,
            group_pub_nonce: attempt.group_pub_nonce,
            assigned_members: attempt
                .assigned_members
                .into_iter()
                .map(|m| AssignedMemberEvent {
                    member_id: m.member_id,
                    address: m.address,
                    pub_de: m.pub_de,
                    binding_factor: m.binding_factor,
                    pub_nonce: m.pub_nonce,
                })
                .collect(),
        }
    }
}

pub struct SigningWorker {
    ctx: WorkerContext,
    responses: Mutex<Option<mpsc::UnboundedReceiver<Response>>>,
}

impl SigningWorker {
    /// `responses` receives the sender's outcomes for signature requests
    pub fn new(ctx: WorkerContext, responses: mpsc::UnboundedReceiver<Response>) -> Self {
        Self {
            ctx,
            responses: Mutex::new(Some(responses)),
        }
    }

    pub async fn run(self) -> Result<()> {
        let stream = self
            .ctx
            .subscribe(EventFilter::kinds(&["request_signature"]).mentioning(self.ctx.address.clone()))
            .await?;
        let worker = Arc::new(self);
        worker.catch_up().await?;

        if let Some(responses) = worker.responses.lock().await.take() {
            tokio::spawn(Arc::clone(&worker).handle_responses(responses));
        }

        let shutdown = worker.ctx.shutdown.clone();
        event_loop("signing", stream, shutdown, move |event| {
            let worker = Arc::clone(&worker);
            async move {
                match SigningTask::from_event(event) {
                    Some(task) => worker.sign(task, 0).await,
                    None => Ok(()),
                }
            }
        })
        .await;
        Ok(())
    }

    async fn catch_up(&self) -> Result<()> {
        for signing_id in self.ctx.relay.query_pending_signings(&self.ctx.address).await? {
            info!(signing_id, "catching up on signing");
            if let Err(e) = self.sign_current(signing_id, 0).await {
                warn!(signing_id, error = %e, "catch-up signing failed");
            }
        }
        Ok(())
    }

    /// Sign the signing's current attempt, if it is still open
    async fn sign_current(&self, signing_id: SigningId, tries: u64) -> Result<()> {
        match self.ctx.relay.query_signing(signing_id).await? {
            (signing, Some(attempt)) => self.sign(SigningTask::from_query(signing, attempt), tries).await,
            (signing, None) => {
                debug!(signing_id, status = ?signing.status, "signing no longer open");
                Ok(())
            }
        }
    }

    async fn sign(&self, task: SigningTask, tries: u64) -> Result<()> {
        let Some(me) = task
            .assigned_members
            .iter()
            .find(|m| m.address == self.ctx.address)
        else {
            return Ok(());
        };
        let group = self.ctx.store.get_group(task.group_id)?.ok_or_else(|| {
            AgentError::NotFound(format!("key share of group {}", task.group_id))
        })?;
        let de = self.ctx.store.get_de(&me.pub_de)?;

        let member_ids: Vec<MemberId> = task.assigned_members.iter().map(|m| m.member_id).collect();
        let lagrange = signing::compute_lagrange_coefficient(me.member_id, &member_ids)?;
        let own_nonce = signing::compute_own_priv_nonce(&de.priv_d, &de.priv_e, &me.binding_factor)?;
        let signature = signing::sign_signing(
            &task.group_pub_nonce,
            &task.group_pub_key,
            &task.message,
            &lagrange,
            &own_nonce,
            &group.private_key,
        )?;

        info!(
            signing_id = task.signing_id,
            attempt = task.attempt,
            member_id = me.member_id,
            "submitting partial signature"
        );
        self.ctx.metrics.increment("agent_signatures_submitted", 1);
        let mut request = Request::new(
            RequestKind::Signature,
            task.signing_id,
            Msg::SubmitPartialSignature {
                signing_id: task.signing_id,
                attempt: task.attempt,
                member_id: me.member_id,
                signature,
                sender: self.ctx.address.clone(),
            },
        );
        request.tries = tries;
        self.ctx.sender.send(request).await
    }

    /// Sign again only while the chain still waits for our share
    async fn retry(&self, signing_id: SigningId, tries: u64) -> Result<()> {
        let pending = self.ctx.relay.query_pending_signings(&self.ctx.address).await?;
        if !pending.contains(&signing_id) {
            debug!(signing_id, "share no longer needed");
            return Ok(());
        }
        self.sign_current(signing_id, tries).await
    }

    /// Retry failed submissions against whatever attempt is current
    async fn handle_responses(self: Arc<Self>, mut responses: mpsc::UnboundedReceiver<Response>) {
        let mut shutdown = self.ctx.shutdown.clone();
        loop {
            let response = tokio::select! {
                response = responses.recv() => match response {
                    Some(response) => response,
                    None => break,
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            };
            if response.success {
                continue;
            }
            let signing_id = response.request.id;
            let tries = response.request.tries + 1;
            if tries >= self.ctx.config.max_try {
                warn!(signing_id, tries, error = ?response.error, "giving up on partial signature");
                self.ctx.metrics.increment("agent_signatures_abandoned", 1);
                continue;
            }
            warn!(signing_id, tries, error = ?response.error, "partial signature failed, retrying");
            let worker = Arc::clone(&self);
            tokio::spawn(async move {
                tokio::time::sleep(worker.ctx.config.poll_interval()).await;
                if let Err(e) = worker.retry(signing_id, tries).await {
                    warn!(signing_id, error = %e, "signing retry failed");
                }
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent_store::{DeRecord, GroupRecord};
    use crate::local::LocalChain;
    use crate::relay::MessageRelay;
    use crate::workers::test_support::Harness;
    use chrono::Utc;
    use std::time::Duration;
    use tessera_coordinator::{testing, Originator, Params, SigningStatus};

    /// Two agents holding the key shares of an active 2-of-2 group, each with
    /// three DEs on chain
    async fn seed_signers() -> (Arc<LocalChain>, Vec<Harness>) {
        let chain = Arc::new(LocalChain::new(Params::default(), "test").unwrap());
        let mut sims: Vec<testing::SimParticipant> =
            ["alice", "bob"].iter().map(|a| testing::SimParticipant::new(*a)).collect();
        let group_id = chain
            .with_coordinator_mut(|c| testing::create_group(c, &mut sims, 2, "test").map(|(gid, _)| gid))
            .unwrap()
            .unwrap();
        let group_pub_key = chain
            .with_coordinator(|c| c.get_group(group_id).unwrap().pub_key.unwrap())
            .unwrap();

        let mut harnesses = Vec::new();
        for (i, sim) in sims.iter().enumerate() {
            let harness = Harness::with_chain(&sim.address, Arc::clone(&chain));
            harness
                .ctx
                .store
                .set_group(&GroupRecord {
                    group_id,
                    member_id: i as u64 + 1,
                    group_pub_key,
                    private_key: sim.own_private_key(group_id).unwrap(),
                    created_at: Utc::now(),
                })
                .unwrap();
            let secret = harness.ctx.config.random_secret_bytes().unwrap();
            let mut des = Vec::new();
            for index in 0..3 {
                let de = signing::derive_de(&secret, index).unwrap();
                harness.ctx.store.set_de(&DeRecord::new(&de, index)).unwrap();
                des.push(de.pub_de);
            }
            chain
                .with_coordinator_mut(|c| {
                    c.deliver(Msg::SubmitDEs {
                        des,
                        sender: sim.address.clone(),
                    })
                })
                .unwrap()
                .unwrap();
            harnesses.push(harness);
        }
        (chain, harnesses)
    }

    fn spawn_worker(harness: &Harness) {
        let (_, responses) = mpsc::unbounded_channel();
        tokio::spawn(SigningWorker::new(harness.ctx.clone(), responses).run());
    }

    async fn request_signing(chain: &LocalChain) {
        chain
            .submit(
                "gov",
                vec![Msg::RequestSigning {
                    group_id: 1,
                    originator: Originator::new("test", "user"),
                    content: b"hello".to_vec(),
                }],
                2.0,
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_partial_signatures_complete_signing() {
        let (chain, harnesses) = seed_signers().await;
        for harness in &harnesses {
            spawn_worker(harness);
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        request_signing(&chain).await;

        harnesses[0]
            .eventually("signing success", |h| {
                h.chain
                    .with_coordinator(|c| c.get_signing(1).unwrap().status == SigningStatus::Success)
                    .unwrap()
            })
            .await;
    }

    #[tokio::test]
    async fn test_pending_signing_caught_up_on_start() {
        let (chain, harnesses) = seed_signers().await;
        spawn_worker(&harnesses[1]);
        tokio::time::sleep(Duration::from_millis(20)).await;
        request_signing(&chain).await;

        harnesses[0]
            .eventually("bob signed", |h| {
                h.chain
                    .with_coordinator(|c| c.partial_signature_count(1, 1).unwrap() == 1)
                    .unwrap()
            })
            .await;
        let pending = chain.query_pending_signings("alice").await.unwrap();
        assert_eq!(pending, vec![1]);

        spawn_worker(&harnesses[0]);
        harnesses[0]
            .eventually("signing success", |h| {
                h.chain
                    .with_coordinator(|c| c.get_signing(1).unwrap().status == SigningStatus::Success)
                    .unwrap()
            })
            .await;
    }

    #[tokio::test]
    async fn test_missing_key_share_is_an_error() {
        let harness = Harness::new("dave", Params::default());
        let (_, responses) = mpsc::unbounded_channel();
        let worker = SigningWorker::new(harness.ctx.clone(), responses);
        let de = signing::derive_de(b"x", 0).unwrap();
        let task = SigningTask {
            signing_id: 1,
            group_id: 5,
            attempt: 1,
            message: vec![1],
            group_pub_key: de.pub_de.pub_d,
            group_pub_nonce: de.pub_de.pub_e,
            assigned_members: vec![AssignedMemberEvent {
                member_id: 1,
                address: "dave".into(),
                pub_de: de.pub_de,
                binding_factor: de.priv_d,
                pub_nonce: de.pub_de.pub_d,
            }],
        };
        assert!(matches!(worker.sign(task, 0).await, Err(AgentError::NotFound(_))));
    }
}
