//! Keeps this member's on-chain DE queue topped up

use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use tessera_coordinator::{Event, Msg};
use tessera_core::{signing, PubDe};

use crate::agent_store::DeRecord;
use crate::de_counter::{expected_de_count, usage_threshold};
use crate::error::Result;
use crate::relay::EventFilter;
use crate::sender::{Request, RequestKind, Response};
use crate::workers::{event_loop, WorkerContext};

/// DEs per `SubmitDEs` message
pub const DE_CHUNK_SIZE: usize = 50;

pub struct DeWorker {
    ctx: WorkerContext,
    max_de_size: u64,
    responses: Mutex<Option<mpsc::UnboundedReceiver<Response>>>,
}

impl DeWorker {
    /// `responses` receives the sender's outcomes for DE submissions
    pub async fn new(ctx: WorkerContext, responses: mpsc::UnboundedReceiver<Response>) -> Result<Self> {
        let max_de_size = ctx.relay.query_params().await?.max_de_size;
        Ok(Self {
            ctx,
            max_de_size,
            responses: Mutex::new(Some(responses)),
        })
    }

    pub async fn run(self) -> Result<()> {
        let stream = self
            .ctx
            .subscribe(EventFilter::kinds(&["request_signature"]).mentioning(self.ctx.address.clone()))
            .await?;
        let worker = Arc::new(self);

        if let Some(responses) = worker.responses.lock().await.take() {
            tokio::spawn(Arc::clone(&worker).handle_responses(responses));
        }
        tokio::spawn(Arc::clone(&worker).check_interval());

        let shutdown = worker.ctx.shutdown.clone();
        event_loop("de", stream, shutdown, move |event| {
            let worker = Arc::clone(&worker);
            async move { worker.handle_usage(event).await }
        })
        .await;
        Ok(())
    }

    /// Compare the on-chain count against the target on start and then
    /// every `check_de_interval`
    async fn check_interval(self: Arc<Self>) {
        let mut shutdown = self.ctx.shutdown.clone();
        let mut ticker = tokio::time::interval(self.ctx.config.check_de_interval());
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.refill_missing().await {
                        warn!(error = %e, "DE check failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    }

    async fn refill_missing(&self) -> Result<()> {
        let on_chain = self.ctx.relay.query_de_count(&self.ctx.address).await?;
        self.ctx.metrics.gauge("agent_de_on_chain", on_chain as f64);
        let missing = self.ctx.de_counter.compute_and_add_missing(
            on_chain,
            expected_de_count(self.max_de_size),
            self.max_de_size,
        );
        if missing > 0 {
            info!(on_chain, missing, "DE queue low, refilling");
            self.submit_des(missing).await?;
        }
        Ok(())
    }

    async fn handle_usage(&self, event: Event) -> Result<()> {
        if !matches!(event, Event::RequestSignature { .. }) {
            return Ok(());
        }
        let refill = self
            .ctx
            .de_counter
            .check_usage_and_add_pending(usage_threshold(self.max_de_size));
        if refill > 0 {
            debug!(refill, "DE usage threshold reached");
            self.submit_des(refill).await?;
        }
        Ok(())
    }

    /// Derive `n` fresh DEs, store their secrets, submit them in chunks on the
    /// priority lane
    ///
    /// On error the reservation for every DE not handed to the sender is
    /// released and their local records are dropped.
    async fn submit_des(&self, n: u64) -> Result<()> {
        let mut des = Vec::with_capacity(n as usize);
        let mut sent = 0;
        let result = self.store_and_send(n, &mut des, &mut sent).await;
        if let Err(e) = &result {
            let unsent = n - sent as u64;
            warn!(unsent, error = %e, "DE submission aborted");
            self.ctx.de_counter.update_rejected(unsent);
            for pub_de in &des[sent..] {
                if let Err(e) = self.ctx.store.delete_de(pub_de) {
                    warn!(error = %e, "failed to delete unsent DE");
                }
            }
        }
        result
    }

    async fn store_and_send(&self, n: u64, des: &mut Vec<PubDe>, sent: &mut usize) -> Result<()> {
        let secret = self.ctx.config.random_secret_bytes()?;
        let indices = self.ctx.store.allocate_de_indices(n)?;
        for index in indices.clone() {
            let de = signing::derive_de(&secret, index)?;
            self.ctx.store.set_de(&DeRecord::new(&de, index))?;
            des.push(de.pub_de);
        }

        for (i, chunk) in des.chunks(DE_CHUNK_SIZE).enumerate() {
            let batch_id = indices.start + (i * DE_CHUNK_SIZE) as u64;
            self.ctx
                .sender
                .send_priority(Request::new(
                    RequestKind::SubmitDEs,
                    batch_id,
                    Msg::SubmitDEs {
                        des: chunk.to_vec(),
                        sender: self.ctx.address.clone(),
                    },
                ))
                .await?;
            *sent += chunk.len();
        }
        self.ctx.metrics.increment("agent_des_generated", n);
        Ok(())
    }

    /// Settle pending counts; rejected DEs are forgotten locally
    ///
    /// A submission whose transaction may still commit keeps its local
    /// records, since the chain could hand those DEs out later.
    async fn handle_responses(self: Arc<Self>, mut responses: mpsc::UnboundedReceiver<Response>) {
        while let Some(response) = responses.recv().await {
            let Msg::SubmitDEs { des, .. } = &response.request.msg else {
                continue;
            };
            let n = des.len() as u64;
            if response.success {
                self.ctx.de_counter.update_committed(n);
                continue;
            }
            self.ctx.de_counter.update_rejected(n);
            if response.in_flight {
                warn!(count = n, tx_hash = ?response.tx_hash, "DE submission unconfirmed, keeping secrets");
                continue;
            }
            warn!(count = n, error = ?response.error, "DE submission rejected");
            for pub_de in des {
                if let Err(e) = self.ctx.store.delete_de(pub_de) {
                    warn!(error = %e, "failed to delete rejected DE");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sender::Sender;
    use crate::workers::test_support::Harness;
    use tessera_coordinator::Params;
    use tessera_core::metrics;

    fn params() -> Params {
        Params {
            max_de_size: 12,
            ..Params::default()
        }
    }

    #[tokio::test]
    async fn test_queue_filled_on_start() {
        let harness = Harness::new("alice", params());
        let (_, responses) = mpsc::unbounded_channel();
        let worker = DeWorker::new(harness.ctx.clone(), responses).await.unwrap();
        tokio::spawn(worker.run());

        harness
            .eventually("queue full", |h| {
                h.chain.with_coordinator(|c| c.de_count("alice").unwrap() == 12).unwrap()
            })
            .await;
        assert_eq!(harness.ctx.store.de_count().unwrap(), 12);
    }

    #[tokio::test]
    async fn test_rejected_batch_rolls_back() {
        let harness = Harness::new("alice", params());
        let (tx, responses) = mpsc::unbounded_channel();
        let worker = Arc::new(DeWorker::new(harness.ctx.clone(), responses).await.unwrap());
        tokio::spawn(Arc::clone(&worker).handle_responses(worker.responses.lock().await.take().unwrap()));

        let de = signing::derive_de(b"unused", 0).unwrap();
        harness.ctx.store.set_de(&DeRecord::new(&de, 0)).unwrap();
        harness.ctx.de_counter.compute_and_add_missing(0, 8, 1);
        assert_eq!(harness.ctx.de_counter.pending(), 1);

        tx.send(Response {
            request: Request::new(
                RequestKind::SubmitDEs,
                0,
                Msg::SubmitDEs {
                    des: vec![de.pub_de],
                    sender: "alice".into(),
                },
            ),
            success: false,
            tx_hash: None,
            error: Some("DE limit exceeded".into()),
            in_flight: false,
        })
        .unwrap();

        harness
            .eventually("DE removed", |h| !h.ctx.store.has_de(&de.pub_de))
            .await;
        assert_eq!(harness.ctx.de_counter.pending(), 0);
    }

    #[tokio::test]
    async fn test_unconfirmed_batch_keeps_secrets() {
        let harness = Harness::new("alice", params());
        let (tx, responses) = mpsc::unbounded_channel();
        let worker = Arc::new(DeWorker::new(harness.ctx.clone(), responses).await.unwrap());
        tokio::spawn(Arc::clone(&worker).handle_responses(worker.responses.lock().await.take().unwrap()));

        let de = signing::derive_de(b"unused", 0).unwrap();
        harness.ctx.store.set_de(&DeRecord::new(&de, 0)).unwrap();
        harness.ctx.de_counter.compute_and_add_missing(0, 8, 1);

        tx.send(Response {
            request: Request::new(
                RequestKind::SubmitDEs,
                0,
                Msg::SubmitDEs {
                    des: vec![de.pub_de],
                    sender: "alice".into(),
                },
            ),
            success: false,
            tx_hash: Some("ab".repeat(32)),
            error: Some("timed out".into()),
            in_flight: true,
        })
        .unwrap();

        harness
            .eventually("pending released", |h| h.ctx.de_counter.pending() == 0)
            .await;
        // The tx may still land, so the secret must survive
        assert!(harness.ctx.store.has_de(&de.pub_de));
    }

    #[tokio::test]
    async fn test_failed_send_releases_reservation() {
        let harness = Harness::new("alice", params());
        let (sender, closed) = Sender::new(harness.chain.clone(), harness.ctx.config.clone(), metrics::noop());
        drop(sender);
        let ctx = WorkerContext {
            sender: closed,
            ..harness.ctx.clone()
        };
        let (_, responses) = mpsc::unbounded_channel();
        let worker = DeWorker::new(ctx, responses).await.unwrap();

        let missing = harness.ctx.de_counter.compute_and_add_missing(0, 8, 12);
        assert_eq!(missing, 12);
        assert!(worker.submit_des(missing).await.is_err());

        assert_eq!(harness.ctx.de_counter.pending(), 0);
        assert_eq!(harness.ctx.store.de_count().unwrap(), 0);
        assert_eq!(harness.ctx.de_counter.compute_and_add_missing(0, 8, 12), 12);
    }

    #[tokio::test]
    async fn test_usage_triggers_refill() {
        let harness = Harness::new("alice", params());
        let (_, responses) = mpsc::unbounded_channel();
        let worker = DeWorker::new(harness.ctx.clone(), responses).await.unwrap();
        let request = Event::RequestSignature {
            signing_id: 1,
            group_id: 1,
            attempt: 1,
            message: vec![],
            group_pub_key: signing::derive_de(b"k", 0).unwrap().pub_de.pub_d,
            group_pub_nonce: signing::derive_de(b"k", 0).unwrap().pub_de.pub_e,
            assigned_members: vec![],
        };
        // Threshold is 12 / 6 = 2
        worker.handle_usage(request.clone()).await.unwrap();
        assert_eq!(harness.ctx.store.de_count().unwrap(), 0);
        worker.handle_usage(request).await.unwrap();
        assert_eq!(harness.ctx.store.de_count().unwrap(), 2);
        assert_eq!(harness.ctx.de_counter.pending(), 2);
    }
}
