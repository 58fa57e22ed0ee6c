//! Drops local secrets the chain no longer needs

use std::sync::Arc;

use tracing::{debug, info};

use tessera_coordinator::Event;
use tessera_core::{GroupId, PubDe};

use crate::error::Result;
use crate::relay::EventFilter;
use crate::workers::{event_loop, WorkerContext};

pub struct CleanupWorker {
    ctx: WorkerContext,
}

impl CleanupWorker {
    pub fn new(ctx: WorkerContext) -> Self {
        Self { ctx }
    }

    pub async fn run(self) -> Result<()> {
        let stream = self
            .ctx
            .subscribe(EventFilter::kinds(&[
                "submit_signature",
                "de_dequeued",
                "round3_failed",
                "group_expired",
            ]))
            .await?;
        let worker = Arc::new(self);
        let shutdown = worker.ctx.shutdown.clone();
        event_loop("cleanup", stream, shutdown, move |event| {
            let worker = Arc::clone(&worker);
            async move { worker.handle_event(event).await }
        })
        .await;
        Ok(())
    }

    async fn handle_event(&self, event: Event) -> Result<()> {
        match event {
            Event::SubmitSignature {
                address, pub_de, ..
            } if address == self.ctx.address => {
                debug!(pub_d = %pub_de.pub_d.short(), "DE consumed by signature");
                self.ctx.store.delete_de(&pub_de)
            }
            Event::DEDequeued { address, pub_de } if address == self.ctx.address => {
                self.handle_dequeued(pub_de).await
            }
            Event::Round3Failed { group_id, .. } | Event::GroupExpired { group_id } => {
                self.drop_group(group_id)
            }
            _ => Ok(()),
        }
    }

    /// A dequeued DE is kept while a signing of ours still needs it; the
    /// matching `SubmitSignature` removes it later
    async fn handle_dequeued(&self, pub_de: PubDe) -> Result<()> {
        for signing_id in self.ctx.relay.query_pending_signings(&self.ctx.address).await? {
            let (_, attempt) = self.ctx.relay.query_signing(signing_id).await?;
            let in_use = attempt
                .map(|a| {
                    a.assigned_members
                        .iter()
                        .any(|m| m.address == self.ctx.address && m.pub_de == pub_de)
                })
                .unwrap_or(false);
            if in_use {
                debug!(signing_id, pub_d = %pub_de.pub_d.short(), "DE still assigned");
                return Ok(());
            }
        }
        self.ctx.store.delete_de(&pub_de)
    }

    fn drop_group(&self, group_id: GroupId) -> Result<()> {
        if self.ctx.store.get_dkg(group_id)?.is_none() && self.ctx.store.get_group(group_id)?.is_none() {
            return Ok(());
        }
        info!(group_id, "group did not activate, deleting local secrets");
        self.ctx.store.delete_dkg(group_id)?;
        self.ctx.store.delete_group(group_id)?;
        self.ctx.locks.remove_group(group_id);
        Ok(())
    }
}
