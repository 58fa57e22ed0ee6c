//! Wires the store, sender and workers of one participant together

use std::future::Future;
use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

use tessera_core::MetricsSink;

use crate::agent_store::AgentStore;
use crate::config::AgentConfig;
use crate::de_counter::DeCounter;
use crate::error::Result;
use crate::relay::MessageRelay;
use crate::sender::{RequestKind, Sender};
use crate::workers::{
    CleanupWorker, DeWorker, KeyedLocks, Round1Worker, Round2Worker, Round3Worker, SigningWorker,
    WorkerContext,
};

/// A running agent
pub struct AgentHandle {
    address: String,
    store: Arc<AgentStore>,
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl AgentHandle {
    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn store(&self) -> &Arc<AgentStore> {
        &self.store
    }

    /// Signal every worker and wait for them to stop
    pub async fn shutdown(self) {
        info!(address = %self.address, "stopping agent");
        let _ = self.shutdown.send(true);
        for task in self.tasks {
            let _ = task.await;
        }
    }
}

pub struct Agent;

impl Agent {
    /// Start the sender and every worker for `config.granter`
    pub async fn start(
        config: AgentConfig,
        relay: Arc<dyn MessageRelay>,
        metrics: Arc<dyn MetricsSink>,
    ) -> Result<AgentHandle> {
        config.validate()?;
        config.ensure_directories()?;
        let store = Arc::new(AgentStore::new(config.store_path.clone())?);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let (mut sender, sender_handle) =
            Sender::new(Arc::clone(&relay), config.clone(), Arc::clone(&metrics));
        let de_responses = sender.responses(RequestKind::SubmitDEs);
        let signature_responses = sender.responses(RequestKind::Signature);

        let ctx = WorkerContext {
            address: config.granter.clone(),
            config: config.clone(),
            relay,
            store: Arc::clone(&store),
            sender: sender_handle,
            locks: Arc::new(KeyedLocks::new()),
            de_counter: Arc::new(DeCounter::new()),
            shutdown: shutdown_rx.clone(),
            metrics,
        };
        let de_worker = DeWorker::new(ctx.clone(), de_responses).await?;

        let mut tasks = vec![tokio::spawn(sender.run(shutdown_rx))];
        tasks.push(spawn_worker("round1", Round1Worker::new(ctx.clone()).run()));
        tasks.push(spawn_worker("round2", Round2Worker::new(ctx.clone()).run()));
        tasks.push(spawn_worker("round3", Round3Worker::new(ctx.clone()).run()));
        tasks.push(spawn_worker("de", de_worker.run()));
        tasks.push(spawn_worker(
            "signing",
            SigningWorker::new(ctx.clone(), signature_responses).run(),
        ));
        tasks.push(spawn_worker("cleanup", CleanupWorker::new(ctx).run()));

        info!(
            address = %config.granter,
            store = %config.store_path.display(),
            signer_keys = config.signer_keys.len(),
            "agent started"
        );
        Ok(AgentHandle {
            address: config.granter,
            store,
            shutdown: shutdown_tx,
            tasks,
        })
    }
}

fn spawn_worker<F>(name: &'static str, worker: F) -> JoinHandle<()>
where
    F: Future<Output = Result<()>> + Send + 'static,
{
    tokio::spawn(async move {
        if let Err(e) = worker.await {
            error!(worker = name, error = %e, "worker exited with error");
        }
    })
}
