//! In-process chain
//!
//! Wraps a [`Coordinator`] over a [`MemStore`] and plays the part of the
//! node: transactions wait in a mempool until the next block, each one is
//! delivered atomically, then `end_block` runs and the block's events are
//! broadcast to subscribers.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::sync::{broadcast, watch, Notify};
use tokio_stream::wrappers::{errors::BroadcastStreamRecvError, BroadcastStream};
use tracing::{debug, info, warn};

use tessera_coordinator::{
    BlockContext, Coordinator, Event, Group, Member, Msg, Params, PendingGroup, Round1Info,
    Round2Info, Signing, SigningAttempt, SigningStatus, TssError,
};
use tessera_core::{GroupId, MemStore, SigningId};

use crate::error::{AgentError, Result};
use crate::relay::{
    EventFilter, EventStream, MessageRelay, TxResult, CODE_OK, CODE_OUT_OF_GAS, CODE_REJECTED,
};

const EVENT_BUFFER: usize = 4096;

struct PendingTx {
    hash: String,
    msgs: Vec<Msg>,
}

struct ChainState {
    coordinator: Coordinator<MemStore>,
    mempool: Vec<PendingTx>,
    results: HashMap<String, TxResult>,
    tx_counter: u64,
}

pub struct LocalChain {
    state: Mutex<ChainState>,
    events: broadcast::Sender<Event>,
    committed: Notify,
    /// Submissions below this gas adjustment fail with [`CODE_OUT_OF_GAS`]
    min_gas_adjustment: f64,
}

impl LocalChain {
    pub fn new(params: Params, chain_id: &str) -> Result<Self> {
        let coordinator = Coordinator::new(MemStore::new(), params, BlockContext::new(chain_id))?;
        Ok(Self::from_coordinator(coordinator))
    }

    pub fn from_coordinator(coordinator: Coordinator<MemStore>) -> Self {
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        Self {
            state: Mutex::new(ChainState {
                coordinator,
                mempool: Vec::new(),
                results: HashMap::new(),
                tx_counter: 0,
            }),
            events,
            committed: Notify::new(),
            min_gas_adjustment: 0.0,
        }
    }

    pub fn with_min_gas_adjustment(mut self, min: f64) -> Self {
        self.min_gas_adjustment = min;
        self
    }

    fn lock(&self) -> Result<MutexGuard<'_, ChainState>> {
        self.state
            .lock()
            .map_err(|_| AgentError::Relay("chain state poisoned".to_string()))
    }

    /// Read-only access to the coordinator
    pub fn with_coordinator<T>(&self, f: impl FnOnce(&Coordinator<MemStore>) -> T) -> Result<T> {
        Ok(f(&self.lock()?.coordinator))
    }

    /// Direct access for chain administration and tests; events produced
    /// here are not broadcast
    pub fn with_coordinator_mut<T>(&self, f: impl FnOnce(&mut Coordinator<MemStore>) -> T) -> Result<T> {
        Ok(f(&mut self.lock()?.coordinator))
    }

    pub fn height(&self) -> Result<u64> {
        self.with_coordinator(|c| c.block().height)
    }

    pub fn mempool_len(&self) -> Result<usize> {
        Ok(self.lock()?.mempool.len())
    }

    /// Deliver the mempool, run end-block, advance the height and publish
    /// the block's events
    pub fn produce_block(&self) -> Result<Vec<Event>> {
        let (height, block_events) = {
            let mut state = self.lock()?;
            let txs = std::mem::take(&mut state.mempool);
            let mut block_events = Vec::new();
            for tx in txs {
                let result = match state.coordinator.deliver_tx(tx.msgs) {
                    Ok(events) => {
                        block_events.extend(events.iter().cloned());
                        TxResult {
                            tx_hash: tx.hash.clone(),
                            code: CODE_OK,
                            log: String::new(),
                            events,
                        }
                    }
                    Err(e) => TxResult {
                        tx_hash: tx.hash.clone(),
                        code: CODE_REJECTED,
                        log: e.to_string(),
                        events: Vec::new(),
                    },
                };
                state.results.insert(tx.hash, result);
            }
            block_events.extend(state.coordinator.end_block());
            let height = state.coordinator.block().height;
            let next = state.coordinator.block().next();
            state.coordinator.begin_block(next);
            (height, block_events)
        };

        if !block_events.is_empty() {
            debug!(height, events = block_events.len(), "block committed");
        }
        for event in &block_events {
            // No subscribers is not an error
            let _ = self.events.send(event.clone());
        }
        self.committed.notify_waiters();
        Ok(block_events)
    }

    /// Produce a block every `interval` until `shutdown` flips to true
    pub async fn run(self: Arc<Self>, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        info!(interval_ms = interval.as_millis() as u64, "block producer started");
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.produce_block() {
                        warn!(error = %e, "block production failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("block producer stopped");
    }

    async fn committed_result(&self, tx_hash: &str) -> Result<TxResult> {
        loop {
            let notified = self.committed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            let found = self.lock()?.results.get(tx_hash).cloned();
            if let Some(result) = found {
                return Ok(result);
            }
            notified.await;
        }
    }

    fn find_signing_attempt(&self, signing_id: SigningId) -> Result<(Signing, Option<SigningAttempt>)> {
        let state = self.lock()?;
        let signing = state.coordinator.get_signing(signing_id)?;
        if signing.status != SigningStatus::Waiting {
            return Ok((signing, None));
        }
        match state
            .coordinator
            .get_signing_attempt(signing_id, signing.current_attempt)
        {
            Ok(attempt) => Ok((signing, Some(attempt))),
            Err(TssError::SigningAttemptNotFound { .. }) => Ok((signing, None)),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl MessageRelay for LocalChain {
    async fn submit(&self, signer: &str, msgs: Vec<Msg>, gas_adjustment: f64) -> Result<TxResult> {
        let mut state = self.lock()?;
        state.tx_counter += 1;
        let hash = format!("{:016X}", state.tx_counter);
        if gas_adjustment < self.min_gas_adjustment {
            debug!(signer, tx_hash = %hash, gas_adjustment, "out of gas");
            return Ok(TxResult {
                tx_hash: hash,
                code: CODE_OUT_OF_GAS,
                log: format!("out of gas with adjustment {:.2}", gas_adjustment),
                events: Vec::new(),
            });
        }
        debug!(signer, tx_hash = %hash, msgs = msgs.len(), "tx queued");
        state.mempool.push(PendingTx {
            hash: hash.clone(),
            msgs,
        });
        Ok(TxResult {
            tx_hash: hash,
            code: CODE_OK,
            log: String::new(),
            events: Vec::new(),
        })
    }

    async fn wait_for_commit(&self, tx_hash: &str, timeout: Duration) -> Result<TxResult> {
        tokio::time::timeout(timeout, self.committed_result(tx_hash)).await?
    }

    async fn subscribe(&self, filter: EventFilter) -> Result<EventStream> {
        let stream = BroadcastStream::new(self.events.subscribe()).filter_map(move |item| {
            let event = match item {
                Ok(event) if filter.matches(&event) => Some(event),
                Ok(_) => None,
                Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                    warn!(skipped, "event subscriber lagged");
                    None
                }
            };
            futures_util::future::ready(event)
        });
        Ok(stream.boxed())
    }

    async fn query_params(&self) -> Result<Params> {
        self.with_coordinator(|c| c.params().clone())
    }

    async fn query_group(&self, group_id: GroupId) -> Result<Group> {
        Ok(self.lock()?.coordinator.get_group(group_id)?)
    }

    async fn query_members(&self, group_id: GroupId) -> Result<Vec<Member>> {
        Ok(self.lock()?.coordinator.get_members(group_id)?)
    }

    async fn query_dkg_context(&self, group_id: GroupId) -> Result<Vec<u8>> {
        Ok(self.lock()?.coordinator.get_dkg_context(group_id)?)
    }

    async fn query_round1_infos(&self, group_id: GroupId) -> Result<Vec<Round1Info>> {
        Ok(self.lock()?.coordinator.get_round1_infos(group_id)?)
    }

    async fn query_round2_infos(&self, group_id: GroupId) -> Result<Vec<Round2Info>> {
        Ok(self.lock()?.coordinator.get_round2_infos(group_id)?)
    }

    async fn query_signing(&self, signing_id: SigningId) -> Result<(Signing, Option<SigningAttempt>)> {
        self.find_signing_attempt(signing_id)
    }

    async fn query_de_count(&self, address: &str) -> Result<u64> {
        Ok(self.lock()?.coordinator.de_count(address)?)
    }

    async fn query_pending_groups(&self, address: &str) -> Result<Vec<PendingGroup>> {
        Ok(self.lock()?.coordinator.pending_groups(address)?)
    }

    async fn query_pending_signings(&self, address: &str) -> Result<Vec<SigningId>> {
        Ok(self.lock()?.coordinator.pending_signings(address)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_group_msg() -> Msg {
        Msg::CreateGroup {
            members: vec!["alice".into(), "bob".into()],
            threshold: 1,
            module: "test".into(),
        }
    }

    #[tokio::test]
    async fn test_tx_commits_in_next_block() {
        let chain = LocalChain::new(Params::default(), "local").unwrap();
        let submitted = chain.submit("gov", vec![create_group_msg()], 1.0).await.unwrap();
        assert!(submitted.is_ok());
        assert!(submitted.events.is_empty());
        assert_eq!(chain.mempool_len().unwrap(), 1);

        let events = chain.produce_block().unwrap();
        assert_eq!(events[0].kind(), "group_created");
        assert_eq!(chain.height().unwrap(), 2);

        let committed = chain
            .wait_for_commit(&submitted.tx_hash, Duration::from_millis(100))
            .await
            .unwrap();
        assert!(committed.is_ok());
        assert_eq!(committed.events.len(), 1);
    }

    #[tokio::test]
    async fn test_rejected_tx_reports_log() {
        let chain = LocalChain::new(Params::default(), "local").unwrap();
        let msg = Msg::SetMemberActive {
            group_id: 9,
            active: true,
            sender: "nobody".into(),
        };
        let submitted = chain.submit("nobody", vec![msg], 1.0).await.unwrap();
        chain.produce_block().unwrap();
        let committed = chain
            .wait_for_commit(&submitted.tx_hash, Duration::from_millis(100))
            .await
            .unwrap();
        assert_eq!(committed.code, CODE_REJECTED);
        assert!(!committed.log.is_empty());
    }

    #[tokio::test]
    async fn test_low_gas_is_refused() {
        let chain = LocalChain::new(Params::default(), "local")
            .unwrap()
            .with_min_gas_adjustment(1.5);
        let result = chain.submit("gov", vec![create_group_msg()], 1.2).await.unwrap();
        assert_eq!(result.code, CODE_OUT_OF_GAS);
        assert_eq!(chain.mempool_len().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_wait_for_unknown_tx_times_out() {
        let chain = LocalChain::new(Params::default(), "local").unwrap();
        let result = chain.wait_for_commit("FFFF", Duration::from_millis(20)).await;
        assert!(matches!(result, Err(AgentError::Timeout)));
    }

    #[tokio::test]
    async fn test_subscription_filters_events() {
        let chain = LocalChain::new(Params::default(), "local").unwrap();
        let mut stream = chain
            .subscribe(EventFilter::kinds(&["group_created"]).mentioning("bob"))
            .await
            .unwrap();
        chain.submit("gov", vec![create_group_msg()], 1.0).await.unwrap();
        chain.produce_block().unwrap();

        let event = tokio::time::timeout(Duration::from_millis(100), stream.next())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.group_id(), Some(1));
    }
}
