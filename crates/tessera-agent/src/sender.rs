//! Transaction sender
//!
//! Workers hand [`Request`]s to a [`SenderHandle`]. The sender batches up to
//! `max_messages` of them per transaction (DE submissions on a priority lane
//! go first), leases a free signer key from the [`KeyPool`], broadcasts and
//! waits for the commit. Outcomes are routed back per [`RequestKind`].

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, watch, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, warn};

use tessera_coordinator::Msg;
use tessera_core::MetricsSink;

use crate::config::AgentConfig;
use crate::error::{AgentError, Result};
use crate::relay::{MessageRelay, CODE_OUT_OF_GAS};

const CHANNEL_SIZE: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    Round1,
    Round2,
    Round3,
    SubmitDEs,
    Signature,
}

/// One message to put on chain
#[derive(Debug, Clone)]
pub struct Request {
    pub kind: RequestKind,
    /// Group id, signing id or DE batch id depending on `kind`
    pub id: u64,
    pub msg: Msg,
    /// Times this request has been handed to the sender
    pub tries: u64,
}

impl Request {
    pub fn new(kind: RequestKind, id: u64, msg: Msg) -> Self {
        Self {
            kind,
            id,
            msg,
            tries: 0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Response {
    pub request: Request,
    pub success: bool,
    pub tx_hash: Option<String>,
    pub error: Option<String>,
    /// Broadcast was accepted but never seen in a block; it may still commit
    pub in_flight: bool,
}

#[derive(Clone)]
pub struct SenderHandle {
    normal: mpsc::Sender<Request>,
    priority: mpsc::Sender<Request>,
}

impl SenderHandle {
    pub async fn send(&self, request: Request) -> Result<()> {
        self.normal.send(request).await.map_err(|_| AgentError::Cancelled)
    }

    /// Jump ahead of queued normal requests
    pub async fn send_priority(&self, request: Request) -> Result<()> {
        self.priority
            .send(request)
            .await
            .map_err(|_| AgentError::Cancelled)
    }
}

// ============================================
// Key pool
// ============================================

/// Signer keys, each usable by one transaction at a time
pub struct KeyPool {
    keys: Mutex<Vec<String>>,
    permits: Arc<Semaphore>,
    size: usize,
}

/// A key checked out of the pool; returned on drop
pub struct KeyLease {
    key: String,
    pool: Arc<KeyPool>,
    _permit: OwnedSemaphorePermit,
}

impl KeyLease {
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for KeyLease {
    fn drop(&mut self) {
        if let Ok(mut keys) = self.pool.keys.lock() {
            keys.push(std::mem::take(&mut self.key));
        }
    }
}

impl KeyPool {
    pub fn new(keys: Vec<String>) -> Arc<Self> {
        let size = keys.len();
        Arc::new(Self {
            keys: Mutex::new(keys),
            permits: Arc::new(Semaphore::new(size)),
            size,
        })
    }

    pub async fn acquire(self: &Arc<Self>) -> Result<KeyLease> {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| AgentError::Cancelled)?;
        let key = self
            .keys
            .lock()
            .map_err(|_| AgentError::Store("key pool poisoned".to_string()))?
            .pop()
            .ok_or_else(|| AgentError::Config("key pool empty".to_string()))?;
        Ok(KeyLease {
            key,
            pool: Arc::clone(self),
            _permit: permit,
        })
    }

    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Wait until every lease has been returned
    pub async fn drain(&self) {
        if let Ok(all) = self.permits.acquire_many(self.size as u32).await {
            drop(all);
        }
    }
}

// ============================================
// Sender
// ============================================

#[derive(Clone)]
enum Outcome {
    Committed(String),
    /// Included in a block but rejected by the coordinator
    Rejected { tx_hash: String, log: String },
    /// Accepted for broadcast, no commit seen within `max_try` waits
    Unconfirmed { tx_hash: String, error: String },
    Failed(String),
}

pub struct Sender {
    relay: Arc<dyn MessageRelay>,
    config: AgentConfig,
    keys: Arc<KeyPool>,
    normal_rx: mpsc::Receiver<Request>,
    priority_rx: mpsc::Receiver<Request>,
    routes: HashMap<RequestKind, mpsc::UnboundedSender<Response>>,
    metrics: Arc<dyn MetricsSink>,
}

impl Sender {
    pub fn new(
        relay: Arc<dyn MessageRelay>,
        config: AgentConfig,
        metrics: Arc<dyn MetricsSink>,
    ) -> (Self, SenderHandle) {
        let (normal, normal_rx) = mpsc::channel(CHANNEL_SIZE);
        let (priority, priority_rx) = mpsc::channel(CHANNEL_SIZE);
        let keys = KeyPool::new(config.signer_keys.clone());
        let sender = Self {
            relay,
            config,
            keys,
            normal_rx,
            priority_rx,
            routes: HashMap::new(),
            metrics,
        };
        (sender, SenderHandle { normal, priority })
    }

    /// Receive every outcome for requests of `kind`
    pub fn responses(&mut self, kind: RequestKind) -> mpsc::UnboundedReceiver<Response> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.routes.insert(kind, tx);
        rx
    }

    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(keys = self.keys.available(), "sender started");
        let routes = Arc::new(std::mem::take(&mut self.routes));
        loop {
            let batch = tokio::select! {
                batch = self.collect_requests() => match batch {
                    Some(batch) => batch,
                    None => break,
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            };
            let lease = match self.keys.acquire().await {
                Ok(lease) => lease,
                Err(e) => {
                    warn!(error = %e, "no signer key available");
                    break;
                }
            };

            let relay = Arc::clone(&self.relay);
            let config = self.config.clone();
            let routes = Arc::clone(&routes);
            let metrics = Arc::clone(&self.metrics);
            tokio::spawn(async move {
                let responses = send_batch(relay.as_ref(), &config, lease.key(), batch).await;
                drop(lease);
                for response in responses {
                    let name = if response.success {
                        "agent_requests_committed"
                    } else {
                        "agent_requests_failed"
                    };
                    metrics.increment(name, 1);
                    route(&routes, response);
                }
            });
        }
        self.keys.drain().await;
        info!("sender stopped");
    }

    /// Wait for one request, then take whatever else is queued up to
    /// `max_messages`, priority lane first
    async fn collect_requests(&mut self) -> Option<Vec<Request>> {
        let first = tokio::select! {
            biased;
            Some(request) = self.priority_rx.recv() => request,
            Some(request) = self.normal_rx.recv() => request,
            else => return None,
        };
        let mut batch = vec![first];
        while batch.len() < self.config.max_messages {
            match self.priority_rx.try_recv() {
                Ok(request) => batch.push(request),
                Err(_) => break,
            }
        }
        while batch.len() < self.config.max_messages {
            match self.normal_rx.try_recv() {
                Ok(request) => batch.push(request),
                Err(_) => break,
            }
        }
        Some(batch)
    }
}

fn route(routes: &HashMap<RequestKind, mpsc::UnboundedSender<Response>>, response: Response) {
    match routes.get(&response.request.kind) {
        Some(tx) => {
            if tx.send(response).is_err() {
                debug!("response receiver gone");
            }
        }
        None if !response.success => {
            warn!(
                kind = ?response.request.kind,
                id = response.request.id,
                error = ?response.error,
                "request failed"
            );
        }
        None => {}
    }
}

/// Broadcast `batch` as one transaction; if the coordinator rejects it,
/// resend each request on its own so one bad message only fails itself
async fn send_batch(
    relay: &dyn MessageRelay,
    config: &AgentConfig,
    key: &str,
    batch: Vec<Request>,
) -> Vec<Response> {
    let msgs: Vec<Msg> = batch.iter().map(|r| r.msg.clone()).collect();
    match broadcast_and_confirm(relay, config, key, msgs).await {
        Outcome::Rejected { .. } if batch.len() > 1 => {
            debug!(size = batch.len(), "batch rejected, resending individually");
            let mut responses = Vec::with_capacity(batch.len());
            for request in batch {
                let outcome = broadcast_and_confirm(relay, config, key, vec![request.msg.clone()]).await;
                responses.push(response_for(request, outcome));
            }
            responses
        }
        outcome => batch
            .into_iter()
            .map(|request| response_for(request, outcome.clone()))
            .collect(),
    }
}

fn response_for(request: Request, outcome: Outcome) -> Response {
    let (success, tx_hash, error, in_flight) = match outcome {
        Outcome::Committed(tx_hash) => (true, Some(tx_hash), None, false),
        Outcome::Rejected { tx_hash, log } => (false, Some(tx_hash), Some(log), false),
        Outcome::Unconfirmed { tx_hash, error } => (false, Some(tx_hash), Some(error), true),
        Outcome::Failed(error) => (false, None, Some(error), false),
    };
    Response {
        request,
        success,
        tx_hash,
        error,
        in_flight,
    }
}

/// Up to `max_try` tries, pausing `poll_interval` between them
///
/// An out-of-gas refusal raises the gas adjustment by one step, capped at
/// `max_gas_adjustment`. A transaction that commits with an error is final.
/// Once a broadcast is accepted, later tries keep waiting on that same hash
/// instead of broadcasting the messages again.
async fn broadcast_and_confirm(
    relay: &dyn MessageRelay,
    config: &AgentConfig,
    key: &str,
    msgs: Vec<Msg>,
) -> Outcome {
    let mut gas_adjustment = config.gas_adjustment_start;
    let mut last_error = String::new();
    let mut in_flight: Option<String> = None;

    for attempt in 1..=config.max_try {
        if in_flight.is_none() {
            match relay.submit(key, msgs.clone(), gas_adjustment).await {
                Ok(result) if result.code == CODE_OUT_OF_GAS => {
                    gas_adjustment =
                        (gas_adjustment + config.gas_adjustment_step).min(config.max_gas_adjustment);
                    last_error = result.log;
                }
                Ok(result) if !result.is_ok() => last_error = result.log,
                Ok(result) => in_flight = Some(result.tx_hash),
                Err(e) => last_error = e.to_string(),
            }
        }

        if let Some(tx_hash) = &in_flight {
            match relay.wait_for_commit(tx_hash, config.broadcast_timeout()).await {
                Ok(committed) if committed.is_ok() => {
                    debug!(key, tx_hash = %committed.tx_hash, msgs = msgs.len(), "tx committed");
                    return Outcome::Committed(committed.tx_hash);
                }
                Ok(committed) => {
                    return Outcome::Rejected {
                        tx_hash: committed.tx_hash,
                        log: committed.log,
                    }
                }
                Err(e) => last_error = e.to_string(),
            }
        }
        warn!(key, attempt, gas_adjustment, tx_hash = ?in_flight, error = %last_error, "broadcast not confirmed");
        tokio::time::sleep(config.poll_interval()).await;
    }
    match in_flight {
        Some(tx_hash) => Outcome::Unconfirmed {
            tx_hash,
            error: last_error,
        },
        None => Outcome::Failed(last_error),
    }
}
