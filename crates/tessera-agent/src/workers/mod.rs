//! Event-driven workers
//!
//! Each worker subscribes to the committed events it cares about, first
//! catches up on work left pending on chain, then handles every event in its
//! own task. All of them stop when the shared shutdown flag flips.

pub mod cleanup;
pub mod de;
pub mod round1;
pub mod round2;
pub mod round3;
pub mod signing;

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};

use futures_util::StreamExt;
use tokio::sync::{watch, OwnedMutexGuard};
use tracing::{debug, warn};

use tessera_core::{GroupId, MemberId, MetricsSink};

use crate::agent_store::AgentStore;
use crate::config::AgentConfig;
use crate::de_counter::DeCounter;
use crate::error::Result;
use crate::relay::{EventFilter, EventStream, MessageRelay};
use crate::sender::SenderHandle;

pub use cleanup::CleanupWorker;
pub use de::DeWorker;
pub use round1::Round1Worker;
pub use round2::Round2Worker;
pub use round3::Round3Worker;
pub use signing::SigningWorker;

/// Everything a worker shares with the rest of the agent
#[derive(Clone)]
pub struct WorkerContext {
    pub address: String,
    pub config: AgentConfig,
    pub relay: Arc<dyn MessageRelay>,
    pub store: Arc<AgentStore>,
    pub sender: SenderHandle,
    pub locks: Arc<KeyedLocks>,
    pub de_counter: Arc<DeCounter>,
    pub shutdown: watch::Receiver<bool>,
    pub metrics: Arc<dyn MetricsSink>,
}

impl WorkerContext {
    /// Subscribe within `subscribe_timeout`
    pub async fn subscribe(&self, filter: EventFilter) -> Result<EventStream> {
        tokio::time::timeout(self.config.subscribe_timeout(), self.relay.subscribe(filter)).await?
    }

    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown.borrow()
    }
}

/// One async mutex per (group, member), so DKG steps for the same slot
/// never interleave
#[derive(Default)]
pub struct KeyedLocks {
    locks: Mutex<HashMap<(GroupId, MemberId), Arc<tokio::sync::Mutex<()>>>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, group_id: GroupId, member_id: MemberId) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = match self.locks.lock() {
                Ok(locks) => locks,
                Err(poisoned) => poisoned.into_inner(),
            };
            Arc::clone(locks.entry((group_id, member_id)).or_default())
        };
        lock.lock_owned().await
    }

    /// Drop the entry of a finished group
    pub fn remove_group(&self, group_id: GroupId) {
        if let Ok(mut locks) = self.locks.lock() {
            locks.retain(|(gid, _), _| *gid != group_id);
        }
    }
}

/// Spawn `handle` for every event on `stream` until shutdown or the stream
/// ends
pub(crate) async fn event_loop<F, Fut>(
    worker: &'static str,
    mut stream: EventStream,
    mut shutdown: watch::Receiver<bool>,
    handle: F,
) where
    F: Fn(tessera_coordinator::Event) -> Fut,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    loop {
        tokio::select! {
            event = stream.next() => match event {
                Some(event) => {
                    debug!(worker, kind = event.kind(), "event received");
                    let task = handle(event);
                    tokio::spawn(async move {
                        if let Err(e) = task.await {
                            warn!(worker, error = %e, "event handling failed");
                        }
                    });
                }
                None => {
                    warn!(worker, "event stream closed");
                    break;
                }
            },
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
    debug!(worker, "worker stopped");
}

/// Member id of `address` in a creation event's member list
pub(crate) fn member_id_of(members: &[String], address: &str) -> Option<MemberId> {
    members
        .iter()
        .position(|m| m == address)
        .map(|position| position as MemberId + 1)
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_keyed_lock_serialises_same_key() {
        let locks = Arc::new(KeyedLocks::new());
        let guard = locks.lock(1, 1).await;

        // Different key is free
        let other = tokio::time::timeout(Duration::from_millis(20), locks.lock(1, 2)).await;
        assert!(other.is_ok());

        let same = tokio::time::timeout(Duration::from_millis(20), locks.lock(1, 1)).await;
        assert!(same.is_err());
        drop(guard);
        assert!(tokio::time::timeout(Duration::from_millis(20), locks.lock(1, 1)).await.is_ok());

        locks.remove_group(1);
        assert!(locks.locks.lock().unwrap().is_empty());
    }

    #[test]
    fn test_member_id_of() {
        let members = vec!["a".to_string(), "b".to_string()];
        assert_eq!(member_id_of(&members, "b"), Some(2));
        assert_eq!(member_id_of(&members, "c"), None);
    }
}
