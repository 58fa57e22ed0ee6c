//! Transport between the agent and the coordinator
//!
//! [`MessageRelay`] is everything the agent needs from a chain: submit
//! transactions, wait for them to commit, stream committed events and query
//! protocol state. [`crate::local::LocalChain`] implements it in-process.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use serde::{Deserialize, Serialize};

use tessera_coordinator::{
    Event, Group, Member, Msg, Params, PendingGroup, Round1Info, Round2Info, Signing, SigningAttempt,
};
use tessera_core::{GroupId, SigningId};

use crate::error::Result;

/// Transaction accepted or committed
pub const CODE_OK: u32 = 0;
/// A message in the transaction was rejected by the coordinator
pub const CODE_REJECTED: u32 = 1;
/// Gas limit too low for the transaction
pub const CODE_OUT_OF_GAS: u32 = 11;

/// Outcome of a broadcast or a committed transaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TxResult {
    pub tx_hash: String,
    pub code: u32,
    pub log: String,
    /// Committed events; empty until the transaction is in a block
    pub events: Vec<Event>,
}

impl TxResult {
    pub fn is_ok(&self) -> bool {
        self.code == CODE_OK
    }
}

/// Which committed events a subscriber wants
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    /// Event kinds as reported by [`Event::kind`]; empty means all
    pub kinds: Vec<&'static str>,
    /// Only events that mention this address
    pub address: Option<String>,
}

impl EventFilter {
    pub fn kinds(kinds: &[&'static str]) -> Self {
        Self {
            kinds: kinds.to_vec(),
            address: None,
        }
    }

    pub fn mentioning(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }

    pub fn matches(&self, event: &Event) -> bool {
        if !self.kinds.is_empty() && !self.kinds.contains(&event.kind()) {
            return false;
        }
        match &self.address {
            Some(address) => event.mentions(address),
            None => true,
        }
    }
}

pub type EventStream = BoxStream<'static, Event>;

#[async_trait]
pub trait MessageRelay: Send + Sync {
    /// Broadcast `msgs` signed by `signer`; returns once the transaction is
    /// accepted into the mempool, not once it commits
    async fn submit(&self, signer: &str, msgs: Vec<Msg>, gas_adjustment: f64) -> Result<TxResult>;

    /// Wait until `tx_hash` is in a block
    async fn wait_for_commit(&self, tx_hash: &str, timeout: Duration) -> Result<TxResult>;

    async fn subscribe(&self, filter: EventFilter) -> Result<EventStream>;

    async fn query_params(&self) -> Result<Params>;

    async fn query_group(&self, group_id: GroupId) -> Result<Group>;

    async fn query_members(&self, group_id: GroupId) -> Result<Vec<Member>>;

    async fn query_dkg_context(&self, group_id: GroupId) -> Result<Vec<u8>>;

    async fn query_round1_infos(&self, group_id: GroupId) -> Result<Vec<Round1Info>>;

    async fn query_round2_infos(&self, group_id: GroupId) -> Result<Vec<Round2Info>>;

    /// The signing and its current attempt, if that attempt is still open
    async fn query_signing(&self, signing_id: SigningId) -> Result<(Signing, Option<SigningAttempt>)>;

    async fn query_de_count(&self, address: &str) -> Result<u64>;

    async fn query_pending_groups(&self, address: &str) -> Result<Vec<PendingGroup>>;

    async fn query_pending_signings(&self, address: &str) -> Result<Vec<SigningId>>;
}
