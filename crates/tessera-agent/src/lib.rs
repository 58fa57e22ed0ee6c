//! Tessera Agent - off-chain participant for threshold signing
//!
//! This crate provides:
//! - Local storage of DKG secrets, key shares and nonce pairs
//! - A transaction sender with signer-key leasing and batching
//! - Workers for every DKG round, nonce replenishment, signing and cleanup
//! - The [`MessageRelay`] seam to a chain, with an in-process [`LocalChain`]

pub mod agent;
pub mod agent_store;
pub mod config;
pub mod de_counter;
pub mod error;
pub mod local;
pub mod relay;
pub mod sender;
pub mod workers;

pub use agent::{Agent, AgentHandle};
pub use agent_store::AgentStore;
pub use config::AgentConfig;
pub use de_counter::DeCounter;
pub use error::{AgentError, Result};
pub use local::LocalChain;
pub use relay::{EventFilter, EventStream, MessageRelay, TxResult};
pub use sender::{KeyPool, Request, RequestKind, Response, Sender, SenderHandle};
