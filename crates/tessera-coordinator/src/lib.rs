//! # Tessera Coordinator
//!
//! The deterministic half of Tessera's threshold signature scheme: the state
//! machine every validator runs inside each block.
//!
//! ## Lifecycle
//!
//! ```text
//! CreateGroup ──► ROUND_1 ──► ROUND_2 ──► ROUND_3 ──► ACTIVE
//!                    │           │           │    └──► FALLEN (malicious member)
//!                    └───────────┴───────────┴──────► EXPIRED (creation period over)
//!
//! RequestSigning ──► WAITING (attempt 1..max) ──► SUCCESS
//!                                            └──► FALLEN
//! ```
//!
//! Protocol messages enter through [`Coordinator::deliver`]; round
//! transitions, aggregation, expiry and retries run in
//! [`Coordinator::end_block`]. State lives behind the [`KvStore`] trait, and
//! every transaction and every signing retry is applied on a
//! [`tessera_core::CacheStore`] overlay so failures never leave partial
//! writes behind.

pub mod callbacks;
pub mod coordinator;
pub mod dkg;
mod end_block;
pub mod error;
pub mod events;
pub mod keys;
pub mod messages;
mod nonce_pool;
pub mod params;
pub mod query;
pub mod signing;
mod state;
pub mod testing;
pub mod types;

pub use callbacks::{CallbackRouter, RecordingCallback, TssCallback};
pub use coordinator::Coordinator;
pub use error::{Result, TssError};
pub use events::{AssignedMemberEvent, Event};
pub use messages::Msg;
pub use params::Params;
pub use query::PendingGroup;
pub use types::{
    Address, AssignedMember, BlockContext, Complaint, ComplaintStatus, ComplaintWithStatus,
    ComplaintsWithStatus, Confirm, DeQueue, Group, GroupStatus, Member, Originator,
    PartialSignature, Round1Info, Round2Info, Signing, SigningAttempt, SigningExpiration,
    SigningStatus,
};

pub use tessera_core::{KvStore, MemStore};
