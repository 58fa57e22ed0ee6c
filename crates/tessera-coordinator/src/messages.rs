//! Transaction messages and their delivery
//!
//! Every message names its submitter. A transaction is a list of messages
//! applied atomically: either all of them succeed and their state and events
//! are committed, or nothing is.

use serde::{Deserialize, Serialize};
use tracing::debug;

use tessera_core::{GroupId, KvStore, MemberId, PubDe, Signature, SigningId};

use crate::coordinator::Coordinator;
use crate::error::Result;
use crate::events::Event;
use crate::types::{Address, Complaint, Confirm, Originator, Round1Info, Round2Info};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Msg {
    CreateGroup {
        members: Vec<Address>,
        threshold: u64,
        module: String,
    },
    SubmitRound1Info {
        group_id: GroupId,
        round1_info: Round1Info,
        sender: Address,
    },
    SubmitRound2Info {
        group_id: GroupId,
        round2_info: Round2Info,
        sender: Address,
    },
    SubmitComplaints {
        group_id: GroupId,
        complaints: Vec<Complaint>,
        sender: Address,
    },
    SubmitConfirm {
        group_id: GroupId,
        confirm: Confirm,
        sender: Address,
    },
    SubmitDEs {
        des: Vec<PubDe>,
        sender: Address,
    },
    ResetDE {
        sender: Address,
    },
    SetMemberActive {
        group_id: GroupId,
        active: bool,
        sender: Address,
    },
    RequestSigning {
        group_id: GroupId,
        originator: Originator,
        #[serde(with = "tessera_core::types::hex_vec")]
        content: Vec<u8>,
    },
    SubmitPartialSignature {
        signing_id: SigningId,
        attempt: u64,
        member_id: MemberId,
        signature: Signature,
        sender: Address,
    },
}

impl Msg {
    pub fn kind(&self) -> &'static str {
        match self {
            Msg::CreateGroup { .. } => "create_group",
            Msg::SubmitRound1Info { .. } => "submit_round1_info",
            Msg::SubmitRound2Info { .. } => "submit_round2_info",
            Msg::SubmitComplaints { .. } => "submit_complaints",
            Msg::SubmitConfirm { .. } => "submit_confirm",
            Msg::SubmitDEs { .. } => "submit_des",
            Msg::ResetDE { .. } => "reset_de",
            Msg::SetMemberActive { .. } => "set_member_active",
            Msg::RequestSigning { .. } => "request_signing",
            Msg::SubmitPartialSignature { .. } => "submit_partial_signature",
        }
    }

    /// Submitting address, when the message has one
    pub fn sender(&self) -> Option<&str> {
        match self {
            Msg::SubmitRound1Info { sender, .. }
            | Msg::SubmitRound2Info { sender, .. }
            | Msg::SubmitComplaints { sender, .. }
            | Msg::SubmitConfirm { sender, .. }
            | Msg::SubmitDEs { sender, .. }
            | Msg::ResetDE { sender }
            | Msg::SetMemberActive { sender, .. }
            | Msg::SubmitPartialSignature { sender, .. } => Some(sender.as_str()),
            Msg::CreateGroup { .. } | Msg::RequestSigning { .. } => None,
        }
    }
}

impl<S: KvStore> Coordinator<S> {
    /// Apply a single-message transaction
    pub fn deliver(&mut self, msg: Msg) -> Result<Vec<Event>> {
        self.deliver_tx(vec![msg])
    }

    /// Apply `msgs` atomically and return the committed events
    pub fn deliver_tx(&mut self, msgs: Vec<Msg>) -> Result<Vec<Event>> {
        let kinds: Vec<&'static str> = msgs.iter().map(Msg::kind).collect();
        let result = self.with_transaction(|tx| {
            for msg in msgs {
                tx.apply(msg)?;
            }
            Ok(())
        });
        match result {
            Ok(()) => {
                let events = self.take_events();
                self.dispatch_callbacks(&events);
                self.metrics.increment("tss_tx_committed", 1);
                debug!(msgs = ?kinds, events = events.len(), "transaction committed");
                Ok(events)
            }
            Err(e) => {
                self.metrics.increment("tss_tx_rejected", 1);
                debug!(msgs = ?kinds, error = %e, "transaction rejected");
                Err(e)
            }
        }
    }

    fn apply(&mut self, msg: Msg) -> Result<()> {
        match msg {
            Msg::CreateGroup {
                members,
                threshold,
                module,
            } => self.create_group(&members, threshold, &module).map(|_| ()),
            Msg::SubmitRound1Info {
                group_id,
                round1_info,
                sender,
            } => self.submit_round1(group_id, round1_info, &sender),
            Msg::SubmitRound2Info {
                group_id,
                round2_info,
                sender,
            } => self.submit_round2(group_id, round2_info, &sender),
            Msg::SubmitComplaints {
                group_id,
                complaints,
                sender,
            } => self.submit_complaints(group_id, complaints, &sender),
            Msg::SubmitConfirm {
                group_id,
                confirm,
                sender,
            } => self.submit_confirm(group_id, confirm, &sender),
            Msg::SubmitDEs { des, sender } => self.enqueue_des(&sender, &des),
            Msg::ResetDE { sender } => self.reset_de(&sender).map(|_| ()),
            Msg::SetMemberActive {
                group_id,
                active,
                sender,
            } => self.set_member_active(group_id, &sender, active),
            Msg::RequestSigning {
                group_id,
                originator,
                content,
            } => self.request_signing(group_id, originator, content).map(|_| ()),
            Msg::SubmitPartialSignature {
                signing_id,
                attempt,
                member_id,
                signature,
                sender,
            } => self.submit_partial_signature(signing_id, attempt, member_id, signature, &sender),
        }
    }
}
