//! In-process participants that follow the protocol
//!
//! Used by the test suites to drive groups through DKG and signing without
//! the networked agent.

use std::collections::{BTreeMap, VecDeque};

use tessera_core::{
    dkg::{self, Round1Data},
    hash,
    signing::{self, PrivateDe},
    GroupId, KvStore, MemberId, Point, PubDe, Scalar,
};

use crate::coordinator::Coordinator;
use crate::error::{Result, TssError};
use crate::events::Event;
use crate::messages::Msg;
use crate::types::{Address, Complaint, Confirm, Round1Info, Round2Info, SigningStatus};

struct GroupState {
    member_id: MemberId,
    dkg_context: Vec<u8>,
    round1: Round1Data,
    own_private_key: Option<Scalar>,
}

/// One honest member (optionally with a single scripted fault)
pub struct SimParticipant {
    pub address: Address,
    de_secret: [u8; 32],
    de_index: u64,
    des: BTreeMap<PubDe, PrivateDe>,
    groups: BTreeMap<GroupId, GroupState>,
    /// Corrupt the round-2 share destined to this member
    pub tamper_share_for: Option<MemberId>,
    /// Never answer signing requests
    pub silent: bool,
}

impl SimParticipant {
    pub fn new(address: impl Into<String>) -> Self {
        let address = address.into();
        let de_secret = hash::hash(&[b"sim-de-secret", address.as_bytes()]);
        Self {
            address,
            de_secret,
            de_index: 0,
            des: BTreeMap::new(),
            groups: BTreeMap::new(),
            tamper_share_for: None,
            silent: false,
        }
    }

    /// Derive `n` fresh DEs, remember their private halves, return the message
    pub fn submit_des(&mut self, n: u64) -> Result<Msg> {
        let mut des = Vec::with_capacity(n as usize);
        for _ in 0..n {
            let de = signing::derive_de(&self.de_secret, self.de_index)?;
            self.de_index += 1;
            des.push(de.pub_de);
            self.des.insert(de.pub_de, de);
        }
        Ok(Msg::SubmitDEs {
            des,
            sender: self.address.clone(),
        })
    }

    pub fn own_private_key(&self, group_id: GroupId) -> Option<Scalar> {
        self.groups.get(&group_id).and_then(|g| g.own_private_key)
    }

    /// React to one committed event
    pub fn handle<S: KvStore>(&mut self, coordinator: &Coordinator<S>, event: &Event) -> Result<Option<Msg>> {
        match event {
            Event::GroupCreated {
                group_id,
                threshold,
                dkg_context,
                members,
                ..
            } => {
                let Some(position) = members.iter().position(|m| *m == self.address) else {
                    return Ok(None);
                };
                let member_id = position as u64 + 1;
                let round1 = dkg::generate_round1_data(member_id, *threshold, dkg_context)?;
                let info = Round1Info {
                    member_id,
                    coefficient_commits: round1.coefficient_commits.clone(),
                    one_time_pub_key: round1.one_time_pub,
                    a0_signature: round1.a0_sig,
                    one_time_signature: round1.one_time_sig,
                };
                self.groups.insert(
                    *group_id,
                    GroupState {
                        member_id,
                        dkg_context: dkg_context.clone(),
                        round1,
                        own_private_key: None,
                    },
                );
                Ok(Some(Msg::SubmitRound1Info {
                    group_id: *group_id,
                    round1_info: info,
                    sender: self.address.clone(),
                }))
            }
            Event::Round1Complete { group_id } => {
                let Some(state) = self.groups.get(group_id) else {
                    return Ok(None);
                };
                let one_time_pubs: Vec<Point> = coordinator
                    .get_round1_infos(*group_id)?
                    .into_iter()
                    .map(|info| info.one_time_pub_key)
                    .collect();
                let mut shares = dkg::compute_encrypted_secret_shares(
                    state.member_id,
                    &state.round1.one_time_priv,
                    &one_time_pubs,
                    &state.round1.coefficients,
                )?;
                if let Some(victim) = self.tamper_share_for {
                    // A share of the right polynomial at the wrong point
                    let slot = dkg::find_member_slot(state.member_id, victim)?;
                    let wrong = dkg::compute_secret_share(&state.round1.coefficients, victim + 1000)?;
                    let key_sym =
                        dkg::compute_key_sym(&state.round1.one_time_priv, &one_time_pubs[(victim - 1) as usize])?;
                    shares[slot] = dkg::encrypt(&wrong, &key_sym)?;
                }
                Ok(Some(Msg::SubmitRound2Info {
                    group_id: *group_id,
                    round2_info: Round2Info {
                        member_id: state.member_id,
                        encrypted_secret_shares: shares,
                    },
                    sender: self.address.clone(),
                }))
            }
            Event::Round2Complete { group_id } => self.round3(coordinator, *group_id),
            Event::RequestSignature {
                signing_id,
                group_id,
                attempt,
                message,
                group_pub_key,
                group_pub_nonce,
                assigned_members,
            } => {
                if self.silent {
                    return Ok(None);
                }
                let Some(me) = assigned_members.iter().find(|m| m.address == self.address) else {
                    return Ok(None);
                };
                let own_private_key = self
                    .own_private_key(*group_id)
                    .ok_or_else(|| TssError::Corrupted(format!("no key for group {}", group_id)))?;
                let de = self
                    .des
                    .remove(&me.pub_de)
                    .ok_or_else(|| TssError::DENotFound(me.pub_de.key_hex()))?;
                let member_ids: Vec<MemberId> = assigned_members.iter().map(|m| m.member_id).collect();
                let lagrange = signing::compute_lagrange_coefficient(me.member_id, &member_ids)?;
                let own_nonce = signing::compute_own_priv_nonce(&de.priv_d, &de.priv_e, &me.binding_factor)?;
                let signature = signing::sign_signing(
                    group_pub_nonce,
                    group_pub_key,
                    message,
                    &lagrange,
                    &own_nonce,
                    &own_private_key,
                )?;
                Ok(Some(Msg::SubmitPartialSignature {
                    signing_id: *signing_id,
                    attempt: *attempt,
                    member_id: me.member_id,
                    signature,
                    sender: self.address.clone(),
                }))
            }
            _ => Ok(None),
        }
    }

    fn round3<S: KvStore>(&mut self, coordinator: &Coordinator<S>, group_id: GroupId) -> Result<Option<Msg>> {
        let Some(state) = self.groups.get_mut(&group_id) else {
            return Ok(None);
        };
        let me = state.member_id;
        let round1_infos = coordinator.get_round1_infos(group_id)?;
        let mut shares = vec![dkg::compute_secret_share(&state.round1.coefficients, me)?];
        let mut complaints = Vec::new();

        for sender in &round1_infos {
            let j = sender.member_id;
            if j == me {
                continue;
            }
            let round2 = coordinator
                .get_round2_info(group_id, j)?
                .ok_or_else(|| TssError::Corrupted(format!("no round 2 info of {}", j)))?;
            let slot = dkg::find_member_slot(j, me)?;
            let key_sym = dkg::compute_key_sym(&state.round1.one_time_priv, &sender.one_time_pub_key)?;
            let share = dkg::decrypt(&round2.encrypted_secret_shares[slot], &key_sym)?;
            if dkg::verify_secret_share(me, &share, &sender.coefficient_commits).is_ok() {
                shares.push(share);
                continue;
            }
            let (signature, key_sym) = dkg::sign_complaint(
                &state.round1.one_time_pub,
                &sender.one_time_pub_key,
                &state.round1.one_time_priv,
            )?;
            complaints.push(Complaint {
                complainant: me,
                respondent: j,
                key_sym,
                signature,
            });
        }

        if !complaints.is_empty() {
            return Ok(Some(Msg::SubmitComplaints {
                group_id,
                complaints,
                sender: self.address.clone(),
            }));
        }

        let own_private_key = dkg::compute_own_private_key(&shares)?;
        let own_pub_key = own_private_key.public_point()?;
        let own_pub_key_sig = dkg::sign_own_pub_key(me, &state.dkg_context, &own_pub_key, &own_private_key)?;
        state.own_private_key = Some(own_private_key);
        Ok(Some(Msg::SubmitConfirm {
            group_id,
            confirm: Confirm {
                member_id: me,
                own_pub_key_sig,
            },
            sender: self.address.clone(),
        }))
    }
}

/// Feed committed events to `participants` and advance blocks until quiet
///
/// Every message a participant produces is delivered in its own transaction.
/// Returns every event committed on the way.
pub fn run_blocks<S: KvStore>(
    coordinator: &mut Coordinator<S>,
    participants: &mut [SimParticipant],
    initial: Vec<Event>,
    max_blocks: u64,
) -> Result<Vec<Event>> {
    let mut log = initial.clone();
    let mut inbox: VecDeque<Event> = initial.into();
    for _ in 0..max_blocks {
        while let Some(event) = inbox.pop_front() {
            for participant in participants.iter_mut() {
                if let Some(msg) = participant.handle(coordinator, &event)? {
                    let events = coordinator.deliver(msg)?;
                    log.extend(events.iter().cloned());
                    inbox.extend(events);
                }
            }
        }
        let events = coordinator.end_block();
        let next = coordinator.block().next();
        coordinator.begin_block(next);
        if events.is_empty() && !has_waiting_signings(coordinator)? {
            break;
        }
        log.extend(events.iter().cloned());
        inbox.extend(events);
    }
    Ok(log)
}

fn has_waiting_signings<S: KvStore>(coordinator: &Coordinator<S>) -> Result<bool> {
    for entry in coordinator.signing_expirations()? {
        if coordinator.get_signing(entry.signing_id)?.status == SigningStatus::Waiting {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Create a group of `participants` and run DKG to completion
pub fn create_group<S: KvStore>(
    coordinator: &mut Coordinator<S>,
    participants: &mut [SimParticipant],
    threshold: u64,
    module: &str,
) -> Result<(GroupId, Vec<Event>)> {
    let members: Vec<Address> = participants.iter().map(|p| p.address.clone()).collect();
    let events = coordinator.deliver(Msg::CreateGroup {
        members,
        threshold,
        module: module.to_string(),
    })?;
    let group_id = coordinator.group_count()?;
    let log = run_blocks(coordinator, participants, events, 10)?;
    Ok((group_id, log))
}

/// Give every participant `n` DEs on chain
pub fn fund_des<S: KvStore>(
    coordinator: &mut Coordinator<S>,
    participants: &mut [SimParticipant],
    n: u64,
) -> Result<()> {
    for participant in participants.iter_mut() {
        coordinator.deliver(participant.submit_des(n)?)?;
    }
    Ok(())
}
