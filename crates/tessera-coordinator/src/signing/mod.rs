//! Threshold signing state machine
//!
//! A signing stays `WAITING` across one or more attempts and ends in
//! `SUCCESS` or `FALLEN`. Each attempt draws `T` members with a DRBG seeded
//! from the rolling seed, consumes one DE from each, and publishes the
//! binding factors and group nonce the members need to sign.

mod end_block;
mod partial;

use tracing::info;

use tessera_core::{signing, Drbg, GroupId, KvStore, Point, SigningId};

use crate::coordinator::Coordinator;
use crate::error::{Result, TssError};
use crate::events::{AssignedMemberEvent, Event};
use crate::types::{
    signing_message, AssignedMember, Group, GroupStatus, Member, Originator, Signing,
    SigningAttempt, SigningExpiration, SigningStatus,
};

/// Draw `count` members out of `available` without replacement
///
/// `available` must be sorted by member id; the result is sorted too.
pub fn select_members(available: &[Member], count: usize, drbg: &mut Drbg) -> Vec<Member> {
    let mut pool = available.to_vec();
    let n = pool.len();
    let mut selected = Vec::with_capacity(count);
    for i in 0..count.min(n) {
        let remaining = (n - i) as u64;
        let pick = (drbg.next_u64() % remaining) as usize;
        let last = n - 1 - i;
        pool.swap(pick, last);
        selected.push(pool[last].clone());
    }
    selected.sort_by_key(|m| m.id);
    selected
}

impl<S: KvStore> Coordinator<S> {
    /// Open a signing over `content` for an active group
    ///
    /// Callers should run this inside a transaction (as [`Coordinator::deliver`]
    /// does) so a failed first attempt leaves nothing behind.
    pub fn request_signing(&mut self, group_id: GroupId, originator: Originator, content: Vec<u8>) -> Result<SigningId> {
        let group = self.get_group(group_id)?;
        if group.status != GroupStatus::Active {
            return Err(TssError::GroupIsNotActive(group_id));
        }
        let group_pub_key = group
            .pub_key
            .ok_or_else(|| TssError::Corrupted(format!("active group {} has no key", group_id)))?;

        let signing_id = self.signing_count()? + 1;
        self.set_signing_count(signing_id);
        let message = signing_message(group_id, signing_id, &originator, &content);
        self.set_signing(&Signing {
            id: signing_id,
            group_id,
            group_pub_key,
            originator,
            content,
            message,
            current_attempt: 0,
            group_pub_nonce: None,
            signature: None,
            status: SigningStatus::Waiting,
            created_height: self.block.height,
        });

        self.initiate_new_signing_round(signing_id)?;
        self.metrics.increment("tss_signing_requested", 1);
        Ok(signing_id)
    }

    /// Start the next attempt of a waiting signing
    pub fn initiate_new_signing_round(&mut self, signing_id: SigningId) -> Result<()> {
        let mut signing = self.get_signing(signing_id)?;
        let group = self.get_group(signing.group_id)?;

        let attempt = signing.current_attempt + 1;
        if attempt > self.params.max_signing_attempt {
            return Err(TssError::MaxSigningAttemptReached {
                signing_id,
                max: self.params.max_signing_attempt,
            });
        }

        let selected = self.random_assigned_members(&group, signing_id, attempt)?;
        let mut member_ids = Vec::with_capacity(selected.len());
        let mut pub_des = Vec::with_capacity(selected.len());
        for member in &selected {
            member_ids.push(member.id);
            pub_des.push(self.dequeue_de(&member.address)?);
        }

        let commitment = signing::compute_commitment(&member_ids, &pub_des)?;
        let mut assigned_members = Vec::with_capacity(selected.len());
        let mut pub_nonces: Vec<Point> = Vec::with_capacity(selected.len());
        for (member, pub_de) in selected.into_iter().zip(pub_des) {
            let binding_factor = signing::compute_own_binding_factor(member.id, &signing.message, &commitment);
            let pub_nonce = signing::compute_own_pub_nonce(&pub_de, &binding_factor)?;
            let pub_key = member
                .pub_key
                .ok_or_else(|| TssError::Corrupted(format!("member {} has no public key", member.id)))?;
            pub_nonces.push(pub_nonce);
            assigned_members.push(AssignedMember {
                member_id: member.id,
                address: member.address,
                pub_key,
                pub_de,
                binding_factor,
                pub_nonce,
            });
        }
        let group_pub_nonce = signing::compute_group_public_nonce(&pub_nonces)?;

        let expired_height = self.block.height + self.params.signing_period;
        self.set_signing_attempt(&SigningAttempt {
            signing_id,
            attempt,
            expired_height,
            group_pub_nonce,
            assigned_members: assigned_members.clone(),
        });
        // After every entry due no later, so a shortened period still sweeps in order
        let mut expirations = self.signing_expirations()?;
        let at = expirations.partition_point(|e| e.expired_height <= expired_height);
        expirations.insert(
            at,
            SigningExpiration {
                signing_id,
                attempt,
                expired_height,
            },
        );
        self.set_signing_expirations(&expirations);

        signing.current_attempt = attempt;
        signing.group_pub_nonce = Some(group_pub_nonce);
        signing.status = SigningStatus::Waiting;
        self.set_signing(&signing);

        info!(
            signing_id,
            group_id = group.id,
            attempt,
            members = ?member_ids,
            expired_height,
            "signing round started"
        );
        self.emit(Event::RequestSignature {
            signing_id,
            group_id: group.id,
            attempt,
            message: signing.message.clone(),
            group_pub_key: signing.group_pub_key,
            group_pub_nonce,
            assigned_members: assigned_members
                .into_iter()
                .map(|m| AssignedMemberEvent {
                    member_id: m.member_id,
                    address: m.address,
                    pub_de: m.pub_de,
                    binding_factor: m.binding_factor,
                    pub_nonce: m.pub_nonce,
                })
                .collect(),
        });
        Ok(())
    }

    /// Active, honest members that still have a DE queued, by member id
    pub fn get_available_members(&self, group_id: GroupId) -> Result<Vec<Member>> {
        let mut available = Vec::new();
        for member in self.get_members(group_id)? {
            if member.is_active && !member.is_malicious && self.de_count(&member.address)? > 0 {
                available.push(member);
            }
        }
        Ok(available)
    }

    fn random_assigned_members(&self, group: &Group, signing_id: SigningId, attempt: u64) -> Result<Vec<Member>> {
        let available = self.get_available_members(group.id)?;
        if available.is_empty() {
            return Err(TssError::NoActiveMember(group.id));
        }
        if (available.len() as u64) < group.threshold {
            return Err(TssError::InsufficientSigners {
                need: group.threshold,
                available: available.len() as u64,
            });
        }

        let mut nonce = Vec::with_capacity(16);
        nonce.extend_from_slice(&signing_id.to_be_bytes());
        nonce.extend_from_slice(&attempt.to_be_bytes());
        let mut drbg = Drbg::new(&self.block.rolling_seed, &nonce, self.block.chain_id.as_bytes())
            .map_err(|e| TssError::BadDrbgInitialization(e.to_string()))?;
        Ok(select_members(&available, group.threshold as usize, &mut drbg))
    }

    /// Mark a signing as terminally failed
    pub(crate) fn handle_failed_signing(&mut self, signing_id: SigningId, reason: String) -> Result<()> {
        let mut signing = self.get_signing(signing_id)?;
        signing.status = SigningStatus::Fallen;
        self.set_signing(&signing);
        tracing::warn!(signing_id, group_id = signing.group_id, %reason, "signing fell");
        self.metrics.increment("tss_signing_failed", 1);
        self.emit(Event::SigningFailed {
            signing_id,
            group_id: signing.group_id,
            reason,
        });
        Ok(())
    }
}
