use tracing::{debug, info};

use tessera_core::{signing, KvStore, MemberId, Signature, SigningId};

use crate::coordinator::Coordinator;
use crate::error::{Result, TssError};
use crate::events::Event;
use crate::types::{PartialSignature, SigningStatus};

impl<S: KvStore> Coordinator<S> {
    /// Accept one assigned member's share for the current attempt
    pub fn submit_partial_signature(
        &mut self,
        signing_id: SigningId,
        attempt: u64,
        member_id: MemberId,
        signature: Signature,
        sender: &str,
    ) -> Result<()> {
        let signing = self.get_signing(signing_id)?;
        match signing.status {
            SigningStatus::Waiting => {}
            SigningStatus::Success => return Err(TssError::SigningAlreadySuccess(signing_id)),
            SigningStatus::Fallen => return Err(TssError::SigningFallen(signing_id)),
        }
        if attempt != signing.current_attempt {
            return Err(TssError::SigningExpired { signing_id, attempt });
        }
        let signing_attempt = self
            .get_signing_attempt(signing_id, attempt)
            .map_err(|_| TssError::SigningExpired { signing_id, attempt })?;

        let assigned = signing_attempt
            .find(member_id)
            .ok_or(TssError::MemberNotAssigned { signing_id, member_id })?;
        if assigned.address != sender {
            return Err(TssError::MemberNotAuthorized(format!(
                "{} is not assigned member {} of signing {}",
                sender, member_id, signing_id
            )));
        }
        if self.get_partial_signature(signing_id, attempt, member_id)?.is_some() {
            return Err(TssError::AlreadySigned { signing_id, member_id });
        }
        if signature.r != assigned.pub_nonce {
            return Err(TssError::PubNonceNotEqualToSigR);
        }

        let lagrange = signing::compute_lagrange_coefficient(member_id, &signing_attempt.member_ids())?;
        signing::verify_signing_signature(
            &signing_attempt.group_pub_nonce,
            &signing.group_pub_key,
            &signing.message,
            &lagrange,
            &signature,
            &assigned.pub_key,
        )
        .map_err(|e| TssError::VerifySigningSigFailed(e.to_string()))?;

        let address = assigned.address.clone();
        let pub_de = assigned.pub_de;
        self.set_partial_signature(&PartialSignature {
            signing_id,
            attempt,
            member_id,
            signature,
        });
        let count = self.partial_signature_count(signing_id, attempt)? + 1;
        self.set_partial_signature_count(signing_id, attempt, count);
        debug!(signing_id, attempt, member_id, count, "partial signature accepted");

        self.emit(Event::SubmitSignature {
            signing_id,
            attempt,
            member_id,
            address,
            pub_de,
        });

        if count == signing_attempt.assigned_members.len() as u64 {
            let mut pending = self.pending_process_signings()?;
            pending.push(signing_id);
            self.set_pending_process_signings(&pending);
        }
        Ok(())
    }

    /// Combine the shares of the current attempt and finish the signing
    pub(crate) fn aggregate_partial_signatures(&mut self, signing_id: SigningId) -> Result<Signature> {
        let mut signing = self.get_signing(signing_id)?;
        if signing.status != SigningStatus::Waiting {
            return Err(TssError::InvalidStatus(format!("signing {} is not waiting", signing_id)));
        }
        let attempt = signing.current_attempt;
        let partials: Vec<Signature> = self
            .get_partial_signatures(signing_id, attempt)?
            .into_iter()
            .map(|p| p.signature)
            .collect();

        let signature =
            signing::combine_signatures(&partials).map_err(|e| TssError::CombineSigsFailed(e.to_string()))?;
        signing::verify_group_signing_signature(&signing.group_pub_key, &signing.message, &signature)
            .map_err(|e| TssError::VerifyGroupSigningSigFailed(e.to_string()))?;

        signing.signature = Some(signature);
        signing.status = SigningStatus::Success;
        self.set_signing(&signing);
        self.delete_interim_signing_data(signing_id, attempt);

        info!(signing_id, group_id = signing.group_id, attempt, "signing succeeded");
        self.metrics.increment("tss_signing_success", 1);
        self.metrics
            .observe("tss_signing_blocks", (self.block.height - signing.created_height) as f64);
        self.emit(Event::SigningSuccess {
            signing_id,
            group_id: signing.group_id,
            signature,
        });
        Ok(signature)
    }
}
