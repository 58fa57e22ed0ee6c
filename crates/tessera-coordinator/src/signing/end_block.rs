use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

use tracing::{error, info, warn};

use tessera_core::{KvStore, SigningId};

use crate::coordinator::Coordinator;
use crate::error::{Result, TssError};
use crate::events::Event;
use crate::types::SigningStatus;

fn panic_reason(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        format!("panic: {}", message)
    } else if let Some(message) = payload.downcast_ref::<String>() {
        format!("panic: {}", message)
    } else {
        "panic: unknown payload".to_string()
    }
}

impl<S: KvStore> Coordinator<S> {
    /// Aggregate full share sets, time out overdue attempts, retry both
    pub(crate) fn handle_signing_end_block(&mut self) -> Result<()> {
        let mut retry = Vec::new();

        let pending = self.pending_process_signings()?;
        self.set_pending_process_signings(&Vec::new());
        for signing_id in pending {
            if let Err(e) = self.aggregate_partial_signatures(signing_id) {
                warn!(signing_id, error = %e, "aggregation failed");
                self.metrics.increment("tss_aggregation_failed", 1);
                retry.push(signing_id);
            }
        }

        for signing_id in self.handle_expired_signings()? {
            if !retry.contains(&signing_id) {
                retry.push(signing_id);
            }
        }

        for signing_id in retry {
            self.retry_signing(signing_id);
        }
        Ok(())
    }

    /// Sweep the expiration schedule up to the current height
    ///
    /// Returns the signings whose attempt ran out without a full share set.
    /// Interim data of every swept attempt is deleted.
    pub(crate) fn handle_expired_signings(&mut self) -> Result<Vec<SigningId>> {
        let expirations = self.signing_expirations()?;
        let mut processed = 0;
        let mut timed_out = Vec::new();

        for entry in &expirations {
            if entry.expired_height > self.block.height {
                break;
            }
            processed += 1;

            let (signing_id, attempt) = (entry.signing_id, entry.attempt);
            let signing_attempt = match self.get_signing_attempt(signing_id, attempt) {
                Ok(signing_attempt) => signing_attempt,
                // Resolved already; interim data is gone
                Err(TssError::SigningAttemptNotFound { .. }) => continue,
                Err(e) => return Err(e),
            };

            let signing = self.get_signing(signing_id)?;
            let count = self.partial_signature_count(signing_id, attempt)?;
            let assigned = signing_attempt.assigned_members.len() as u64;
            if signing.status == SigningStatus::Waiting && signing.current_attempt == attempt && count < assigned {
                let mut idle_members = Vec::new();
                for member in &signing_attempt.assigned_members {
                    if self.get_partial_signature(signing_id, attempt, member.member_id)?.is_none() {
                        idle_members.push(member.address.clone());
                    }
                }
                info!(signing_id, attempt, idle = idle_members.len(), "signing attempt timed out");
                self.metrics.increment("tss_signing_timeout", 1);
                self.emit(Event::SigningTimeout {
                    signing_id,
                    attempt,
                    idle_members,
                });
                timed_out.push(signing_id);
            }
            self.delete_interim_signing_data(signing_id, attempt);
        }

        if processed > 0 {
            self.set_signing_expirations(&expirations[processed..].to_vec());
        }
        Ok(timed_out)
    }

    /// Start a new attempt in its own sub-transaction
    ///
    /// Any error or panic rolls back only this signing's attempt and turns the
    /// signing FALLEN.
    pub(crate) fn retry_signing(&mut self, signing_id: SigningId) {
        match self.get_signing(signing_id) {
            Ok(signing) if signing.status == SigningStatus::Waiting => {}
            Ok(_) => return,
            Err(e) => {
                error!(signing_id, error = %e, "cannot retry unknown signing");
                return;
            }
        }

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            self.with_transaction(|tx| tx.initiate_new_signing_round(signing_id))
        }));
        let reason = match outcome {
            Ok(Ok(())) => {
                self.metrics.increment("tss_signing_retry", 1);
                return;
            }
            Ok(Err(e)) => e.to_string(),
            Err(payload) => panic_reason(payload),
        };
        if let Err(e) = self.handle_failed_signing(signing_id, reason) {
            error!(signing_id, error = %e, "failed to mark signing as fallen");
        }
    }
}
