//! Full protocol runs against an in-memory chain

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use tessera_coordinator::{
    keys,
    testing::{create_group, fund_des, run_blocks, SimParticipant},
    BlockContext, ComplaintStatus, Coordinator, Event, GroupStatus, KvStore, MemStore, Msg,
    Originator, PartialSignature, Params, RecordingCallback, SigningStatus, TssError,
};
use tessera_core::{
    signing::verify_group_signing_signature,
    store::{decode, encode},
    MemoryMetrics, Scalar, Signature,
};

fn coordinator(params: Params) -> Coordinator<MemStore> {
    Coordinator::new(MemStore::new(), params, BlockContext::new("tessera-test")).unwrap()
}

fn participants(n: usize) -> Vec<SimParticipant> {
    (1..=n).map(|i| SimParticipant::new(format!("validator-{}", i))).collect()
}

fn request(group_id: u64, content: &[u8]) -> Msg {
    Msg::RequestSigning {
        group_id,
        originator: Originator::new("bridge", "alice"),
        content: content.to_vec(),
    }
}

/// Block until `c.block().height` reaches `height`, running every end block
fn advance_to<S: KvStore>(c: &mut Coordinator<S>, height: u64) -> Vec<Event> {
    let mut log = Vec::new();
    while c.block().height < height {
        log.extend(c.end_block());
        let next = c.block().next();
        c.begin_block(next);
    }
    log
}

/// Store whose DE-queue reads blow up once armed
struct PanicStore {
    inner: MemStore,
    armed: Arc<AtomicBool>,
}

impl KvStore for PanicStore {
    fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        if self.armed.load(Ordering::SeqCst) && key.first() == Some(&keys::DE_QUEUE_PREFIX) {
            panic!("de queue unavailable");
        }
        self.inner.get(key)
    }

    fn set(&mut self, key: Vec<u8>, value: Vec<u8>) {
        self.inner.set(key, value)
    }

    fn delete(&mut self, key: &[u8]) {
        self.inner.delete(key)
    }

    fn scan_prefix(&self, prefix: &[u8]) -> Vec<(Vec<u8>, Vec<u8>)> {
        self.inner.scan_prefix(prefix)
    }
}

/// Store that garbles stored partial signatures while armed
struct GarbleStore {
    inner: MemStore,
    armed: Arc<AtomicBool>,
}

impl KvStore for GarbleStore {
    fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.inner.get(key)
    }

    fn set(&mut self, key: Vec<u8>, value: Vec<u8>) {
        self.inner.set(key, value)
    }

    fn delete(&mut self, key: &[u8]) {
        self.inner.delete(key)
    }

    fn scan_prefix(&self, prefix: &[u8]) -> Vec<(Vec<u8>, Vec<u8>)> {
        let mut entries = self.inner.scan_prefix(prefix);
        if self.armed.load(Ordering::SeqCst) && prefix.first() == Some(&keys::PARTIAL_SIG_PREFIX) {
            if let Some((_, value)) = entries.first_mut() {
                let mut partial: PartialSignature = decode(&value[..]).unwrap();
                partial.signature.s = Scalar::new([7u8; 32]);
                *value = encode(&partial);
            }
        }
        entries
    }
}

/// Deliver the shares every participant produces for `event`
fn answer<S: KvStore>(c: &mut Coordinator<S>, parts: &mut [SimParticipant], event: &Event) -> Vec<Event> {
    let mut log = Vec::new();
    for part in parts.iter_mut() {
        if let Some(msg) = part.handle(c, event).unwrap() {
            log.extend(c.deliver(msg).unwrap());
        }
    }
    log
}

fn request_event(events: &[Event], attempt: u64) -> Event {
    events
        .iter()
        .find(|e| matches!(e, Event::RequestSignature { attempt: a, .. } if *a == attempt))
        .cloned()
        .expect("signature request")
}

#[test]
fn test_honest_group_activates_and_signs() {
    let metrics = Arc::new(MemoryMetrics::new());
    let recorder = Arc::new(RecordingCallback::new());
    let mut c = coordinator(Params::default()).with_metrics(metrics.clone());
    c.add_callback("bridge", recorder.clone());
    let mut parts = participants(4);

    let (group_id, log) = create_group(&mut c, &mut parts, 2, "bridge").unwrap();
    assert!(log.iter().any(|e| matches!(e, Event::Round3Complete { .. })));
    let group = c.get_group(group_id).unwrap();
    assert_eq!(group.status, GroupStatus::Active);
    assert_eq!(group.threshold, 2);
    assert!(c.get_round1_infos(group_id).unwrap().is_empty(), "interim data kept");

    fund_des(&mut c, &mut parts, 3).unwrap();
    let events = c.deliver(request(group_id, b"transfer 10")).unwrap();
    let log = run_blocks(&mut c, &mut parts, events, 5).unwrap();

    let success = log
        .iter()
        .find_map(|e| match e {
            Event::SigningSuccess { signature, .. } => Some(*signature),
            _ => None,
        })
        .expect("signing should succeed");
    let signing = c.get_signing(1).unwrap();
    assert_eq!(signing.status, SigningStatus::Success);
    assert_eq!(signing.current_attempt, 1);
    assert_eq!(signing.signature, Some(success));
    verify_group_signing_signature(&group.pub_key.unwrap(), &signing.message, &success).unwrap();

    // Two DEs consumed out of twelve
    let remaining: u64 = parts.iter().map(|p| c.de_count(&p.address).unwrap()).sum();
    assert_eq!(remaining, 10);
    assert!(c.get_partial_signatures(1, 1).unwrap().is_empty(), "interim data kept");

    assert_eq!(recorder.calls(), vec!["group_completed:1", "signing_completed:1"]);
    assert_eq!(metrics.counter("tss_signing_success"), 1);
    assert_eq!(metrics.gauge_value("tss_groups_active"), Some(1.0));
}

#[test]
fn test_tampered_share_drops_group() {
    let recorder = Arc::new(RecordingCallback::new());
    let mut c = coordinator(Params::default());
    c.add_callback("bridge", recorder.clone());
    let mut parts = participants(4);
    parts[0].tamper_share_for = Some(2);

    let (group_id, log) = create_group(&mut c, &mut parts, 2, "bridge").unwrap();

    let resolved: Vec<_> = log
        .iter()
        .filter_map(|e| match e {
            Event::ComplaintResolved {
                complainant,
                respondent,
                outcome,
                ..
            } => Some((*complainant, *respondent, *outcome)),
            _ => None,
        })
        .collect();
    assert_eq!(resolved, vec![(2, 1, ComplaintStatus::Success)]);
    assert!(log
        .iter()
        .any(|e| matches!(e, Event::Round3Failed { malicious, .. } if *malicious == vec![1u64])));

    assert_eq!(c.get_group(group_id).unwrap().status, GroupStatus::Fallen);
    assert!(c.get_member(group_id, 1).unwrap().is_malicious);
    assert!(!c.get_member(group_id, 2).unwrap().is_malicious);
    assert_eq!(recorder.calls(), vec!["group_failed:1"]);

    let result = c.deliver(request(group_id, b"nope"));
    assert_eq!(result, Err(TssError::GroupIsNotActive(group_id)));
}

#[test]
fn test_silent_members_time_out_and_retry() {
    let params = Params {
        signing_period: 3,
        ..Params::default()
    };
    let recorder = Arc::new(RecordingCallback::new());
    let mut c = coordinator(params);
    c.add_callback("bridge", recorder.clone());
    let mut parts = participants(4);
    let (group_id, _) = create_group(&mut c, &mut parts, 2, "bridge").unwrap();
    fund_des(&mut c, &mut parts, 4).unwrap();

    for part in parts.iter_mut() {
        part.silent = true;
    }
    let events = c.deliver(request(group_id, b"slow")).unwrap();
    let first_attempt = c.get_signing_attempt(1, 1).unwrap();
    let log = run_blocks(&mut c, &mut parts, events, 4).unwrap();

    let timeout = log
        .iter()
        .find_map(|e| match e {
            Event::SigningTimeout {
                attempt, idle_members, ..
            } => Some((*attempt, idle_members.clone())),
            _ => None,
        })
        .expect("first attempt should time out");
    assert_eq!(timeout.0, 1);
    let assigned: Vec<String> = first_attempt.assigned_members.iter().map(|m| m.address.clone()).collect();
    assert_eq!(timeout.1, assigned);

    let signing = c.get_signing(1).unwrap();
    assert_eq!(signing.status, SigningStatus::Waiting);
    assert_eq!(signing.current_attempt, 2);
    assert!(matches!(
        c.get_signing_attempt(1, 1),
        Err(TssError::SigningAttemptNotFound { .. })
    ));
    assert!(recorder.calls().contains(&"signing_timeout:1:2".to_string()));

    // A share for the stale attempt is refused
    let stale = c.submit_partial_signature(
        1,
        1,
        first_attempt.assigned_members[0].member_id,
        tessera_core::Signature::new(first_attempt.group_pub_nonce, tessera_core::Scalar::new([1u8; 32])),
        &first_attempt.assigned_members[0].address,
    );
    assert_eq!(stale, Err(TssError::SigningExpired { signing_id: 1, attempt: 1 }));

    // Members wake up in time for the next attempt
    for part in parts.iter_mut() {
        part.silent = false;
    }
    let log = run_blocks(&mut c, &mut parts, Vec::new(), 10).unwrap();
    assert!(log.iter().any(|e| matches!(e, Event::SigningSuccess { signing_id: 1, .. })));
    let signing = c.get_signing(1).unwrap();
    assert_eq!(signing.status, SigningStatus::Success);
    assert_eq!(signing.current_attempt, 3);
}

#[test]
fn test_signing_falls_after_max_attempts() {
    let params = Params {
        signing_period: 1,
        max_signing_attempt: 2,
        ..Params::default()
    };
    let mut c = coordinator(params);
    let mut parts = participants(3);
    let (group_id, _) = create_group(&mut c, &mut parts, 2, "bridge").unwrap();
    fund_des(&mut c, &mut parts, 5).unwrap();
    for part in parts.iter_mut() {
        part.silent = true;
    }

    let events = c.deliver(request(group_id, b"never")).unwrap();
    let log = run_blocks(&mut c, &mut parts, events, 10).unwrap();

    let timeouts = log.iter().filter(|e| matches!(e, Event::SigningTimeout { .. })).count();
    assert_eq!(timeouts, 2);
    let reason = log
        .iter()
        .find_map(|e| match e {
            Event::SigningFailed { reason, .. } => Some(reason.clone()),
            _ => None,
        })
        .expect("signing should fall");
    assert!(reason.contains("max"), "unexpected reason: {}", reason);
    assert_eq!(c.get_signing(1).unwrap().status, SigningStatus::Fallen);
    assert!(c.signing_expirations().unwrap().is_empty());
}

#[test]
fn test_panicking_retry_is_rolled_back() {
    let armed = Arc::new(AtomicBool::new(false));
    let store = PanicStore {
        inner: MemStore::new(),
        armed: armed.clone(),
    };
    let params = Params {
        signing_period: 2,
        ..Params::default()
    };
    let recorder = Arc::new(RecordingCallback::new());
    let mut c = Coordinator::new(store, params, BlockContext::new("tessera-test")).unwrap();
    c.add_callback("bridge", recorder.clone());
    let mut parts = participants(3);
    let (group_id, _) = create_group(&mut c, &mut parts, 2, "bridge").unwrap();
    fund_des(&mut c, &mut parts, 3).unwrap();

    c.deliver(request(group_id, b"boom")).unwrap();
    let expired_height = c.get_signing_attempt(1, 1).unwrap().expired_height;

    armed.store(true, Ordering::SeqCst);
    let log = advance_to(&mut c, expired_height + 1);
    armed.store(false, Ordering::SeqCst);

    let reason = log
        .iter()
        .find_map(|e| match e {
            Event::SigningFailed { reason, .. } => Some(reason.clone()),
            _ => None,
        })
        .expect("signing should fall");
    assert!(reason.starts_with("panic:"), "unexpected reason: {}", reason);
    assert!(reason.contains("de queue unavailable"));

    let signing = c.get_signing(1).unwrap();
    assert_eq!(signing.status, SigningStatus::Fallen);
    assert_eq!(signing.current_attempt, 1);
    assert!(matches!(
        c.get_signing_attempt(1, 2),
        Err(TssError::SigningAttemptNotFound { .. })
    ));
    // The aborted attempt dequeued nothing
    let remaining: u64 = parts.iter().map(|p| c.de_count(&p.address).unwrap()).sum();
    assert_eq!(remaining, 9 - 2);
    assert_eq!(recorder.calls().last().map(String::as_str), Some("signing_failed:1"));
}

#[test]
fn test_inactive_member_is_never_drawn() {
    let mut c = coordinator(Params::default());
    let mut parts = participants(3);
    let (group_id, _) = create_group(&mut c, &mut parts, 2, "bridge").unwrap();
    fund_des(&mut c, &mut parts, 2).unwrap();

    c.deliver(Msg::SetMemberActive {
        group_id,
        active: false,
        sender: parts[2].address.clone(),
    })
    .unwrap();
    assert_eq!(c.de_count(&parts[2].address).unwrap(), 0);

    let events = c.deliver(request(group_id, b"pair")).unwrap();
    let drawn: Vec<u64> = c
        .get_signing_attempt(1, 1)
        .unwrap()
        .assigned_members
        .iter()
        .map(|m| m.member_id)
        .collect();
    assert_eq!(drawn, vec![1, 2]);
    run_blocks(&mut c, &mut parts, events, 5).unwrap();
    assert_eq!(c.get_signing(1).unwrap().status, SigningStatus::Success);

    // One signer left with DEs is below the threshold
    c.deliver(Msg::ResetDE {
        sender: parts[1].address.clone(),
    })
    .unwrap();
    let result = c.deliver(request(group_id, b"solo"));
    assert_eq!(
        result,
        Err(TssError::InsufficientSigners { need: 2, available: 1 })
    );
    assert_eq!(c.signing_count().unwrap(), 1);
}

#[test]
fn test_unassigned_and_duplicate_shares_rejected() {
    let mut c = coordinator(Params::default());
    let mut parts = participants(4);
    let (group_id, _) = create_group(&mut c, &mut parts, 2, "bridge").unwrap();
    fund_des(&mut c, &mut parts, 2).unwrap();

    let events = c.deliver(request(group_id, b"dup")).unwrap();
    let attempt = c.get_signing_attempt(1, 1).unwrap();
    let assigned: Vec<u64> = attempt.member_ids();
    let outsider = (1..=4u64).find(|id| !assigned.contains(id)).unwrap();

    let request_event = events
        .iter()
        .find(|e| matches!(e, Event::RequestSignature { .. }))
        .unwrap()
        .clone();
    let first = assigned[0] as usize - 1;
    let msg = parts[first].handle(&c, &request_event).unwrap().unwrap();
    c.deliver(msg.clone()).unwrap();
    assert_eq!(
        c.deliver(msg.clone()),
        Err(TssError::AlreadySigned {
            signing_id: 1,
            member_id: assigned[0]
        })
    );

    let Msg::SubmitPartialSignature { signature, .. } = msg else {
        panic!("expected a partial signature");
    };
    let result = c.deliver(Msg::SubmitPartialSignature {
        signing_id: 1,
        attempt: 1,
        member_id: outsider,
        signature,
        sender: parts[outsider as usize - 1].address.clone(),
    });
    assert_eq!(
        result,
        Err(TssError::MemberNotAssigned {
            signing_id: 1,
            member_id: outsider
        })
    );
}

#[test]
fn test_stalled_dkg_expires() {
    let params = Params {
        creation_period: 5,
        ..Params::default()
    };
    let recorder = Arc::new(RecordingCallback::new());
    let mut c = coordinator(params);
    c.add_callback("bridge", recorder.clone());
    c.deliver(Msg::CreateGroup {
        members: vec!["a".into(), "b".into(), "c".into()],
        threshold: 2,
        module: "bridge".into(),
    })
    .unwrap();

    let log = advance_to(&mut c, 7);
    assert_eq!(
        log.iter().filter(|e| matches!(e, Event::GroupExpired { group_id: 1 })).count(),
        1
    );
    assert_eq!(c.get_group(1).unwrap().status, GroupStatus::Expired);
    assert!(c.pending_groups("a").unwrap().is_empty());
    assert_eq!(recorder.calls(), vec!["group_expired:1"]);
}

#[test]
fn test_forged_partial_signature_rejected() {
    let mut c = coordinator(Params::default());
    let mut parts = participants(3);
    let (group_id, _) = create_group(&mut c, &mut parts, 2, "bridge").unwrap();
    fund_des(&mut c, &mut parts, 2).unwrap();

    let events = c.deliver(request(group_id, b"forge")).unwrap();
    let attempt = c.get_signing_attempt(1, 1).unwrap();
    let signer = &attempt.assigned_members[0];
    let event = request_event(&events, 1);
    let Msg::SubmitPartialSignature { signature, .. } = parts[signer.member_id as usize - 1]
        .handle(&c, &event)
        .unwrap()
        .unwrap()
    else {
        panic!("expected a partial signature");
    };

    let forged = |signature: Signature| Msg::SubmitPartialSignature {
        signing_id: 1,
        attempt: 1,
        member_id: signer.member_id,
        signature,
        sender: signer.address.clone(),
    };
    // Wrong nonce commitment
    assert_eq!(
        c.deliver(forged(Signature::new(attempt.group_pub_nonce, signature.s))),
        Err(TssError::PubNonceNotEqualToSigR)
    );
    // Right nonce, wrong response
    assert!(matches!(
        c.deliver(forged(Signature::new(signature.r, Scalar::new([7u8; 32])))),
        Err(TssError::VerifySigningSigFailed(_))
    ));
    assert!(c.get_partial_signatures(1, 1).unwrap().is_empty());

    // The honest share still lands and the attempt completes
    c.deliver(forged(signature)).unwrap();
    for part in parts.iter_mut().filter(|p| p.address != signer.address) {
        if let Some(msg) = part.handle(&c, &event).unwrap() {
            c.deliver(msg).unwrap();
        }
    }
    let log = c.end_block();
    assert!(log.iter().any(|e| matches!(e, Event::SigningSuccess { signing_id: 1, .. })));
    let signing = c.get_signing(1).unwrap();
    assert_eq!(signing.status, SigningStatus::Success);
    assert_eq!(signing.current_attempt, 1);
}

#[test]
fn test_failed_aggregation_retries_next_attempt() {
    let armed = Arc::new(AtomicBool::new(false));
    let store = GarbleStore {
        inner: MemStore::new(),
        armed: armed.clone(),
    };
    let metrics = Arc::new(MemoryMetrics::new());
    let mut c = Coordinator::new(store, Params::default(), BlockContext::new("tessera-test"))
        .unwrap()
        .with_metrics(metrics.clone());
    let mut parts = participants(3);
    let (group_id, _) = create_group(&mut c, &mut parts, 2, "bridge").unwrap();
    fund_des(&mut c, &mut parts, 3).unwrap();

    let events = c.deliver(request(group_id, b"garbled")).unwrap();
    answer(&mut c, &mut parts, &request_event(&events, 1));

    armed.store(true, Ordering::SeqCst);
    let log = c.end_block();
    armed.store(false, Ordering::SeqCst);
    let next = c.block().next();
    c.begin_block(next);

    assert!(!log.iter().any(|e| matches!(e, Event::SigningSuccess { .. })));
    assert_eq!(metrics.counter("tss_aggregation_failed"), 1);
    let signing = c.get_signing(1).unwrap();
    assert_eq!(signing.status, SigningStatus::Waiting);
    assert_eq!(signing.current_attempt, 2);

    let log = run_blocks(&mut c, &mut parts, vec![request_event(&log, 2)], 5).unwrap();
    assert!(log.iter().any(|e| matches!(e, Event::SigningSuccess { signing_id: 1, .. })));
    let signing = c.get_signing(1).unwrap();
    assert_eq!(signing.status, SigningStatus::Success);
    assert_eq!(signing.current_attempt, 2);
}

#[test]
fn test_expiration_sweep_is_idempotent_within_a_height() {
    let params = Params {
        signing_period: 2,
        ..Params::default()
    };
    let mut c = coordinator(params);
    let mut parts = participants(3);
    let (group_id, _) = create_group(&mut c, &mut parts, 2, "bridge").unwrap();
    fund_des(&mut c, &mut parts, 3).unwrap();

    c.deliver(request(group_id, b"twice")).unwrap();
    let expired_height = c.get_signing_attempt(1, 1).unwrap().expired_height;
    advance_to(&mut c, expired_height);

    let first = c.end_block();
    assert!(first.iter().any(|e| matches!(e, Event::SigningTimeout { attempt: 1, .. })));
    let expirations = c.signing_expirations().unwrap();
    let signing = c.get_signing(1).unwrap();
    let des: Vec<u64> = parts.iter().map(|p| c.de_count(&p.address).unwrap()).collect();
    assert_eq!(signing.current_attempt, 2);

    // Same height again: nothing left to sweep
    let second = c.end_block();
    assert!(!second
        .iter()
        .any(|e| matches!(e, Event::SigningTimeout { .. } | Event::RequestSignature { .. })));
    assert_eq!(c.signing_expirations().unwrap(), expirations);
    assert_eq!(c.get_signing(1).unwrap(), signing);
    let after: Vec<u64> = parts.iter().map(|p| c.de_count(&p.address).unwrap()).collect();
    assert_eq!(after, des);
}

#[test]
fn test_shortened_period_expires_in_height_order() {
    let params = Params {
        signing_period: 10,
        ..Params::default()
    };
    let mut c = coordinator(params.clone());
    let mut parts = participants(3);
    let (group_id, _) = create_group(&mut c, &mut parts, 2, "bridge").unwrap();
    fund_des(&mut c, &mut parts, 4).unwrap();

    c.deliver(request(group_id, b"long")).unwrap();
    c.set_params(Params {
        signing_period: 2,
        ..params
    })
    .unwrap();
    c.deliver(request(group_id, b"short")).unwrap();

    let height = c.block().height;
    let order: Vec<(u64, u64)> = c
        .signing_expirations()
        .unwrap()
        .iter()
        .map(|e| (e.signing_id, e.expired_height))
        .collect();
    assert_eq!(order, vec![(2, height + 2), (1, height + 10)]);

    let log = advance_to(&mut c, height + 3);
    let timed_out: Vec<u64> = log
        .iter()
        .filter_map(|e| match e {
            Event::SigningTimeout { signing_id, .. } => Some(*signing_id),
            _ => None,
        })
        .collect();
    assert_eq!(timed_out, vec![2]);
    assert_eq!(c.get_signing(1).unwrap().current_attempt, 1);
    assert_eq!(c.get_signing(2).unwrap().current_attempt, 2);
}
