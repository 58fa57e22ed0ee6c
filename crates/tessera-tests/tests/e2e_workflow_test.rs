//! End-to-end workflow tests for the Tessera system
//!
//! These tests run real agents against an in-process chain and follow a
//! group from creation through DKG to signing.

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use tempfile::TempDir;
use tokio::sync::watch;

use tessera_agent::{Agent, AgentConfig, AgentHandle, EventFilter, LocalChain, MessageRelay};
use tessera_coordinator::{
    testing::SimParticipant, Coordinator, GroupStatus, MemStore, Msg, Originator, Params, SigningStatus,
};
use tessera_core::{metrics::MemoryMetrics, signing::verify_group_signing_signature, MetricsSink};

const BLOCK_INTERVAL: Duration = Duration::from_millis(10);
const DEADLINE: Duration = Duration::from_secs(20);

/// One chain producing blocks, plus a data directory for agents
struct Network {
    chain: Arc<LocalChain>,
    shutdown: watch::Sender<bool>,
    dir: TempDir,
}

impl Network {
    fn new(params: Params) -> Self {
        let chain = Arc::new(LocalChain::new(params, "tessera-e2e").unwrap());
        let (shutdown, rx) = watch::channel(false);
        tokio::spawn(Arc::clone(&chain).run(BLOCK_INTERVAL, rx));
        Self {
            chain,
            shutdown,
            dir: TempDir::new().unwrap(),
        }
    }

    fn relay(&self) -> Arc<dyn MessageRelay> {
        self.chain.clone()
    }

    fn config(&self, address: &str) -> AgentConfig {
        let mut config = AgentConfig::for_granter(address, self.dir.path().join(address));
        config.poll_interval_ms = 10;
        config.broadcast_timeout_ms = 2_000;
        config.check_de_interval_ms = 200;
        config
    }

    async fn start(&self, config: AgentConfig) -> AgentHandle {
        self.start_with_metrics(config, tessera_core::metrics::noop()).await
    }

    async fn start_with_metrics(&self, config: AgentConfig, metrics: Arc<dyn MetricsSink>) -> AgentHandle {
        Agent::start(config, self.relay(), metrics).await.unwrap()
    }

    async fn submit(&self, msg: Msg) {
        let result = self.relay().submit("requester", vec![msg], 2.0).await.unwrap();
        assert!(result.is_ok(), "refused: {}", result.log);
    }

    async fn create_group(&self, members: &[&str], threshold: u64) {
        self.submit(Msg::CreateGroup {
            members: members.iter().map(|m| m.to_string()).collect(),
            threshold,
            module: "e2e".into(),
        })
        .await;
    }

    async fn request_signing(&self, group_id: u64, content: &[u8]) {
        self.submit(Msg::RequestSigning {
            group_id,
            originator: Originator::new("e2e", "requester"),
            content: content.to_vec(),
        })
        .await;
    }

    /// Poll committed state until `check` holds
    async fn eventually(&self, what: &str, check: impl Fn(&Coordinator<MemStore>) -> bool) {
        let started = tokio::time::Instant::now();
        while started.elapsed() < DEADLINE {
            if self.chain.with_coordinator(&check).unwrap() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("timed out waiting for {}", what);
    }

    async fn wait_for_des(&self, members: &[&str]) {
        self.eventually("DEs on chain", |c| {
            members.iter().all(|m| c.de_count(m).unwrap() > 0)
        })
        .await;
    }

    fn assert_signed(&self, signing_id: u64) {
        self.chain
            .with_coordinator(|c| {
                let signing = c.get_signing(signing_id).unwrap();
                let group = c.get_group(signing.group_id).unwrap();
                let signature = signing.signature.expect("aggregated signature");
                verify_group_signing_signature(&group.pub_key.unwrap(), &signing.message, &signature).unwrap();
            })
            .unwrap();
    }
}

impl Drop for Network {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
    }
}

fn group_status(c: &Coordinator<MemStore>, group_id: u64) -> Option<GroupStatus> {
    c.get_group(group_id).ok().map(|g| g.status)
}

fn signing_status(c: &Coordinator<MemStore>, signing_id: u64) -> Option<SigningStatus> {
    c.get_signing(signing_id).ok().map(|s| s.status)
}

/// Four agents form a 2-of-4 group and answer a signing request
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_group_activates_and_signs() {
    let net = Network::new(Params::default());
    let members = ["alice", "bob", "carol", "dave"];
    let metrics = Arc::new(MemoryMetrics::new());

    let mut agents = Vec::new();
    for (i, member) in members.iter().enumerate() {
        let config = net.config(member);
        agents.push(if i == 0 {
            net.start_with_metrics(config, metrics.clone()).await
        } else {
            net.start(config).await
        });
    }

    net.create_group(&members, 2).await;
    net.eventually("group active", |c| group_status(c, 1) == Some(GroupStatus::Active))
        .await;

    // Every member holds a share whose public key the chain recorded
    for agent in &agents {
        let record = agent.store().get_group(1).unwrap().expect("group record");
        let on_chain = net
            .chain
            .with_coordinator(|c| c.get_member(1, record.member_id).unwrap())
            .unwrap();
        assert_eq!(on_chain.pub_key, Some(record.private_key.public_point().unwrap()));
        assert!(agent.store().get_dkg(1).unwrap().is_none(), "DKG secrets kept");
    }

    net.wait_for_des(&members).await;
    net.request_signing(1, b"transfer 10").await;
    net.eventually("signing success", |c| signing_status(c, 1) == Some(SigningStatus::Success))
        .await;
    net.assert_signed(1);

    assert!(metrics.counter("agent_requests_committed") > 0);

    for agent in agents {
        agent.shutdown().await;
    }
}

/// A member sending a bad share is exposed and the group falls
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_tampered_share_drops_group() {
    let net = Network::new(Params::default());
    let mut mallory = SimParticipant::new("mallory");
    // Member ids follow the member list, so bob is member 2
    mallory.tamper_share_for = Some(2);

    // Drive the simulated member from committed events
    let mut events = net.relay().subscribe(EventFilter::default()).await.unwrap();
    let chain = net.chain.clone();
    tokio::spawn(async move {
        while let Some(event) = events.next().await {
            let msg = chain.with_coordinator(|c| mallory.handle(c, &event)).unwrap();
            if let Ok(Some(msg)) = msg {
                let _ = chain.submit("mallory", vec![msg], 2.0).await;
            }
        }
    });

    let mut agents = Vec::new();
    for member in ["bob", "carol", "dave"] {
        agents.push(net.start(net.config(member)).await);
    }

    net.create_group(&["mallory", "bob", "carol", "dave"], 2).await;
    net.eventually("group fallen", |c| group_status(c, 1) == Some(GroupStatus::Fallen))
        .await;

    net.chain
        .with_coordinator(|c| {
            let mallory = c.get_member_by_address(1, "mallory").unwrap().unwrap();
            assert!(mallory.is_malicious);
            let bob = c.get_member_by_address(1, "bob").unwrap().unwrap();
            assert!(!bob.is_malicious);
        })
        .unwrap();

    // Local secrets of the dead group are dropped
    let started = tokio::time::Instant::now();
    while agents.iter().any(|a| a.store().get_dkg(1).unwrap().is_some()) {
        assert!(started.elapsed() < DEADLINE, "DKG secrets kept after failure");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    for agent in agents {
        agent.shutdown().await;
    }
}

/// An offline member makes attempts time out; once it restarts it catches
/// up on the pending signing from its store
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_timeout_then_restart_completes_signing() {
    let net = Network::new(Params {
        signing_period: 20,
        max_signing_attempt: 100,
        ..Params::default()
    });
    let alice = net.start(net.config("alice")).await;
    let bob_config = net.config("bob");
    let bob = net.start(bob_config.clone()).await;

    net.create_group(&["alice", "bob"], 2).await;
    net.eventually("group active", |c| group_status(c, 1) == Some(GroupStatus::Active))
        .await;
    net.wait_for_des(&["alice", "bob"]).await;

    bob.shutdown().await;
    net.request_signing(1, b"needs both").await;
    net.eventually("second attempt", |c| {
        c.get_signing(1).map(|s| s.current_attempt >= 2).unwrap_or(false)
    })
    .await;
    assert_eq!(
        net.chain.with_coordinator(|c| signing_status(c, 1)).unwrap(),
        Some(SigningStatus::Waiting)
    );

    let bob = net.start(bob_config).await;
    net.eventually("signing success", |c| signing_status(c, 1) == Some(SigningStatus::Success))
        .await;
    net.assert_signed(1);

    alice.shutdown().await;
    bob.shutdown().await;
}

/// Agents started after a group was requested still run its DKG
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_late_agents_catch_up_on_dkg() {
    let net = Network::new(Params::default());
    net.create_group(&["erin", "frank", "grace"], 2).await;
    net.eventually("group created", |c| group_status(c, 1) == Some(GroupStatus::Round1))
        .await;

    let mut agents = Vec::new();
    for member in ["erin", "frank", "grace"] {
        agents.push(net.start(net.config(member)).await);
    }
    net.eventually("group active", |c| group_status(c, 1) == Some(GroupStatus::Active))
        .await;

    for agent in agents {
        agent.shutdown().await;
    }
}
