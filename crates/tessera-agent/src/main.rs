//! Tessera devnet - one in-process chain and a handful of agents
//!
//! Creates a group across the agents, then requests a signature at a fixed
//! interval once the group is active.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tessera_agent::{Agent, AgentConfig, EventFilter, LocalChain, MessageRelay};
use tessera_coordinator::{Event, GroupStatus, Msg, Originator, Params};

const REQUESTER: &str = "devnet-requester";

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_env("TESSERA_LOG")
                .or_else(|_| tracing_subscriber::EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| "tessera_agent=info,tessera_coordinator=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Tessera devnet v{}", env!("CARGO_PKG_VERSION"));

    let members: usize = env_or("TESSERA_MEMBERS", 4);
    let threshold: u64 = env_or("TESSERA_THRESHOLD", 2);
    let block_ms: u64 = env_or("TESSERA_BLOCK_MS", 500);
    let sign_interval_ms: u64 = env_or("TESSERA_SIGN_INTERVAL_MS", 5_000);
    let data_dir = std::env::var_os("TESSERA_DATA_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|| std::env::temp_dir().join("tessera-devnet"));

    let chain = Arc::new(LocalChain::new(Params::default(), "tessera-devnet")?);
    let relay: Arc<dyn MessageRelay> = chain.clone();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let producer = tokio::spawn(Arc::clone(&chain).run(Duration::from_millis(block_ms), shutdown_rx));

    let mut agents = Vec::with_capacity(members);
    let mut addresses = Vec::with_capacity(members);
    for i in 0..members {
        let address = format!("member-{}", i + 1);
        let mut config = AgentConfig::for_granter(&address, data_dir.join(&address));
        config.poll_interval_ms = block_ms / 2;
        agents.push(Agent::start(config, Arc::clone(&relay), tessera_core::metrics::noop()).await?);
        addresses.push(address);
    }

    let mut outcomes = relay
        .subscribe(EventFilter::kinds(&[
            "round3_complete",
            "round3_failed",
            "signing_success",
            "signing_failed",
        ]))
        .await?;
    tokio::spawn(async move {
        while let Some(event) = outcomes.next().await {
            match event {
                Event::Round3Complete { group_id, pub_key } => {
                    info!(group_id, pub_key = %pub_key.short(), "group active")
                }
                Event::Round3Failed { group_id, malicious } => {
                    warn!(group_id, ?malicious, "group fell")
                }
                Event::SigningSuccess { signing_id, signature, .. } => {
                    info!(signing_id, signature = %signature.to_hex(), "signature aggregated")
                }
                Event::SigningFailed { signing_id, reason, .. } => {
                    warn!(signing_id, %reason, "signing failed")
                }
                _ => {}
            }
        }
    });

    let tx = relay
        .submit(
            "gov",
            vec![Msg::CreateGroup {
                members: addresses,
                threshold,
                module: "devnet".into(),
            }],
            2.0,
        )
        .await?;
    info!(tx_hash = %tx.tx_hash, members, threshold, "group requested");

    let mut ticker = tokio::time::interval(Duration::from_millis(sign_interval_ms));
    let mut counter = 0u64;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received shutdown signal");
                break;
            }
            _ = ticker.tick() => {
                let status = chain.with_coordinator(|c| c.get_group(1).map(|g| g.status))?;
                if !matches!(status, Ok(GroupStatus::Active)) {
                    continue;
                }
                counter += 1;
                let msg = Msg::RequestSigning {
                    group_id: 1,
                    originator: Originator::new("devnet", REQUESTER),
                    content: format!("devnet message {}", counter).into_bytes(),
                };
                match relay.submit(REQUESTER, vec![msg], 2.0).await {
                    Ok(result) if !result.is_ok() => warn!(log = %result.log, "signing request refused"),
                    Ok(_) => {}
                    Err(e) => error!(error = %e, "signing request failed"),
                }
            }
        }
    }

    for agent in agents {
        agent.shutdown().await;
    }
    let _ = shutdown_tx.send(true);
    let _ = producer.await;
    info!("Devnet shut down");
    Ok(())
}
