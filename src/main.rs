use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

mod addrman;
mod clock;
mod config;
mod discovery;
mod error;
mod handlers;
mod hashing;
mod inbox;
mod introducer;
mod model;
mod randsource;
mod relay;
mod seeds;
mod shutdown;
mod store;
mod transport;

use addrman::AddressManager;
use clock::SystemClock;
use config::{Args, NodeConfig};
use discovery::{DiscoveryConfig, DiscoveryLoop};
use inbox::MessageInbox;
use introducer::IntroducerClient;
use model::PeerEndpoint;
use randsource::ThreadRandom;
use relay::RelayLoop;
use shutdown::Shutdown;
use store::AddressStore;
use transport::{Transport, TcpTransport};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = NodeConfig::load(&args)?;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(args.log_level.as_filter()))
        .init();

    info!(listen = %config.listen, "starting addrman-node");

    let clock = Arc::new(SystemClock);
    let rand = Arc::new(ThreadRandom);

    let store = AddressStore::new(config.snapshot_path());
    let addrman = match store.load() {
        Ok(Some(snapshot)) => {
            let restored = AddressManager::from_snapshot(snapshot, clock.clone(), rand.clone());
            match restored.check_invariants() {
                Ok(()) => {
                    info!("restored addrman from snapshot");
                    Arc::new(restored)
                }
                Err(err) => {
                    error!(%err, "restored snapshot violates placement invariants, starting with an empty addrman");
                    Arc::new(AddressManager::new(clock.clone(), rand.clone()))
                }
            }
        }
        Ok(None) => Arc::new(AddressManager::new(clock.clone(), rand.clone())),
        Err(err) => {
            error!(%err, "snapshot is corrupt, starting with an empty addrman");
            Arc::new(AddressManager::new(clock.clone(), rand.clone()))
        }
    };

    let local_endpoint = PeerEndpoint::new(config.listen.ip().to_string(), config.listen.port());
    let tcp_transport = TcpTransport::new(local_endpoint.clone());
    let transport: Arc<dyn Transport> = tcp_transport.clone();

    let introducer = Arc::new(IntroducerClient::new(
        config.introducer.clone(),
        config.network.into(),
        transport.clone(),
        clock.clone(),
    ));

    let relay_loop = Arc::new(RelayLoop::new(transport.clone(), addrman.clone(), clock.clone()));
    let inbox = MessageInbox::new();
    let inbox_handle = inbox.handle();

    // Registers this core's address manager and relay handle as the
    // transport's inbound-message callback target.
    tcp_transport.set_core(addrman.clone(), relay_loop.handle(), clock.clone());

    let discovery = Arc::new(DiscoveryLoop::new(
        transport.clone(),
        addrman.clone(),
        introducer,
        clock.clone(),
        rand.clone(),
        DiscoveryConfig {
            target_outbound_count: config.target_outbound_count,
            peer_connect_interval: std::time::Duration::from_secs(config.peer_connect_interval_secs),
            local_endpoint,
        },
    ));

    let shutdown = Arc::new(Shutdown::new());

    let inbox_task = {
        let relay_sender = relay_loop.handle();
        tokio::spawn(inbox.run(addrman.clone(), clock.clone(), relay_sender))
    };

    let discovery_task = {
        let discovery = discovery.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move { discovery.run(shutdown).await })
    };

    let relay_task = {
        let relay_loop = relay_loop.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move { relay_loop.run(shutdown).await })
    };

    let self_advertise_task = {
        let relay_loop = relay_loop.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move { relay_loop.run_self_advertise(shutdown).await })
    };

    // In-flight dials are owned by the transport, not awaited here — the
    // accept loop is simply aborted on shutdown.
    let accept_task = {
        let tcp_transport = tcp_transport.clone();
        let listener = TcpListener::bind(config.listen).await?;
        tokio::spawn(async move { tcp_transport.serve(listener).await })
    };

    let snapshot_task = {
        let addrman = addrman.clone();
        let shutdown = shutdown.clone();
        let rand = rand.clone();
        tokio::spawn(async move {
            loop {
                let interval_secs = rand.range(15 * 60, 30 * 60 + 1) as u64;
                let ran_fully = shutdown.sleep_or_closed(std::time::Duration::from_secs(interval_secs)).await;
                let snapshot = addrman.snapshot();
                if let Err(err) = store.save(&snapshot) {
                    error!(%err, "failed to save addrman snapshot");
                }
                if !ran_fully && shutdown.is_closed() {
                    return;
                }
            }
        })
    };

    tokio::signal::ctrl_c().await?;
    info!("shutdown requested");
    shutdown.close();

    drop(inbox_handle);
    let _ = discovery_task.await;
    let _ = relay_task.await;
    let _ = self_advertise_task.await;
    accept_task.abort();
    let _ = snapshot_task.await;
    let _ = inbox_task.await;

    Ok(())
}
