//! One-shot bootstrap. Opens a session to a configured introducer, requests
//! peers, and feeds the response into the inbox as an ordinary gossip
//! ingest. Supplemented with a DNS-seed fallback for when no introducer
//! answers — a freshly bootstrapped node with a stale or unreachable
//! introducer endpoint still needs a path to a non-empty AddrMan.

use std::sync::Arc;
use std::time::Duration;

use tokio::net::lookup_host;
use tracing::{info, warn};
use trust_dns_resolver::config::{ResolverConfig, ResolverOpts};
use trust_dns_resolver::TokioAsyncResolver;

use crate::clock::Clock;
use crate::model::{AddrSource, PeerEndpoint, TimestampedPeer};
use crate::seeds::{dns_seeds, NetworkTag};
use crate::transport::{OutboundMessage, Transport};

pub struct IntroducerClient {
    endpoint: Option<PeerEndpoint>,
    network: NetworkTag,
    transport: Arc<dyn Transport>,
    clock: Arc<dyn Clock>,
}

impl IntroducerClient {
    pub fn new(
        endpoint: Option<PeerEndpoint>,
        network: NetworkTag,
        transport: Arc<dyn Transport>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            endpoint,
            network,
            transport,
            clock,
        }
    }

    /// Fetch a batch of candidate peers: try the configured introducer
    /// first, then fall back to DNS seeds if it is absent or unreachable.
    pub async fn fetch_peers(&self) -> Vec<TimestampedPeer> {
        if let Some(endpoint) = &self.endpoint {
            match self.fetch_from_introducer(endpoint).await {
                Ok(peers) if !peers.is_empty() => return peers,
                Ok(_) => warn!("introducer returned no peers, falling back to DNS seeds"),
                Err(err) => warn!(%err, "introducer fetch failed, falling back to DNS seeds"),
            }
        }
        self.fetch_from_dns_seeds().await
    }

    async fn fetch_from_introducer(&self, endpoint: &PeerEndpoint) -> anyhow::Result<Vec<TimestampedPeer>> {
        let connection = self.transport.start_client(endpoint, true).await?;
        let result = self.transport.push_message(connection, OutboundMessage::RequestPeers).await;
        self.transport.close(connection).await;
        result?;
        // The actual RespondPeersFullNode reply is delivered asynchronously
        // through the transport's registered inbox callback, not returned
        // here; this call only guarantees the request was sent.
        Ok(Vec::new())
    }

    async fn fetch_from_dns_seeds(&self) -> Vec<TimestampedPeer> {
        let now = self.clock.now_unix();
        let resolver = match TokioAsyncResolver::tokio(ResolverConfig::default(), ResolverOpts::default()) {
            Ok(resolver) => resolver,
            Err(err) => {
                warn!(%err, "failed to build DNS resolver");
                return Vec::new();
            }
        };

        let mut peers = Vec::new();
        for host in dns_seeds(self.network) {
            if let Some((h, p)) = host.rsplit_once(':') {
                if let Ok(port) = p.parse::<u16>() {
                    peers.push(TimestampedPeer {
                        endpoint: PeerEndpoint::new(h.to_string(), port),
                        last_seen: now,
                    });
                    continue;
                }
            }
            match tokio::time::timeout(Duration::from_secs(5), resolver.lookup_ip(*host)).await {
                Ok(Ok(lookup)) => {
                    for ip in lookup.iter() {
                        peers.push(TimestampedPeer {
                            endpoint: PeerEndpoint::new(ip.to_string(), 8333),
                            last_seen: now,
                        });
                    }
                }
                Ok(Err(err)) => warn!(seed = %host, %err, "dns seed lookup failed"),
                Err(_) => warn!(seed = %host, "dns seed lookup timed out"),
            }
        }
        info!(count = peers.len(), "resolved peers from dns seeds");
        peers
    }

    /// Resolve an introducer endpoint's host through the OS resolver, used
    /// when the configured introducer is itself given as a hostname.
    pub async fn resolve_host(host: &str, port: u16) -> anyhow::Result<PeerEndpoint> {
        let mut addrs = lookup_host((host, port)).await?;
        let addr = addrs.next().ok_or_else(|| anyhow::anyhow!("no addresses for {host}"))?;
        Ok(PeerEndpoint::new(addr.ip().to_string(), addr.port()))
    }

    pub fn source(&self) -> AddrSource {
        AddrSource::Introducer
    }
}
