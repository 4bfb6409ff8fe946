//! The candidate-selection loop. Runs as a single cooperative task: each
//! iteration snapshots connected network groups, decides whether to send
//! a feeler, resolves tried-collisions, then tries up to `max_tries`
//! candidates before sleeping and starting over.

use std::collections::HashSet;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::addrman::AddressManager;
use crate::clock::Clock;
use crate::introducer::IntroducerClient;
use crate::model::{AddrSource, NetworkGroup, PeerEndpoint};
use crate::randsource::RandomSource;
use crate::shutdown::Shutdown;
use crate::transport::Transport;

/// Mean interval between feeler connections — a Poisson process keeps
/// feeler timing unpredictable to an observer.
const FEELER_MEAN_INTERVAL_SECS: f64 = 240.0;

const MAX_TRIES_DEFAULT: usize = 50;
const MAX_TRIES_FEW_GROUPS: usize = 10;
const MAX_TRIES_SOME_GROUPS: usize = 25;

const RECENTLY_TRIED_WINDOW_SECS: u64 = 60 * 60;
const RECENTLY_TRIED_RELAXATION_TRIES: usize = 30;

#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    pub target_outbound_count: usize,
    pub peer_connect_interval: Duration,
    pub local_endpoint: PeerEndpoint,
}

pub struct DiscoveryLoop {
    transport: Arc<dyn Transport>,
    addrman: Arc<AddressManager>,
    introducer: Arc<IntroducerClient>,
    clock: Arc<dyn Clock>,
    rand: Arc<dyn RandomSource>,
    config: DiscoveryConfig,
    next_feeler_at: std::sync::atomic::AtomicU64,
}

impl DiscoveryLoop {
    pub fn new(
        transport: Arc<dyn Transport>,
        addrman: Arc<AddressManager>,
        introducer: Arc<IntroducerClient>,
        clock: Arc<dyn Clock>,
        rand: Arc<dyn RandomSource>,
        config: DiscoveryConfig,
    ) -> Self {
        let start = clock.now_unix();
        Self {
            transport,
            addrman,
            introducer,
            clock,
            rand,
            config,
            next_feeler_at: std::sync::atomic::AtomicU64::new(start),
        }
    }

    pub async fn run(&self, shutdown: Arc<Shutdown>) {
        let mut empty_last_iteration = self.addrman.size() == 0;

        while !shutdown.is_closed() {
            if self.addrman.size() == 0 || empty_last_iteration {
                self.bootstrap_from_introducer().await;
                let sleep_for = self.config.peer_connect_interval.min(Duration::from_secs(10));
                shutdown.sleep_or_closed(sleep_for).await;
                empty_last_iteration = self.addrman.size() == 0;
                continue;
            }

            let groups = self.connected_network_groups();
            let is_feeler = self.should_send_feeler();
            self.addrman.resolve_tried_collisions();

            let max_tries = if groups.len() < 3 {
                MAX_TRIES_FEW_GROUPS
            } else if groups.len() <= 5 {
                MAX_TRIES_SOME_GROUPS
            } else {
                MAX_TRIES_DEFAULT
            };

            let mut dialed = false;
            let mut found_any_candidate = false;
            for attempt in 0..max_tries {
                if shutdown.is_closed() {
                    return;
                }
                let backoff = self
                    .config
                    .peer_connect_interval
                    .min(Duration::from_secs(15))
                    .min(Duration::from_secs(1 + 3 * groups.len() as u64));
                shutdown.sleep_or_closed(backoff).await;

                let candidate = self.pick_candidate(is_feeler, &groups, attempt);
                let Some(candidate) = candidate else {
                    continue;
                };
                found_any_candidate = true;

                let disconnect_after_handshake = is_feeler || self.outbound_deficit() == 0;
                self.addrman.attempt(&candidate, true);
                match self.transport.start_client(&candidate, disconnect_after_handshake).await {
                    Ok(_connection) => {
                        info!(%candidate, feeler = is_feeler, "dialed discovery candidate");
                        dialed = true;
                        break;
                    }
                    Err(err) => {
                        warn!(%candidate, %err, "dial failed");
                    }
                }
            }
            empty_last_iteration = !found_any_candidate;
            let _ = dialed;

            let sleep_for = self
                .config
                .peer_connect_interval
                .min(Duration::from_secs(5 + 5 * groups.len() as u64));
            shutdown.sleep_or_closed(sleep_for).await;
        }
    }

    async fn bootstrap_from_introducer(&self) {
        let peers = self.introducer.fetch_peers().await;
        if peers.is_empty() {
            debug!("introducer/dns-seed bootstrap produced no peers this round");
            return;
        }
        let added = self.addrman.add_to_new_table(&peers, AddrSource::Introducer, 0);
        info!(added, "ingested peers from introducer bootstrap");
    }

    fn connected_network_groups(&self) -> HashSet<NetworkGroup> {
        self.transport
            .get_outbound_connections()
            .into_iter()
            .filter_map(|c| self.transport.endpoint_of(c))
            .map(|ep| NetworkGroup::of(&ep))
            .collect()
    }

    fn outbound_deficit(&self) -> usize {
        self.config
            .target_outbound_count
            .saturating_sub(self.transport.count_outbound_connections())
    }

    fn should_send_feeler(&self) -> bool {
        if self.outbound_deficit() != 0 {
            return false;
        }
        let now = self.clock.now_unix();
        let due = self.next_feeler_at.load(Ordering::Relaxed);
        if now < due {
            return false;
        }
        // Poisson process: next = now - ln(U) * mean, U uniform in (0, 1].
        let u = (1.0 - self.rand.uniform()).max(f64::MIN_POSITIVE);
        let delta = (-u.ln() * FEELER_MEAN_INTERVAL_SECS).max(0.0) as u64;
        self.next_feeler_at.store(now + delta, Ordering::Relaxed);
        true
    }

    fn pick_candidate(
        &self,
        is_feeler: bool,
        groups: &HashSet<NetworkGroup>,
        tries_so_far: usize,
    ) -> Option<PeerEndpoint> {
        if let Some(collision_candidate) = self.addrman.select_tried_collision() {
            return Some(collision_candidate);
        }

        let candidate = self.addrman.select_peer(is_feeler)?;
        if self.reject_candidate(&candidate, is_feeler, groups, tries_so_far) {
            return None;
        }
        Some(candidate)
    }

    fn reject_candidate(
        &self,
        candidate: &PeerEndpoint,
        is_feeler: bool,
        groups: &HashSet<NetworkGroup>,
        tries_so_far: usize,
    ) -> bool {
        if candidate == &self.config.local_endpoint {
            return true;
        }
        if !is_feeler && groups.contains(&NetworkGroup::of(candidate)) {
            return true;
        }
        let already_connected = self
            .transport
            .get_connections()
            .into_iter()
            .filter_map(|c| self.transport.endpoint_of(c))
            .any(|ep| &ep == candidate);
        if already_connected {
            return true;
        }
        if self.recently_tried(candidate) && tries_so_far < RECENTLY_TRIED_RELAXATION_TRIES {
            return true;
        }
        false
    }

    fn recently_tried(&self, candidate: &PeerEndpoint) -> bool {
        let snapshot = self.addrman.snapshot();
        let now = self.clock.now_unix();
        snapshot
            .entries
            .iter()
            .find(|info| &info.endpoint == candidate)
            .map(|info| info.last_try != 0 && now.saturating_sub(info.last_try) < RECENTLY_TRIED_WINDOW_SECS)
            .unwrap_or(false)
    }
}
