//! Inbound protocol-message handlers. These are the functions a transport's
//! registered callback invokes once it has decoded a frame off the wire —
//! the decoding itself is the transport/session layer's job, out of scope
//! here; this module is the boundary the core actually owns.

use crate::addrman::AddressManager;
use crate::clock::Clock;
use crate::model::{sanitize_timestamp, AddrSource, PeerEndpoint, TimestampedPeer};
use crate::relay::RelaySender;
use crate::transport::{ConnectionId, OutboundMessage, Transport};

/// Peer reports relayed by another full node are aged down relative to
/// first-hand sightings, so stale second-hand gossip can't out-compete a
/// direct observation.
const FULL_NODE_RELAY_PENALTY_SECS: u64 = 2 * 60 * 60;

/// A freshly-gossiped single peer is only re-forwarded if it was seen
/// within roughly the last ten minutes.
const RELAY_ELIGIBLE_WINDOW_SECS: u64 = 10 * 60;

/// `respond_peers(request, source, is_full_node)`: validates and sanitizes
/// every advertised timestamp, ingests the batch with the appropriate
/// penalty, records every advertised host as already-known to the
/// reporting neighbor (so it isn't relayed straight back to whoever just
/// gossiped it), and — if this was a single freshly-seen peer from a
/// full-node neighbor — enqueues it for a second round of relay
/// (`num_peers = 2`) so one newly learned address keeps propagating beyond
/// the neighbor that reported it.
pub fn respond_peers(
    addrman: &AddressManager,
    relay: &RelaySender,
    clock: &dyn Clock,
    from: ConnectionId,
    source: &PeerEndpoint,
    is_full_node: bool,
    peer_list: Vec<TimestampedPeer>,
) {
    let now = clock.now_unix();
    let sanitized: Vec<TimestampedPeer> = peer_list
        .into_iter()
        .map(|p| TimestampedPeer {
            endpoint: p.endpoint,
            last_seen: sanitize_timestamp(p.last_seen, now),
        })
        .collect();

    for peer in &sanitized {
        relay.mark_known(from, &peer.endpoint.host);
    }

    if is_full_node && sanitized.len() == 1 {
        let single = &sanitized[0];
        if now.saturating_sub(single.last_seen) <= RELAY_ELIGIBLE_WINDOW_SECS {
            relay.relay(single.endpoint.clone(), 2);
        }
    }

    let penalty = if is_full_node { FULL_NODE_RELAY_PENALTY_SECS } else { 0 };
    addrman.add_to_new_table(&sanitized, AddrSource::Peer(source.clone()), penalty);
}

/// `request_peers(peer_info)`: answers only if the requester is among this
/// node's current outbound connections. Inbound-only peers get no reply —
/// otherwise an attacker could fingerprint which addresses this node
/// already knows by opening inbound sessions and asking.
pub fn request_peers(transport: &dyn Transport, addrman: &AddressManager, from: ConnectionId) -> Option<OutboundMessage> {
    if !transport.get_outbound_connections().contains(&from) {
        return None;
    }
    Some(OutboundMessage::RespondPeersFullNode {
        peer_list: addrman.get_peers(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::TestClock;
    use crate::randsource::ThreadRandom;
    use crate::transport::PeerInfo;
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex};

    struct FakeTransport {
        outbound: Mutex<Vec<ConnectionId>>,
    }

    #[async_trait]
    impl Transport for FakeTransport {
        async fn start_client(&self, _endpoint: &PeerEndpoint, _disconnect_after_handshake: bool) -> anyhow::Result<ConnectionId> {
            unreachable!("not used in these tests")
        }
        async fn push_message(&self, _connection: ConnectionId, _message: OutboundMessage) -> anyhow::Result<()> {
            Ok(())
        }
        async fn close(&self, _connection: ConnectionId) {}
        fn get_outbound_connections(&self) -> Vec<ConnectionId> {
            self.outbound.lock().unwrap().clone()
        }
        fn get_full_node_connections(&self) -> Vec<ConnectionId> {
            Vec::new()
        }
        fn get_connections(&self) -> Vec<ConnectionId> {
            self.outbound.lock().unwrap().clone()
        }
        fn get_full_node_peerinfos(&self) -> Vec<PeerInfo> {
            Vec::new()
        }
        fn get_local_peerinfo(&self) -> PeerInfo {
            PeerInfo {
                endpoint: PeerEndpoint::new("127.0.0.1", 8333),
                is_full_node: true,
            }
        }
        fn endpoint_of(&self, _connection: ConnectionId) -> Option<PeerEndpoint> {
            None
        }
    }

    #[test]
    fn request_peers_refuses_inbound_only_connections() {
        let transport = FakeTransport { outbound: Mutex::new(vec![]) };
        let addrman = AddressManager::new(Arc::new(TestClock::new(1_700_000_000)), Arc::new(ThreadRandom));
        let reply = request_peers(&transport, &addrman, ConnectionId(1));
        assert!(reply.is_none());
    }

    #[test]
    fn request_peers_answers_known_outbound_connections() {
        let transport = FakeTransport { outbound: Mutex::new(vec![ConnectionId(7)]) };
        let addrman = AddressManager::new(Arc::new(TestClock::new(1_700_000_000)), Arc::new(ThreadRandom));
        addrman.add_to_new_table(
            &[TimestampedPeer {
                endpoint: PeerEndpoint::new("1.2.3.4", 8333),
                last_seen: 1_699_999_000,
            }],
            AddrSource::Unknown,
            0,
        );
        let reply = request_peers(&transport, &addrman, ConnectionId(7));
        match reply {
            Some(OutboundMessage::RespondPeersFullNode { peer_list }) => assert_eq!(peer_list.len(), 1),
            _ => panic!("expected a reply"),
        }
    }

    #[tokio::test]
    async fn respond_peers_sanitizes_timestamps_and_relays_single_fresh_peer() {
        let clock = Arc::new(TestClock::new(1_700_000_000));
        let addrman = AddressManager::new(clock.clone(), Arc::new(ThreadRandom));
        let (relay_sender, mut relay_receiver) = crate::relay::test_channel();
        let source = PeerEndpoint::new("9.9.9.9", 8333);

        respond_peers(
            &addrman,
            &relay_sender,
            &*clock,
            ConnectionId(1),
            &source,
            true,
            vec![TimestampedPeer {
                endpoint: PeerEndpoint::new("1.2.3.4", 8333),
                last_seen: 1_700_000_000 - 60,
            }],
        );

        assert_eq!(addrman.size(), 1);
        let queued = relay_receiver.recv().await.expect("single fresh peer should be queued for relay");
        assert_eq!(queued.num_peers, 2);
        assert_eq!(queued.peer.host, "1.2.3.4");
    }

    #[tokio::test]
    async fn respond_peers_from_a_non_full_node_is_not_relayed() {
        let clock = Arc::new(TestClock::new(1_700_000_000));
        let addrman = AddressManager::new(clock.clone(), Arc::new(ThreadRandom));
        let (relay_sender, mut relay_receiver) = crate::relay::test_channel();
        let source = PeerEndpoint::new("9.9.9.9", 8333);

        respond_peers(
            &addrman,
            &relay_sender,
            &*clock,
            ConnectionId(1),
            &source,
            false,
            vec![TimestampedPeer {
                endpoint: PeerEndpoint::new("1.2.3.4", 8333),
                last_seen: 1_700_000_000 - 60,
            }],
        );

        assert_eq!(addrman.size(), 1);
        assert!(relay_receiver.try_recv().is_err());
    }
}
