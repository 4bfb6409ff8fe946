//! Single-consumer event queue feeding AddrMan updates. `make_tried` /
//! `mark_attempted` / `update_connection_time` and friends are exposed here
//! as queued events rather than direct calls. Keeping ingestion on one
//! consumer task is what lets [`crate::addrman::AddressManager`] serialize
//! through its single `RwLock` without every caller needing to reason about
//! interleaving.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::debug;

use crate::addrman::AddressManager;
use crate::clock::Clock;
use crate::model::{AddrSource, PeerEndpoint, TimestampedPeer};
use crate::relay::RelaySender;

/// Hosts are only allowed to push a connection-time update this often, so a
/// chatty or misbehaving peer cannot force repeated writes.
const CONNECTION_TIME_RATE_LIMIT_SECS: u64 = 60;

#[derive(Debug, Clone)]
pub enum AddrManEvent {
    MakeTried {
        endpoint: PeerEndpoint,
    },
    MarkAttempted {
        endpoint: PeerEndpoint,
    },
    MarkAttemptedSoft {
        endpoint: PeerEndpoint,
    },
    UpdateConnectionTime {
        endpoint: PeerEndpoint,
    },
    NewInboundConnection {
        endpoint: PeerEndpoint,
    },
}

pub struct MessageInbox {
    sender: mpsc::UnboundedSender<AddrManEvent>,
    receiver: mpsc::UnboundedReceiver<AddrManEvent>,
}

impl MessageInbox {
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self { sender, receiver }
    }

    pub fn handle(&self) -> AddrManEventSender {
        AddrManEventSender {
            sender: self.sender.clone(),
        }
    }

    /// Drain the queue into `addrman` until the channel is closed. Runs as
    /// its own task; every other task reaches the address manager only
    /// through an [`AddrManEventSender`]. Events are applied strictly in
    /// submission order, so no AddrMan operation can interleave with another.
    pub async fn run(self, addrman: Arc<AddressManager>, clock: Arc<dyn Clock>, relay: RelaySender) {
        let MessageInbox { sender, mut receiver } = self;
        // Drop our own sender so the channel closes once every handle does.
        drop(sender);
        let mut last_connection_update: HashMap<PeerEndpoint, u64> = HashMap::new();

        while let Some(event) = receiver.recv().await {
            match event {
                AddrManEvent::MakeTried { endpoint } => {
                    debug!(%endpoint, "marking address good");
                    addrman.mark_good(&endpoint, true);
                    addrman.connect(&endpoint);
                }
                AddrManEvent::MarkAttempted { endpoint } => {
                    addrman.attempt(&endpoint, true);
                }
                AddrManEvent::MarkAttemptedSoft { endpoint } => {
                    addrman.attempt(&endpoint, false);
                }
                AddrManEvent::UpdateConnectionTime { endpoint } => {
                    let now = clock.now_unix();
                    let due = last_connection_update
                        .get(&endpoint)
                        .map(|last| now.saturating_sub(*last) >= CONNECTION_TIME_RATE_LIMIT_SECS)
                        .unwrap_or(true);
                    if due {
                        addrman.connect(&endpoint);
                        last_connection_update.insert(endpoint, now);
                    }
                }
                AddrManEvent::NewInboundConnection { endpoint } => {
                    let now = clock.now_unix();
                    addrman.add_to_new_table(
                        &[TimestampedPeer {
                            endpoint: endpoint.clone(),
                            last_seen: now,
                        }],
                        AddrSource::Peer(endpoint.clone()),
                        0,
                    );
                    addrman.mark_good(&endpoint, true);
                    relay.relay(endpoint, 1);
                }
            }
        }
    }
}

impl Default for MessageInbox {
    fn default() -> Self {
        Self::new()
    }
}

/// Cloneable handle used by every other task to enqueue events without
/// touching the address manager directly.
#[derive(Clone)]
pub struct AddrManEventSender {
    sender: mpsc::UnboundedSender<AddrManEvent>,
}

impl AddrManEventSender {
    pub fn send(&self, event: AddrManEvent) {
        // The only way this fails is if MessageInbox::run has already
        // returned, which only happens during shutdown.
        let _ = self.sender.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::TestClock;
    use crate::randsource::ThreadRandom;

    #[tokio::test]
    async fn connection_time_updates_are_rate_limited() {
        let clock = Arc::new(TestClock::new(1_700_000_000));
        let addrman = Arc::new(AddressManager::new(clock.clone(), Arc::new(ThreadRandom)));
        let inbox = MessageInbox::new();
        let handle = inbox.handle();
        let run_clock = clock.clone();
        let run_addrman = addrman.clone();
        let (relay_sender, _relay_receiver) = crate::relay::test_channel();
        let task = tokio::spawn(inbox.run(run_addrman, run_clock, relay_sender));

        let endpoint = PeerEndpoint::new("1.2.3.4", 8333);
        handle.send(AddrManEvent::UpdateConnectionTime {
            endpoint: endpoint.clone(),
        });
        // Give the consumer task a chance to process before we drop the sender.
        tokio::task::yield_now().await;
        drop(handle);
        let _ = task.await;
    }
}
