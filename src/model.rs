use serde::{Deserialize, Serialize};
use std::net::IpAddr;

/// A candidate peer's network location. Equality is structural — the same
/// host and port is the same endpoint regardless of how it was learned.
///
/// `host` is a string rather than `IpAddr` because sources may advertise
/// hostnames (onion-style or DNS-seed style addresses); callers that need a
/// resolved `IpAddr` for bucket-grouping purposes fall back to treating an
/// unparseable host as its own singleton group (see [`NetworkGroup::of`]).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeerEndpoint {
    pub host: String,
    pub port: u16,
}

impl PeerEndpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// A stable byte key used as hash input, distinct from the `Display`
    /// form so that port changes to the same host still hash differently.
    pub fn hash_key(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.host.len() + 2);
        buf.extend_from_slice(self.host.as_bytes());
        buf.extend_from_slice(&self.port.to_be_bytes());
        buf
    }
}

impl std::fmt::Display for PeerEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Diversity group derived from an endpoint: /16 for IPv4, /32 for IPv6,
/// and the full host string for anything that doesn't parse as an IP (so
/// hostnames each form their own singleton group rather than colliding).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NetworkGroup {
    Ipv4Slash16([u8; 2]),
    Ipv6Slash32([u8; 4]),
    Opaque(String),
}

impl NetworkGroup {
    pub fn of(endpoint: &PeerEndpoint) -> Self {
        match endpoint.host.parse::<IpAddr>() {
            Ok(IpAddr::V4(v4)) => {
                let o = v4.octets();
                NetworkGroup::Ipv4Slash16([o[0], o[1]])
            }
            Ok(IpAddr::V6(v6)) => {
                let s = v6.segments();
                NetworkGroup::Ipv6Slash32([
                    (s[0] >> 8) as u8,
                    s[0] as u8,
                    (s[1] >> 8) as u8,
                    s[1] as u8,
                ])
            }
            Err(_) => NetworkGroup::Opaque(endpoint.host.clone()),
        }
    }

    pub fn hash_key(&self) -> Vec<u8> {
        match self {
            NetworkGroup::Ipv4Slash16(b) => {
                let mut v = vec![4u8];
                v.extend_from_slice(b);
                v
            }
            NetworkGroup::Ipv6Slash32(b) => {
                let mut v = vec![6u8];
                v.extend_from_slice(b);
                v
            }
            NetworkGroup::Opaque(s) => {
                let mut v = vec![0u8];
                v.extend_from_slice(s.as_bytes());
                v
            }
        }
    }
}

/// Where an `AddrInfo` was learned from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AddrSource {
    SelfAdvertised,
    Introducer,
    Peer(PeerEndpoint),
    Unknown,
}

impl AddrSource {
    pub fn hash_key(&self) -> Vec<u8> {
        match self {
            AddrSource::SelfAdvertised => vec![1u8],
            AddrSource::Introducer => vec![2u8],
            AddrSource::Peer(ep) => {
                let mut v = vec![3u8];
                v.extend_from_slice(&ep.hash_key());
                v
            }
            AddrSource::Unknown => vec![0u8],
        }
    }
}

/// A peer endpoint plus the time it was last seen/advertised, as carried on
/// the wire in gossip messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimestampedPeer {
    pub endpoint: PeerEndpoint,
    pub last_seen: u64,
}

/// Lower and upper bounds on a valid advertised timestamp: anything outside
/// `[MIN_VALID_TIMESTAMP, now + MAX_FUTURE_SKEW]` is replaced with
/// `now - STALE_FALLBACK_AGE`.
pub const MIN_VALID_TIMESTAMP: u64 = 100_000_000;
pub const MAX_FUTURE_SKEW_SECS: u64 = 600;
pub const STALE_FALLBACK_AGE_SECS: u64 = 5 * 24 * 60 * 60;

/// Replace an out-of-range advertised timestamp with a conservative stale
/// value rather than trusting it outright.
pub fn sanitize_timestamp(timestamp: u64, now: u64) -> u64 {
    if timestamp <= MIN_VALID_TIMESTAMP || timestamp > now + MAX_FUTURE_SKEW_SECS {
        now.saturating_sub(STALE_FALLBACK_AGE_SECS)
    } else {
        timestamp
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn network_group_ipv4_is_slash16() {
        let a = PeerEndpoint::new("1.2.3.4", 8333);
        let b = PeerEndpoint::new("1.2.200.200", 8333);
        let c = PeerEndpoint::new("1.3.3.4", 8333);
        assert_eq!(NetworkGroup::of(&a), NetworkGroup::of(&b));
        assert_ne!(NetworkGroup::of(&a), NetworkGroup::of(&c));
    }

    #[test]
    fn timestamp_exactly_at_boundaries_is_invalid() {
        let now = 2_000_000_000u64;
        // Exactly 10^8 is invalid -> sanitized.
        assert_eq!(
            sanitize_timestamp(100_000_000, now),
            now - STALE_FALLBACK_AGE_SECS
        );
        // now + 600 is valid.
        assert_eq!(sanitize_timestamp(now + 600, now), now + 600);
        // now + 601 is invalid.
        assert_eq!(
            sanitize_timestamp(now + 601, now),
            now - STALE_FALLBACK_AGE_SECS
        );
    }
}
