use crate::model::{AddrSource, PeerEndpoint};
use serde::{Deserialize, Serialize};

pub const UNREACHABLE_AFTER_SECS: u64 = 30 * 24 * 60 * 60;
pub const MAX_ATTEMPTS_SINCE_SUCCESS: u32 = 3;
pub const STALE_RETRY_WINDOW_SECS: u64 = 60 * 60;
pub const MAX_ATTEMPTS_WHEN_STALE: u32 = 10;
pub const MIN_CHANCE: f64 = 0.01;

/// Where an `AddrInfo` currently sits. Every addrinfo is in exactly one of
/// these states: new XOR tried, with the narrow exception of active
/// collision-list candidates (pending-tried, counted in neither).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Placement {
    /// Present in these new-table bucket indices (at most 8).
    New { buckets: Vec<usize> },
    /// Present at this single tried-table bucket/slot.
    Tried { bucket: usize, slot: usize },
    /// Removed from the new table, awaiting a probe result before it can
    /// take over `target_bucket`/`target_slot` in the tried table.
    PendingTried {
        target_bucket: usize,
        target_slot: usize,
        queued_at: u64,
    },
}

/// The managed record for one known endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddrInfo {
    pub endpoint: PeerEndpoint,
    pub source: AddrSource,
    pub last_try: u64,
    pub last_success: u64,
    pub num_attempts: u32,
    pub last_seen: u64,
    pub placement: Placement,
}

impl AddrInfo {
    pub fn new_in_new(endpoint: PeerEndpoint, source: AddrSource, last_seen: u64, buckets: Vec<usize>) -> Self {
        Self {
            endpoint,
            source,
            last_try: 0,
            last_success: 0,
            num_attempts: 0,
            last_seen,
            placement: Placement::New { buckets },
        }
    }

    pub fn is_in_tried(&self) -> bool {
        matches!(self.placement, Placement::Tried { .. })
    }

    pub fn is_pending(&self) -> bool {
        matches!(self.placement, Placement::PendingTried { .. })
    }

    /// "Terrible": unreachable for >30 days, OR more than 3
    /// failed attempts since the last success, OR stale *and* repeatedly
    /// failing (last try over an hour ago with more than 10 consecutive
    /// failures). An address that has never been attempted is never
    /// terrible — there is nothing yet to judge it on.
    pub fn is_terrible(&self, now: u64) -> bool {
        if self.num_attempts == 0 && self.last_try == 0 {
            return false;
        }
        let reference = if self.last_success != 0 {
            self.last_success
        } else {
            self.last_seen
        };
        let unreachable = now.saturating_sub(reference) > UNREACHABLE_AFTER_SECS;
        let too_many_failures = self.num_attempts > MAX_ATTEMPTS_SINCE_SUCCESS;
        let stale_and_failing = self.last_try != 0
            && now.saturating_sub(self.last_try) > STALE_RETRY_WINDOW_SECS
            && self.num_attempts > MAX_ATTEMPTS_WHEN_STALE;
        unreachable || too_many_failures || stale_and_failing
    }

    /// Selection weight in `(0, 1]`. Decreases with `num_attempts` (a
    /// straight-line penalty, floored rather than allowed to reach zero)
    /// and with staleness of the last success.
    pub fn chance(&self, now: u64) -> f64 {
        let attempt_factor = (1.0 - 0.01 * self.num_attempts as f64).max(MIN_CHANCE);
        let staleness_factor = if self.last_success == 0 {
            1.0
        } else {
            let days = now.saturating_sub(self.last_success) as f64 / 86_400.0;
            (1.0 / (1.0 + days / 7.0)).max(MIN_CHANCE)
        };
        (attempt_factor * staleness_factor).clamp(MIN_CHANCE, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh(endpoint: &str) -> AddrInfo {
        AddrInfo::new_in_new(
            PeerEndpoint::new(endpoint, 8333),
            AddrSource::Unknown,
            1_700_000_000,
            vec![1, 2],
        )
    }

    #[test]
    fn never_attempted_is_never_terrible() {
        let info = fresh("1.2.3.4");
        assert!(!info.is_terrible(1_700_000_000 + 1_000_000_000));
    }

    #[test]
    fn unreachable_for_30_days_is_terrible() {
        let mut info = fresh("1.2.3.4");
        info.last_try = 1_700_000_000;
        info.num_attempts = 1;
        info.last_success = 1_700_000_000;
        let now = 1_700_000_000 + UNREACHABLE_AFTER_SECS + 1;
        assert!(info.is_terrible(now));
    }

    #[test]
    fn chance_never_exceeds_one_or_drops_to_zero() {
        let mut info = fresh("1.2.3.4");
        for attempts in 0..50u32 {
            info.num_attempts = attempts;
            let c = info.chance(2_000_000_000);
            assert!(c > 0.0 && c <= 1.0);
        }
    }
}
