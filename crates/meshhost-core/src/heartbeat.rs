//! Heartbeat Monitor
//!
//! Pure bookkeeping of per-peer last-seen timestamps. The monitor owns no
//! timers; the coordinator schedules periodic checks and queries it.

use std::collections::{BTreeSet, HashMap};
use core::time::Duration;

use crate::types::{PeerId, Timestamp};

/// How to treat a peer that has never been heard from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NeverSeen {
    /// Treat as overdue immediately
    Overdue,
    /// Never overdue until a first heartbeat arrives
    NotOverdue,
    /// Overdue once `timeout` has elapsed since the given instant
    GraceSince(Timestamp),
}

/// Last-seen records for every peer heard from
#[derive(Debug, Default, Clone)]
pub struct HeartbeatMonitor {
    last_seen: HashMap<PeerId, Timestamp>,
}

impl HeartbeatMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Upsert the last-seen time of `peer`
    ///
    /// A record never moves backwards, so late-delivered messages cannot make
    /// a peer look older than it is.
    pub fn record_heartbeat(&mut self, peer: &PeerId, at: Timestamp) {
        match self.last_seen.get_mut(peer) {
            Some(seen) => {
                if at > *seen {
                    *seen = at;
                }
            }
            None => {
                self.last_seen.insert(peer.clone(), at);
            }
        }
    }

    pub fn last_seen(&self, peer: &PeerId) -> Option<Timestamp> {
        self.last_seen.get(peer).copied()
    }

    /// Whether `peer` has been silent for longer than `timeout`
    pub fn check_timeout(
        &self,
        peer: &PeerId,
        timeout: Duration,
        now: Timestamp,
        never_seen: NeverSeen,
    ) -> bool {
        let timeout_ms = timeout.as_millis() as u64;
        match self.last_seen.get(peer) {
            Some(seen) => now - *seen > timeout_ms,
            None => match never_seen {
                NeverSeen::Overdue => true,
                NeverSeen::NotOverdue => false,
                NeverSeen::GraceSince(since) => now - since > timeout_ms,
            },
        }
    }

    /// Every peer ever heard from
    pub fn known_peers(&self) -> BTreeSet<PeerId> {
        self.last_seen.keys().cloned().collect()
    }

    /// Peers heard from within `timeout`
    pub fn live_peers(&self, timeout: Duration, now: Timestamp) -> BTreeSet<PeerId> {
        self.last_seen
            .keys()
            .filter(|peer| !self.check_timeout(peer, timeout, now, NeverSeen::NotOverdue))
            .cloned()
            .collect()
    }

    /// Peers heard from before, but not within `timeout`
    pub fn stale_peers(&self, timeout: Duration, now: Timestamp) -> BTreeSet<PeerId> {
        self.last_seen
            .keys()
            .filter(|peer| self.check_timeout(peer, timeout, now, NeverSeen::NotOverdue))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.last_seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last_seen.is_empty()
    }

    /// Forget every record (session teardown)
    pub fn clear(&mut self) {
        self.last_seen.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TIMEOUT: Duration = Duration::from_secs(15);

    #[test]
    fn test_timeout_boundary_is_strict() {
        let mut monitor = HeartbeatMonitor::new();
        let host = PeerId::new("A");
        monitor.record_heartbeat(&host, Timestamp::new(1_000));

        assert!(!monitor.check_timeout(&host, TIMEOUT, Timestamp::new(16_000), NeverSeen::Overdue));
        assert!(monitor.check_timeout(&host, TIMEOUT, Timestamp::new(16_001), NeverSeen::Overdue));
    }

    #[test]
    fn test_never_seen_policies() {
        let monitor = HeartbeatMonitor::new();
        let ghost = PeerId::new("ghost");
        let now = Timestamp::new(20_000);

        assert!(monitor.check_timeout(&ghost, TIMEOUT, now, NeverSeen::Overdue));
        assert!(!monitor.check_timeout(&ghost, TIMEOUT, now, NeverSeen::NotOverdue));
        assert!(!monitor.check_timeout(
            &ghost,
            TIMEOUT,
            now,
            NeverSeen::GraceSince(Timestamp::new(10_000))
        ));
        assert!(monitor.check_timeout(
            &ghost,
            TIMEOUT,
            now,
            NeverSeen::GraceSince(Timestamp::new(4_000))
        ));
    }

    #[test]
    fn test_records_never_move_backwards() {
        let mut monitor = HeartbeatMonitor::new();
        let peer = PeerId::new("B");
        monitor.record_heartbeat(&peer, Timestamp::new(5_000));
        monitor.record_heartbeat(&peer, Timestamp::new(3_000));
        assert_eq!(monitor.last_seen(&peer), Some(Timestamp::new(5_000)));

        monitor.record_heartbeat(&peer, Timestamp::new(9_000));
        assert_eq!(monitor.last_seen(&peer), Some(Timestamp::new(9_000)));
        assert_eq!(monitor.len(), 1);
    }

    #[test]
    fn test_live_and_stale_partition() {
        let mut monitor = HeartbeatMonitor::new();
        monitor.record_heartbeat(&PeerId::new("A"), Timestamp::new(0));
        monitor.record_heartbeat(&PeerId::new("B"), Timestamp::new(10_000));
        monitor.record_heartbeat(&PeerId::new("C"), Timestamp::new(12_000));

        let now = Timestamp::new(20_000);
        let live = monitor.live_peers(TIMEOUT, now);
        let stale = monitor.stale_peers(TIMEOUT, now);

        assert_eq!(live, [PeerId::new("B"), PeerId::new("C")].into_iter().collect());
        assert_eq!(stale, [PeerId::new("A")].into_iter().collect());

        // Stale peers keep their record
        assert_eq!(monitor.known_peers().len(), 3);

        monitor.clear();
        assert!(monitor.is_empty());
    }
}
