//! Coordinator State
//!
//! Everything the coordinator task owns besides its channels and timers:
//! the election state machine, heartbeat records and statistics.

use core::time::Duration;
use std::collections::BTreeSet;

use meshhost_core::{
    CoordinatorEvent, ElectionEffect, HeartbeatMonitor, HostElection, NeverSeen, PeerId, PeerView,
    SessionId, Timestamp,
};

// ----------------------------------------------------------------------------
// Timer Actions
// ----------------------------------------------------------------------------

pub(crate) const CONFIRM_TIMER: &str = "election.confirm";
pub(crate) const RESTART_TIMER: &str = "election.restart";
pub(crate) const HOST_HEARTBEAT_TIMER: &str = "heartbeat.host";
pub(crate) const PEER_HEARTBEAT_TIMER: &str = "heartbeat.peer";
pub(crate) const TIMEOUT_CHECK_TIMER: &str = "heartbeat.check";

const APP_TIMER_PREFIX: &str = "app:";

/// Registry id of an application timer, kept apart from coordinator timers
pub(crate) fn app_timer_id(id: &str) -> String {
    format!("{APP_TIMER_PREFIX}{id}")
}

pub(crate) fn is_app_timer(registry_id: &str) -> bool {
    registry_id.starts_with(APP_TIMER_PREFIX)
}

/// What the coordinator does when one of its timers fires
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimerAction {
    ConfirmElection { round: u64 },
    HostHeartbeat,
    PeerHeartbeat,
    CheckHostTimeout,
    QuickRestart,
    App(String),
}

// ----------------------------------------------------------------------------
// Statistics
// ----------------------------------------------------------------------------

/// Counters for diagnostics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CoordinatorStats {
    pub elections_started: u64,
    pub host_changes: u64,
    pub host_timeouts: u64,
    pub broadcasts_sent: u64,
    pub broadcasts_exhausted: u64,
    pub game_messages_received: u64,
    pub malformed_frames: u64,
}

// ----------------------------------------------------------------------------
// Coordinator State
// ----------------------------------------------------------------------------

/// State owned by the coordinator task
#[derive(Debug)]
pub struct CoordinatorState {
    pub peer_id: PeerId,
    pub session_id: SessionId,
    pub election: HostElection,
    /// Last traffic of any kind per peer; decides who may stand
    pub monitor: HeartbeatMonitor,
    /// Last host claim per peer; decides whether the host is alive
    pub host_beats: HeartbeatMonitor,
    /// When the current host was assigned; grace period for a never-heard host
    pub host_since: Option<Timestamp>,
    pub stats: CoordinatorStats,
}

impl CoordinatorState {
    pub fn new(peer_id: PeerId, session_id: SessionId, stand_for_host: bool) -> Self {
        Self {
            election: HostElection::with_candidacy(peer_id.clone(), stand_for_host),
            peer_id,
            session_id,
            monitor: HeartbeatMonitor::new(),
            host_beats: HeartbeatMonitor::new(),
            host_since: None,
            stats: CoordinatorStats::default(),
        }
    }

    /// Candidates and host liveness as seen right now
    ///
    /// Candidates are connected or recently heard peers, minus those whose
    /// heartbeats went stale.
    pub fn peer_view(
        &self,
        connected: &BTreeSet<PeerId>,
        now: Timestamp,
        timeout: Duration,
    ) -> PeerView {
        let stale = self.monitor.stale_peers(timeout, now);
        let live = self.monitor.live_peers(timeout, now);
        let candidates = connected
            .iter()
            .chain(live.iter())
            .filter(|peer| **peer != self.peer_id && !stale.contains(*peer))
            .cloned();
        PeerView::new(candidates, self.host_live(now, timeout))
    }

    pub fn host_live(&self, now: Timestamp, timeout: Duration) -> bool {
        match self.election.current_host() {
            None => false,
            Some(host) if *host == self.peer_id => true,
            Some(host) => !self.host_beats.check_timeout(host, timeout, now, self.grace(now)),
        }
    }

    /// The remote host, if it has been silent for longer than `timeout`
    pub fn timed_out_host(&self, now: Timestamp, timeout: Duration) -> Option<PeerId> {
        match self.election.current_host() {
            Some(host) if *host != self.peer_id => self
                .host_beats
                .check_timeout(host, timeout, now, self.grace(now))
                .then(|| host.clone()),
            _ => None,
        }
    }

    /// Bookkeeping for an event about to be published
    pub fn record_event(&mut self, event: &CoordinatorEvent, now: Timestamp) {
        match event {
            CoordinatorEvent::ElectionStarted { .. } => self.stats.elections_started += 1,
            CoordinatorEvent::HostChanged { host, .. } => {
                self.stats.host_changes += 1;
                self.host_since = host.as_ref().map(|_| now);
            }
            CoordinatorEvent::HostTimeoutDetected { .. } => self.stats.host_timeouts += 1,
            CoordinatorEvent::BroadcastExhausted { .. } => self.stats.broadcasts_exhausted += 1,
            CoordinatorEvent::GameMessageReceived { .. } => self.stats.game_messages_received += 1,
            _ => {}
        }
    }

    /// Back to idle with no host and no heartbeat records
    pub fn teardown(&mut self) -> Vec<ElectionEffect> {
        let effects = self.election.reset();
        self.monitor.clear();
        self.host_beats.clear();
        self.host_since = None;
        effects
    }

    fn grace(&self, now: Timestamp) -> NeverSeen {
        NeverSeen::GraceSince(self.host_since.unwrap_or(now))
    }
}
