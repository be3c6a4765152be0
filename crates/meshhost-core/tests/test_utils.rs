//! Test utilities for deterministic election tests
//!
//! A mock clock plus a small discrete-time mesh that drives several pure
//! [`HostElection`] state machines, delivering their announcements to each
//! other and emulating the runtime's heartbeat and timeout timers at
//! one-second resolution.

use meshhost_core::election::{ElectionEffect, HostElection, PeerView};
use meshhost_core::heartbeat::{HeartbeatMonitor, NeverSeen};
use meshhost_core::protocol::{CoordinationKind, CoordinationMessage};
use meshhost_core::types::{PeerId, TimeSource, Timestamp};
use meshhost_core::CoordinatorEvent;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub const HOST_TIMEOUT: Duration = Duration::from_secs(15);
const CONFIRMATION_DELAY_MS: u64 = 2_000;
const HOST_HEARTBEAT_SECS: u64 = 5;
const PEER_HEARTBEAT_SECS: u64 = 10;

// ----------------------------------------------------------------------------
// Mock Time Source
// ----------------------------------------------------------------------------

/// Manually advanced clock
#[derive(Debug, Clone, Default)]
pub struct MockTimeSource {
    current_time: Arc<AtomicU64>,
}

impl MockTimeSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, millis: u64) {
        self.current_time.fetch_add(millis, Ordering::SeqCst);
    }
}

impl TimeSource for MockTimeSource {
    fn now(&self) -> Timestamp {
        Timestamp::new(self.current_time.load(Ordering::SeqCst))
    }
}

// ----------------------------------------------------------------------------
// Simulated Mesh
// ----------------------------------------------------------------------------

/// Fully connected peers running pure election state machines
pub struct SimulatedMesh {
    pub clock: MockTimeSource,
    peers: BTreeMap<PeerId, HostElection>,
    /// Any traffic, for candidate liveness
    monitors: BTreeMap<PeerId, HeartbeatMonitor>,
    /// Host claims only, for host liveness
    host_monitors: BTreeMap<PeerId, HeartbeatMonitor>,
    events: BTreeMap<PeerId, Vec<(Timestamp, CoordinatorEvent)>>,
    heartbeating: BTreeSet<PeerId>,
    silenced: BTreeSet<PeerId>,
    confirmations: Vec<(Timestamp, PeerId, u64)>,
    outbox: VecDeque<(PeerId, CoordinationMessage)>,
    elapsed_secs: u64,
}

#[allow(dead_code)]
impl SimulatedMesh {
    pub fn new(ids: &[&str]) -> Self {
        let ids: Vec<PeerId> = ids.iter().map(|id| PeerId::new(*id)).collect();
        Self {
            clock: MockTimeSource::new(),
            peers: ids
                .iter()
                .map(|id| (id.clone(), HostElection::new(id.clone())))
                .collect(),
            monitors: ids
                .iter()
                .map(|id| (id.clone(), HeartbeatMonitor::new()))
                .collect(),
            host_monitors: ids
                .iter()
                .map(|id| (id.clone(), HeartbeatMonitor::new()))
                .collect(),
            events: ids.iter().map(|id| (id.clone(), Vec::new())).collect(),
            heartbeating: BTreeSet::new(),
            silenced: BTreeSet::new(),
            confirmations: Vec::new(),
            outbox: VecDeque::new(),
            elapsed_secs: 0,
        }
    }

    pub fn election(&self, id: &str) -> &HostElection {
        &self.peers[&PeerId::new(id)]
    }

    pub fn events(&self, id: &str) -> Vec<CoordinatorEvent> {
        self.events[&PeerId::new(id)]
            .iter()
            .map(|(_, event)| event.clone())
            .collect()
    }

    pub fn timeout_events(&self, id: &str) -> Vec<(Timestamp, PeerId)> {
        self.events[&PeerId::new(id)]
            .iter()
            .filter_map(|(at, event)| match event {
                CoordinatorEvent::HostTimeoutDetected { host } => Some((*at, host.clone())),
                _ => None,
            })
            .collect()
    }

    /// Hosts believed by every peer that is not silenced
    pub fn hosts_seen_by_live_peers(&self) -> BTreeSet<Option<PeerId>> {
        self.peers
            .iter()
            .filter(|(id, _)| !self.silenced.contains(*id))
            .map(|(_, election)| election.current_host().cloned())
            .collect()
    }

    /// Drop everything `id` sends from now on, without disconnecting it
    pub fn silence(&mut self, id: &str) {
        self.silenced.insert(PeerId::new(id));
    }

    pub fn unsilence(&mut self, id: &str) {
        self.silenced.remove(&PeerId::new(id));
    }

    /// What `peer` can see: every other peer not known to be stale
    pub fn view_for(&self, peer: &PeerId) -> PeerView {
        let now = self.clock.now();
        let monitor = &self.monitors[peer];
        let host_monitor = &self.host_monitors[peer];
        let candidates = self
            .peers
            .keys()
            .filter(|other| *other != peer)
            .filter(|other| !monitor.check_timeout(other, HOST_TIMEOUT, now, NeverSeen::NotOverdue))
            .cloned();
        let host_live = match self.peers[peer].current_host() {
            Some(host) if host == peer => true,
            Some(host) => {
                !host_monitor.check_timeout(host, HOST_TIMEOUT, now, NeverSeen::NotOverdue)
            }
            None => false,
        };
        PeerView::new(candidates, host_live)
    }

    /// Administrative host override on `id`
    pub fn migrate(&mut self, id: &str, to: &str) {
        let peer = PeerId::new(id);
        let effects = match self.peers.get_mut(&peer) {
            Some(election) => election.migrate_host(PeerId::new(to)),
            None => return,
        };
        self.apply(&peer, effects);
        self.deliver_all();
    }

    /// Start an election on `id` and deliver everything that follows
    pub fn start(&mut self, id: &str) {
        let peer = PeerId::new(id);
        let view = self.view_for(&peer);
        let effects = match self.peers.get_mut(&peer) {
            Some(election) => election.start_election(view.candidates),
            None => return,
        };
        if let Ok(effects) = effects {
            self.apply(&peer, effects);
        }
        self.deliver_all();
    }

    /// Advance simulated time one second at a time
    pub fn run_for(&mut self, secs: u64) {
        for _ in 0..secs {
            self.clock.advance(1_000);
            self.elapsed_secs += 1;
            self.fire_confirmations();
            self.emit_heartbeats();
            self.deliver_all();
            self.check_timeouts();
        }
    }

    fn apply(&mut self, peer: &PeerId, effects: Vec<ElectionEffect>) {
        let now = self.clock.now();
        for effect in effects {
            match effect {
                ElectionEffect::StartHostHeartbeat => {
                    self.heartbeating.insert(peer.clone());
                }
                ElectionEffect::StopHostHeartbeat => {
                    self.heartbeating.remove(peer);
                }
                ElectionEffect::ScheduleConfirmation { round } => {
                    self.confirmations
                        .push((now + CONFIRMATION_DELAY_MS, peer.clone(), round));
                }
                ElectionEffect::ScheduleRestart => {}
                ElectionEffect::Announce(message) => {
                    self.outbox.push_back((peer.clone(), message));
                }
                ElectionEffect::Notify(event) => {
                    if let Some(log) = self.events.get_mut(peer) {
                        log.push((now, event));
                    }
                }
            }
        }
    }

    fn deliver_all(&mut self) {
        while let Some((sender, message)) = self.outbox.pop_front() {
            if self.silenced.contains(&sender) {
                continue;
            }
            let now = self.clock.now();
            let receivers: Vec<PeerId> = self
                .peers
                .keys()
                .filter(|id| **id != sender)
                .cloned()
                .collect();
            for receiver in receivers {
                if let Some(monitor) = self.monitors.get_mut(&receiver) {
                    monitor.record_heartbeat(&sender, now);
                }
                if message.kind.claims_host() {
                    if let Some(monitor) = self.host_monitors.get_mut(&receiver) {
                        monitor.record_heartbeat(&sender, now);
                    }
                }
                let view = self.view_for(&receiver);
                let Some(election) = self.peers.get_mut(&receiver) else {
                    continue;
                };
                election.note_candidacy(&sender, message.body.stands_for_host);
                let effects = match message.kind {
                    CoordinationKind::ElectionStart => {
                        election.handle_election_start(&sender, &message.body.candidates, &view)
                    }
                    CoordinationKind::HostAnnouncement | CoordinationKind::HostHeartbeat => {
                        let claimed = message.body.host.clone().unwrap_or_else(|| sender.clone());
                        election.handle_heartbeat(&sender, Some(&claimed), &view)
                    }
                    CoordinationKind::HostResigned => election.handle_host_resigned(&sender, &view),
                    CoordinationKind::PeerHeartbeat => election.handle_heartbeat(&sender, None, &view),
                };
                self.apply(&receiver, effects);
            }
        }
    }

    fn fire_confirmations(&mut self) {
        let now = self.clock.now();
        let (due, pending): (Vec<_>, Vec<_>) = self
            .confirmations
            .drain(..)
            .partition(|(at, _, _)| *at <= now);
        self.confirmations = pending;

        for (_, peer, round) in due {
            let view = self.view_for(&peer);
            let Some(election) = self.peers.get_mut(&peer) else {
                continue;
            };
            let effects = election.confirm_election(round, view.candidates);
            self.apply(&peer, effects);
        }
    }

    fn emit_heartbeats(&mut self) {
        if self.elapsed_secs % HOST_HEARTBEAT_SECS == 0 {
            for host in self.heartbeating.clone() {
                let round = self.peers[&host].round();
                self.outbox
                    .push_back((host.clone(), CoordinationMessage::host_heartbeat(host, round)));
            }
        }
        if self.elapsed_secs % PEER_HEARTBEAT_SECS == 0 {
            let beats: Vec<_> = self
                .peers
                .iter()
                .map(|(id, election)| {
                    CoordinationMessage::peer_heartbeat(id.clone(), election.current_host().cloned())
                })
                .collect();
            for beat in beats {
                self.outbox.push_back((beat.sender.clone(), beat));
            }
        }
    }

    fn check_timeouts(&mut self) {
        let now = self.clock.now();
        let ids: Vec<PeerId> = self.peers.keys().cloned().collect();
        for id in ids {
            let host = match self.peers[&id].current_host() {
                Some(host) if *host != id => host.clone(),
                _ => continue,
            };
            let overdue = self.host_monitors[&id].check_timeout(
                &host,
                HOST_TIMEOUT,
                now,
                NeverSeen::GraceSince(Timestamp::new(0)),
            );
            if !overdue {
                continue;
            }
            let view = self.view_for(&id);
            let Some(election) = self.peers.get_mut(&id) else {
                continue;
            };
            let effects = election.handle_host_timeout(&view);
            self.apply(&id, effects);
            self.deliver_all();
        }
    }
}
