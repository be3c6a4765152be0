//! Host Election
//!
//! Pure state machine deciding which peer hosts the session. The rule is the
//! deterministic minimum: among the candidates a peer can see, the
//! lexicographically smallest [`PeerId`] wins. Elections are optimistic, so
//! the winner is applied immediately and re-checked once the confirmation
//! delay has let the candidate set grow.
//!
//! The machine performs no I/O and reads no clock. Every operation returns
//! the [`ElectionEffect`]s the owner must carry out (heartbeat timers,
//! confirmation timers, announcements and events), in order.

use std::collections::BTreeSet;

use tracing::{debug, info, warn};

use crate::errors::{CoordinatorError, Result};
use crate::events::CoordinatorEvent;
use crate::protocol::message::CoordinationMessage;
use crate::types::PeerId;

// ----------------------------------------------------------------------------
// State Types
// ----------------------------------------------------------------------------

/// Whether an election may start
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElectionState {
    Idle,
    InProgress,
    Completed,
}

/// Local role once a host is known
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Host,
    Follower,
}

/// Observable phase of the local peer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElectionPhase {
    Idle,
    ElectionInProgress,
    Elected(Role),
}

impl core::fmt::Display for ElectionPhase {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            ElectionPhase::Idle => f.write_str("idle"),
            ElectionPhase::ElectionInProgress => f.write_str("electing"),
            ElectionPhase::Elected(Role::Host) => f.write_str("host"),
            ElectionPhase::Elected(Role::Follower) => f.write_str("follower"),
        }
    }
}

/// Who the local peer believes is host
///
/// `is_self` is kept equal to `current_host == Some(self)`; both fields only
/// change together.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostRecord {
    current_host: Option<PeerId>,
    is_self: bool,
}

impl HostRecord {
    pub fn current_host(&self) -> Option<&PeerId> {
        self.current_host.as_ref()
    }

    pub fn is_self(&self) -> bool {
        self.is_self
    }

    /// Returns whether the host changed
    fn assign(&mut self, host: PeerId, self_id: &PeerId) -> bool {
        if self.current_host.as_ref() == Some(&host) {
            return false;
        }
        self.is_self = &host == self_id;
        self.current_host = Some(host);
        true
    }

    /// Returns whether a host was set
    fn clear(&mut self) -> bool {
        self.is_self = false;
        self.current_host.take().is_some()
    }
}

/// Candidate view of the current election round
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ElectionRound {
    /// Local round counter, bumped by every election start
    pub round: u64,
    /// Candidates seen so far in this round
    pub candidates: BTreeSet<PeerId>,
    /// Hosts known to have failed; never candidates until they claim the
    /// host role again or reconnect
    pub excluded: BTreeSet<PeerId>,
}

/// What the local peer currently knows about the others
///
/// Built by the owner from the heartbeat monitor and the transport.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PeerView {
    /// Peers that may stand as candidates (connected and not stale)
    pub candidates: BTreeSet<PeerId>,
    /// Whether the current host has been heard from within the timeout
    pub host_live: bool,
}

impl PeerView {
    pub fn new(candidates: impl IntoIterator<Item = PeerId>, host_live: bool) -> Self {
        Self {
            candidates: candidates.into_iter().collect(),
            host_live,
        }
    }
}

/// Instruction for the owner of a [`HostElection`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ElectionEffect {
    /// Begin emitting host heartbeats
    StartHostHeartbeat,
    /// Stop emitting host heartbeats
    StopHostHeartbeat,
    /// Call [`HostElection::confirm_election`] for `round` after the delay
    ScheduleConfirmation { round: u64 },
    /// Call [`HostElection::start_election`] again after the quick-restart delay
    ScheduleRestart,
    /// Broadcast a coordination message
    Announce(CoordinationMessage),
    /// Publish an event to subscribers
    Notify(CoordinatorEvent),
}

/// The deterministic winner among `candidates`, if any
pub fn elect_winner<'a, I>(candidates: I) -> Option<PeerId>
where
    I: IntoIterator<Item = &'a PeerId>,
{
    candidates.into_iter().min().cloned()
}

// ----------------------------------------------------------------------------
// Host Election
// ----------------------------------------------------------------------------

/// Election state of one peer
#[derive(Debug, Clone)]
pub struct HostElection {
    self_id: PeerId,
    stand_for_host: bool,
    state: ElectionState,
    host: HostRecord,
    round: ElectionRound,
    /// Peers that declared they do not stand for host
    abstaining: BTreeSet<PeerId>,
    heartbeat_active: bool,
}

impl HostElection {
    /// A peer that is a candidate in its own elections
    pub fn new(self_id: PeerId) -> Self {
        Self::with_candidacy(self_id, true)
    }

    pub fn with_candidacy(self_id: PeerId, stand_for_host: bool) -> Self {
        Self {
            self_id,
            stand_for_host,
            state: ElectionState::Idle,
            host: HostRecord::default(),
            round: ElectionRound::default(),
            abstaining: BTreeSet::new(),
            heartbeat_active: false,
        }
    }

    // ------------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------------

    pub fn self_id(&self) -> &PeerId {
        &self.self_id
    }

    pub fn state(&self) -> ElectionState {
        self.state
    }

    pub fn phase(&self) -> ElectionPhase {
        match (self.state, self.host.current_host()) {
            (ElectionState::InProgress, _) => ElectionPhase::ElectionInProgress,
            (ElectionState::Completed, Some(_)) if self.host.is_self() => {
                ElectionPhase::Elected(Role::Host)
            }
            (ElectionState::Completed, Some(_)) => ElectionPhase::Elected(Role::Follower),
            _ => ElectionPhase::Idle,
        }
    }

    pub fn host_record(&self) -> &HostRecord {
        &self.host
    }

    pub fn current_host(&self) -> Option<&PeerId> {
        self.host.current_host()
    }

    pub fn is_host(&self) -> bool {
        self.host.is_self()
    }

    pub fn round(&self) -> u64 {
        self.round.round
    }

    pub fn election_round(&self) -> &ElectionRound {
        &self.round
    }

    /// Whether the owner should currently be emitting host heartbeats
    pub fn heartbeat_active(&self) -> bool {
        self.heartbeat_active
    }

    pub fn stands_for_host(&self) -> bool {
        self.stand_for_host
    }

    /// Peers that declared they never stand for host
    pub fn abstaining(&self) -> &BTreeSet<PeerId> {
        &self.abstaining
    }

    // ------------------------------------------------------------------------
    // Elections
    // ------------------------------------------------------------------------

    /// Start a new round among `peers` and this peer
    ///
    /// Fails with [`CoordinatorError::ElectionFailed`] and leaves every field
    /// untouched when no candidate remains.
    pub fn start_election<I>(&mut self, peers: I) -> Result<Vec<ElectionEffect>>
    where
        I: IntoIterator<Item = PeerId>,
    {
        let mut candidates: BTreeSet<PeerId> = peers
            .into_iter()
            .filter(|peer| !self.round.excluded.contains(peer) && !self.abstaining.contains(peer))
            .collect();
        if self.stand_for_host {
            candidates.insert(self.self_id.clone());
        } else {
            candidates.remove(&self.self_id);
        }

        let Some(winner) = elect_winner(&candidates) else {
            warn!(peer = %self.self_id, "Election failed: no candidates");
            return Err(CoordinatorError::ElectionFailed);
        };

        self.round.round += 1;
        self.round.candidates = candidates;
        self.state = ElectionState::InProgress;
        let round = self.round.round;

        info!(
            peer = %self.self_id,
            round,
            candidates = self.round.candidates.len(),
            winner = %winner,
            "Election started"
        );

        let listed: Vec<PeerId> = self.round.candidates.iter().cloned().collect();
        let mut effects = vec![
            ElectionEffect::Notify(CoordinatorEvent::ElectionStarted {
                round,
                candidates: listed.clone(),
            }),
            ElectionEffect::Announce(
                CoordinationMessage::election_start(self.self_id.clone(), listed, round)
                    .with_candidacy(self.stand_for_host),
            ),
        ];
        self.apply_winner(winner, &mut effects);
        effects.push(ElectionEffect::ScheduleConfirmation { round });
        Ok(effects)
    }

    /// Finalize `round` with the candidates observed during the delay
    ///
    /// Confirmations of superseded rounds, or arriving when no election is
    /// running, are ignored.
    pub fn confirm_election<I>(&mut self, round: u64, observed: I) -> Vec<ElectionEffect>
    where
        I: IntoIterator<Item = PeerId>,
    {
        if self.state != ElectionState::InProgress || round != self.round.round {
            debug!(
                peer = %self.self_id,
                round,
                current = self.round.round,
                "Ignoring stale election confirmation"
            );
            return Vec::new();
        }

        for peer in observed {
            self.admit_candidate(peer);
        }
        let Some(winner) = elect_winner(&self.round.candidates) else {
            return Vec::new();
        };

        self.state = ElectionState::Completed;
        info!(peer = %self.self_id, round, host = %winner, "Election confirmed");

        let mut effects = Vec::new();
        self.apply_winner(winner.clone(), &mut effects);
        effects.push(ElectionEffect::Notify(CoordinatorEvent::ElectionCompleted {
            round,
            host: winner,
        }));
        effects
    }

    /// Take the host role and announce it
    pub fn become_host(&mut self) -> Vec<ElectionEffect> {
        let mut effects = Vec::new();
        self.take_host(&mut effects);
        if self.state != ElectionState::InProgress {
            self.state = ElectionState::Completed;
        }
        effects
    }

    /// Step down and immediately run a new election among `view`
    pub fn resign_host(&mut self, view: &PeerView) -> Vec<ElectionEffect> {
        let mut effects = Vec::new();
        if self.heartbeat_active {
            self.heartbeat_active = false;
            effects.push(ElectionEffect::StopHostHeartbeat);
        }
        if self.host.is_self() {
            info!(peer = %self.self_id, "Resigning host role");
            effects.push(ElectionEffect::Announce(CoordinationMessage::host_resigned(
                self.self_id.clone(),
                self.round.round,
            )));
        }
        self.drop_host(&mut effects);
        self.elect_or_retry(view.candidates.iter().cloned(), &mut effects);
        effects
    }

    /// Administrative override of the host
    pub fn migrate_host(&mut self, to: PeerId) -> Vec<ElectionEffect> {
        info!(peer = %self.self_id, host = %to, "Migrating host");
        self.round.excluded.remove(&to);
        self.state = ElectionState::Completed;
        let mut effects = Vec::new();
        self.apply_winner(to, &mut effects);
        effects
    }

    /// React to the current host exceeding the heartbeat timeout
    ///
    /// The silent host is excluded from later rounds until it is heard from
    /// again, and a new election runs among `view`.
    pub fn handle_host_timeout(&mut self, view: &PeerView) -> Vec<ElectionEffect> {
        let host = match self.host.current_host() {
            Some(host) if host != &self.self_id => host.clone(),
            _ => return Vec::new(),
        };

        warn!(peer = %self.self_id, host = %host, "Host heartbeat timed out");
        let mut effects = vec![ElectionEffect::Notify(CoordinatorEvent::HostTimeoutDetected {
            host: host.clone(),
        })];
        self.round.excluded.insert(host);
        self.drop_host(&mut effects);
        self.elect_or_retry(view.candidates.iter().cloned(), &mut effects);
        effects
    }

    // ------------------------------------------------------------------------
    // Inbound Coordination
    // ------------------------------------------------------------------------

    /// Apply a heartbeat or announcement from `from`
    ///
    /// `claimed_host` is the host asserted by a host announcement or host
    /// heartbeat, `None` for plain peer heartbeats. The smaller of two live
    /// claims always wins. Only a host claim lifts an exclusion.
    pub fn handle_heartbeat(
        &mut self,
        from: &PeerId,
        claimed_host: Option<&PeerId>,
        view: &PeerView,
    ) -> Vec<ElectionEffect> {
        if from == &self.self_id {
            return Vec::new();
        }
        if claimed_host.is_some() {
            self.round.excluded.remove(from);
        }
        self.observe_peer(from);

        let Some(claimant) = claimed_host else {
            return Vec::new();
        };
        if self.host.current_host() == Some(claimant) {
            return Vec::new();
        }

        if let Some(current) = self.host.current_host() {
            // A peer that never stands cannot be holding the role
            let current_live = (view.host_live && !self.abstaining.contains(current))
                || self.host.is_self();
            if current_live && current < claimant {
                debug!(
                    peer = %self.self_id,
                    current = %current,
                    claimant = %claimant,
                    "Rejecting host claim from larger peer"
                );
                if self.host.is_self() {
                    return vec![ElectionEffect::Announce(
                        CoordinationMessage::host_announcement(
                            self.self_id.clone(),
                            self.round.round,
                        ),
                    )];
                }
                return Vec::new();
            }
        }

        let mut effects = Vec::new();
        if let Some(stale) = self.host.current_host() {
            if !view.host_live && !self.host.is_self() {
                let stale = stale.clone();
                warn!(peer = %self.self_id, host = %stale, "Host replaced after heartbeat timeout");
                effects.push(ElectionEffect::Notify(CoordinatorEvent::HostTimeoutDetected {
                    host: stale.clone(),
                }));
                self.round.excluded.insert(stale);
            }
        }

        if self.stand_for_host && self.self_id < *claimant {
            debug!(peer = %self.self_id, claimant = %claimant, "Contesting host claim");
            let mut peers = view.candidates.clone();
            peers.insert(claimant.clone());
            self.elect_or_retry(peers, &mut effects);
            return effects;
        }

        info!(peer = %self.self_id, host = %claimant, "Adopting announced host");
        self.state = ElectionState::Completed;
        self.apply_winner(claimant.clone(), &mut effects);
        effects
    }

    /// Apply an election start announced by `from`
    pub fn handle_election_start(
        &mut self,
        from: &PeerId,
        their_candidates: &[PeerId],
        view: &PeerView,
    ) -> Vec<ElectionEffect> {
        match self.state {
            ElectionState::InProgress => {
                self.observe_peer(from);
                for peer in their_candidates {
                    self.observe_peer(peer);
                }
                Vec::new()
            }
            ElectionState::Idle => {
                let mut peers = view.candidates.clone();
                peers.insert(from.clone());
                peers.extend(their_candidates.iter().cloned());
                let mut effects = Vec::new();
                self.elect_or_retry(peers, &mut effects);
                effects
            }
            ElectionState::Completed if self.host.is_self() => {
                vec![ElectionEffect::Announce(CoordinationMessage::host_announcement(
                    self.self_id.clone(),
                    self.round.round,
                ))]
            }
            ElectionState::Completed => Vec::new(),
        }
    }

    /// Apply a resignation announced by `from`
    pub fn handle_host_resigned(&mut self, from: &PeerId, view: &PeerView) -> Vec<ElectionEffect> {
        if self.host.current_host() != Some(from) {
            return Vec::new();
        }
        info!(peer = %self.self_id, host = %from, "Host resigned");

        let mut effects = Vec::new();
        self.drop_host(&mut effects);
        let mut peers = view.candidates.clone();
        peers.insert(from.clone());
        self.elect_or_retry(peers, &mut effects);
        effects
    }

    /// Note a peer seen during a running election
    pub fn observe_peer(&mut self, peer: &PeerId) {
        if self.state == ElectionState::InProgress {
            self.admit_candidate(peer.clone());
        }
    }

    /// Record whether `peer` stands for host, as declared in its traffic
    ///
    /// A peer that abstains is dropped from the running round so the
    /// confirmation cannot pick it.
    pub fn note_candidacy(&mut self, peer: &PeerId, stands_for_host: bool) {
        if peer == &self.self_id {
            return;
        }
        if stands_for_host {
            self.abstaining.remove(peer);
        } else if self.abstaining.insert(peer.clone()) {
            debug!(peer = %self.self_id, abstaining = %peer, "Peer does not stand for host");
            self.round.candidates.remove(peer);
        }
    }

    /// A new connection from `peer`, which may have recovered
    pub fn peer_connected(&mut self, peer: &PeerId) {
        self.round.excluded.remove(peer);
        self.observe_peer(peer);
    }

    /// A lost connection; the host is only replaced through its timeout
    pub fn peer_lost(&mut self, peer: &PeerId) {
        if self.state == ElectionState::InProgress {
            self.round.candidates.remove(peer);
        }
    }

    /// Tear down to idle with no host
    ///
    /// The round counter is kept so confirmations scheduled before the reset
    /// stay stale.
    pub fn reset(&mut self) -> Vec<ElectionEffect> {
        let mut effects = Vec::new();
        if self.heartbeat_active {
            self.heartbeat_active = false;
            effects.push(ElectionEffect::StopHostHeartbeat);
        }
        self.drop_host(&mut effects);
        self.round.candidates.clear();
        self.round.excluded.clear();
        effects
    }

    // ------------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------------

    fn admit_candidate(&mut self, peer: PeerId) {
        if peer == self.self_id && !self.stand_for_host {
            return;
        }
        if !self.round.excluded.contains(&peer) && !self.abstaining.contains(&peer) {
            self.round.candidates.insert(peer);
        }
    }

    fn apply_winner(&mut self, winner: PeerId, effects: &mut Vec<ElectionEffect>) {
        if winner == self.self_id {
            self.take_host(effects);
        } else {
            self.follow(winner, effects);
        }
    }

    fn take_host(&mut self, effects: &mut Vec<ElectionEffect>) {
        let changed = self.host.assign(self.self_id.clone(), &self.self_id);
        if changed {
            info!(peer = %self.self_id, "Became host");
            effects.push(ElectionEffect::Notify(CoordinatorEvent::HostChanged {
                host: Some(self.self_id.clone()),
                is_self: true,
            }));
        }
        if !self.heartbeat_active {
            self.heartbeat_active = true;
            effects.push(ElectionEffect::StartHostHeartbeat);
        }
        effects.push(ElectionEffect::Announce(CoordinationMessage::host_announcement(
            self.self_id.clone(),
            self.round.round,
        )));
    }

    fn follow(&mut self, host: PeerId, effects: &mut Vec<ElectionEffect>) {
        if self.heartbeat_active {
            self.heartbeat_active = false;
            effects.push(ElectionEffect::StopHostHeartbeat);
        }
        if self.host.assign(host.clone(), &self.self_id) {
            effects.push(ElectionEffect::Notify(CoordinatorEvent::HostChanged {
                host: Some(host),
                is_self: false,
            }));
        }
    }

    fn drop_host(&mut self, effects: &mut Vec<ElectionEffect>) {
        if self.heartbeat_active {
            self.heartbeat_active = false;
            effects.push(ElectionEffect::StopHostHeartbeat);
        }
        if self.host.clear() {
            effects.push(ElectionEffect::Notify(CoordinatorEvent::HostChanged {
                host: None,
                is_self: false,
            }));
        }
        self.state = ElectionState::Idle;
    }

    fn elect_or_retry<I>(&mut self, peers: I, effects: &mut Vec<ElectionEffect>)
    where
        I: IntoIterator<Item = PeerId>,
    {
        match self.start_election(peers) {
            Ok(more) => effects.extend(more),
            Err(error) => {
                effects.push(ElectionEffect::Notify(CoordinatorEvent::ElectionFailed {
                    reason: error.to_string(),
                }));
                effects.push(ElectionEffect::ScheduleRestart);
            }
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
