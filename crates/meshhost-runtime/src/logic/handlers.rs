//! Coordination Message Handlers
//!
//! Routes decoded coordination messages into the election state machine.

use meshhost_core::{
    CoordinationKind, CoordinationMessage, ElectionEffect, PeerId, PeerView, Timestamp,
};
use tracing::{debug, trace};

use super::state::CoordinatorState;

/// Handlers for inbound coordination traffic
pub struct CoordinationHandlers;

impl CoordinationHandlers {
    /// Apply one coordination message that the mesh delivered from `from`
    ///
    /// The mesh's sender identity is authoritative; the frame's sender field
    /// is length-limited. Any message counts as a sign of life, but only
    /// host claims keep a host alive. A host can only claim itself, so the
    /// sender is taken as the claimant.
    pub fn handle_coordination(
        state: &mut CoordinatorState,
        from: &PeerId,
        message: &CoordinationMessage,
        view: &PeerView,
        now: Timestamp,
    ) -> Vec<ElectionEffect> {
        if *from == state.peer_id {
            trace!("Ignoring own coordination message");
            return Vec::new();
        }
        if message.sender != *from {
            debug!(from = %from, framed = %message.sender, "Frame sender differs from mesh sender");
        }
        state.monitor.record_heartbeat(from, now);
        if message.kind.claims_host() {
            state.host_beats.record_heartbeat(from, now);
        }
        state
            .election
            .note_candidacy(from, message.body.stands_for_host);
        trace!(kind = %message.kind, from = %from, round = message.body.round, "Coordination message");

        match message.kind {
            CoordinationKind::ElectionStart => {
                state
                    .election
                    .handle_election_start(from, &message.body.candidates, view)
            }
            CoordinationKind::HostAnnouncement | CoordinationKind::HostHeartbeat => {
                state.election.handle_heartbeat(from, Some(from), view)
            }
            CoordinationKind::HostResigned => state.election.handle_host_resigned(from, view),
            CoordinationKind::PeerHeartbeat => state.election.handle_heartbeat(from, None, view),
        }
    }
}
