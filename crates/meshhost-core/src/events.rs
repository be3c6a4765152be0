//! Coordinator events
//!
//! Everything observable about the coordinator is published as one of these
//! values. Subscribers receive them in the order the coordinator applied the
//! underlying state transitions.

use crate::protocol::wire::GameMessage;
use crate::types::PeerId;

/// Events published by the coordinator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoordinatorEvent {
    /// A new election round started with the given candidates
    ElectionStarted { round: u64, candidates: Vec<PeerId> },
    /// The confirmation delay elapsed and the winner was finalized
    ElectionCompleted { round: u64, host: PeerId },
    /// An election could not run; it is retried after the quick-restart delay
    ElectionFailed { reason: String },
    /// The locally believed host changed
    HostChanged { host: Option<PeerId>, is_self: bool },
    /// The current host was silent for longer than the host timeout
    HostTimeoutDetected { host: PeerId },
    /// A broadcast gave up after all of its attempts
    BroadcastExhausted {
        kind: String,
        attempts: u32,
        error: String,
    },
    /// An application timer fired
    TimerFired { id: String },
    /// A game message from another peer arrived
    GameMessageReceived { from: PeerId, message: GameMessage },
    /// The coordinator stopped; nothing follows this event
    ShutDown,
}

impl CoordinatorEvent {
    /// Short variant name, for logging
    pub fn name(&self) -> &'static str {
        match self {
            CoordinatorEvent::ElectionStarted { .. } => "ElectionStarted",
            CoordinatorEvent::ElectionCompleted { .. } => "ElectionCompleted",
            CoordinatorEvent::ElectionFailed { .. } => "ElectionFailed",
            CoordinatorEvent::HostChanged { .. } => "HostChanged",
            CoordinatorEvent::HostTimeoutDetected { .. } => "HostTimeoutDetected",
            CoordinatorEvent::BroadcastExhausted { .. } => "BroadcastExhausted",
            CoordinatorEvent::TimerFired { .. } => "TimerFired",
            CoordinatorEvent::GameMessageReceived { .. } => "GameMessageReceived",
            CoordinatorEvent::ShutDown => "ShutDown",
        }
    }
}
