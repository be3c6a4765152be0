//! meshhost core
//!
//! Building blocks for electing a single host among the peers of an ad-hoc
//! mesh session: identifiers and time, wire framing, the host election state
//! machine, heartbeat bookkeeping, named timers and bounded-retry broadcast
//! over an unreliable transport.
//!
//! Everything here is either pure or a leaf async helper; the coordinating
//! actor lives in `meshhost-runtime`.

// ----------------------------------------------------------------------------
// Module Declarations
// ----------------------------------------------------------------------------

pub mod broadcast;
pub mod config;
pub mod election;
pub mod errors;
pub mod events;
pub mod heartbeat;
pub mod protocol;
pub mod timer;
pub mod transport;
pub mod types;

// ----------------------------------------------------------------------------
// Public API
// ----------------------------------------------------------------------------

pub use broadcast::{BroadcastAttempt, ReliableBroadcaster};
pub use config::{
    BroadcastConfig, ChannelConfig, CoordinatorConfig, CoordinatorConfigBuilder, ElectionConfig,
    HeartbeatConfig,
};
pub use election::{
    elect_winner, ElectionEffect, ElectionPhase, ElectionRound, ElectionState, HostElection,
    HostRecord, PeerView, Role,
};
pub use errors::{CoordinatorError, FrameError, Result, TransportError};
pub use events::CoordinatorEvent;
pub use heartbeat::{HeartbeatMonitor, NeverSeen};
pub use protocol::{
    CoordinationBody, CoordinationKind, CoordinationMessage, GameMessage, InboundMessage,
};
pub use timer::{TimerFired, TimerKind, TimerRegistry};
pub use transport::{
    InMemoryMesh, MeshEndpoint, MeshEvent, MeshEventReceiver, MeshEventSender, MeshTransport,
    Priority,
};
pub use types::{PeerId, SessionId, TimeSource, Timestamp, TokioTimeSource};
