//! meshhost Runtime Engine
//!
//! This crate runs the host election of `meshhost-core` against a live mesh:
//! - `PeerCoordinator`: the actor owning one peer's coordination state
//! - `CoordinatorBuilder` / `CoordinatorHandle`: startup wiring and the
//!   command surface used by applications
//! - heartbeat, timeout detection and reliable announcement of every
//!   election decision
//!
//! `meshhost-core` keeps the pure pieces; this crate adds the tasks, timers
//! and channels around them.

pub mod builder;
pub mod commands;
pub mod logic;

pub use builder::{CoordinatorBuilder, CoordinatorHandle};
pub use commands::{CommandReceiver, CommandSender, CoordinatorCommand, CoordinatorStatus};
pub use logic::{CoordinatorStats, PeerCoordinator, TimerAction};

// Re-export core types for convenience
pub use meshhost_core::{
    CoordinatorConfig, CoordinatorError, CoordinatorEvent, ElectionPhase, ElectionState,
    GameMessage, InMemoryMesh, MeshEndpoint, MeshEvent, MeshEventReceiver, MeshTransport, PeerId,
    Priority, Result, SessionId,
};
