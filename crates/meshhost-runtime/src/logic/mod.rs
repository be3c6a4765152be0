//! Coordinator Logic Module
//!
//! The coordinator task split into focused components:
//! - `state`: election, heartbeat records and statistics owned by the task
//! - `handlers`: routing of inbound coordination messages
//! - `task`: the `PeerCoordinator` actor and its event loop
//!
//! All coordinator state is owned by a single task that processes commands,
//! mesh events, timer fires and finished broadcasts one at a time, in arrival
//! order. Timer and broadcast tasks never touch that state; they only post
//! values back into the task's mailboxes.

pub mod handlers;
pub mod state;
pub mod task;

pub use handlers::CoordinationHandlers;
pub use state::{CoordinatorState, CoordinatorStats, TimerAction};
pub use task::PeerCoordinator;
