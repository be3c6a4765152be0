//! Commands accepted by the coordinator task, and the status it reports

use core::time::Duration;
use std::collections::BTreeSet;

use meshhost_core::{ElectionPhase, ElectionState, PeerId, Priority, Result, SessionId};
use tokio::sync::{mpsc, oneshot};

use crate::logic::CoordinatorStats;

/// Request sent from a [`crate::CoordinatorHandle`] to its coordinator task
#[derive(Debug)]
pub enum CoordinatorCommand {
    /// Run an election among the currently visible peers
    StartElection,
    /// Step down as host and re-elect
    ResignHost,
    /// Force `to` to be host, bypassing the election
    MigrateHost { to: PeerId },
    /// Schedule an application timer, replacing any timer with the same id
    ScheduleTimer {
        id: String,
        interval: Duration,
        repeats: bool,
        reply: oneshot::Sender<Result<()>>,
    },
    CancelTimer {
        id: String,
        reply: oneshot::Sender<bool>,
    },
    /// Frame and reliably broadcast an application message
    SendGameMessage {
        message_type: String,
        payload: Vec<u8>,
        priority: Priority,
        reply: oneshot::Sender<Result<()>>,
    },
    /// Tear down to idle and elect again after the quick-restart delay
    ///
    /// Application timers are left running.
    RestartSession,
    GetStatus {
        reply: oneshot::Sender<CoordinatorStatus>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

impl CoordinatorCommand {
    pub fn name(&self) -> &'static str {
        match self {
            CoordinatorCommand::StartElection => "StartElection",
            CoordinatorCommand::ResignHost => "ResignHost",
            CoordinatorCommand::MigrateHost { .. } => "MigrateHost",
            CoordinatorCommand::ScheduleTimer { .. } => "ScheduleTimer",
            CoordinatorCommand::CancelTimer { .. } => "CancelTimer",
            CoordinatorCommand::SendGameMessage { .. } => "SendGameMessage",
            CoordinatorCommand::RestartSession => "RestartSession",
            CoordinatorCommand::GetStatus { .. } => "GetStatus",
            CoordinatorCommand::Shutdown { .. } => "Shutdown",
        }
    }
}

pub type CommandSender = mpsc::Sender<CoordinatorCommand>;
pub type CommandReceiver = mpsc::Receiver<CoordinatorCommand>;

/// Snapshot of a coordinator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoordinatorStatus {
    pub peer_id: PeerId,
    pub session_id: SessionId,
    pub phase: ElectionPhase,
    pub state: ElectionState,
    pub current_host: Option<PeerId>,
    pub is_host: bool,
    pub round: u64,
    pub connected_peers: BTreeSet<PeerId>,
    pub live_peers: BTreeSet<PeerId>,
    pub excluded_peers: BTreeSet<PeerId>,
    /// Ids of live timers, coordinator and application ones alike
    pub active_timers: Vec<String>,
    pub broadcasts_in_flight: usize,
    pub stats: CoordinatorStats,
}
