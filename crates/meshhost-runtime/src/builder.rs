//! Coordinator Builder API
//!
//! Wires a transport, its mesh event stream and a configuration into a
//! running [`PeerCoordinator`] task, and hands back a [`CoordinatorHandle`]
//! for commands, status queries and event subscriptions.

use core::time::Duration;
use std::sync::Arc;

use meshhost_core::{
    CoordinatorConfig, CoordinatorError, CoordinatorEvent, MeshEventReceiver, MeshTransport,
    PeerId, Priority, Result, SessionId, TimeSource, TokioTimeSource,
};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::info;

use crate::commands::{CommandSender, CoordinatorCommand, CoordinatorStatus};
use crate::logic::{CoordinatorState, PeerCoordinator};

// ----------------------------------------------------------------------------
// Coordinator Builder
// ----------------------------------------------------------------------------

/// Builder for a peer coordinator
pub struct CoordinatorBuilder<T: MeshTransport + 'static> {
    peer_id: PeerId,
    transport: Arc<T>,
    mesh_events: MeshEventReceiver,
    config: CoordinatorConfig,
    session_id: Option<SessionId>,
    time_source: Option<Arc<dyn TimeSource>>,
    elect_on_start: bool,
}

impl<T: MeshTransport + 'static> CoordinatorBuilder<T> {
    pub fn new(peer_id: PeerId, transport: Arc<T>, mesh_events: MeshEventReceiver) -> Self {
        Self {
            peer_id,
            transport,
            mesh_events,
            config: CoordinatorConfig::default(),
            session_id: None,
            time_source: None,
            elect_on_start: true,
        }
    }

    pub fn with_config(mut self, config: CoordinatorConfig) -> Self {
        self.config = config;
        self
    }

    /// Join an existing session instead of generating a new id
    pub fn with_session(mut self, session_id: SessionId) -> Self {
        self.session_id = Some(session_id);
        self
    }

    /// Clock used for heartbeat bookkeeping (defaults to the tokio clock)
    pub fn with_time_source(mut self, time_source: Arc<dyn TimeSource>) -> Self {
        self.time_source = Some(time_source);
        self
    }

    /// Whether to run an election as soon as the task starts (default: yes)
    pub fn elect_on_start(mut self, enabled: bool) -> Self {
        self.elect_on_start = enabled;
        self
    }

    /// Validate the configuration and spawn the coordinator task
    pub async fn build_and_start(self) -> Result<CoordinatorHandle> {
        self.config.validate()?;

        let session_id = self.session_id.unwrap_or_else(SessionId::generate);
        info!(peer = %self.peer_id, session = %session_id, "Starting peer coordinator");

        let channels = &self.config.channels;
        let (command_sender, command_receiver) = mpsc::channel(channels.command_buffer_size);
        let (event_sender, _) = broadcast::channel(channels.event_buffer_size);

        let state = CoordinatorState::new(
            self.peer_id.clone(),
            session_id.clone(),
            self.config.election.stand_for_host,
        );
        let time_source = self
            .time_source
            .unwrap_or_else(|| Arc::new(TokioTimeSource::new()));
        let coordinator = PeerCoordinator::new(
            state,
            self.config,
            self.transport,
            command_receiver,
            self.mesh_events,
            event_sender.clone(),
            time_source,
            self.elect_on_start,
        );
        let task = tokio::spawn(coordinator.run());

        Ok(CoordinatorHandle {
            peer_id: self.peer_id,
            session_id,
            command_sender,
            event_sender,
            task: Some(task),
        })
    }
}

// ----------------------------------------------------------------------------
// Coordinator Handle
// ----------------------------------------------------------------------------

/// Handle to a running peer coordinator
pub struct CoordinatorHandle {
    peer_id: PeerId,
    session_id: SessionId,
    command_sender: CommandSender,
    event_sender: broadcast::Sender<CoordinatorEvent>,
    task: Option<JoinHandle<Result<()>>>,
}

impl CoordinatorHandle {
    pub fn peer_id(&self) -> &PeerId {
        &self.peer_id
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    /// Receive every event published from now on
    pub fn subscribe(&self) -> broadcast::Receiver<CoordinatorEvent> {
        self.event_sender.subscribe()
    }

    /// Send a raw command to the coordinator task
    pub async fn send_command(&self, command: CoordinatorCommand) -> Result<()> {
        self.command_sender
            .send(command)
            .await
            .map_err(|_| CoordinatorError::ShutDown)
    }

    pub async fn start_election(&self) -> Result<()> {
        self.send_command(CoordinatorCommand::StartElection).await
    }

    pub async fn resign_host(&self) -> Result<()> {
        self.send_command(CoordinatorCommand::ResignHost).await
    }

    pub async fn migrate_host(&self, to: PeerId) -> Result<()> {
        self.send_command(CoordinatorCommand::MigrateHost { to }).await
    }

    /// Schedule an application timer; fires arrive as `CoordinatorEvent::TimerFired`
    pub async fn schedule_timer(
        &self,
        id: impl Into<String>,
        interval: Duration,
        repeats: bool,
    ) -> Result<()> {
        let (reply, response) = oneshot::channel();
        self.send_command(CoordinatorCommand::ScheduleTimer {
            id: id.into(),
            interval,
            repeats,
            reply,
        })
        .await?;
        response.await.map_err(|_| CoordinatorError::ShutDown)?
    }

    /// Cancel an application timer, returning whether it was live
    pub async fn cancel_timer(&self, id: impl Into<String>) -> Result<bool> {
        let (reply, response) = oneshot::channel();
        self.send_command(CoordinatorCommand::CancelTimer {
            id: id.into(),
            reply,
        })
        .await?;
        response.await.map_err(|_| CoordinatorError::ShutDown)
    }

    /// Broadcast an application message to the session
    pub async fn send_game_message(
        &self,
        message_type: impl Into<String>,
        payload: Vec<u8>,
    ) -> Result<()> {
        let (reply, response) = oneshot::channel();
        self.send_command(CoordinatorCommand::SendGameMessage {
            message_type: message_type.into(),
            payload,
            priority: Priority::Normal,
            reply,
        })
        .await?;
        response.await.map_err(|_| CoordinatorError::ShutDown)?
    }

    pub async fn restart_session(&self) -> Result<()> {
        self.send_command(CoordinatorCommand::RestartSession).await
    }

    pub async fn status(&self) -> Result<CoordinatorStatus> {
        let (reply, response) = oneshot::channel();
        self.send_command(CoordinatorCommand::GetStatus { reply }).await?;
        response.await.map_err(|_| CoordinatorError::ShutDown)
    }

    /// Whether the coordinator task is still running
    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Stop the coordinator and wait for its task to finish
    ///
    /// Safe to call any number of times. Once it returns, no timer or retry
    /// of this coordinator fires again and no further event is published.
    pub async fn shutdown(&mut self) -> Result<()> {
        let Some(task) = self.task.take() else {
            return Ok(());
        };

        let (reply, response) = oneshot::channel();
        if self
            .command_sender
            .send(CoordinatorCommand::Shutdown { reply })
            .await
            .is_ok()
        {
            let _ = response.await;
        }

        match task.await {
            Ok(result) => result,
            Err(error) => Err(CoordinatorError::channel_error(format!(
                "Coordinator task panicked: {error}"
            ))),
        }
    }
}

impl Drop for CoordinatorHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
