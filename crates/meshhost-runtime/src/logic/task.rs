//! Peer Coordinator Task
//!
//! The actor that owns all coordination state for one peer. It feeds
//! commands, mesh events and timer fires into the election state machine and
//! carries out the effects it returns: scheduling timers, spawning reliable
//! broadcasts and publishing events.

use core::time::Duration;
use std::sync::Arc;

use meshhost_core::{
    CoordinationKind, CoordinationMessage, CoordinatorConfig, CoordinatorError, CoordinatorEvent,
    ElectionEffect, GameMessage, InboundMessage, MeshEvent, MeshEventReceiver, MeshTransport,
    PeerId, PeerView, Priority, ReliableBroadcaster, Result, TimeSource, Timestamp, TimerFired,
    TimerRegistry,
};
use meshhost_core::timer::TimerFiredReceiver;
use tokio::sync::broadcast;
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error, info, trace, warn};

use super::handlers::CoordinationHandlers;
use super::state::{
    app_timer_id, is_app_timer, CoordinatorState, TimerAction, CONFIRM_TIMER, HOST_HEARTBEAT_TIMER,
    PEER_HEARTBEAT_TIMER, RESTART_TIMER, TIMEOUT_CHECK_TIMER,
};
use crate::commands::{CommandReceiver, CoordinatorCommand, CoordinatorStatus};

/// Result of a finished broadcast task
#[derive(Debug)]
struct BroadcastOutcome {
    kind: String,
    result: Result<u32>,
}

// ----------------------------------------------------------------------------
// Peer Coordinator
// ----------------------------------------------------------------------------

/// Coordination actor for one peer
pub struct PeerCoordinator<T: MeshTransport + 'static> {
    /// Election, heartbeat records and statistics
    state: CoordinatorState,
    config: CoordinatorConfig,
    transport: Arc<T>,
    broadcaster: ReliableBroadcaster<T>,
    timers: TimerRegistry<TimerAction>,
    timer_fires: TimerFiredReceiver<TimerAction>,
    /// In-flight broadcasts, aborted on shutdown
    broadcasts: JoinSet<BroadcastOutcome>,
    command_receiver: CommandReceiver,
    mesh_events: MeshEventReceiver,
    mesh_open: bool,
    event_sender: broadcast::Sender<CoordinatorEvent>,
    time_source: Arc<dyn TimeSource>,
    elect_on_start: bool,
    running: bool,
}

impl<T: MeshTransport + 'static> PeerCoordinator<T> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        state: CoordinatorState,
        config: CoordinatorConfig,
        transport: Arc<T>,
        command_receiver: CommandReceiver,
        mesh_events: MeshEventReceiver,
        event_sender: broadcast::Sender<CoordinatorEvent>,
        time_source: Arc<dyn TimeSource>,
        elect_on_start: bool,
    ) -> Self {
        let (timers, timer_fires) = TimerRegistry::with_channel();
        let broadcaster = ReliableBroadcaster::new(Arc::clone(&transport), config.broadcast.clone());
        Self {
            state,
            config,
            transport,
            broadcaster,
            timers,
            timer_fires,
            broadcasts: JoinSet::new(),
            command_receiver,
            mesh_events,
            mesh_open: true,
            event_sender,
            time_source,
            elect_on_start,
            running: true,
        }
    }

    /// Run the coordinator until shutdown
    pub async fn run(mut self) -> Result<()> {
        info!(
            peer = %self.state.peer_id,
            session = %self.state.session_id,
            "Peer coordinator starting"
        );

        self.schedule_background_timers()?;
        if self.elect_on_start {
            self.run_election();
        }

        while self.running {
            tokio::select! {
                command = self.command_receiver.recv() => {
                    match command {
                        Some(command) => {
                            debug!(command = command.name(), "Processing command");
                            self.handle_command(command).await;
                        }
                        None => {
                            info!("Command channel closed, shutting down");
                            self.shutdown().await;
                        }
                    }
                }

                event = self.mesh_events.recv(), if self.mesh_open => {
                    match event {
                        Some(event) => self.handle_mesh_event(event),
                        None => {
                            warn!("Mesh event channel closed");
                            self.mesh_open = false;
                        }
                    }
                }

                Some(fired) = self.timer_fires.recv() => {
                    self.handle_timer(fired);
                }

                Some(joined) = self.broadcasts.join_next(), if !self.broadcasts.is_empty() => {
                    self.handle_broadcast_finished(joined);
                }
            }
        }

        info!(peer = %self.state.peer_id, "Peer coordinator stopped");
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Commands
    // ------------------------------------------------------------------------

    async fn handle_command(&mut self, command: CoordinatorCommand) {
        match command {
            CoordinatorCommand::StartElection => self.run_election(),
            CoordinatorCommand::ResignHost => {
                let view = self.view();
                let effects = self.state.election.resign_host(&view);
                self.apply_effects(effects);
            }
            CoordinatorCommand::MigrateHost { to } => {
                let effects = self.state.election.migrate_host(to);
                self.apply_effects(effects);
            }
            CoordinatorCommand::ScheduleTimer {
                id,
                interval,
                repeats,
                reply,
            } => {
                let result = self
                    .timers
                    .schedule(app_timer_id(&id), interval, repeats, TimerAction::App(id))
                    .map(|_| ());
                let _ = reply.send(result);
            }
            CoordinatorCommand::CancelTimer { id, reply } => {
                let _ = reply.send(self.timers.cancel(&app_timer_id(&id)));
            }
            CoordinatorCommand::SendGameMessage {
                message_type,
                payload,
                priority,
                reply,
            } => {
                let _ = reply.send(self.send_game_message(message_type, payload, priority));
            }
            CoordinatorCommand::RestartSession => self.restart_session(),
            CoordinatorCommand::GetStatus { reply } => {
                let _ = reply.send(self.status());
            }
            CoordinatorCommand::Shutdown { reply } => {
                self.shutdown().await;
                let _ = reply.send(());
            }
        }
    }

    fn send_game_message(
        &mut self,
        message_type: String,
        payload: Vec<u8>,
        priority: Priority,
    ) -> Result<()> {
        if CoordinationKind::from_type_str(&message_type).is_some() {
            return Err(CoordinatorError::ReservedMessageType { message_type });
        }
        let frame = GameMessage::new(
            message_type.clone(),
            self.state.session_id.as_str(),
            self.state.peer_id.as_str(),
            payload,
        );
        let bytes = frame.encode()?;
        self.spawn_broadcast(message_type, bytes, priority);
        Ok(())
    }

    /// Application timers belong to the caller and keep running
    fn restart_session(&mut self) {
        info!(peer = %self.state.peer_id, "Restarting session");
        let cancelled = self.timers.cancel_matching(|id| !is_app_timer(id));
        debug!(cancelled, "Coordinator timers cancelled for restart");
        self.broadcasts.abort_all();
        let effects = self.state.teardown();
        self.apply_effects(effects);

        if let Err(error) = self.schedule_background_timers() {
            error!(%error, "Failed to reschedule heartbeat timers");
        }
        self.schedule(
            RESTART_TIMER,
            self.config.election.quick_restart_delay,
            false,
            TimerAction::QuickRestart,
        );
    }

    fn status(&self) -> CoordinatorStatus {
        let now = self.now();
        let election = &self.state.election;
        CoordinatorStatus {
            peer_id: self.state.peer_id.clone(),
            session_id: self.state.session_id.clone(),
            phase: election.phase(),
            state: election.state(),
            current_host: election.current_host().cloned(),
            is_host: election.is_host(),
            round: election.round(),
            connected_peers: self.transport.connected_peers(),
            live_peers: self
                .state
                .monitor
                .live_peers(self.config.heartbeat.host_timeout, now),
            excluded_peers: election.election_round().excluded.clone(),
            active_timers: self.timers.active_ids(),
            broadcasts_in_flight: self.broadcasts.len(),
            stats: self.state.stats.clone(),
        }
    }

    /// Cancel timers, stop broadcasts, forget the session; idempotent
    async fn shutdown(&mut self) {
        if !self.running {
            return;
        }
        info!(peer = %self.state.peer_id, "Peer coordinator shutting down");

        self.timers.cancel_all();
        self.broadcasts.abort_all();
        while self.broadcasts.join_next().await.is_some() {}

        // Timers are gone and nothing may be announced any more
        let _ = self.state.teardown();

        self.publish(CoordinatorEvent::ShutDown);
        self.running = false;
    }

    // ------------------------------------------------------------------------
    // Mesh Events
    // ------------------------------------------------------------------------

    fn handle_mesh_event(&mut self, event: MeshEvent) {
        match event {
            MeshEvent::PeerConnected { peer_id } => {
                debug!(peer = %peer_id, "Peer connected");
                self.state.election.peer_connected(&peer_id);
            }
            MeshEvent::PeerDisconnected { peer_id } => {
                debug!(peer = %peer_id, "Peer disconnected");
                self.state.election.peer_lost(&peer_id);
            }
            MeshEvent::MessageReceived { from, bytes } => self.handle_inbound(from, &bytes),
        }
    }

    fn handle_inbound(&mut self, from: PeerId, bytes: &[u8]) {
        match InboundMessage::decode(bytes) {
            Ok(InboundMessage::Coordination(message)) => {
                let view = self.view();
                let now = self.now();
                let effects = CoordinationHandlers::handle_coordination(
                    &mut self.state,
                    &from,
                    &message,
                    &view,
                    now,
                );
                self.apply_effects(effects);
            }
            Ok(InboundMessage::Game(message)) => {
                trace!(from = %from, kind = %message.message_type, "Game message received");
                self.publish(CoordinatorEvent::GameMessageReceived { from, message });
            }
            Err(error) => {
                self.state.stats.malformed_frames += 1;
                warn!(from = %from, %error, "Dropping malformed frame");
            }
        }
    }

    // ------------------------------------------------------------------------
    // Timers
    // ------------------------------------------------------------------------

    fn handle_timer(&mut self, fired: TimerFired<TimerAction>) {
        if !self.timers.accept(&fired) {
            return;
        }
        trace!(timer = %fired.id, "Timer fired");

        match fired.action {
            TimerAction::ConfirmElection { round } => {
                let view = self.view();
                let effects = self.state.election.confirm_election(round, view.candidates);
                self.apply_effects(effects);
            }
            TimerAction::HostHeartbeat => {
                if self.state.election.is_host() {
                    let heartbeat = CoordinationMessage::host_heartbeat(
                        self.state.peer_id.clone(),
                        self.state.election.round(),
                    );
                    self.announce(heartbeat);
                }
            }
            TimerAction::PeerHeartbeat => {
                let heartbeat = CoordinationMessage::peer_heartbeat(
                    self.state.peer_id.clone(),
                    self.state.election.current_host().cloned(),
                )
                .with_candidacy(self.state.election.stands_for_host());
                self.announce(heartbeat);
            }
            TimerAction::CheckHostTimeout => {
                let now = self.now();
                if let Some(host) = self
                    .state
                    .timed_out_host(now, self.config.heartbeat.host_timeout)
                {
                    debug!(host = %host, "Host heartbeat overdue");
                    let view = self.view();
                    let effects = self.state.election.handle_host_timeout(&view);
                    self.apply_effects(effects);
                }
            }
            TimerAction::QuickRestart => self.run_election(),
            TimerAction::App(id) => self.publish(CoordinatorEvent::TimerFired { id }),
        }
    }

    fn schedule_background_timers(&mut self) -> Result<()> {
        let heartbeat = &self.config.heartbeat;
        let (peer_interval, check_interval) = (heartbeat.peer_interval, heartbeat.check_interval);
        self.timers
            .schedule(PEER_HEARTBEAT_TIMER, peer_interval, true, TimerAction::PeerHeartbeat)?;
        self.timers.schedule(
            TIMEOUT_CHECK_TIMER,
            check_interval,
            true,
            TimerAction::CheckHostTimeout,
        )?;
        Ok(())
    }

    fn schedule(&mut self, id: &str, interval: Duration, repeats: bool, action: TimerAction) {
        if let Err(error) = self.timers.schedule(id, interval, repeats, action) {
            error!(timer = id, %error, "Failed to schedule timer");
        }
    }

    // ------------------------------------------------------------------------
    // Effects
    // ------------------------------------------------------------------------

    fn run_election(&mut self) {
        let view = self.view();
        match self.state.election.start_election(view.candidates) {
            Ok(effects) => self.apply_effects(effects),
            Err(error) => {
                self.publish(CoordinatorEvent::ElectionFailed {
                    reason: error.to_string(),
                });
                self.schedule(
                    RESTART_TIMER,
                    self.config.election.quick_restart_delay,
                    false,
                    TimerAction::QuickRestart,
                );
            }
        }
    }

    fn apply_effects(&mut self, effects: Vec<ElectionEffect>) {
        for effect in effects {
            match effect {
                ElectionEffect::StartHostHeartbeat => self.schedule(
                    HOST_HEARTBEAT_TIMER,
                    self.config.heartbeat.host_interval,
                    true,
                    TimerAction::HostHeartbeat,
                ),
                ElectionEffect::StopHostHeartbeat => {
                    self.timers.cancel(HOST_HEARTBEAT_TIMER);
                }
                ElectionEffect::ScheduleConfirmation { round } => self.schedule(
                    CONFIRM_TIMER,
                    self.config.election.confirmation_delay,
                    false,
                    TimerAction::ConfirmElection { round },
                ),
                ElectionEffect::ScheduleRestart => self.schedule(
                    RESTART_TIMER,
                    self.config.election.quick_restart_delay,
                    false,
                    TimerAction::QuickRestart,
                ),
                ElectionEffect::Announce(message) => self.announce(message),
                ElectionEffect::Notify(event) => self.publish(event),
            }
        }
    }

    /// Fire-and-forget broadcast of a coordination message
    fn announce(&mut self, message: CoordinationMessage) {
        match message.encode(&self.state.session_id) {
            Ok(bytes) => self.spawn_broadcast(message.kind.to_string(), bytes, Priority::High),
            Err(error) => error!(kind = %message.kind, %error, "Failed to encode coordination message"),
        }
    }

    fn spawn_broadcast(&mut self, kind: String, bytes: Vec<u8>, priority: Priority) {
        let broadcaster = self.broadcaster.clone();
        self.broadcasts.spawn(async move {
            let result = broadcaster.broadcast(bytes, priority).await;
            BroadcastOutcome { kind, result }
        });
    }

    fn handle_broadcast_finished(&mut self, joined: core::result::Result<BroadcastOutcome, JoinError>) {
        match joined {
            Ok(BroadcastOutcome { kind, result }) => match result {
                Ok(attempts) => {
                    self.state.stats.broadcasts_sent += 1;
                    trace!(kind = %kind, attempts, "Broadcast delivered");
                }
                Err(CoordinatorError::BroadcastExhausted {
                    attempts,
                    last_error,
                }) => {
                    warn!(kind = %kind, attempts, error = %last_error, "Broadcast exhausted");
                    self.publish(CoordinatorEvent::BroadcastExhausted {
                        kind,
                        attempts,
                        error: last_error.to_string(),
                    });
                }
                Err(error) => warn!(kind = %kind, %error, "Broadcast failed"),
            },
            Err(join_error) if join_error.is_cancelled() => {}
            Err(join_error) => error!(error = %join_error, "Broadcast task panicked"),
        }
    }

    // ------------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------------

    fn now(&self) -> Timestamp {
        self.time_source.now()
    }

    fn view(&self) -> PeerView {
        self.state.peer_view(
            &self.transport.connected_peers(),
            self.now(),
            self.config.heartbeat.host_timeout,
        )
    }

    fn publish(&mut self, event: CoordinatorEvent) {
        let now = self.now();
        self.state.record_event(&event, now);
        debug!(peer = %self.state.peer_id, event = event.name(), "Publishing event");
        // No subscribers is fine
        let _ = self.event_sender.send(event);
    }
}
