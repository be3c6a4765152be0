//! Command handlers for the meshhost CLI

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, sleep_until, Instant, MissedTickBehavior};
use tracing::{info, warn};

use meshhost_core::{CoordinatorEvent, InMemoryMesh, PeerId, SessionId};
use meshhost_runtime::{CoordinatorBuilder, CoordinatorHandle, CoordinatorStatus};

use crate::cli::{Cli, Commands};
use crate::config::AppConfig;
use crate::error::{CliError, Result};

/// Command dispatcher for handling CLI commands
pub struct CommandDispatcher;

impl CommandDispatcher {
    /// Execute a CLI command
    pub async fn execute(cli: Cli, config: AppConfig) -> Result<()> {
        match cli.command {
            Commands::Simulate {
                peers,
                duration,
                silence_host_after,
                restore_after,
            } => {
                let plan = SimulationPlan::new(peers, duration, silence_host_after, restore_after)?;
                Self::handle_simulate_command(config, plan).await
            }
            Commands::Config => {
                println!("{}", config.to_toml()?);
                Ok(())
            }
        }
    }

    async fn handle_simulate_command(config: AppConfig, plan: SimulationPlan) -> Result<()> {
        info!(
            peers = plan.peers.len(),
            duration = ?plan.duration,
            "Starting election simulation"
        );
        let simulation = Simulation::start(&config, &plan.peers).await?;
        simulation.run(&plan, &config).await
    }
}

// ----------------------------------------------------------------------------
// Simulation Plan
// ----------------------------------------------------------------------------

/// Validated arguments of the `simulate` command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulationPlan {
    pub peers: Vec<PeerId>,
    pub duration: Duration,
    pub silence_at: Option<Duration>,
    pub restore_at: Option<Duration>,
}

impl SimulationPlan {
    pub fn new(
        peers: Vec<String>,
        duration_secs: u64,
        silence_after: Option<u64>,
        restore_after: Option<u64>,
    ) -> Result<Self> {
        let unique: BTreeSet<&str> = peers.iter().map(String::as_str).collect();
        if peers.is_empty() || unique.contains("") {
            return Err(CliError::Simulation("Peer ids cannot be empty".into()));
        }
        if unique.len() != peers.len() {
            return Err(CliError::Simulation("Peer ids must be unique".into()));
        }
        if duration_secs == 0 {
            return Err(CliError::Simulation("Duration cannot be zero".into()));
        }
        if let Some(at) = silence_after {
            if at >= duration_secs {
                return Err(CliError::Simulation(
                    "Host must be silenced before the simulation ends".into(),
                ));
            }
        }
        if let (Some(silence), Some(restore)) = (silence_after, restore_after) {
            if restore <= silence {
                return Err(CliError::Simulation(
                    "Host must be restored after it was silenced".into(),
                ));
            }
        }

        Ok(Self {
            peers: peers.into_iter().map(PeerId::new).collect(),
            duration: Duration::from_secs(duration_secs),
            silence_at: silence_after.map(Duration::from_secs),
            restore_at: restore_after.map(Duration::from_secs),
        })
    }
}

// ----------------------------------------------------------------------------
// Simulation
// ----------------------------------------------------------------------------

/// Coordinators of every simulated peer sharing one in-memory mesh
struct Simulation {
    mesh: InMemoryMesh,
    handles: Vec<CoordinatorHandle>,
    loggers: Vec<JoinHandle<()>>,
}

impl Simulation {
    async fn start(config: &AppConfig, peers: &[PeerId]) -> Result<Self> {
        let mesh = InMemoryMesh::new();
        let session = SessionId::new(config.simulation.session.clone());
        let inbox = config.coordinator.channels.mesh_event_buffer_size;
        let endpoints: Vec<_> = peers
            .iter()
            .map(|peer| mesh.join(peer.clone(), inbox))
            .collect();

        let mut handles = Vec::with_capacity(peers.len());
        let mut loggers = Vec::with_capacity(peers.len());
        for (peer, (endpoint, events)) in peers.iter().zip(endpoints) {
            let handle = CoordinatorBuilder::new(peer.clone(), Arc::new(endpoint), events)
                .with_config(config.coordinator.clone())
                .with_session(session.clone())
                .build_and_start()
                .await?;
            loggers.push(spawn_event_logger(&handle));
            handles.push(handle);
        }

        Ok(Self {
            mesh,
            handles,
            loggers,
        })
    }

    async fn run(self, plan: &SimulationPlan, config: &AppConfig) -> Result<()> {
        let start = Instant::now();
        let deadline = sleep(plan.duration);
        tokio::pin!(deadline);

        let mut status = interval(Duration::from_secs(config.simulation.status_interval_secs));
        status.set_missed_tick_behavior(MissedTickBehavior::Delay);
        status.tick().await;

        let mut silence_at = plan.silence_at.map(|after| start + after);
        let mut restore_at = plan.restore_at.map(|after| start + after);
        let mut silenced: Option<PeerId> = None;

        loop {
            tokio::select! {
                _ = &mut deadline => break,

                _ = status.tick() => self.report(silenced.as_ref()).await,

                _ = sleep_until(silence_at.unwrap_or(start)), if silence_at.is_some() => {
                    silence_at = None;
                    silenced = self.silence_host().await;
                }

                _ = sleep_until(restore_at.unwrap_or(start)), if restore_at.is_some() && silence_at.is_none() => {
                    restore_at = None;
                    if let Some(peer) = silenced.take() {
                        info!(peer = %peer, "Restoring silenced peer");
                        self.mesh.set_muted(&peer, false);
                    }
                }
            }
        }

        self.report(silenced.as_ref()).await;
        self.shutdown().await
    }

    /// Mute whichever peer the coordinators currently agree is host
    async fn silence_host(&self) -> Option<PeerId> {
        let statuses = self.statuses().await;
        let Some(host) = statuses.iter().find_map(|status| status.current_host.clone()) else {
            warn!("No host elected yet, nothing to silence");
            return None;
        };
        info!(host = %host, "Silencing host");
        self.mesh.set_muted(&host, true);
        Some(host)
    }

    async fn statuses(&self) -> Vec<CoordinatorStatus> {
        join_all(self.handles.iter().map(|handle| handle.status()))
            .await
            .into_iter()
            .filter_map(|status| status.ok())
            .collect()
    }

    async fn report(&self, silenced: Option<&PeerId>) {
        let statuses = self.statuses().await;
        for status in &statuses {
            info!(
                peer = %status.peer_id,
                phase = %status.phase,
                host = status.current_host.as_ref().map(PeerId::as_str).unwrap_or("-"),
                round = status.round,
                live_peers = status.live_peers.len(),
                "Status"
            );
        }

        let hosts: BTreeSet<Option<PeerId>> = statuses
            .iter()
            .filter(|status| Some(&status.peer_id) != silenced)
            .map(|status| status.current_host.clone())
            .collect();
        match hosts.into_iter().collect::<Vec<_>>().as_slice() {
            [Some(host)] => info!(host = %host, "Reachable peers agree on the host"),
            [None] => info!("No host elected yet"),
            hosts => warn!(?hosts, "Reachable peers disagree on the host"),
        }
    }

    async fn shutdown(mut self) -> Result<()> {
        for result in join_all(self.handles.iter_mut().map(|handle| handle.shutdown())).await {
            result?;
        }
        for logger in self.loggers {
            if let Err(error) = logger.await {
                warn!(%error, "Event logger ended abnormally");
            }
        }
        info!("Simulation finished");
        Ok(())
    }
}

/// Log every event published by one coordinator until it shuts down
fn spawn_event_logger(handle: &CoordinatorHandle) -> JoinHandle<()> {
    let peer = handle.peer_id().clone();
    let mut events = handle.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(CoordinatorEvent::ShutDown) | Err(RecvError::Closed) => break,
                Ok(event) => log_event(&peer, &event),
                Err(RecvError::Lagged(skipped)) => warn!(peer = %peer, skipped, "Event log lagged"),
            }
        }
    })
}

fn log_event(peer: &PeerId, event: &CoordinatorEvent) {
    match event {
        CoordinatorEvent::ElectionStarted { round, candidates } => {
            info!(peer = %peer, round, candidates = candidates.len(), "Election started")
        }
        CoordinatorEvent::ElectionCompleted { round, host } => {
            info!(peer = %peer, round, host = %host, "Election completed")
        }
        CoordinatorEvent::ElectionFailed { reason } => {
            warn!(peer = %peer, reason = %reason, "Election failed")
        }
        CoordinatorEvent::HostChanged { host, is_self } => info!(
            peer = %peer,
            host = host.as_ref().map(PeerId::as_str).unwrap_or("-"),
            is_self,
            "Host changed"
        ),
        CoordinatorEvent::HostTimeoutDetected { host } => {
            warn!(peer = %peer, host = %host, "Host timed out")
        }
        CoordinatorEvent::BroadcastExhausted {
            kind,
            attempts,
            error,
        } => warn!(peer = %peer, kind = %kind, attempts, error = %error, "Broadcast gave up"),
        other => info!(peer = %peer, event = other.name(), "Event"),
    }
}
