//! Centralized Configuration Management
//!
//! All timing constants of the coordination protocol live here. The defaults
//! are the interoperability values every peer in a session must share; the
//! other presets only exist for tests and local simulation.

use core::time::Duration;
use serde::{Deserialize, Serialize};

use crate::errors::{CoordinatorError, Result};

// ----------------------------------------------------------------------------
// Election Configuration
// ----------------------------------------------------------------------------

/// Timing of election rounds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ElectionConfig {
    /// Whether this peer is a candidate in its own elections
    pub stand_for_host: bool,
    /// Delay between the optimistic result and its confirmation
    pub confirmation_delay: Duration,
    /// Delay before retrying a failed election or restarting a session
    pub quick_restart_delay: Duration,
}

impl Default for ElectionConfig {
    fn default() -> Self {
        Self {
            stand_for_host: true,
            confirmation_delay: Duration::from_secs(2),
            quick_restart_delay: Duration::from_secs(2),
        }
    }
}

// ----------------------------------------------------------------------------
// Heartbeat Configuration
// ----------------------------------------------------------------------------

/// Liveness announcement and failure detection timing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeartbeatConfig {
    /// Interval of host heartbeats
    pub host_interval: Duration,
    /// Interval of peer (follower) heartbeats
    pub peer_interval: Duration,
    /// Silence after which the host is considered lost
    pub host_timeout: Duration,
    /// How often the coordinator checks the host for timeout
    pub check_interval: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            host_interval: Duration::from_secs(5),
            peer_interval: Duration::from_secs(10),
            host_timeout: Duration::from_secs(15),
            check_interval: Duration::from_secs(1),
        }
    }
}

// ----------------------------------------------------------------------------
// Broadcast Configuration
// ----------------------------------------------------------------------------

/// Retry policy of the reliable broadcaster
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BroadcastConfig {
    /// Maximum number of send attempts per broadcast
    pub max_attempts: u32,
    /// Base of the linear backoff (attempt n waits (n - 1) * base)
    pub backoff_base: Duration,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base: Duration::from_secs(1),
        }
    }
}

// ----------------------------------------------------------------------------
// Channel Configuration
// ----------------------------------------------------------------------------

/// Buffer sizes of the coordinator's channels
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Buffer size for commands (handle → coordinator)
    pub command_buffer_size: usize,
    /// Buffer size for mesh events (transport → coordinator)
    pub mesh_event_buffer_size: usize,
    /// Capacity of the broadcast channel carrying coordinator events
    pub event_buffer_size: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            command_buffer_size: 32,
            mesh_event_buffer_size: 128,
            event_buffer_size: 64,
        }
    }
}

impl ChannelConfig {
    /// Create configuration optimized for testing
    pub fn testing() -> Self {
        Self {
            command_buffer_size: 100,
            mesh_event_buffer_size: 256,
            event_buffer_size: 256,
        }
    }
}

// ----------------------------------------------------------------------------
// Main Configuration
// ----------------------------------------------------------------------------

/// Complete coordinator configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    pub election: ElectionConfig,
    pub heartbeat: HeartbeatConfig,
    pub broadcast: BroadcastConfig,
    pub channels: ChannelConfig,
}

impl CoordinatorConfig {
    /// Create new configuration with the protocol defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new builder
    pub fn builder() -> CoordinatorConfigBuilder {
        CoordinatorConfigBuilder::new()
    }

    /// Protocol timings with roomier channels for tests
    pub fn testing() -> Self {
        Self {
            channels: ChannelConfig::testing(),
            ..Self::default()
        }
    }

    /// Validate the configuration for consistency
    pub fn validate(&self) -> Result<()> {
        let nonzero = [
            ("Confirmation delay", self.election.confirmation_delay),
            ("Quick restart delay", self.election.quick_restart_delay),
            ("Host heartbeat interval", self.heartbeat.host_interval),
            ("Peer heartbeat interval", self.heartbeat.peer_interval),
            ("Host timeout", self.heartbeat.host_timeout),
            ("Timeout check interval", self.heartbeat.check_interval),
        ];
        for (name, value) in nonzero {
            if value.is_zero() {
                return Err(CoordinatorError::config_error(format!(
                    "{name} cannot be zero"
                )));
            }
        }

        if self.heartbeat.host_timeout <= self.heartbeat.host_interval {
            return Err(CoordinatorError::config_error(
                "Host timeout must be longer than the host heartbeat interval",
            ));
        }

        if self.broadcast.max_attempts == 0 {
            return Err(CoordinatorError::config_error(
                "Broadcast max attempts cannot be zero",
            ));
        }

        if self.channels.command_buffer_size == 0
            || self.channels.mesh_event_buffer_size == 0
            || self.channels.event_buffer_size == 0
        {
            return Err(CoordinatorError::config_error(
                "Channel buffer sizes cannot be zero",
            ));
        }

        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Configuration Builder
// ----------------------------------------------------------------------------

/// Builder for [`CoordinatorConfig`]
#[derive(Debug, Default)]
pub struct CoordinatorConfigBuilder {
    election: Option<ElectionConfig>,
    heartbeat: Option<HeartbeatConfig>,
    broadcast: Option<BroadcastConfig>,
    channels: Option<ChannelConfig>,
}

impl CoordinatorConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn election(mut self, config: ElectionConfig) -> Self {
        self.election = Some(config);
        self
    }

    pub fn heartbeat(mut self, config: HeartbeatConfig) -> Self {
        self.heartbeat = Some(config);
        self
    }

    pub fn broadcast(mut self, config: BroadcastConfig) -> Self {
        self.broadcast = Some(config);
        self
    }

    pub fn channels(mut self, config: ChannelConfig) -> Self {
        self.channels = Some(config);
        self
    }

    /// Build and validate the configuration
    pub fn build(self) -> Result<CoordinatorConfig> {
        let config = self.build_unchecked();
        config.validate()?;
        Ok(config)
    }

    /// Build the configuration without validation
    pub fn build_unchecked(self) -> CoordinatorConfig {
        CoordinatorConfig {
            election: self.election.unwrap_or_default(),
            heartbeat: self.heartbeat.unwrap_or_default(),
            broadcast: self.broadcast.unwrap_or_default(),
            channels: self.channels.unwrap_or_default(),
        }
    }
}
