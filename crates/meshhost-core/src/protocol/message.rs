//! Coordination messages
//!
//! Election and heartbeat traffic uses dedicated message kinds carried in the
//! same frame as game messages: the frame's type string names the kind, the
//! room id carries the session, the sender field carries the sender's PeerId
//! and the payload is a bincode-encoded [`CoordinationBody`]. Frames with any
//! other type string are application game messages.

use serde::{Deserialize, Serialize};

use crate::errors::{FrameError, Result};
use crate::protocol::wire::GameMessage;
use crate::types::{PeerId, SessionId};

// ----------------------------------------------------------------------------
// Message Kinds
// ----------------------------------------------------------------------------

/// Kinds of coordination traffic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CoordinationKind {
    /// A peer started an election round
    ElectionStart,
    /// A peer announces who the host is (itself, after winning)
    HostAnnouncement,
    /// The host stepped down
    HostResigned,
    /// Periodic liveness from the host
    HostHeartbeat,
    /// Periodic liveness from any peer
    PeerHeartbeat,
}

impl CoordinationKind {
    pub const ALL: [CoordinationKind; 5] = [
        CoordinationKind::ElectionStart,
        CoordinationKind::HostAnnouncement,
        CoordinationKind::HostResigned,
        CoordinationKind::HostHeartbeat,
        CoordinationKind::PeerHeartbeat,
    ];

    /// Type string used in the frame
    pub fn as_type_str(&self) -> &'static str {
        match self {
            CoordinationKind::ElectionStart => "election.start",
            CoordinationKind::HostAnnouncement => "election.host",
            CoordinationKind::HostResigned => "election.resign",
            CoordinationKind::HostHeartbeat => "heartbeat.host",
            CoordinationKind::PeerHeartbeat => "heartbeat.peer",
        }
    }

    /// Parse a frame type string, `None` for application message types
    pub fn from_type_str(kind: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_type_str() == kind)
    }

    /// Whether the message asserts a host identity
    pub fn claims_host(&self) -> bool {
        matches!(
            self,
            CoordinationKind::HostAnnouncement | CoordinationKind::HostHeartbeat
        )
    }
}

impl core::fmt::Display for CoordinationKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_type_str())
    }
}

// ----------------------------------------------------------------------------
// Coordination Message
// ----------------------------------------------------------------------------

/// Payload shared by all coordination kinds
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoordinationBody {
    /// Host named by the message, if any
    pub host: Option<PeerId>,
    /// Candidate set the sender saw (election start only)
    pub candidates: Vec<PeerId>,
    /// Sender's local election round counter
    pub round: u64,
    /// Whether the sender stands as a candidate itself
    pub stands_for_host: bool,
}

/// A decoded coordination message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoordinationMessage {
    pub kind: CoordinationKind,
    pub sender: PeerId,
    pub body: CoordinationBody,
}

impl CoordinationMessage {
    pub fn election_start(sender: PeerId, candidates: Vec<PeerId>, round: u64) -> Self {
        Self {
            kind: CoordinationKind::ElectionStart,
            sender,
            body: CoordinationBody {
                host: None,
                candidates,
                round,
                stands_for_host: true,
            },
        }
    }

    pub fn host_announcement(host: PeerId, round: u64) -> Self {
        Self {
            kind: CoordinationKind::HostAnnouncement,
            sender: host.clone(),
            body: CoordinationBody {
                host: Some(host),
                candidates: Vec::new(),
                round,
                stands_for_host: true,
            },
        }
    }

    pub fn host_resigned(host: PeerId, round: u64) -> Self {
        Self {
            kind: CoordinationKind::HostResigned,
            sender: host.clone(),
            body: CoordinationBody {
                host: Some(host),
                candidates: Vec::new(),
                round,
                stands_for_host: true,
            },
        }
    }

    pub fn host_heartbeat(host: PeerId, round: u64) -> Self {
        Self {
            kind: CoordinationKind::HostHeartbeat,
            sender: host.clone(),
            body: CoordinationBody {
                host: Some(host),
                candidates: Vec::new(),
                round,
                stands_for_host: true,
            },
        }
    }

    pub fn peer_heartbeat(sender: PeerId, believed_host: Option<PeerId>) -> Self {
        Self {
            kind: CoordinationKind::PeerHeartbeat,
            sender,
            body: CoordinationBody {
                host: believed_host,
                candidates: Vec::new(),
                round: 0,
                stands_for_host: true,
            },
        }
    }

    /// Declare whether the sender is a candidate; host traffic always is
    pub fn with_candidacy(mut self, stands_for_host: bool) -> Self {
        self.body.stands_for_host = stands_for_host || self.kind.claims_host();
        self
    }

    /// Wrap into a game frame for the given session
    pub fn to_frame(&self, session: &SessionId) -> Result<GameMessage> {
        Ok(GameMessage::new(
            self.kind.as_type_str(),
            session.as_str(),
            self.sender.as_str(),
            bincode::serialize(&self.body)?,
        ))
    }

    /// Encode straight to wire bytes
    pub fn encode(&self, session: &SessionId) -> Result<Vec<u8>> {
        Ok(self.to_frame(session)?.encode()?)
    }

    /// Interpret a game frame as a coordination message
    pub fn from_frame(frame: &GameMessage) -> Result<Self> {
        let kind = CoordinationKind::from_type_str(&frame.message_type).ok_or_else(|| {
            FrameError::UnknownKind {
                kind: frame.message_type.clone(),
            }
        })?;
        let body: CoordinationBody = bincode::deserialize(&frame.payload)?;
        Ok(Self {
            kind,
            sender: PeerId::new(frame.sender.clone()),
            body,
        })
    }
}

// ----------------------------------------------------------------------------
// Inbound Classification
// ----------------------------------------------------------------------------

/// A received frame, classified
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundMessage {
    Coordination(CoordinationMessage),
    Game(GameMessage),
}

impl InboundMessage {
    /// Decode raw bytes and classify them by type string
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let frame = GameMessage::decode(bytes)?;
        if CoordinationKind::from_type_str(&frame.message_type).is_some() {
            Ok(InboundMessage::Coordination(CoordinationMessage::from_frame(
                &frame,
            )?))
        } else {
            Ok(InboundMessage::Game(frame))
        }
    }
}
