//! Error types for meshhost
//!
//! This module contains all error types used by the coordination core:
//! transport errors reported by the mesh collaborator, framing errors raised
//! by the wire codec, and the `CoordinatorError` type that unifies them.
//!
//! Nothing in here is fatal. Election failures and exhausted broadcasts are
//! reported to subscribers and superseded by the next periodic check.

// ----------------------------------------------------------------------------
// Specific Error Types
// ----------------------------------------------------------------------------

/// Errors reported by the mesh transport collaborator
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("Transport is not available: {reason}")]
    Unavailable { reason: String },
    #[error("Send failed: {reason}")]
    SendFailed { reason: String },
    #[error("Peer not found: {peer_id}")]
    PeerNotFound { peer_id: String },
    #[error("Transport shutdown: {reason}")]
    Shutdown { reason: String },
}

/// Errors raised while decoding (or, for payloads, encoding) framed messages
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    #[error("Frame truncated while reading {field} (needed {needed} bytes, {available} available)")]
    Truncated {
        field: &'static str,
        needed: usize,
        available: usize,
    },
    #[error("Payload too large (max {max}, got {actual})")]
    PayloadTooLarge { max: usize, actual: usize },
    #[error("Field {field} is not valid UTF-8")]
    InvalidUtf8 { field: &'static str },
    #[error("Frame has {count} trailing bytes")]
    TrailingBytes { count: usize },
    #[error("Unknown coordination message kind: {kind}")]
    UnknownKind { kind: String },
}

// ----------------------------------------------------------------------------
// Coordinator Error
// ----------------------------------------------------------------------------

/// Core error type for the coordination layer
#[derive(Debug, thiserror::Error)]
pub enum CoordinatorError {
    /// The candidate set was empty; retryable
    #[error("Election failed: empty candidate set")]
    ElectionFailed,

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Every attempt of a reliable broadcast failed
    #[error("Broadcast exhausted after {attempts} attempts: {last_error}")]
    BroadcastExhausted {
        attempts: u32,
        last_error: TransportError,
    },

    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// Channel communication error between the handle and the coordinator task
    #[error("Channel error: {message}")]
    Channel { message: String },

    #[error("Configuration error: {reason}")]
    Configuration { reason: String },

    /// Application messages may not use a coordination type string
    #[error("Message type {message_type} is reserved for coordination traffic")]
    ReservedMessageType { message_type: String },

    /// The coordinator has already been shut down
    #[error("Coordinator is shut down")]
    ShutDown,
}

// ----------------------------------------------------------------------------
// Convenience Error Constructors
// ----------------------------------------------------------------------------

impl CoordinatorError {
    /// Create a channel error with a message
    pub fn channel_error<T: Into<String>>(message: T) -> Self {
        CoordinatorError::Channel {
            message: message.into(),
        }
    }

    /// Create a configuration error with a reason
    pub fn config_error<T: Into<String>>(reason: T) -> Self {
        CoordinatorError::Configuration {
            reason: reason.into(),
        }
    }

    /// Whether the condition may clear up on its own and is worth retrying
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CoordinatorError::ElectionFailed
                | CoordinatorError::BroadcastExhausted { .. }
                | CoordinatorError::Transport(TransportError::SendFailed { .. })
                | CoordinatorError::Transport(TransportError::Unavailable { .. })
        )
    }
}

// ----------------------------------------------------------------------------
// Type Aliases
// ----------------------------------------------------------------------------

pub type Result<T> = core::result::Result<T, CoordinatorError>;
