//! Transport abstraction for meshhost
//!
//! The real mesh (discovery, raw radio I/O, connection lifecycle) lives
//! outside this crate. The coordinator only needs the connected peer list,
//! an unreliable "send to everyone" primitive, and a stream of inbound
//! [`MeshEvent`]s. [`InMemoryMesh`] implements all three in-process for tests
//! and local simulation.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::errors::TransportError;
use crate::types::PeerId;

// ----------------------------------------------------------------------------
// Transport Trait
// ----------------------------------------------------------------------------

/// Delivery priority hint passed to the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Priority {
    Low,
    Normal,
    High,
}

/// Mesh transport collaborator
#[async_trait]
pub trait MeshTransport: Send + Sync {
    /// Peers currently connected to this device
    fn connected_peers(&self) -> BTreeSet<PeerId>;

    /// Send bytes to every connected peer, without delivery guarantees
    async fn send_broadcast(&self, bytes: Vec<u8>, priority: Priority) -> Result<(), TransportError>;
}

#[async_trait]
impl<T: MeshTransport + ?Sized> MeshTransport for Arc<T> {
    fn connected_peers(&self) -> BTreeSet<PeerId> {
        (**self).connected_peers()
    }

    async fn send_broadcast(&self, bytes: Vec<u8>, priority: Priority) -> Result<(), TransportError> {
        (**self).send_broadcast(bytes, priority).await
    }
}

// ----------------------------------------------------------------------------
// Transport Events
// ----------------------------------------------------------------------------

/// Inbound events delivered by the transport to the coordinator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MeshEvent {
    PeerConnected { peer_id: PeerId },
    PeerDisconnected { peer_id: PeerId },
    MessageReceived { from: PeerId, bytes: Vec<u8> },
}

pub type MeshEventSender = mpsc::Sender<MeshEvent>;
pub type MeshEventReceiver = mpsc::Receiver<MeshEvent>;

// ----------------------------------------------------------------------------
// In-Memory Mesh
// ----------------------------------------------------------------------------

#[derive(Debug)]
struct NodeState {
    events: MeshEventSender,
    online: bool,
    muted: bool,
    fail_next_sends: u32,
    fail_all_sends: bool,
    send_attempts: u64,
    delivered: u64,
}

#[derive(Debug, Default)]
struct MeshState {
    nodes: BTreeMap<PeerId, NodeState>,
}

impl MeshState {
    fn notify_others(&self, except: &PeerId, event: MeshEvent) {
        for (peer, node) in &self.nodes {
            if peer != except && node.online {
                let _ = node.events.try_send(event.clone());
            }
        }
    }
}

/// In-process mesh connecting any number of peers
///
/// Every online peer is connected to every other online peer. Delivery is
/// best effort: a full inbox drops the message, like a lossy radio link.
#[derive(Debug, Clone, Default)]
pub struct InMemoryMesh {
    state: Arc<Mutex<MeshState>>,
}

impl InMemoryMesh {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MeshState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Attach a peer, returning its transport endpoint and inbound event stream
    ///
    /// Existing peers receive `PeerConnected` for the newcomer and the
    /// newcomer receives `PeerConnected` for each of them.
    pub fn join(&self, peer: PeerId, buffer: usize) -> (MeshEndpoint, MeshEventReceiver) {
        let (events, receiver) = mpsc::channel(buffer.max(1));
        let mut state = self.lock();

        for (other, node) in &state.nodes {
            if node.online {
                let _ = events.try_send(MeshEvent::PeerConnected {
                    peer_id: other.clone(),
                });
            }
        }
        state.notify_others(
            &peer,
            MeshEvent::PeerConnected {
                peer_id: peer.clone(),
            },
        );
        state.nodes.insert(
            peer.clone(),
            NodeState {
                events,
                online: true,
                muted: false,
                fail_next_sends: 0,
                fail_all_sends: false,
                send_attempts: 0,
                delivered: 0,
            },
        );
        debug!(peer = %peer, "Peer joined in-memory mesh");

        (
            MeshEndpoint {
                local: peer,
                mesh: self.clone(),
            },
            receiver,
        )
    }

    /// Take a peer off the air (or bring it back), notifying the others
    pub fn set_online(&self, peer: &PeerId, online: bool) {
        let mut state = self.lock();
        let changed = match state.nodes.get_mut(peer) {
            Some(node) if node.online != online => {
                node.online = online;
                true
            }
            _ => false,
        };
        if !changed {
            return;
        }

        let event = if online {
            MeshEvent::PeerConnected {
                peer_id: peer.clone(),
            }
        } else {
            MeshEvent::PeerDisconnected {
                peer_id: peer.clone(),
            }
        };
        state.notify_others(peer, event);

        if online {
            if let Some(node) = state.nodes.get(peer) {
                for (other, other_node) in &state.nodes {
                    if other != peer && other_node.online {
                        let _ = node.events.try_send(MeshEvent::PeerConnected {
                            peer_id: other.clone(),
                        });
                    }
                }
            }
        }
    }

    /// Silently drop everything `peer` sends while keeping it connected
    pub fn set_muted(&self, peer: &PeerId, muted: bool) {
        if let Some(node) = self.lock().nodes.get_mut(peer) {
            node.muted = muted;
        }
    }

    /// Make the next `count` sends of `peer` fail with `SendFailed`
    pub fn fail_next_sends(&self, peer: &PeerId, count: u32) {
        if let Some(node) = self.lock().nodes.get_mut(peer) {
            node.fail_next_sends = count;
        }
    }

    /// Make every send of `peer` fail until switched off again
    pub fn fail_all_sends(&self, peer: &PeerId, fail: bool) {
        if let Some(node) = self.lock().nodes.get_mut(peer) {
            node.fail_all_sends = fail;
        }
    }

    /// Number of `send_broadcast` calls made by `peer`, failed ones included
    pub fn send_attempts(&self, peer: &PeerId) -> u64 {
        self.lock()
            .nodes
            .get(peer)
            .map(|node| node.send_attempts)
            .unwrap_or(0)
    }

    /// Number of messages delivered to `peer`'s inbox
    pub fn delivered_to(&self, peer: &PeerId) -> u64 {
        self.lock()
            .nodes
            .get(peer)
            .map(|node| node.delivered)
            .unwrap_or(0)
    }
}

/// One peer's view of an [`InMemoryMesh`]
#[derive(Debug, Clone)]
pub struct MeshEndpoint {
    local: PeerId,
    mesh: InMemoryMesh,
}

#[async_trait]
impl MeshTransport for MeshEndpoint {
    fn connected_peers(&self) -> BTreeSet<PeerId> {
        let state = self.mesh.lock();
        let online = state
            .nodes
            .get(&self.local)
            .map(|node| node.online)
            .unwrap_or(false);
        if !online {
            return BTreeSet::new();
        }
        state
            .nodes
            .iter()
            .filter(|(peer, node)| **peer != self.local && node.online)
            .map(|(peer, _)| peer.clone())
            .collect()
    }

    async fn send_broadcast(&self, bytes: Vec<u8>, priority: Priority) -> Result<(), TransportError> {
        let mut state = self.mesh.lock();
        let node = state
            .nodes
            .get_mut(&self.local)
            .ok_or_else(|| TransportError::PeerNotFound {
                peer_id: self.local.to_string(),
            })?;
        node.send_attempts += 1;

        if !node.online {
            return Err(TransportError::Unavailable {
                reason: format!("{} is offline", self.local),
            });
        }
        if node.fail_all_sends {
            return Err(TransportError::SendFailed {
                reason: "injected failure".into(),
            });
        }
        if node.fail_next_sends > 0 {
            node.fail_next_sends -= 1;
            return Err(TransportError::SendFailed {
                reason: "injected failure".into(),
            });
        }
        if node.muted {
            trace!(peer = %self.local, "Muted peer send dropped");
            return Ok(());
        }

        trace!(peer = %self.local, len = bytes.len(), ?priority, "Broadcasting on in-memory mesh");
        let event = MeshEvent::MessageReceived {
            from: self.local.clone(),
            bytes,
        };
        for (peer, other) in state.nodes.iter_mut() {
            if *peer != self.local && other.online && other.events.try_send(event.clone()).is_ok() {
                other.delivered += 1;
            }
        }
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
