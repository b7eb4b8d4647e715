//! Handshake controller
//!
//! Drives the bootstrap exchange with a freshly accepted node: request its id,
//! wait (bounded) for the inbound `id` message to assign an identity, then
//! request the rest of its configuration. The wait is a `watch` channel with
//! an explicit timeout rather than a poll loop.

use core::time::Duration;

use tokio::sync::watch;
use tracing::debug;

use atoll_core::{ClusterMessage, MessageTag, NodeId, SessionError, Transmitter};

/// Requests sent once the node's identity is known
const FOLLOW_UP_REQUESTS: [MessageTag; 3] = [
    MessageTag::GetUser,
    MessageTag::GetExecRoot,
    MessageTag::GetFileRoot,
];

/// Progress of the identity handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    /// Waiting for the node to report its id
    Pending,
    /// Identity bound to the session
    Assigned(NodeId),
    /// Session was torn down before an id arrived
    Aborted,
}

/// Single-shot identity signal shared by the inbound dispatcher and the
/// constructing flow
#[derive(Debug)]
pub struct HandshakeController {
    state: watch::Sender<HandshakeState>,
}

impl Default for HandshakeController {
    fn default() -> Self {
        Self::new()
    }
}

impl HandshakeController {
    pub fn new() -> Self {
        let (state, _) = watch::channel(HandshakeState::Pending);
        Self { state }
    }

    pub fn state(&self) -> HandshakeState {
        *self.state.borrow()
    }

    /// Record the assigned id. Only the first transition out of `Pending`
    /// takes effect.
    pub fn assign(&self, id: NodeId) -> bool {
        self.transition(HandshakeState::Assigned(id))
    }

    /// Release any waiter because the session is closing
    pub fn abort(&self) -> bool {
        self.transition(HandshakeState::Aborted)
    }

    fn transition(&self, next: HandshakeState) -> bool {
        self.state.send_if_modified(|state| {
            if *state == HandshakeState::Pending {
                *state = next;
                true
            } else {
                false
            }
        })
    }

    /// Wait for the identity, up to `timeout`
    pub async fn wait(&self, timeout: Duration) -> Result<NodeId, SessionError> {
        let mut updates = self.state.subscribe();
        let settled = tokio::time::timeout(
            timeout,
            updates.wait_for(|state| *state != HandshakeState::Pending),
        )
        .await;

        match settled {
            Ok(Ok(state)) => match *state {
                HandshakeState::Assigned(id) => Ok(id),
                _ => Err(SessionError::NotReady),
            },
            // The sender lives as long as `self`
            Ok(Err(_)) => Err(SessionError::NotReady),
            Err(_) => Err(SessionError::HandshakeTimeout {
                waited_ms: timeout.as_millis() as u64,
            }),
        }
    }

    /// Run the bootstrap exchange over `tx`
    pub async fn run(
        &self,
        tx: &dyn Transmitter,
        timeout: Duration,
    ) -> Result<NodeId, SessionError> {
        if !tx.enqueue(ClusterMessage::new(MessageTag::GetId)) {
            return Err(SessionError::NotReady);
        }

        debug!(timeout_ms = timeout.as_millis() as u64, "Waiting for node id");
        let id = self.wait(timeout).await?;

        debug!(node_id = %id, "Got node id, requesting configuration");
        for tag in FOLLOW_UP_REQUESTS {
            tx.enqueue(ClusterMessage::new(tag));
        }
        Ok(id)
    }
}
