//! In-memory cluster registry
//!
//! Holds the identity record of every node the control plane knows about and
//! the sessions of the nodes that are currently connected.

use std::sync::{Arc, RwLock};

use dashmap::DashMap;
use tracing::{debug, info, warn};

use atoll_core::{ClusterRegistry, NodeId, NodeIdentity, NodeParams, SharedIdentity};

use crate::session::NodeSession;

/// Node parameters plus the live session set, backed by `DashMap`
#[derive(Debug, Default)]
pub struct InMemoryCluster {
    params: DashMap<NodeId, SharedIdentity>,
    sessions: DashMap<NodeId, Arc<NodeSession>>,
}

impl InMemoryCluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry seeded with `params`
    pub fn from_params(params: impl IntoIterator<Item = NodeParams>) -> Self {
        let cluster = Self::new();
        for node in params {
            cluster.register_params(node);
        }
        cluster
    }

    /// Register (or replace) the parameters of a node
    pub fn register_params(&self, params: NodeParams) -> SharedIdentity {
        let identity: NodeIdentity = params.into();
        let id = identity.id();
        let shared = Arc::new(RwLock::new(identity));
        if self.params.insert(id, shared.clone()).is_some() {
            debug!(node_id = %id, "Replaced node parameters");
        }
        shared
    }

    /// Add a ready session to the live set. Rejected if the session is no
    /// longer ready, has no identity, or its node already has a live session.
    pub fn attach_session(&self, session: Arc<NodeSession>) -> bool {
        let Ok(id) = session.node_id() else {
            warn!(peer_addr = ?session.peer_addr(), "Cannot attach a session without identity");
            return false;
        };

        let attached = match self.sessions.entry(id) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                warn!(node_id = %id, "Node already has a live session");
                false
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(session.clone());
                true
            }
        };

        // A disconnect between handshake and attach already tried to
        // deregister; undo the insert.
        if attached && !session.is_ready() {
            self.sessions.remove_if(&id, |_, live| Arc::ptr_eq(live, &session));
            return false;
        }

        if attached {
            info!(node_id = %id, live = self.sessions.len(), "Node joined cluster");
        }
        attached
    }

    pub fn session(&self, id: NodeId) -> Option<Arc<NodeSession>> {
        self.sessions.get(&id).map(|entry| entry.value().clone())
    }

    pub fn sessions(&self) -> Vec<Arc<NodeSession>> {
        self.sessions.iter().map(|entry| entry.value().clone()).collect()
    }

    pub fn live_count(&self) -> usize {
        self.sessions.len()
    }

    /// Sum of free threads across live nodes
    pub fn total_available_capacity(&self) -> usize {
        self.sessions()
            .iter()
            .map(|session| session.available_capacity())
            .sum()
    }

    /// Close every live session
    pub fn close_all(&self) {
        // Collected first: close() calls back into remove_node.
        for session in self.sessions() {
            session.close();
        }
    }
}

impl ClusterRegistry for InMemoryCluster {
    fn lookup(&self, id: NodeId) -> Option<SharedIdentity> {
        self.params.get(&id).map(|entry| entry.value().clone())
    }

    fn remove_node(&self, id: NodeId) {
        // Only a session that is already closing gets removed, so a stale
        // duplicate cannot evict the node's live session.
        if self
            .sessions
            .remove_if(&id, |_, session| !session.is_ready())
            .is_some()
        {
            info!(node_id = %id, live = self.sessions.len(), "Node left cluster");
        }
    }
}
