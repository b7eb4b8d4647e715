//! Core types for Atoll
//!
//! Identifiers use newtypes so a node id can never be passed where a work id is
//! expected. `NodeIdentity` is the per-node record owned by the cluster
//! registry and shared with the node's session.

use core::fmt;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

use crate::config::NodeParams;

// ----------------------------------------------------------------------------
// Identifiers
// ----------------------------------------------------------------------------

/// Numeric identity assigned to a worker node
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(i64);

impl NodeId {
    pub fn new(id: i64) -> Self {
        Self(id)
    }

    pub fn as_i64(&self) -> i64 {
        self.0
    }

    /// Assigned ids are never negative
    pub fn is_assigned(&self) -> bool {
        self.0 >= 0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for NodeId {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

/// Caller-supplied identifier of one unit of remote work
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct WorkId(i64);

impl WorkId {
    pub fn new(id: i64) -> Self {
        Self(id)
    }

    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for WorkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for WorkId {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

// ----------------------------------------------------------------------------
// Node Identity
// ----------------------------------------------------------------------------

/// Identity and configuration of one worker node
///
/// `id` and `host` are fixed once the registry creates the record. `user`,
/// `exec_root` and `file_root` are filled in as the node answers the
/// follow-up requests sent after the handshake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeIdentity {
    id: NodeId,
    host: String,
    pub user: String,
    pub exec_root: String,
    pub file_root: String,
    thread_capacity: usize,
}

impl NodeIdentity {
    pub fn new(id: NodeId, host: impl Into<String>, thread_capacity: usize) -> Self {
        Self {
            id,
            host: host.into(),
            user: String::new(),
            exec_root: String::new(),
            file_root: String::new(),
            thread_capacity,
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// Number of work units this node may run concurrently
    pub fn thread_capacity(&self) -> usize {
        self.thread_capacity
    }
}

impl From<NodeParams> for NodeIdentity {
    fn from(params: NodeParams) -> Self {
        Self {
            id: NodeId::new(params.id),
            host: params.host,
            user: params.user,
            exec_root: params.exec_root,
            file_root: params.file_root,
            thread_capacity: params.thread_capacity,
        }
    }
}

/// Identity record shared between the cluster registry and a session
pub type SharedIdentity = Arc<RwLock<NodeIdentity>>;
