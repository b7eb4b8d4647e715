//! Cluster registry boundary
//!
//! The registry owns every node's identity record and the set of live nodes.
//! Sessions look their identity up here once the node reports its id, and
//! deregister here on teardown.

use crate::types::{NodeId, SharedIdentity};

/// Registry of nodes known to the cluster
pub trait ClusterRegistry: Send + Sync {
    /// Identity record for an assigned node id
    fn lookup(&self, id: NodeId) -> Option<SharedIdentity>;

    /// Drop a node from the live set
    fn remove_node(&self, id: NodeId);
}
