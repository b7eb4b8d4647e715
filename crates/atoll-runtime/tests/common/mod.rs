//! Test utilities: an in-memory transport pair and a recording cluster
//! registry.

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::Duration;

use atoll_core::{
    ClusterMessage, ClusterRegistry, Connection, MessageListener, MessageTag, NodeId,
    NodeIdentity, NodeParams, Receiver, SessionConfig, SharedIdentity, SocketHandle, Transmitter,
    TransportConfig, TransportError, TransportPair,
};
use atoll_runtime::NodeSession;

// ----------------------------------------------------------------------------
// Mock Wire
// ----------------------------------------------------------------------------

#[derive(Default)]
struct WireState {
    sent: Mutex<Vec<ClusterMessage>>,
    listener: Mutex<Option<Weak<dyn MessageListener>>>,
    auto_id: Mutex<Option<NodeId>>,
    refuse_sends: AtomicBool,
    fail_socket_close: AtomicBool,
    tx_closes: AtomicUsize,
    rx_closes: AtomicUsize,
    socket_closes: AtomicUsize,
}

/// Test-side view of a mock transport pair
#[derive(Clone, Default)]
pub struct MockWire {
    state: Arc<WireState>,
}

impl MockWire {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer the first `getid` with `id`, from a separate task
    pub fn with_auto_id(id: i64) -> Self {
        let wire = Self::new();
        *wire.state.auto_id.lock().unwrap() = Some(NodeId::new(id));
        wire
    }

    pub fn connection(&self) -> MockConnection {
        MockConnection { wire: self.clone() }
    }

    pub fn sent(&self) -> Vec<ClusterMessage> {
        self.state.sent.lock().unwrap().clone()
    }

    pub fn sent_tags(&self) -> Vec<MessageTag> {
        self.sent().into_iter().map(|message| message.tag).collect()
    }

    pub fn count_sent(&self, tag: MessageTag) -> usize {
        self.sent_tags().into_iter().filter(|t| *t == tag).count()
    }

    pub fn refuse_sends(&self) {
        self.state.refuse_sends.store(true, Ordering::SeqCst);
    }

    pub fn fail_socket_close(&self) {
        self.state.fail_socket_close.store(true, Ordering::SeqCst);
    }

    pub fn tx_closes(&self) -> usize {
        self.state.tx_closes.load(Ordering::SeqCst)
    }

    pub fn rx_closes(&self) -> usize {
        self.state.rx_closes.load(Ordering::SeqCst)
    }

    pub fn socket_closes(&self) -> usize {
        self.state.socket_closes.load(Ordering::SeqCst)
    }

    fn listener(&self) -> Option<Arc<dyn MessageListener>> {
        self.state
            .listener
            .lock()
            .unwrap()
            .as_ref()
            .and_then(|weak| weak.upgrade())
    }

    /// Deliver an inbound message as the receiver task would
    pub fn deliver(&self, message: ClusterMessage) {
        if let Some(listener) = self.listener() {
            listener.handle_message(message);
        }
    }

    /// Report a remote disconnect as the receiver task would
    pub fn disconnect(&self) {
        if let Some(listener) = self.listener() {
            listener.stream_closed();
        }
    }

    /// Wait until `tag` has been sent
    pub async fn wait_for(&self, tag: MessageTag) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !self.sent_tags().contains(&tag) {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .expect("message was never sent");
    }
}

pub struct MockConnection {
    wire: MockWire,
}

impl Connection for MockConnection {
    fn peer_addr(&self) -> Option<SocketAddr> {
        "127.0.0.1:7000".parse().ok()
    }

    fn attach(
        self,
        listener: Weak<dyn MessageListener>,
        _config: &TransportConfig,
    ) -> Result<TransportPair, TransportError> {
        *self.wire.state.listener.lock().unwrap() = Some(listener);
        Ok(TransportPair {
            tx: Box::new(MockTx {
                wire: self.wire.clone(),
            }),
            rx: Box::new(MockRx {
                wire: self.wire.clone(),
            }),
            socket: Box::new(MockSocket { wire: self.wire }),
        })
    }
}

struct MockTx {
    wire: MockWire,
}

impl Transmitter for MockTx {
    fn enqueue(&self, message: ClusterMessage) -> bool {
        let state = &self.wire.state;
        if state.refuse_sends.load(Ordering::SeqCst) || state.tx_closes.load(Ordering::SeqCst) > 0
        {
            return false;
        }

        let is_getid = message.tag == MessageTag::GetId;
        state.sent.lock().unwrap().push(message);

        if is_getid {
            if let Some(id) = state.auto_id.lock().unwrap().take() {
                let wire = self.wire.clone();
                tokio::spawn(async move {
                    wire.deliver(ClusterMessage::id(id));
                });
            }
        }
        true
    }

    fn close(&self) {
        self.wire.state.tx_closes.fetch_add(1, Ordering::SeqCst);
    }
}

struct MockRx {
    wire: MockWire,
}

impl Receiver for MockRx {
    fn close(&self) {
        self.wire.state.rx_closes.fetch_add(1, Ordering::SeqCst);
    }
}

struct MockSocket {
    wire: MockWire,
}

impl SocketHandle for MockSocket {
    fn peer_addr(&self) -> Option<SocketAddr> {
        "127.0.0.1:7000".parse().ok()
    }

    fn shutdown(&self) -> std::io::Result<()> {
        self.wire.state.socket_closes.fetch_add(1, Ordering::SeqCst);
        if self.wire.state.fail_socket_close.load(Ordering::SeqCst) {
            return Err(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "socket already gone",
            ));
        }
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Recording Cluster
// ----------------------------------------------------------------------------

/// Cluster registry that records every deregistration
#[derive(Default)]
pub struct RecordingCluster {
    params: Mutex<HashMap<NodeId, SharedIdentity>>,
    removed: Mutex<Vec<NodeId>>,
}

impl RecordingCluster {
    pub fn with_node(id: i64, thread_capacity: usize) -> Arc<Self> {
        let cluster = Arc::new(Self::default());
        cluster.add(params(id, thread_capacity));
        cluster
    }

    pub fn add(&self, params: NodeParams) -> SharedIdentity {
        let identity: NodeIdentity = params.into();
        let shared = Arc::new(RwLock::new(identity));
        self.params
            .lock()
            .unwrap()
            .insert(shared.read().unwrap().id(), shared.clone());
        shared
    }

    pub fn removed(&self) -> Vec<NodeId> {
        self.removed.lock().unwrap().clone()
    }
}

impl ClusterRegistry for RecordingCluster {
    fn lookup(&self, id: NodeId) -> Option<SharedIdentity> {
        self.params.lock().unwrap().get(&id).cloned()
    }

    fn remove_node(&self, id: NodeId) {
        self.removed.lock().unwrap().push(id);
    }
}

pub fn params(id: i64, thread_capacity: usize) -> NodeParams {
    NodeParams {
        id,
        host: format!("worker-{id}"),
        user: String::new(),
        exec_root: String::new(),
        file_root: String::new(),
        thread_capacity,
    }
}

/// Connect a session over a mock wire that answers `getid` with `id`
pub async fn ready_session(
    id: i64,
    thread_capacity: usize,
) -> (Arc<NodeSession>, MockWire, Arc<RecordingCluster>) {
    let cluster = RecordingCluster::with_node(id, thread_capacity);
    let wire = MockWire::with_auto_id(id);
    let session = NodeSession::connect(
        wire.connection(),
        cluster.clone(),
        &SessionConfig::testing(),
        &TransportConfig::default(),
    )
    .await
    .expect("handshake should complete");
    (session, wire, cluster)
}
