//! Integration tests for node sessions
//!
//! Drives `NodeSession` through a mock transport pair: handshake, work
//! dispatch and completion, inbound message handling, and teardown.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use atoll_core::{
    AtollError, ClusterMessage, MessageTag, NodeId, Payload, SessionConfig, SessionError,
    TransportConfig, WorkId, WorkResult, WorkUnit,
};
use atoll_runtime::NodeSession;
use common::{ready_session, MockWire, RecordingCluster};

fn unit(id: i64) -> WorkUnit {
    WorkUnit::new(WorkId::new(id), format!("work-{id}").into_bytes())
}

// ----------------------------------------------------------------------------
// Handshake
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_successful_handshake_yields_ready_session() {
    let (session, wire, _cluster) = ready_session(42, 4).await;

    assert!(session.is_ready());
    let identity = session.identity().unwrap();
    assert_eq!(identity.id(), NodeId::new(42));
    assert!(identity.id().is_assigned());
    assert_eq!(session.host().unwrap(), "worker-42");

    assert_eq!(
        wire.sent_tags(),
        vec![
            MessageTag::GetId,
            MessageTag::GetUser,
            MessageTag::GetExecRoot,
            MessageTag::GetFileRoot,
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_handshake_times_out_without_id() {
    let cluster = RecordingCluster::with_node(1, 2);
    let wire = MockWire::new();

    let result = NodeSession::connect(
        wire.connection(),
        cluster.clone(),
        &SessionConfig::default(),
        &TransportConfig::default(),
    )
    .await;

    let err = result.unwrap_err();
    assert!(err.is_handshake_timeout());
    assert!(matches!(
        err,
        AtollError::Session(SessionError::HandshakeTimeout { waited_ms: 100_000 })
    ));

    // The failed session was torn down and never sent follow-ups
    assert_eq!(wire.sent_tags(), vec![MessageTag::GetId, MessageTag::Halt]);
    assert_eq!(wire.socket_closes(), 1);
    assert!(cluster.removed().is_empty());
}

#[tokio::test]
async fn test_id_delivered_after_wait_begins_unblocks_handshake() {
    let cluster = RecordingCluster::with_node(5, 1);
    let wire = MockWire::new();

    let connecting = {
        let wire = wire.clone();
        let cluster = cluster.clone();
        tokio::spawn(async move {
            NodeSession::connect(
                wire.connection(),
                cluster,
                &SessionConfig::testing(),
                &TransportConfig::default(),
            )
            .await
        })
    };

    wire.wait_for(MessageTag::GetId).await;
    wire.deliver(ClusterMessage::id(NodeId::new(5)));

    let session = connecting.await.unwrap().unwrap();
    assert_eq!(session.node_id().unwrap(), NodeId::new(5));
}

#[tokio::test]
async fn test_id_unknown_to_registry_times_out() {
    let cluster = RecordingCluster::with_node(1, 1);
    let wire = MockWire::with_auto_id(999);

    let result = NodeSession::connect(
        wire.connection(),
        cluster,
        &SessionConfig::testing(),
        &TransportConfig::default(),
    )
    .await;

    assert!(result.unwrap_err().is_handshake_timeout());
}

#[tokio::test]
async fn test_unknown_id_does_not_bind_and_later_known_id_does() {
    let cluster = RecordingCluster::with_node(5, 2);
    let wire = MockWire::new();

    let connecting = {
        let wire = wire.clone();
        let cluster = cluster.clone();
        tokio::spawn(async move {
            NodeSession::connect(
                wire.connection(),
                cluster,
                &SessionConfig::testing(),
                &TransportConfig::default(),
            )
            .await
        })
    };

    wire.wait_for(MessageTag::GetId).await;
    wire.deliver(ClusterMessage::id(NodeId::new(77)));
    wire.deliver(ClusterMessage::id(NodeId::new(5)));

    let session = connecting.await.unwrap().unwrap();
    assert_eq!(session.node_id().unwrap(), NodeId::new(5));
    // An unknown id is a registry miss, not a malformed message
    assert_eq!(session.stats().malformed_messages, 0);
}

#[tokio::test]
async fn test_disconnect_during_handshake_fails_construction() {
    let cluster = RecordingCluster::with_node(1, 1);
    let wire = MockWire::new();

    let connecting = {
        let wire = wire.clone();
        tokio::spawn(async move {
            NodeSession::connect(
                wire.connection(),
                cluster,
                &SessionConfig::default(),
                &TransportConfig::default(),
            )
            .await
        })
    };

    wire.wait_for(MessageTag::GetId).await;
    wire.disconnect();

    let result = tokio::time::timeout(Duration::from_secs(5), connecting)
        .await
        .expect("handshake should be released by the disconnect")
        .unwrap();
    assert!(matches!(
        result,
        Err(AtollError::Session(SessionError::NotReady))
    ));
    assert_eq!(wire.socket_closes(), 1);
}

#[tokio::test]
async fn test_user_before_id_is_ignored() {
    let cluster = RecordingCluster::with_node(1, 1);
    let wire = MockWire::new();

    let connecting = {
        let wire = wire.clone();
        tokio::spawn(async move {
            NodeSession::connect(
                wire.connection(),
                cluster,
                &SessionConfig::testing(),
                &TransportConfig::default(),
            )
            .await
        })
    };
    wire.wait_for(MessageTag::GetId).await;

    // A user message ahead of the id is ignored
    wire.deliver(ClusterMessage::text(MessageTag::User, "early"));
    wire.deliver(ClusterMessage::id(NodeId::new(1)));

    let session = connecting.await.unwrap().unwrap();
    assert_eq!(session.user().unwrap(), "");
}

// ----------------------------------------------------------------------------
// Work Dispatch
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_submit_then_complete_scenario() {
    let (session, wire, _cluster) = ready_session(42, 4).await;
    assert_eq!(session.node_id().unwrap(), NodeId::new(42));

    let before = session.available_capacity();
    assert_eq!(before, 4);

    let results = Arc::new(Mutex::new(Vec::new()));
    let sink = results.clone();
    assert!(session.submit(unit(7), move |result| sink.lock().unwrap().push(result)));
    assert_eq!(session.available_capacity(), 3);

    let dispatched = wire.sent().into_iter().last().unwrap();
    assert_eq!(dispatched.tag, MessageTag::Process);
    assert_eq!(dispatched.payload, Some(Payload::Work(unit(7))));

    wire.deliver(ClusterMessage::completion(WorkResult::new(
        WorkId::new(7),
        b"R".to_vec(),
    )));

    let results = results.lock().unwrap();
    assert_eq!(results.as_slice(), &[WorkResult::new(WorkId::new(7), b"R".to_vec())]);
    assert_eq!(session.available_capacity(), before);
    assert_eq!(session.stats().completed, 1);
}

#[tokio::test]
async fn test_duplicate_work_id_rejected_and_first_handler_kept() {
    let (session, wire, _cluster) = ready_session(1, 4).await;
    let calls = Arc::new(Mutex::new(Vec::new()));

    let first = calls.clone();
    assert!(session.submit(unit(3), move |_| first.lock().unwrap().push("first")));
    let second = calls.clone();
    assert!(!session.submit(unit(3), move |_| second.lock().unwrap().push("second")));

    let err = session
        .try_submit(unit(3), Box::new(|_: WorkResult| {}))
        .unwrap_err();
    assert!(matches!(err, SessionError::DuplicateWorkId { work_id } if work_id == WorkId::new(3)));

    assert_eq!(session.in_flight(), 1);
    assert_eq!(wire.count_sent(MessageTag::Process), 1);

    wire.deliver(ClusterMessage::completion(WorkResult::new(WorkId::new(3), Vec::new())));
    assert_eq!(*calls.lock().unwrap(), vec!["first"]);
}

#[tokio::test]
async fn test_capacity_never_negative_when_over_submitted() {
    let (session, wire, _cluster) = ready_session(1, 2).await;

    for id in 0..5 {
        assert!(session.submit(unit(id), |_| {}));
        assert!(session.available_capacity() <= 2);
    }
    assert_eq!(session.available_capacity(), 0);
    assert_eq!(session.in_flight(), 5);

    for id in 0..4 {
        wire.deliver(ClusterMessage::completion(WorkResult::new(WorkId::new(id), Vec::new())));
    }
    assert_eq!(session.available_capacity(), 1);
}

#[tokio::test]
async fn test_failed_enqueue_does_not_leak_handler() {
    let (session, wire, _cluster) = ready_session(1, 2).await;
    wire.refuse_sends();

    assert!(matches!(
        session.try_submit(unit(1), Box::new(|_: WorkResult| {})),
        Err(SessionError::NotReady)
    ));
    assert_eq!(session.in_flight(), 0);
    assert_eq!(session.available_capacity(), 2);
}

#[tokio::test]
async fn test_unmatched_completion_is_dropped() {
    let (session, wire, _cluster) = ready_session(1, 2).await;
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    assert!(session.submit(unit(1), move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    }));

    wire.deliver(ClusterMessage::completion(WorkResult::new(WorkId::new(2), Vec::new())));

    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(session.in_flight(), 1);
    assert_eq!(session.stats().unmatched_completions, 1);
}

#[tokio::test]
async fn test_completions_from_many_threads() {
    let (session, wire, _cluster) = ready_session(1, 64).await;
    let calls = Arc::new(AtomicUsize::new(0));

    for id in 0..64 {
        let counter = calls.clone();
        assert!(session.submit(unit(id), move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
    }

    let workers: Vec<_> = (0..4)
        .map(|offset| {
            let wire = wire.clone();
            std::thread::spawn(move || {
                for id in (offset..64).step_by(4) {
                    wire.deliver(ClusterMessage::completion(WorkResult::new(
                        WorkId::new(id),
                        Vec::new(),
                    )));
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    assert_eq!(calls.load(Ordering::SeqCst), 64);
    assert_eq!(session.in_flight(), 0);
    assert_eq!(session.available_capacity(), 64);
}

// ----------------------------------------------------------------------------
// Inbound Messages
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_configuration_replies_update_identity() {
    let (session, wire, _cluster) = ready_session(1, 1).await;

    wire.deliver(ClusterMessage::text(MessageTag::User, "compute"));
    wire.deliver(ClusterMessage::text(MessageTag::ExecRoot, "/opt/atoll"));
    wire.deliver(ClusterMessage::text(MessageTag::FileRoot, "/data"));

    assert_eq!(session.user().unwrap(), "compute");
    assert_eq!(session.exec_root().unwrap(), "/opt/atoll");
    assert_eq!(session.file_root().unwrap(), "/data");
}

#[tokio::test]
async fn test_malformed_user_message_is_dropped() {
    let (session, wire, _cluster) = ready_session(1, 1).await;
    wire.deliver(ClusterMessage::text(MessageTag::User, "compute"));

    wire.deliver(ClusterMessage::new(MessageTag::User));
    wire.deliver(ClusterMessage::with_payload(MessageTag::User, Payload::Id(3)));

    assert_eq!(session.user().unwrap(), "compute");
    assert_eq!(session.stats().malformed_messages, 2);
    assert!(session.is_ready());
}

#[tokio::test]
async fn test_malformed_process_and_id_messages_are_dropped() {
    let (session, wire, _cluster) = ready_session(1, 1).await;

    wire.deliver(ClusterMessage::new(MessageTag::Process));
    wire.deliver(ClusterMessage::text(MessageTag::Id, "not-a-number"));
    wire.deliver(ClusterMessage::dispatch(unit(1)));

    assert_eq!(session.stats().malformed_messages, 3);
    assert_eq!(session.node_id().unwrap(), NodeId::new(1));
    assert!(session.is_ready());
}

#[tokio::test]
async fn test_repeated_id_does_not_rebind_identity() {
    let (session, wire, cluster) = ready_session(1, 1).await;
    cluster.add(common::params(2, 8));

    wire.deliver(ClusterMessage::id(NodeId::new(2)));

    assert_eq!(session.node_id().unwrap(), NodeId::new(1));
    assert_eq!(session.available_capacity(), 1);
}

#[tokio::test]
async fn test_ping_and_file_root_push() {
    let (session, wire, _cluster) = ready_session(1, 1).await;

    wire.deliver(ClusterMessage::new(MessageTag::Ping));
    assert!(session.ping());
    assert!(session.set_file_root("/scratch"));
    assert!(session.set_exec_root("/usr/local/atoll"));

    let last = wire.sent().into_iter().last().unwrap();
    assert_eq!(last, ClusterMessage::text(MessageTag::SetFileRoot, "/scratch"));
    assert_eq!(wire.count_sent(MessageTag::Ping), 1);
    assert_eq!(session.file_root().unwrap(), "/scratch");
    assert_eq!(session.exec_root().unwrap(), "/usr/local/atoll");
}

// ----------------------------------------------------------------------------
// Teardown
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_close_twice_tears_down_once() {
    let (session, wire, cluster) = ready_session(9, 1).await;

    session.close();
    session.close();

    assert!(!session.is_ready());
    assert_eq!(cluster.removed(), vec![NodeId::new(9)]);
    assert_eq!(wire.count_sent(MessageTag::Halt), 1);
    assert_eq!(wire.tx_closes(), 1);
    assert_eq!(wire.rx_closes(), 1);
    assert_eq!(wire.socket_closes(), 1);
}

#[tokio::test]
async fn test_concurrent_close_and_disconnect_tear_down_once() {
    let (session, wire, cluster) = ready_session(9, 1).await;

    let closers: Vec<_> = (0..8)
        .map(|i| {
            let session = session.clone();
            let wire = wire.clone();
            std::thread::spawn(move || {
                if i % 2 == 0 {
                    session.close();
                } else {
                    wire.disconnect();
                }
            })
        })
        .collect();
    for closer in closers {
        closer.join().unwrap();
    }

    assert!(!session.is_ready());
    assert_eq!(cluster.removed(), vec![NodeId::new(9)]);
    assert_eq!(wire.socket_closes(), 1);
    assert_eq!(wire.tx_closes(), 1);
}

#[tokio::test]
async fn test_remote_disconnect_closes_session() {
    let (session, wire, cluster) = ready_session(3, 1).await;

    wire.disconnect();

    assert!(!session.is_ready());
    assert_eq!(cluster.removed(), vec![NodeId::new(3)]);
    assert_eq!(wire.socket_closes(), 1);
}

#[tokio::test]
async fn test_submit_after_close_is_rejected() {
    let (session, wire, _cluster) = ready_session(1, 4).await;
    session.close();
    let sent_before = wire.sent().len();

    assert!(!session.submit(unit(1), |_| {}));
    assert!(matches!(
        session.try_submit(unit(2), Box::new(|_: WorkResult| {})),
        Err(SessionError::NotReady)
    ));
    assert!(!session.ping());
    assert_eq!(wire.sent().len(), sent_before);
    assert_eq!(session.in_flight(), 0);
}

#[tokio::test]
async fn test_close_discards_in_flight_work_without_callbacks() {
    let (session, wire, _cluster) = ready_session(1, 4).await;
    let calls = Arc::new(AtomicUsize::new(0));
    for id in 0..3 {
        let counter = calls.clone();
        assert!(session.submit(unit(id), move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
    }

    session.close();
    wire.deliver(ClusterMessage::completion(WorkResult::new(WorkId::new(0), Vec::new())));

    assert_eq!(session.in_flight(), 0);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_socket_close_error_is_suppressed() {
    let (session, wire, cluster) = ready_session(4, 1).await;
    wire.fail_socket_close();

    session.close();

    assert!(!session.is_ready());
    assert_eq!(wire.socket_closes(), 1);
    assert_eq!(cluster.removed(), vec![NodeId::new(4)]);
}
