//! Replication integration tests.
//!
//! Single-node scenarios run in-process on in-memory redb. The two-node
//! scenario serves each node's raft router on a loopback port so RPCs and
//! forwarded writes cross real HTTP.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use dozegrid_queue::*;
use dozegrid_raft::{RaftNode, WriteReply};
use openraft::BasicNode;
use redb::Database;
use redb::backends::InMemoryBackend;
use tower::ServiceExt;

const WAIT: Option<Duration> = Some(Duration::from_secs(10));

fn test_db() -> Arc<Database> {
    let backend = InMemoryBackend::new();
    Arc::new(Database::builder().create_with_backend(backend).unwrap())
}

fn test_config() -> openraft::Config {
    openraft::Config {
        heartbeat_interval: 50,
        election_timeout_min: 150,
        election_timeout_max: 300,
        ..Default::default()
    }
}

async fn single_node(db: Arc<Database>) -> RaftNode {
    let node = RaftNode::start(1, db, test_config()).await.unwrap();
    node.bootstrap(BTreeMap::from([(1, BasicNode::new("127.0.0.1:0"))]))
        .await;
    node.raft()
        .wait(WAIT)
        .metrics(|m| m.current_leader == Some(1), "single node elected")
        .await
        .unwrap();
    node
}

#[tokio::test]
async fn single_node_delivery_roundtrip() {
    let node = single_node(test_db()).await;
    assert!(node.leadership().is_leader());

    let engine = QueueEngine::new(Arc::new(node.backend()));
    let a = engine.enqueue("resize", b"a".to_vec()).await.unwrap();
    engine.enqueue("resize", b"b".to_vec()).await.unwrap();
    engine.enqueue("resize", b"c".to_vec()).await.unwrap();

    let popped = engine.dequeue("resize", 2).await.unwrap();
    assert_eq!(popped.len(), 2);
    assert_eq!(popped[0].id, a);
    assert_eq!(
        engine.count("resize", &[CountType::Pending], u64::MAX).unwrap(),
        2
    );

    let res = engine
        .acknowledge("resize", vec![ItemResult::new(a, 204)])
        .await
        .unwrap();
    assert_eq!(res[0].1, Resolution::Done);
    assert_eq!(
        engine
            .count("resize", &[CountType::Available, CountType::Pending], u64::MAX)
            .unwrap(),
        2
    );

    node.shutdown().await.unwrap();
}

#[tokio::test]
async fn malformed_command_never_reaches_the_log() {
    let node = single_node(test_db()).await;
    let before = node.raft().metrics().borrow().last_log_index;

    let err = node
        .backend()
        .submit(Command::Pop {
            key: String::new(),
            count: 1,
            now_ms: 0,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, QueueError::InvalidCommand(_)));
    assert_eq!(node.raft().metrics().borrow().last_log_index, before);

    node.shutdown().await.unwrap();
}

#[tokio::test]
async fn restart_reapplies_committed_commands() {
    let db = test_db();
    {
        let node = single_node(Arc::clone(&db)).await;
        let engine = QueueEngine::new(Arc::new(node.backend()));
        engine.enqueue("q", vec![1]).await.unwrap();
        engine.enqueue("q", vec![2]).await.unwrap();
        node.shutdown().await.unwrap();
    }

    let node = RaftNode::start(1, db, test_config()).await.unwrap();
    node.raft()
        .wait(WAIT)
        .metrics(|m| m.current_leader == Some(1), "re-elected after restart")
        .await
        .unwrap();

    let engine = QueueEngine::new(Arc::new(node.backend()));
    engine.enqueue("q", vec![3]).await.unwrap();
    assert_eq!(
        engine.count("q", &[CountType::Available], u64::MAX).unwrap(),
        3
    );

    node.shutdown().await.unwrap();
}

#[tokio::test]
async fn write_route_applies_and_rejects() {
    let node = single_node(test_db()).await;
    let router = node.router();

    let push = Command::Push {
        key: "Job:thumbs".to_string(),
        payload: b"{}".to_vec(),
        policy: RetryPolicy::default(),
    };
    let req = Request::builder()
        .method("POST")
        .uri("/raft/write")
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_vec(&push).unwrap()))
        .unwrap();
    let resp = router.clone().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let reply: WriteReply = serde_json::from_slice(&body).unwrap();
    assert!(matches!(
        reply,
        WriteReply::Applied {
            output: CommandOutput::Pushed { .. }
        }
    ));

    let bad = Command::Acknowledge {
        key: "Job:thumbs".to_string(),
        now_ms: 0,
        results: vec![],
    };
    let req = Request::builder()
        .method("POST")
        .uri("/raft/write")
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_vec(&bad).unwrap()))
        .unwrap();
    let resp = router.oneshot(req).await.unwrap();
    let body = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let reply: WriteReply = serde_json::from_slice(&body).unwrap();
    assert!(matches!(reply, WriteReply::Rejected { .. }));

    node.shutdown().await.unwrap();
}

// ── Two nodes over loopback HTTP ─────────────────────────────────

async fn serve_node(id: u64) -> (RaftNode, String) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let node = RaftNode::start(id, test_db(), test_config()).await.unwrap();
    let router = node.router();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    (node, addr)
}

#[tokio::test]
async fn follower_forwards_writes_and_replicates() {
    let (n1, addr1) = serve_node(1).await;
    let (n2, addr2) = serve_node(2).await;

    n1.bootstrap(BTreeMap::from([
        (1, BasicNode::new(addr1)),
        (2, BasicNode::new(addr2)),
    ]))
    .await;

    let metrics = n1
        .raft()
        .wait(WAIT)
        .metrics(|m| m.current_leader.is_some(), "leader elected")
        .await
        .unwrap();
    let leader_id = metrics.current_leader.unwrap();
    let (leader, follower) = if leader_id == 1 { (&n1, &n2) } else { (&n2, &n1) };

    follower
        .raft()
        .wait(WAIT)
        .metrics(|m| m.current_leader == Some(leader_id), "follower knows leader")
        .await
        .unwrap();
    assert!(leader.leadership().is_leader());
    assert!(!follower.leadership().is_leader());

    let via_follower = QueueEngine::new(Arc::new(follower.backend()));
    let id = via_follower.enqueue("fan-out", b"x".to_vec()).await.unwrap();
    assert_eq!(id, "00000000000000000001");

    let applied = leader.raft().metrics().borrow().last_applied.map(|l| l.index);
    follower
        .raft()
        .wait(WAIT)
        .metrics(
            |m| m.last_applied.map(|l| l.index) >= applied,
            "follower caught up",
        )
        .await
        .unwrap();

    assert_eq!(
        via_follower
            .count("fan-out", &[CountType::Available], u64::MAX)
            .unwrap(),
        1
    );
    assert_eq!(
        *follower.state().read().unwrap(),
        *leader.state().read().unwrap()
    );

    n1.shutdown().await.unwrap();
    n2.shutdown().await.unwrap();
}
