//! Two-peer cluster scenarios over real sockets and a shared registry

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use graphsync::cluster::{ClusterCoordinator, Owned, RequestHandler};
use graphsync::config::{ClusterConfig, SessionConfig};
use graphsync::db::repositories::RegistryRepository;
use graphsync::db::DatabaseConnection;
use graphsync::session::{graph_instance_key, SessionError, SessionManager};

fn cluster_config() -> ClusterConfig {
    ClusterConfig {
        host: "127.0.0.1".to_string(),
        refresh_interval_secs: 60,
        // sweeps are driven manually in these tests
        discovery_interval_secs: 3600,
        direct_timeout_secs: 2,
    }
}

async fn shared_db() -> DatabaseConnection {
    let db = DatabaseConnection::in_memory().await.unwrap();
    db.run_migrations().await.unwrap();
    db
}

fn echo_handler() -> RequestHandler {
    Arc::new(|request| Some(json!({"ok": true, "echo": request.payload.clone()})))
}

async fn wait_for<F: Fn() -> bool>(what: &str, check: F) {
    for _ in 0..40 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("timed out waiting for {}", what);
}

#[tokio::test]
async fn ownership_announcements_replicate() {
    let db = shared_db().await;
    let peer_a = ClusterCoordinator::new(&cluster_config(), 43080, db.clone());
    let peer_b = ClusterCoordinator::new(&cluster_config(), 43090, db.clone());
    peer_a.start(echo_handler()).await.unwrap();
    peer_b.start(echo_handler()).await.unwrap();

    peer_a.discover_once().await;
    peer_b.discover_once().await;
    assert!(peer_a.peer_info(peer_b.peer_id()).is_some());
    assert!(peer_b.peer_info(peer_a.peer_id()).is_some());

    // claim on A becomes visible on B
    peer_a.claim_ownership("graph:g1").unwrap();
    let a_id = peer_a.peer_id().to_string();
    wait_for("claim to reach peer B", || {
        peer_b.get_owner_of("graph:g1") == Owned::Peer(a_id.clone())
    })
    .await;

    // and a conflicting claim on B is refused
    assert!(peer_b.claim_ownership("graph:g1").is_err());

    // release clears it everywhere
    peer_a.release_ownership("graph:g1");
    wait_for("release to reach peer B", || {
        peer_b.get_owner_of("graph:g1") == Owned::Nobody
    })
    .await;

    peer_a.shutdown().await;
    peer_b.shutdown().await;
}

#[tokio::test]
async fn register_redirects_to_the_owner() {
    let db = shared_db().await;
    let peer_a = ClusterCoordinator::new(&cluster_config(), 43100, db.clone());
    let peer_b = ClusterCoordinator::new(&cluster_config(), 43110, db.clone());
    peer_a.start(echo_handler()).await.unwrap();
    peer_b.start(echo_handler()).await.unwrap();
    peer_a.discover_once().await;
    peer_b.discover_once().await;

    peer_a.claim_ownership(&graph_instance_key("g1")).unwrap();
    let a_id = peer_a.peer_id().to_string();
    wait_for("claim to reach peer B", || {
        peer_b.get_owner_of(&graph_instance_key("g1")) == Owned::Peer(a_id.clone())
    })
    .await;

    // a register landing on B gets redirected to A's address
    let manager_b = SessionManager::new(db.clone(), Arc::clone(&peer_b), SessionConfig::default());
    let (conn, _rx) = manager_b.connect();
    let err = manager_b
        .register_graph(&conn, "g1", "0", "u1", "Ada", 0)
        .await
        .unwrap_err();
    match err {
        SessionError::OwnedElsewhere { host, port, .. } => {
            assert_eq!(host, "127.0.0.1");
            assert_eq!(port, 43100);
        }
        other => panic!("expected redirect, got {:?}", other),
    }

    peer_a.shutdown().await;
    peer_b.shutdown().await;
}

#[tokio::test]
async fn direct_requests_round_trip() {
    let db = shared_db().await;
    let peer_a = ClusterCoordinator::new(&cluster_config(), 43120, db.clone());
    let peer_b = ClusterCoordinator::new(&cluster_config(), 43130, db.clone());
    peer_a.start(echo_handler()).await.unwrap();
    peer_b.start(echo_handler()).await.unwrap();
    peer_a.discover_once().await;
    peer_b.discover_once().await;

    let reply = peer_a
        .send_direct(peer_b.peer_id(), json!({"ask": "state"}), None)
        .await
        .unwrap();
    assert_eq!(reply.payload["ok"], true);
    assert_eq!(reply.payload["echo"]["ask"], "state");

    // unknown peers fail fast
    let err = peer_a.send_direct("ghost", json!({}), None).await.unwrap_err();
    assert!(matches!(
        err,
        graphsync::cluster::ClusterError::UnknownPeer(_)
    ));

    peer_a.shutdown().await;
    peer_b.shutdown().await;
}

#[tokio::test]
async fn vanished_peers_are_pruned() {
    let db = shared_db().await;
    let peer_a = ClusterCoordinator::new(&cluster_config(), 43140, db.clone());
    let peer_b = ClusterCoordinator::new(&cluster_config(), 43150, db.clone());
    peer_a.start(echo_handler()).await.unwrap();
    peer_b.start(echo_handler()).await.unwrap();
    peer_a.discover_once().await;
    peer_b.discover_once().await;

    peer_b.claim_ownership("graph:g2").unwrap();
    let b_id = peer_b.peer_id().to_string();
    wait_for("claim to reach peer A", || {
        peer_a.get_owner_of("graph:g2") == Owned::Peer(b_id.clone())
    })
    .await;

    // B dies without releasing; its registry row goes away
    peer_b.shutdown().await;
    peer_a.discover_once().await;

    // the stale entry was pruned, a new claim succeeds on A
    assert_eq!(peer_a.get_owner_of("graph:g2"), Owned::Nobody);
    assert!(peer_a.peer_info(&b_id).is_none());
    peer_a.claim_ownership("graph:g2").unwrap();

    peer_a.shutdown().await;
}

#[tokio::test]
async fn shutdown_marks_registry_offline() {
    let db = shared_db().await;
    let peer_a = ClusterCoordinator::new(&cluster_config(), 43160, db.clone());
    peer_a.start(echo_handler()).await.unwrap();

    peer_a.shutdown().await;
    let live = RegistryRepository::list_online(db.pool(), "nobody", chrono::Duration::seconds(300))
        .await
        .unwrap();
    assert!(live.is_empty());
}
