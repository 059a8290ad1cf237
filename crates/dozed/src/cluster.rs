//! Cluster mode: the queue is replicated through raft.
//!
//! In this mode, the daemon:
//! 1. Opens a redb file for the raft log, vote, and snapshots
//! 2. Starts the raft node and, when asked, bootstraps the peer set
//! 3. Serves raft RPCs and forwarded writes on the raft port
//! 4. Serves the REST API on the API port
//! 5. Runs the jobs worker, which only acts while this node leads

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use dozegrid_raft::RaftNode;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::info;

use crate::config::DaemonConfig;
use crate::daemon;

pub async fn run_cluster(
    config: DaemonConfig,
    listener: TcpListener,
    signal: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    info!(node_id = config.node_id, "DozeGrid daemon starting in cluster mode");
    std::fs::create_dir_all(&config.data_dir)?;

    // ── Raft storage ─────────────────────────────────────────────
    let raft_db_path = config.data_dir.join("raft.redb");
    let raft_db = Arc::new(
        redb::Database::create(&raft_db_path).map_err(|e| anyhow::anyhow!("open raft db: {e}"))?,
    );
    info!(path = ?raft_db_path, "raft storage opened");

    // ── Raft node ────────────────────────────────────────────────
    let node = RaftNode::start(config.node_id, raft_db, config.raft_config()).await?;
    if config.raft.bootstrap {
        node.bootstrap(config.raft_members()).await;
    }

    let (shutdown_tx, _) = watch::channel(false);

    let raft_addr = SocketAddr::from(([0, 0, 0, 0], config.raft.port));
    let raft_listener = TcpListener::bind(raft_addr).await?;
    info!(%raft_addr, advertise = %config.raft_advertise_addr(), "raft server starting");

    let mut raft_shutdown = shutdown_tx.subscribe();
    let raft_router = node.router();
    let raft_handle = tokio::spawn(async move {
        let server = axum::serve(raft_listener, raft_router).with_graceful_shutdown(async move {
            let _ = raft_shutdown.changed().await;
        });
        if let Err(e) = server.await {
            tracing::error!(error = %e, "raft server error");
        }
    });

    // ── Jobs + API ───────────────────────────────────────────────
    let services = daemon::build_services(
        &config,
        Arc::new(node.backend()),
        Arc::new(node.leadership()),
    )?;
    daemon::serve(&config, services, listener, shutdown_tx, signal).await?;

    // Clean up.
    let _ = raft_handle.await;
    node.shutdown().await?;

    info!("cluster node stopped");
    Ok(())
}
