//! Standalone mode: one process, local command log, always the leader.

use std::future::Future;
use std::sync::Arc;

use dozegrid_queue::{CommandLog, StaticGate};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::info;

use crate::config::DaemonConfig;
use crate::daemon;

pub async fn run_standalone(
    config: DaemonConfig,
    listener: TcpListener,
    signal: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    info!("DozeGrid daemon starting in standalone mode");

    std::fs::create_dir_all(&config.data_dir)?;
    let db_path = config.data_dir.join("queue.redb");
    let log = Arc::new(CommandLog::open(&db_path)?);
    info!(path = ?db_path, committed = log.committed_index(), "command log opened");

    let services = daemon::build_services(&config, log, Arc::new(StaticGate(true)))?;
    let (shutdown_tx, _) = watch::channel(false);
    daemon::serve(&config, services, listener, shutdown_tx, signal).await?;

    info!("DozeGrid daemon stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;
    use tokio::sync::oneshot;

    use super::*;

    async fn http(addr: std::net::SocketAddr, request: &str) -> String {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(request.as_bytes()).await.unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        response
    }

    #[tokio::test]
    async fn serves_until_signalled() {
        let dir = tempfile::tempdir().unwrap();
        let config = DaemonConfig {
            data_dir: dir.path().to_path_buf(),
            // Keep the worker out of the way; the queue must still hold the job.
            worker_interval_ms: 60_000,
            ..Default::default()
        };

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let daemon = tokio::spawn(run_standalone(config, listener, async move {
            let _ = stop_rx.await;
        }));

        let response = http(
            addr,
            "POST /api/v1/jobs/anything HTTP/1.1\r\nHost: localhost\r\n\
             Content-Type: application/json\r\nContent-Length: 2\r\n\
             Connection: close\r\n\r\n{}",
        )
        .await;
        assert!(response.starts_with("HTTP/1.1 204"), "{response}");

        let response = http(
            addr,
            "GET /api/v1/queues/Default/count HTTP/1.1\r\nHost: localhost\r\n\
             Connection: close\r\n\r\n",
        )
        .await;
        assert!(response.contains(r#""count":1"#), "{response}");

        stop_tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(5), daemon)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert!(dir.path().join("queue.redb").exists());
    }
}
