//! Wiring shared by both modes: job service, jobs worker, REST API.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use dozegrid_api::ApiState;
use dozegrid_jobs::{InMemoryActivity, InMemoryJobRuntime, InMemoryReplicas, JobService, JobsWorker};
use dozegrid_queue::{LeadershipGate, QueueBackend, QueueEngine};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::info;

use crate::config::DaemonConfig;

/// A daemon's subsystems, ready to serve.
pub struct Services {
    pub api: ApiState,
    pub worker: JobsWorker,
}

/// Build the job service, worker, and API state over a queue backend.
pub fn build_services(
    config: &DaemonConfig,
    backend: Arc<dyn QueueBackend>,
    gate: Arc<dyn LeadershipGate>,
) -> anyhow::Result<Services> {
    let engine = QueueEngine::new(backend)
        .with_key_prefix(config.key_prefix.clone())
        .with_default_policy(config.retry.clone());

    let jobs_config = Arc::new(config.jobs_config()?);
    info!(templates = jobs_config.len(), "job templates loaded");

    let service = Arc::new(JobService::new(
        engine,
        Arc::new(InMemoryJobRuntime::new()),
        jobs_config,
        config.namespace.clone(),
    ));
    let worker = JobsWorker::new(
        Arc::clone(&service),
        Arc::clone(&gate),
        Arc::new(InMemoryReplicas::new()),
        Arc::new(InMemoryActivity::new()),
    );

    Ok(Services {
        api: ApiState {
            node_id: config.node_id,
            jobs: service,
            gate,
        },
        worker,
    })
}

/// Serve the API and run the worker until `signal` resolves.
///
/// On the signal the API stops accepting requests, `shutdown_tx` fires,
/// and the worker exits between cycles.
pub async fn serve(
    config: &DaemonConfig,
    services: Services,
    listener: TcpListener,
    shutdown_tx: watch::Sender<bool>,
    signal: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let Services { api, worker } = services;

    let interval = config.worker_interval();
    let worker_shutdown = shutdown_tx.subscribe();
    let worker_handle = tokio::spawn(async move {
        worker.run(interval, worker_shutdown).await;
    });

    let router = dozegrid_api::build_router(api);
    let addr = listener.local_addr()?;
    info!(%addr, "API server starting");

    let server = axum::serve(listener, router).with_graceful_shutdown(async move {
        signal.await;
        info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });
    server.await?;

    let _ = worker_handle.await;
    Ok(())
}

pub async fn bind_api(port: u16) -> anyhow::Result<TcpListener> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    Ok(TcpListener::bind(addr).await?)
}

/// Resolves on Ctrl-C.
pub async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to install CTRL+C handler");
        std::future::pending::<()>().await;
    }
}
