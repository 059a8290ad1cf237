//! Jobs worker — turns queued job requests into running jobs.
//!
//! Runs on every node but only acts on the leader. Each cycle fills the
//! free parallel slots of every template from its queue, waiting while
//! any dependency deployment is scaled to zero.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use dozegrid_queue::{Clock, CountType, ItemResult, LeadershipGate, SystemClock};
use tracing::{debug, error, info, warn};

use crate::config::{CreateJob, JobTemplate};
use crate::error::JobResult;
use crate::runtime::{ActivityTracker, ReplicaSource};
use crate::service::JobService;

pub const DEFAULT_WORKER_INTERVAL: Duration = Duration::from_secs(1);

/// Delivered and started.
pub const STATUS_CREATED: u16 = 200;
/// Runtime refused; retried per the queue's policy.
pub const STATUS_RUNTIME_ERROR: u16 = 500;
/// Payload unreadable; fails permanently.
pub const STATUS_MALFORMED: u16 = 400;

/// What a single cycle did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// `false` when this node was not the leader and did nothing.
    pub leader: bool,
    pub created: usize,
    pub failed: usize,
    pub malformed: usize,
    /// Templates skipped while a dependency has zero replicas.
    pub waiting: Vec<String>,
}

pub struct JobsWorker {
    service: Arc<JobService>,
    gate: Arc<dyn LeadershipGate>,
    replicas: Arc<dyn ReplicaSource>,
    activity: Arc<dyn ActivityTracker>,
    clock: Arc<dyn Clock>,
}

impl JobsWorker {
    pub fn new(
        service: Arc<JobService>,
        gate: Arc<dyn LeadershipGate>,
        replicas: Arc<dyn ReplicaSource>,
        activity: Arc<dyn ActivityTracker>,
    ) -> Self {
        Self {
            service,
            gate,
            replicas,
            activity,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// One pass over every template.
    pub async fn run_cycle(&self) -> JobResult<CycleReport> {
        let jobs = self.service.sync_jobs().await?;
        let mut report = CycleReport::default();
        if !self.gate.is_leader() {
            return Ok(report);
        }
        report.leader = true;

        let config = self.service.config();
        let now = self.clock.now_ms();

        let mut running: BTreeMap<&str, u32> = config.iter().map(|(name, _)| (name, 0)).collect();
        for job in jobs.iter().filter(|j| j.status.is_active()) {
            let Some(name) = job.configuration_name() else {
                continue;
            };
            if let Some(template) = config.get(name) {
                self.touch_dependencies(template, now);
            }
            if let Some(slot) = running.get_mut(name) {
                *slot += 1;
            }
        }

        for (name, template) in config.iter() {
            let active = running.get(name).copied().unwrap_or(0);
            let free = template.number_parallel_job.saturating_sub(active);
            if free == 0 {
                continue;
            }
            let engine = self.service.engine();
            if engine.count(name, &[CountType::Available], u64::MAX)? == 0 {
                continue;
            }
            if self.must_wait(template, now) {
                debug!(%name, "dependencies scaled to zero, waiting");
                report.waiting.push(name.to_string());
                continue;
            }

            let items = engine.dequeue(name, free).await?;
            if items.is_empty() {
                continue;
            }

            let mut results = Vec::with_capacity(items.len());
            for item in items {
                let job: CreateJob = match serde_json::from_slice(&item.payload) {
                    Ok(job) => job,
                    Err(e) => {
                        warn!(%name, id = %item.id, error = %e, "undecodable job payload");
                        report.malformed += 1;
                        results.push(ItemResult::new(item.id, STATUS_MALFORMED));
                        continue;
                    }
                };
                match self.service.create_job(name, &job).await {
                    Ok(()) => {
                        report.created += 1;
                        results.push(ItemResult::new(item.id, STATUS_CREATED));
                    }
                    Err(e) => {
                        error!(%name, id = %item.id, error = %e, "job creation failed");
                        report.failed += 1;
                        results.push(ItemResult::new(item.id, STATUS_RUNTIME_ERROR));
                    }
                }
            }
            engine.acknowledge(name, results).await?;
        }

        if report.created + report.failed + report.malformed > 0 {
            info!(
                created = report.created,
                failed = report.failed,
                malformed = report.malformed,
                "jobs cycle complete"
            );
        }
        Ok(report)
    }

    fn touch_dependencies(&self, template: &JobTemplate, now: u64) {
        for deployment in &template.depends_on {
            self.activity.record(deployment, now);
        }
    }

    /// Wake the dependencies and report whether any is still at zero.
    fn must_wait(&self, template: &JobTemplate, now: u64) -> bool {
        if template.depends_on.is_empty() {
            return false;
        }
        self.touch_dependencies(template, now);
        template
            .depends_on
            .iter()
            .any(|d| self.replicas.replicas(d) == Some(0))
    }

    /// Run cycles every `interval` until `shutdown` changes.
    pub async fn run(&self, interval: Duration, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        info!(interval_ms = interval.as_millis() as u64, "jobs worker started");

        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    if let Err(e) = self.run_cycle().await {
                        error!(error = %e, "jobs worker cycle failed");
                    }
                }
                _ = shutdown.changed() => {
                    info!("jobs worker shutting down");
                    break;
                }
            }
        }
    }
}
