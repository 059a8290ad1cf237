//! Collaborators the job system drives but does not own.
//!
//! `JobRuntime` starts and lists jobs, `ReplicaSource` reports how many
//! replicas a dependency deployment has, and `ActivityTracker` records
//! that a deployment is needed so the autoscaler keeps it awake. The
//! in-memory implementations back standalone runs and tests.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, RwLock};

use dozegrid_queue::{BoxFuture, TimestampMs};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::CreateJob;
use crate::error::{JobError, JobResult};

/// Separates the configuration name from the unique suffix in job names.
pub const JOB_NAME_MARKER: &str = "-dozejob-";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl JobStatus {
    /// Occupies one of its configuration's parallel slots.
    pub fn is_active(self) -> bool {
        matches!(self, JobStatus::Pending | JobStatus::Running)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Job {
    pub name: String,
    pub status: JobStatus,
}

impl Job {
    /// Configuration name encoded in the job name, if it carries the marker.
    pub fn configuration_name(&self) -> Option<&str> {
        self.name
            .split_once(JOB_NAME_MARKER)
            .map(|(configuration, _)| configuration)
    }
}

pub trait JobRuntime: Send + Sync {
    fn create_job<'a>(
        &'a self,
        namespace: &'a str,
        name: &'a str,
        job: &'a CreateJob,
    ) -> BoxFuture<'a, JobResult<()>>;

    fn list_jobs<'a>(&'a self, namespace: &'a str) -> BoxFuture<'a, JobResult<Vec<Job>>>;

    fn delete_job<'a>(&'a self, namespace: &'a str, name: &'a str) -> BoxFuture<'a, JobResult<()>>;
}

pub trait ReplicaSource: Send + Sync {
    /// Current replica count of a deployment, `None` when unknown.
    fn replicas(&self, deployment: &str) -> Option<u32>;
}

pub trait ActivityTracker: Send + Sync {
    fn record(&self, deployment: &str, at_ms: TimestampMs);
}

// ── In-memory implementations ─────────────────────────────────────

#[derive(Debug, Clone)]
struct StoredJob {
    job: Job,
    request: CreateJob,
}

/// Keeps jobs in a map per namespace. Created jobs start `Running`.
#[derive(Debug, Default)]
pub struct InMemoryJobRuntime {
    jobs: Mutex<BTreeMap<String, BTreeMap<String, StoredJob>>>,
    sequence: Mutex<u64>,
    failing: Mutex<bool>,
}

impl InMemoryJobRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `create_job` fail.
    pub fn set_failing(&self, failing: bool) {
        *self.failing.lock().expect("failing lock") = failing;
    }

    /// Requests of every job created in a namespace, in name order.
    pub fn created(&self, namespace: &str) -> Vec<(String, CreateJob)> {
        let jobs = self.jobs.lock().expect("jobs lock");
        jobs.get(namespace)
            .map(|ns| {
                ns.iter()
                    .map(|(name, stored)| (name.clone(), stored.request.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Move a job to a terminal status.
    pub fn finish(&self, namespace: &str, name: &str, status: JobStatus) -> bool {
        let mut jobs = self.jobs.lock().expect("jobs lock");
        match jobs.get_mut(namespace).and_then(|ns| ns.get_mut(name)) {
            Some(stored) => {
                stored.job.status = status;
                true
            }
            None => false,
        }
    }

    fn next_suffix(&self) -> u64 {
        let mut seq = self.sequence.lock().expect("sequence lock");
        *seq += 1;
        *seq
    }
}

impl JobRuntime for InMemoryJobRuntime {
    fn create_job<'a>(
        &'a self,
        namespace: &'a str,
        name: &'a str,
        job: &'a CreateJob,
    ) -> BoxFuture<'a, JobResult<()>> {
        Box::pin(async move {
            if *self.failing.lock().expect("failing lock") {
                return Err(JobError::Runtime(format!("cannot create job {name}")));
            }
            let job_name = format!("{name}{JOB_NAME_MARKER}{:06}", self.next_suffix());
            debug!(%namespace, %job_name, "job created");
            let stored = StoredJob {
                job: Job {
                    name: job_name.clone(),
                    status: JobStatus::Running,
                },
                request: job.clone(),
            };
            self.jobs
                .lock()
                .expect("jobs lock")
                .entry(namespace.to_string())
                .or_default()
                .insert(job_name, stored);
            Ok(())
        })
    }

    fn list_jobs<'a>(&'a self, namespace: &'a str) -> BoxFuture<'a, JobResult<Vec<Job>>> {
        Box::pin(async move {
            let jobs = self.jobs.lock().expect("jobs lock");
            Ok(jobs
                .get(namespace)
                .map(|ns| ns.values().map(|s| s.job.clone()).collect())
                .unwrap_or_default())
        })
    }

    fn delete_job<'a>(&'a self, namespace: &'a str, name: &'a str) -> BoxFuture<'a, JobResult<()>> {
        Box::pin(async move {
            let mut jobs = self.jobs.lock().expect("jobs lock");
            jobs.get_mut(namespace)
                .and_then(|ns| ns.remove(name))
                .map(|_| ())
                .ok_or_else(|| JobError::Runtime(format!("job not found: {namespace}/{name}")))
        })
    }
}

/// Replica counts set by hand.
#[derive(Debug, Default)]
pub struct InMemoryReplicas {
    replicas: RwLock<HashMap<String, u32>>,
}

impl InMemoryReplicas {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, deployment: &str, replicas: u32) {
        self.replicas
            .write()
            .expect("replicas lock")
            .insert(deployment.to_string(), replicas);
    }
}

impl ReplicaSource for InMemoryReplicas {
    fn replicas(&self, deployment: &str) -> Option<u32> {
        self.replicas
            .read()
            .expect("replicas lock")
            .get(deployment)
            .copied()
    }
}

/// Last recorded activity per deployment.
#[derive(Debug, Default)]
pub struct InMemoryActivity {
    last: RwLock<HashMap<String, TimestampMs>>,
}

impl InMemoryActivity {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last(&self, deployment: &str) -> Option<TimestampMs> {
        self.last
            .read()
            .expect("activity lock")
            .get(deployment)
            .copied()
    }
}

impl ActivityTracker for InMemoryActivity {
    fn record(&self, deployment: &str, at_ms: TimestampMs) {
        self.last
            .write()
            .expect("activity lock")
            .insert(deployment.to_string(), at_ms);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configuration_name_from_job_name() {
        let job = Job {
            name: "fibonacci-dozejob-000001".into(),
            status: JobStatus::Running,
        };
        assert_eq!(job.configuration_name(), Some("fibonacci"));

        let foreign = Job {
            name: "cron-cleanup".into(),
            status: JobStatus::Running,
        };
        assert_eq!(foreign.configuration_name(), None);
    }

    #[tokio::test]
    async fn in_memory_runtime_lifecycle() {
        let runtime = InMemoryJobRuntime::new();
        let spec = CreateJob {
            image: "busybox".into(),
            ..Default::default()
        };
        runtime.create_job("ns", "fib", &spec).await.unwrap();
        runtime.create_job("ns", "fib", &spec).await.unwrap();

        let jobs = runtime.list_jobs("ns").await.unwrap();
        assert_eq!(jobs.len(), 2);
        assert!(jobs.iter().all(|j| j.configuration_name() == Some("fib")));
        assert!(runtime.list_jobs("other").await.unwrap().is_empty());

        let name = jobs[0].name.clone();
        assert!(runtime.finish("ns", &name, JobStatus::Succeeded));
        let jobs = runtime.list_jobs("ns").await.unwrap();
        assert_eq!(jobs.iter().filter(|j| j.status.is_active()).count(), 1);

        runtime.delete_job("ns", &name).await.unwrap();
        assert_eq!(runtime.created("ns").len(), 1);
        assert!(runtime.delete_job("ns", &name).await.is_err());
    }

    #[tokio::test]
    async fn failing_runtime_rejects_creates() {
        let runtime = InMemoryJobRuntime::new();
        runtime.set_failing(true);
        let err = runtime
            .create_job("ns", "fib", &CreateJob::default())
            .await
            .unwrap_err();
        assert!(matches!(err, JobError::Runtime(_)));
        assert!(runtime.created("ns").is_empty());
    }

    #[test]
    fn replicas_and_activity() {
        let replicas = InMemoryReplicas::new();
        assert_eq!(replicas.replicas("api"), None);
        replicas.set("api", 0);
        assert_eq!(replicas.replicas("api"), Some(0));

        let activity = InMemoryActivity::new();
        activity.record("api", 42);
        assert_eq!(activity.last("api"), Some(42));
        assert_eq!(activity.last("db"), None);
    }
}
