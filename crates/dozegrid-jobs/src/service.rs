//! Job service: admission policy in front of the job queues.
//!
//! Requests are checked against their template, merged with it, and
//! pushed onto the queue named after the template. The worker later pops
//! them and hands them to the `JobRuntime`.

use std::sync::{Arc, RwLock};

use dozegrid_queue::{ItemId, QueueEngine};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::{CreateJob, EnvVar, JobsConfig, Visibility};
use crate::error::{JobError, JobResult};
use crate::resources::validate_resources;
use crate::runtime::{Job, JobRuntime};

pub const ERROR_VISIBILITY_PRIVATE: &str = "visibility_private";
pub const ERROR_IMAGE_NOT_ALLOWED: &str = "image_not_allowed";

/// Result of an enqueue request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum EnqueueOutcome {
    Queued { id: ItemId },
    Rejected { error_key: String, status: u16 },
}

impl EnqueueOutcome {
    fn rejected(error_key: &str) -> Self {
        EnqueueOutcome::Rejected {
            error_key: error_key.to_string(),
            status: 400,
        }
    }

    /// HTTP status the outcome maps to.
    pub fn status(&self) -> u16 {
        match self {
            EnqueueOutcome::Queued { .. } => 204,
            EnqueueOutcome::Rejected { status, .. } => *status,
        }
    }
}

pub struct JobService {
    engine: QueueEngine,
    runtime: Arc<dyn JobRuntime>,
    config: Arc<JobsConfig>,
    namespace: String,
    jobs: RwLock<Vec<Job>>,
}

impl JobService {
    pub fn new(
        engine: QueueEngine,
        runtime: Arc<dyn JobRuntime>,
        config: Arc<JobsConfig>,
        namespace: impl Into<String>,
    ) -> Self {
        Self {
            engine,
            runtime,
            config,
            namespace: namespace.into(),
            jobs: RwLock::new(Vec::new()),
        }
    }

    pub fn engine(&self) -> &QueueEngine {
        &self.engine
    }

    pub fn config(&self) -> &JobsConfig {
        &self.config
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Admit a job request and push it onto its template's queue.
    ///
    /// `from_internal` is true for callers inside the cluster namespace;
    /// only they may use private templates.
    pub async fn enqueue_job(
        &self,
        name: &str,
        request: CreateJob,
        from_internal: bool,
    ) -> JobResult<EnqueueOutcome> {
        let name = self.config.resolve(name);
        let template = self.config.template(name);

        if !from_internal && template.visibility == Visibility::Private {
            debug!(%name, "external enqueue on private template rejected");
            return Ok(EnqueueOutcome::rejected(ERROR_VISIBILITY_PRIVATE));
        }
        if !request.image.is_empty() && !template.images_whitelist.contains(&request.image) {
            debug!(%name, image = %request.image, "image not in whitelist");
            return Ok(EnqueueOutcome::rejected(ERROR_IMAGE_NOT_ALLOWED));
        }

        let image = if request.image.is_empty() {
            template.image.clone()
        } else {
            request.image
        };
        let job = CreateJob {
            args: request.args,
            image,
            environments: merge_environments(&template.environments, request.environments),
            resources: Some(validate_resources(
                &self.config.resources_for(name),
                request.resources.as_ref(),
            )),
            ttl_seconds_after_finished: Some(template.ttl_seconds_after_finished),
            configuration_name: Some(name.to_string()),
        };

        let payload = serde_json::to_vec(&job).map_err(|e| JobError::Serialize(e.to_string()))?;
        let id = self.engine.enqueue(name, payload).await?;
        info!(%name, %id, "job enqueued");
        Ok(EnqueueOutcome::Queued { id })
    }

    /// Start a job through the runtime.
    pub async fn create_job(&self, name: &str, job: &CreateJob) -> JobResult<()> {
        self.runtime.create_job(&self.namespace, name, job).await
    }

    /// Refresh the cached job list from the runtime.
    pub async fn sync_jobs(&self) -> JobResult<Vec<Job>> {
        let jobs = self.runtime.list_jobs(&self.namespace).await?;
        *self.jobs.write().expect("jobs lock") = jobs.clone();
        Ok(jobs)
    }

    /// Jobs as of the last sync.
    pub fn jobs(&self) -> Vec<Job> {
        self.jobs.read().expect("jobs lock").clone()
    }
}

/// Template variables not overridden by the request, then the request's.
fn merge_environments(template: &[EnvVar], request: Vec<EnvVar>) -> Vec<EnvVar> {
    let mut merged: Vec<EnvVar> = template
        .iter()
        .filter(|env| !request.iter().any(|r| r.name == env.name))
        .cloned()
        .collect();
    merged.extend(request);
    merged
}
