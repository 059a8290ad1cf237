//! Job templates.
//!
//! A `JobsConfig` maps configuration names to `JobTemplate`s. The
//! `Default` template is always present and receives any job whose name
//! matches no other template.
//!
//! Files use PascalCase keys (`Configurations`, `NumberParallelJob`, ...).
//! The snake_case spelling is accepted too, which keeps TOML tables in the
//! daemon config readable.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::LazyLock;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{JobError, JobResult};

/// Template name that receives unknown job names.
pub const DEFAULT_JOB: &str = "Default";

fn default_parallelism() -> u32 {
    1
}

fn default_ttl() -> u64 {
    60
}

/// Who may enqueue against a template.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum Visibility {
    #[default]
    Public,
    /// Only callers inside the cluster namespace.
    Private,
}

/// Resource quantities keyed by resource name (`cpu`, `memory`, ...).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct JobResources {
    #[serde(default, alias = "requests")]
    pub requests: BTreeMap<String, String>,
    #[serde(default, alias = "limits")]
    pub limits: BTreeMap<String, String>,
}

impl JobResources {
    /// `cpu: 100m`, `memory: 100Mi` for both requests and limits.
    pub fn fallback() -> Self {
        let values: BTreeMap<String, String> = [
            ("cpu".to_string(), "100m".to_string()),
            ("memory".to_string(), "100Mi".to_string()),
        ]
        .into_iter()
        .collect();
        Self {
            requests: values.clone(),
            limits: values,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct EnvVar {
    #[serde(alias = "name")]
    pub name: String,
    #[serde(alias = "value")]
    pub value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct JobTemplate {
    #[serde(default, alias = "image")]
    pub image: String,
    #[serde(default, alias = "images_whitelist")]
    pub images_whitelist: Vec<String>,
    #[serde(default = "default_parallelism", alias = "number_parallel_job")]
    pub number_parallel_job: u32,
    /// Deployments that must be awake before jobs of this template start.
    #[serde(default, alias = "depends_on")]
    pub depends_on: Vec<String>,
    #[serde(default, alias = "resources")]
    pub resources: Option<JobResources>,
    #[serde(default, alias = "environments")]
    pub environments: Vec<EnvVar>,
    #[serde(default = "default_ttl", alias = "ttl_seconds_after_finished")]
    pub ttl_seconds_after_finished: u64,
    #[serde(default, alias = "visibility")]
    pub visibility: Visibility,
}

impl Default for JobTemplate {
    fn default() -> Self {
        Self {
            image: String::new(),
            images_whitelist: Vec::new(),
            number_parallel_job: default_parallelism(),
            depends_on: Vec::new(),
            resources: Some(JobResources::fallback()),
            environments: Vec::new(),
            ttl_seconds_after_finished: default_ttl(),
            visibility: Visibility::Public,
        }
    }
}

/// The job request as it travels through the queue.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CreateJob {
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub image: String,
    #[serde(default)]
    pub environments: Vec<EnvVar>,
    #[serde(default)]
    pub resources: Option<JobResources>,
    #[serde(default)]
    pub ttl_seconds_after_finished: Option<u64>,
    #[serde(default)]
    pub configuration_name: Option<String>,
}

/// All job templates, keyed by configuration name.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase", from = "RawJobsConfig")]
pub struct JobsConfig {
    configurations: BTreeMap<String, JobTemplate>,
}

/// Unknown top-level keys are rejected so a misspelled file reaches the
/// logged fallback instead of parsing as empty.
#[derive(Deserialize)]
#[serde(rename_all = "PascalCase", deny_unknown_fields)]
struct RawJobsConfig {
    #[serde(default, alias = "configurations")]
    configurations: BTreeMap<String, JobTemplate>,
}

impl From<RawJobsConfig> for JobsConfig {
    fn from(raw: RawJobsConfig) -> Self {
        Self::new(raw.configurations)
    }
}

static FALLBACK_TEMPLATE: LazyLock<JobTemplate> = LazyLock::new(JobTemplate::default);

impl Default for JobsConfig {
    fn default() -> Self {
        Self::new(BTreeMap::new())
    }
}

impl JobsConfig {
    /// Build from templates, inserting or completing `Default`.
    pub fn new(mut configurations: BTreeMap<String, JobTemplate>) -> Self {
        configurations
            .entry(DEFAULT_JOB.to_string())
            .and_modify(|t| {
                if t.resources.is_none() {
                    t.resources = Some(JobResources::fallback());
                }
            })
            .or_default();
        Self { configurations }
    }

    /// Parse `{"Configurations": {...}}`. Unparsable input is logged and
    /// yields a config holding only `Default`.
    pub fn from_json(json: &str) -> Self {
        if json.trim().is_empty() {
            return Self::default();
        }
        match serde_json::from_str::<JobsConfig>(json) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!(error = %e, "invalid jobs configuration, using Default only");
                Self::default()
            }
        }
    }

    /// Read a JSON jobs configuration file.
    pub fn load(path: &Path) -> JobResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| JobError::Config(format!("failed to read {}: {e}", path.display())))?;
        let config = Self::from_json(&content);
        info!(
            path = %path.display(),
            templates = config.configurations.len(),
            "loaded jobs configuration"
        );
        Ok(config)
    }

    /// Template name a job name resolves to.
    pub fn resolve<'a>(&self, name: &'a str) -> &'a str {
        if self.configurations.contains_key(name) {
            name
        } else {
            DEFAULT_JOB
        }
    }

    pub fn get(&self, name: &str) -> Option<&JobTemplate> {
        self.configurations.get(name)
    }

    /// The template for `name`, or `Default`.
    pub fn template(&self, name: &str) -> &JobTemplate {
        self.configurations
            .get(name)
            .or_else(|| self.configurations.get(DEFAULT_JOB))
            .unwrap_or(&FALLBACK_TEMPLATE)
    }

    /// Resource ceilings for a template: its own, or `Default`'s.
    pub fn resources_for(&self, name: &str) -> JobResources {
        self.template(name)
            .resources
            .clone()
            .or_else(|| self.template(DEFAULT_JOB).resources.clone())
            .unwrap_or_else(JobResources::fallback)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &JobTemplate)> {
        self.configurations.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.configurations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.configurations.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_always_present() {
        let config = JobsConfig::from_json("");
        assert_eq!(config.len(), 1);
        let default = config.get(DEFAULT_JOB).unwrap();
        assert_eq!(default.resources, Some(JobResources::fallback()));
        assert_eq!(default.number_parallel_job, 1);
        assert_eq!(default.visibility, Visibility::Public);
    }

    #[test]
    fn invalid_json_falls_back_to_default() {
        let config = JobsConfig::from_json("{ not json");
        assert_eq!(config.len(), 1);
        assert!(config.get(DEFAULT_JOB).is_some());
    }

    #[test]
    fn default_without_resources_is_completed() {
        let json = r#"{"configurations": {"Default": {"image": "busybox"}}}"#;
        let config = JobsConfig::from_json(json);
        let default = config.get(DEFAULT_JOB).unwrap();
        assert_eq!(default.image, "busybox");
        assert_eq!(default.resources, Some(JobResources::fallback()));
    }

    #[test]
    fn templates_parse_with_defaults() {
        let json = r#"{
            "configurations": {
                "fibonacci": {
                    "image": "fibonacci:1",
                    "images_whitelist": ["fibonacci:1", "fibonacci:2"],
                    "number_parallel_job": 3,
                    "depends_on": ["fibonacci-api"],
                    "visibility": "Private",
                    "environments": [{"name": "MODE", "value": "fast"}]
                }
            }
        }"#;
        let config = JobsConfig::from_json(json);
        assert_eq!(config.len(), 2);

        let t = config.get("fibonacci").unwrap();
        assert_eq!(t.number_parallel_job, 3);
        assert_eq!(t.depends_on, vec!["fibonacci-api".to_string()]);
        assert_eq!(t.visibility, Visibility::Private);
        assert_eq!(t.ttl_seconds_after_finished, 60);
        assert!(t.resources.is_none());
        assert_eq!(config.resources_for("fibonacci"), JobResources::fallback());
    }

    #[test]
    fn pascal_case_file_is_read() {
        let json = r#"
            {
                "Configurations": {
                    "MaFunction": {
                        "Name": "MaFunction",
                        "Something": ["arg1", "arg2"],
                        "Image": "mafunction:1",
                        "NumberParallelJob": 3,
                        "DependsOn": ["mafunction-api"],
                        "TtlSecondsAfterFinished": 120,
                        "Environments": [{"Name": "MODE", "Value": "fast"}],
                        "Resources": {
                            "Limits": { "cpu": "200m", "memory": "256Mi" },
                            "Requests": { "cpu": "50m",  "memory": "64Mi" }
                        }
                    }
                }
            }"#;
        let config = JobsConfig::from_json(json);
        assert_eq!(config.len(), 2);
        assert!(config.get(DEFAULT_JOB).is_some());

        let t = config.get("MaFunction").unwrap();
        assert_eq!(t.image, "mafunction:1");
        assert_eq!(t.number_parallel_job, 3);
        assert_eq!(t.depends_on, vec!["mafunction-api".to_string()]);
        assert_eq!(t.ttl_seconds_after_finished, 120);
        assert_eq!(t.environments[0].name, "MODE");

        let resources = config.resources_for("MaFunction");
        assert_eq!(resources.limits["cpu"], "200m");
        assert_eq!(resources.limits["memory"], "256Mi");
        assert_eq!(resources.requests["cpu"], "50m");
        assert_eq!(resources.requests["memory"], "64Mi");
    }

    #[test]
    fn pascal_case_default_overrides_fallback() {
        let json = r#"{
            "Configurations": {
                "Default": {
                    "Resources": {
                        "Limits": { "cpu": "500m", "memory": "512Mi" },
                        "Requests": { "cpu": "200m", "memory": "256Mi" }
                    }
                },
                "AutreFunction": { "Something": [] }
            }
        }"#;
        let config = JobsConfig::from_json(json);
        assert!(config.get("AutreFunction").is_some());
        let default = config.resources_for(DEFAULT_JOB);
        assert_eq!(default.limits["cpu"], "500m");
        assert_eq!(default.requests["memory"], "256Mi");
    }

    #[test]
    fn unknown_top_level_key_falls_back_to_default() {
        let json = r#"{"Configuration": {"MaFunction": {"Image": "img:1"}}}"#;
        let config = JobsConfig::from_json(json);
        assert_eq!(config.len(), 1);
        assert!(config.get("MaFunction").is_none());
        assert!(config.get(DEFAULT_JOB).is_some());
    }

    #[test]
    fn serialized_config_reads_back() {
        let config = JobsConfig::from_json(r#"{"configurations": {"fib": {"number_parallel_job": 2}}}"#);
        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains("\"NumberParallelJob\":2"), "{json}");
        assert_eq!(JobsConfig::from_json(&json), config);
    }

    #[test]
    fn unknown_names_resolve_to_default() {
        let config = JobsConfig::from_json(r#"{"configurations": {"a": {}}}"#);
        assert_eq!(config.resolve("a"), "a");
        assert_eq!(config.resolve("nope"), DEFAULT_JOB);
        assert_eq!(config.template("nope"), config.get(DEFAULT_JOB).unwrap());
    }

    #[test]
    fn load_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jobs.json");
        std::fs::write(&path, r#"{"configurations": {"x": {"image": "x:1"}}}"#).unwrap();
        let config = JobsConfig::load(&path).unwrap();
        assert_eq!(config.get("x").unwrap().image, "x:1");

        let missing = JobsConfig::load(&dir.path().join("missing.json"));
        assert!(matches!(missing, Err(JobError::Config(_))));
    }
}
