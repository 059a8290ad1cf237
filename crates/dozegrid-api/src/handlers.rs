//! REST API handlers.
//!
//! Each handler goes through `JobService` and returns JSON responses.

use std::collections::BTreeSet;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::IntoResponse;
use dozegrid_jobs::{CreateJob, EnqueueOutcome, JobError};
use dozegrid_queue::{CountType, QueueError};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{ApiState, INTERNAL_HEADER, ITEM_ID_HEADER};

/// Response wrapper for consistent API format.
#[derive(Serialize)]
struct ApiResponse<T: Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

fn error_response(msg: &str, status: StatusCode) -> impl IntoResponse {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
}

/// Queue errors a retry may clear map to 503.
fn queue_error_status(e: &QueueError) -> StatusCode {
    if e.is_transient() {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    }
}

fn job_error_status(e: &JobError) -> StatusCode {
    match e {
        JobError::Queue(q) => queue_error_status(q),
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

// ── Jobs ───────────────────────────────────────────────────────

fn is_internal(headers: &HeaderMap) -> bool {
    headers
        .get(INTERNAL_HEADER)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.trim().eq_ignore_ascii_case("true"))
}

/// POST /api/v1/jobs/{name}
pub async fn enqueue_job(
    State(state): State<ApiState>,
    Path(name): Path<String>,
    headers: HeaderMap,
    Json(request): Json<CreateJob>,
) -> impl IntoResponse {
    let internal = is_internal(&headers);
    match state.jobs.enqueue_job(&name, request, internal).await {
        Ok(EnqueueOutcome::Queued { id }) => {
            let mut resp = StatusCode::NO_CONTENT.into_response();
            if let Ok(value) = HeaderValue::from_str(&id) {
                resp.headers_mut().insert(ITEM_ID_HEADER, value);
            }
            resp
        }
        Ok(EnqueueOutcome::Rejected { error_key, status }) => {
            debug!(%name, %error_key, "job request rejected");
            let status = StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_REQUEST);
            error_response(&error_key, status).into_response()
        }
        Err(e) => {
            warn!(%name, error = %e, "enqueue failed");
            error_response(&e.to_string(), job_error_status(&e)).into_response()
        }
    }
}

/// GET /api/v1/jobs
pub async fn list_jobs(State(state): State<ApiState>) -> impl IntoResponse {
    ApiResponse::ok(state.jobs.jobs())
}

// ── Queues ─────────────────────────────────────────────────────

/// Query for the count route: `status` is a comma-separated list of
/// count classes, defaulting to `available`.
#[derive(Debug, Deserialize)]
pub struct CountParams {
    pub status: Option<String>,
    pub max: Option<u64>,
}

#[derive(Debug, Serialize)]
struct CountBody {
    queue: String,
    statuses: BTreeSet<CountType>,
    count: u64,
}

fn parse_statuses(raw: Option<&str>) -> Result<BTreeSet<CountType>, String> {
    let Some(raw) = raw.filter(|r| !r.trim().is_empty()) else {
        return Ok(BTreeSet::from([CountType::Available]));
    };
    raw.split(',').map(str::parse).collect()
}

/// GET /api/v1/queues/{name}/count
pub async fn count_queue(
    State(state): State<ApiState>,
    Path(name): Path<String>,
    Query(params): Query<CountParams>,
) -> impl IntoResponse {
    let statuses = match parse_statuses(params.status.as_deref()) {
        Ok(statuses) => statuses,
        Err(e) => return error_response(&e, StatusCode::BAD_REQUEST).into_response(),
    };
    let classes: Vec<CountType> = statuses.iter().copied().collect();
    let maximum = params.max.unwrap_or(u64::MAX);
    match state.jobs.engine().count(&name, &classes, maximum) {
        Ok(count) => ApiResponse::ok(CountBody {
            queue: name,
            statuses,
            count,
        })
        .into_response(),
        Err(e) => error_response(&e.to_string(), queue_error_status(&e)).into_response(),
    }
}

// ── Health ─────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct Health {
    status: &'static str,
    node_id: u64,
    leader: bool,
}

/// GET /healthz
pub async fn healthz(State(state): State<ApiState>) -> impl IntoResponse {
    ApiResponse::ok(Health {
        status: "ok",
        node_id: state.node_id,
        leader: state.gate.is_leader(),
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::to_bytes;
    use axum::response::Response;
    use dozegrid_jobs::{
        InMemoryJobRuntime, JobService, JobTemplate, JobsConfig, Visibility,
    };
    use dozegrid_queue::{CommandLog, FlagGate, QueueEngine};

    use super::*;

    fn test_state(gate: FlagGate) -> ApiState {
        let templates = std::collections::BTreeMap::from([(
            "secret".to_string(),
            JobTemplate {
                visibility: Visibility::Private,
                ..Default::default()
            },
        )]);
        let log = Arc::new(CommandLog::open_in_memory().unwrap());
        let jobs = JobService::new(
            QueueEngine::new(log),
            Arc::new(InMemoryJobRuntime::new()),
            Arc::new(JobsConfig::new(templates)),
            "default",
        );
        ApiState {
            node_id: 7,
            jobs: Arc::new(jobs),
            gate: Arc::new(gate),
        }
    }

    async fn json(resp: Response) -> serde_json::Value {
        let body = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    fn internal_headers() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(INTERNAL_HEADER, HeaderValue::from_static("true"));
        headers
    }

    #[test]
    fn statuses_parse_and_default() {
        assert_eq!(
            parse_statuses(None).unwrap(),
            BTreeSet::from([CountType::Available])
        );
        assert_eq!(
            parse_statuses(Some("available,pending")).unwrap(),
            BTreeSet::from([CountType::Available, CountType::Pending])
        );
        assert!(parse_statuses(Some("available,bogus")).is_err());
    }

    #[tokio::test]
    async fn private_template_needs_internal_header() {
        let state = test_state(FlagGate::new(true));

        let resp = enqueue_job(
            State(state.clone()),
            Path("secret".to_string()),
            HeaderMap::new(),
            Json(CreateJob::default()),
        )
        .await
        .into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body = json(resp).await;
        assert_eq!(body["success"], false);
        assert_eq!(body["error"], "visibility_private");

        let resp = enqueue_job(
            State(state),
            Path("secret".to_string()),
            internal_headers(),
            Json(CreateJob::default()),
        )
        .await
        .into_response();
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn disallowed_image_is_rejected() {
        let state = test_state(FlagGate::new(true));
        let request = CreateJob {
            image: "random:latest".into(),
            ..Default::default()
        };
        let resp = enqueue_job(
            State(state),
            Path("Default".to_string()),
            HeaderMap::new(),
            Json(request),
        )
        .await
        .into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json(resp).await["error"], "image_not_allowed");
    }

    #[tokio::test]
    async fn count_respects_classes_and_maximum() {
        let state = test_state(FlagGate::new(true));
        for _ in 0..3 {
            state
                .jobs
                .enqueue_job("Default", CreateJob::default(), false)
                .await
                .unwrap();
        }
        state.jobs.engine().dequeue("Default", 1).await.unwrap();

        let count = |status: &str, max: Option<u64>| {
            let state = state.clone();
            let status = status.to_string();
            async move {
                let resp = count_queue(
                    State(state),
                    Path("Default".to_string()),
                    Query(CountParams {
                        status: Some(status),
                        max,
                    }),
                )
                .await
                .into_response();
                json(resp).await["data"]["count"].as_u64().unwrap()
            }
        };

        assert_eq!(count("available", None).await, 2);
        assert_eq!(count("pending", None).await, 1);
        assert_eq!(count("available,pending", None).await, 3);
        assert_eq!(count("available,pending", Some(2)).await, 2);
    }

    #[tokio::test]
    async fn bad_count_class_is_400() {
        let state = test_state(FlagGate::new(true));
        let resp = count_queue(
            State(state),
            Path("Default".to_string()),
            Query(CountParams {
                status: Some("sleeping".into()),
                max: None,
            }),
        )
        .await
        .into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn healthz_reports_leadership() {
        let gate = FlagGate::new(false);
        let state = test_state(gate.clone());

        let body = json(healthz(State(state.clone())).await.into_response()).await;
        assert_eq!(body["data"]["node_id"], 7);
        assert_eq!(body["data"]["leader"], false);

        gate.set(true);
        let body = json(healthz(State(state)).await.into_response()).await;
        assert_eq!(body["data"]["leader"], true);
    }

    #[tokio::test]
    async fn list_jobs_reflects_sync() {
        let state = test_state(FlagGate::new(true));
        state
            .jobs
            .create_job("Default", &CreateJob::default())
            .await
            .unwrap();
        state.jobs.sync_jobs().await.unwrap();

        let body = json(list_jobs(State(state)).await.into_response()).await;
        assert_eq!(body["data"].as_array().unwrap().len(), 1);
        assert_eq!(body["data"][0]["status"], "running");
    }
}
