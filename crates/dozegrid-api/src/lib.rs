//! dozegrid-api — REST API for DozeGrid.
//!
//! Provides axum route handlers for submitting jobs, inspecting queue
//! depth, and listing running jobs.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | POST | `/api/v1/jobs/{name}` | Enqueue a job request |
//! | GET | `/api/v1/jobs` | Jobs from the last sync |
//! | GET | `/api/v1/queues/{name}/count` | Count queue items by class |
//! | GET | `/healthz` | Liveness and leadership |

pub mod handlers;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use dozegrid_jobs::JobService;
use dozegrid_queue::LeadershipGate;

/// Header marking a request as coming from inside the cluster namespace.
pub const INTERNAL_HEADER: &str = "x-dozegrid-internal";

/// Header carrying the queue item id of an accepted job.
pub const ITEM_ID_HEADER: &str = "x-dozegrid-item-id";

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub node_id: u64,
    pub jobs: Arc<JobService>,
    pub gate: Arc<dyn LeadershipGate>,
}

/// Build the complete API router.
pub fn build_router(state: ApiState) -> Router {
    let api_routes = Router::new()
        .route("/jobs", get(handlers::list_jobs))
        .route("/jobs/{name}", post(handlers::enqueue_job))
        .route("/queues/{name}/count", get(handlers::count_queue))
        .with_state(state.clone());

    Router::new()
        .nest("/api/v1", api_routes)
        .route("/healthz", get(handlers::healthz).with_state(state))
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use dozegrid_jobs::{InMemoryJobRuntime, JobsConfig};
    use dozegrid_queue::{CommandLog, QueueEngine, StaticGate};
    use tower::ServiceExt;

    use super::*;

    fn test_state() -> ApiState {
        let log = Arc::new(CommandLog::open_in_memory().unwrap());
        let jobs = JobService::new(
            QueueEngine::new(log),
            Arc::new(InMemoryJobRuntime::new()),
            Arc::new(JobsConfig::default()),
            "default",
        );
        ApiState {
            node_id: 1,
            jobs: Arc::new(jobs),
            gate: Arc::new(StaticGate(true)),
        }
    }

    #[tokio::test]
    async fn routes_are_mounted() {
        let router = build_router(test_state());

        let resp = router
            .clone()
            .oneshot(Request::get("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let resp = router
            .clone()
            .oneshot(Request::get("/api/v1/jobs").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let resp = router
            .oneshot(Request::get("/api/v1/nope").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn enqueue_then_count_over_http() {
        let router = build_router(test_state());

        let req = Request::post("/api/v1/jobs/anything")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"args": ["1"]}"#))
            .unwrap();
        let resp = router.clone().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);
        assert!(resp.headers().contains_key(ITEM_ID_HEADER));

        let req = Request::get("/api/v1/queues/Default/count?status=available")
            .body(Body::empty())
            .unwrap();
        let resp = router.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["data"]["count"], 1);
    }
}
