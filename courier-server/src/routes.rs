use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, NaiveDateTime, Utc};
use courier::{Broker, JobRecord, JobStatus};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tower_http::trace::TraceLayer;

use crate::error::{json_error, ApiError};

/// Format accepted for `executed_at`, interpreted as UTC.
const EXECUTED_AT_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

pub fn router(broker: Arc<Broker>) -> Router {
    let router = Router::new()
        .route("/queues/*queue", get(pop_from_queue).post(push_to_queue))
        .route("/jobs", get(list_jobs))
        .route("/jobs/:id", get(get_job).post(report_status))
        .route("/health", get(health));

    #[cfg(feature = "metrics")]
    let router = router.route("/metrics", get(metrics));

    router.layer(TraceLayer::new_for_http()).with_state(broker)
}

/// Job record as seen by HTTP clients.
#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct JobView {
    /// Backend id; null until dispatched.
    pub id: Option<String>,
    pub queue: String,
    pub status: JobStatus,
    pub result: Option<String>,
    /// Payload as a serialized JSON string.
    pub data: String,
    pub created_at: DateTime<Utc>,
    pub executed_at: DateTime<Utc>,
    pub dispatch_attempts: u32,
}

impl From<JobRecord> for JobView {
    fn from(record: JobRecord) -> Self {
        Self {
            id: record.backend_id,
            queue: record.queue_name,
            status: record.status,
            result: record.result,
            data: record.payload.to_string(),
            created_at: record.created_at,
            executed_at: record.scheduled_at,
            dispatch_attempts: record.dispatch_attempts,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct PushParams {
    executed_at: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct StatusReport {
    status: String,
    #[serde(default)]
    result: Option<Value>,
}

fn parse_executed_at(raw: &str) -> Result<DateTime<Utc>, ApiError> {
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, EXECUTED_AT_FORMAT) {
        return Ok(naive.and_utc());
    }
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| {
            ApiError::BadRequest(format!(
                "executed_at must look like 2024-01-31T12:00:00, got {raw}"
            ))
        })
}

/// Results are stored as text; non-string JSON is kept in serialized form.
fn result_text(result: Option<Value>) -> Option<String> {
    match result {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s),
        Some(other) => Some(other.to_string()),
    }
}

async fn push_to_queue(
    State(broker): State<Arc<Broker>>,
    Path(queue): Path<String>,
    Query(params): Query<PushParams>,
    Json(payload): Json<Value>,
) -> Result<Json<JobView>, ApiError> {
    let scheduled_at = params
        .executed_at
        .as_deref()
        .filter(|s| !s.is_empty())
        .map(parse_executed_at)
        .transpose()?;

    let record = broker.enqueue(&queue, payload, scheduled_at).await?;
    Ok(Json(record.into()))
}

async fn pop_from_queue(
    State(broker): State<Arc<Broker>>,
    Path(queue): Path<String>,
) -> Result<Response, ApiError> {
    match broker.pop(&queue).await? {
        Some(envelope) => Ok(Json(json!({ "id": envelope.id, "data": envelope.data })).into_response()),
        None => Ok(json_error(StatusCode::NOT_FOUND, "No message yet.")),
    }
}

async fn report_status(
    State(broker): State<Arc<Broker>>,
    Path(id): Path<String>,
    Json(report): Json<StatusReport>,
) -> Result<Json<JobView>, ApiError> {
    let status: JobStatus = report
        .status
        .parse()
        .map_err(|e| ApiError::BadRequest(format!("invalid status: {e}")))?;

    let record = broker
        .report_status(&id, status, result_text(report.result))
        .await?;
    Ok(Json(record.into()))
}

async fn get_job(
    State(broker): State<Arc<Broker>>,
    Path(id): Path<String>,
) -> Result<Json<JobView>, ApiError> {
    Ok(Json(broker.get(&id).await?.into()))
}

async fn list_jobs(State(broker): State<Arc<Broker>>) -> Result<Json<Value>, ApiError> {
    let jobs: Vec<JobView> = broker
        .list_jobs()
        .await?
        .into_iter()
        .map(JobView::from)
        .collect();
    Ok(Json(json!({ "jobs": jobs })))
}

async fn health(State(broker): State<Arc<Broker>>) -> Result<StatusCode, ApiError> {
    broker.health().await?;
    Ok(StatusCode::OK)
}

#[cfg(feature = "metrics")]
async fn metrics() -> Response {
    match courier::metrics::gather_metrics() {
        Ok(body) => body.into_response(),
        Err(err) => json_error(StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{Method, Request};
    use courier_testkit::{broker_with, InMemoryJobStore, MockQueue};
    use tower::ServiceExt;

    fn app() -> (Router, MockQueue) {
        let queue = MockQueue::new();
        let broker = broker_with(Arc::new(InMemoryJobStore::new()), Arc::new(queue.clone()));
        (router(Arc::new(broker)), queue)
    }

    async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json");
        let request = match body {
            Some(body) => request.body(Body::from(body.to_string())),
            None => request.body(Body::empty()),
        }
        .unwrap();

        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    #[tokio::test]
    async fn push_dispatches_and_returns_job_view() {
        let (app, queue) = app();

        let (status, body) = send(
            &app,
            Method::POST,
            "/queues/emails",
            Some(json!({ "to": "a@example.com" })),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["queue"], "emails");
        assert_eq!(body["status"], "PENDING");
        assert_eq!(body["data"], r#"{"to":"a@example.com"}"#);
        assert!(body["id"].is_string());
        queue.assert_push_count_eq(1);
    }

    #[tokio::test]
    async fn push_with_future_executed_at_defers_dispatch() {
        let (app, queue) = app();
        let later = (Utc::now() + chrono::Duration::hours(1))
            .format(EXECUTED_AT_FORMAT)
            .to_string();

        let (status, body) = send(
            &app,
            Method::POST,
            &format!("/queues/reports/monthly?executed_at={later}"),
            Some(json!({ "month": 1 })),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert!(body["id"].is_null());
        assert_eq!(body["queue"], "reports/monthly");
        queue.assert_push_count_eq(0);
    }

    #[tokio::test]
    async fn push_rejects_unparseable_executed_at() {
        let (app, _queue) = app();
        let (status, body) = send(
            &app,
            Method::POST,
            "/queues/emails?executed_at=tomorrow",
            Some(json!({})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("executed_at"));
    }

    #[tokio::test]
    async fn pop_returns_envelope_then_not_found() {
        let (app, _queue) = app();
        let (_, pushed) = send(&app, Method::POST, "/queues/emails", Some(json!({ "n": 1 }))).await;

        let (status, body) = send(&app, Method::GET, "/queues/emails", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["id"], pushed["id"]);
        assert_eq!(body["data"], json!({ "n": 1 }));

        let (status, body) = send(&app, Method::GET, "/queues/emails", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body, json!({ "error": "No message yet." }));
    }

    #[tokio::test]
    async fn status_report_round_trip() {
        let (app, _queue) = app();
        let (_, pushed) = send(&app, Method::POST, "/queues/emails", Some(json!({}))).await;
        let id = pushed["id"].as_str().unwrap().to_string();

        let (status, body) = send(
            &app,
            Method::POST,
            &format!("/jobs/{id}"),
            Some(json!({ "status": "DONE", "result": "ok" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "DONE");
        assert_eq!(body["result"], "ok");

        let (status, body) = send(&app, Method::GET, &format!("/jobs/{id}"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "DONE");
        assert_eq!(body["queue"], "emails");

        let (status, body) = send(&app, Method::GET, "/jobs", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["jobs"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn unknown_job_is_not_found() {
        let (app, _queue) = app();

        let (status, _) = send(
            &app,
            Method::POST,
            "/jobs/abc",
            Some(json!({ "status": "DONE", "result": "ok" })),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = send(&app, Method::GET, "/jobs/abc", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn health_probes_store() {
        let (app, _queue) = app();
        let (status, _) = send(&app, Method::GET, "/health", None).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[test]
    fn executed_at_accepts_naive_and_rfc3339() {
        let naive = parse_executed_at("2024-01-31T12:00:00").unwrap();
        let rfc = parse_executed_at("2024-01-31T13:00:00+01:00").unwrap();
        assert_eq!(naive, rfc);
    }

    #[test]
    fn non_string_results_are_serialized() {
        assert_eq!(result_text(Some(json!("ok"))), Some("ok".to_string()));
        assert_eq!(result_text(Some(json!({ "rows": 3 }))), Some(r#"{"rows":3}"#.to_string()));
        assert_eq!(result_text(Some(Value::Null)), None);
        assert_eq!(result_text(None), None);
    }
}
