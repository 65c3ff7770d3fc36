use arw_idempotency::{Idempotency, IdempotencyStats};
use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

fn problem(status: StatusCode, title: &str, detail: Option<&str>) -> Response {
    let mut body = json!({"type":"about:blank","title": title,"status": status.as_u16()});
    if let Some(d) = detail {
        body["detail"] = json!(d);
    }
    (status, Json(body)).into_response()
}

pub(crate) async fn healthz() -> &'static str {
    "ok"
}

/// Stand-in unit of work: drains the request and answers with a fresh id, so
/// every real execution is distinguishable from a replay.
pub(crate) async fn work(req: Request) -> Response {
    if let Err(err) = axum::body::to_bytes(req.into_body(), usize::MAX).await {
        return problem(
            StatusCode::BAD_REQUEST,
            "Bad Request",
            Some(&format!("read request body: {err}")),
        );
    }
    (
        [("x-response", "bar")],
        uuid::Uuid::new_v4().to_string(),
    )
        .into_response()
}

pub(crate) async fn idempotency_stats(State(idem): State<Idempotency>) -> Json<IdempotencyStats> {
    Json(idem.stats())
}

#[derive(Debug, Deserialize)]
pub(crate) struct LifetimeRequest {
    secs: u64,
}

pub(crate) async fn idempotency_lifetime(
    State(idem): State<Idempotency>,
    Json(body): Json<LifetimeRequest>,
) -> Response {
    if body.secs == 0 {
        return problem(
            StatusCode::BAD_REQUEST,
            "Invalid Lifetime",
            Some("secs must be at least 1"),
        );
    }
    idem.set_lifetime(Duration::from_secs(body.secs));
    Json(idem.stats()).into_response()
}

pub(crate) async fn idempotency_purge(State(idem): State<Idempotency>) -> Json<serde_json::Value> {
    let removed = idem.purge_expired();
    Json(json!({"removed": removed, "entries": idem.len()}))
}
