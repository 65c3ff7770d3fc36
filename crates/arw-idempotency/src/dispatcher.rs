use axum::extract::{Request, State};
use axum::http::{HeaderMap, HeaderName, HeaderValue};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use metrics::counter;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::body_tap::{digest_body, tap_body};
use crate::cache::{ResultCache, SavedResult};
use crate::clock::{Clock, SystemClock};
use crate::config::IdempotencyConfig;
use crate::error::IdempotencyError;
use crate::inflight::{InFlight, InFlightGuard};
use crate::key::{parse_key, raw_key};
use crate::response_tap::ResponseTap;

const REQUESTS_TOTAL: &str = "arw_idempotency_requests_total";

fn record(outcome: &'static str) {
    counter!(REQUESTS_TOTAL, "outcome" => outcome).increment(1);
}

struct Shared {
    cache: ResultCache,
    in_flight: Arc<InFlight>,
    critical_headers: Vec<HeaderName>,
}

/// Idempotency-Key dispatcher. Clones share the same cache and in-flight set.
#[derive(Clone)]
pub struct Idempotency {
    shared: Arc<Shared>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct IdempotencyStats {
    pub entries: usize,
    pub in_flight: usize,
    pub lifetime_secs: u64,
}

impl Idempotency {
    pub fn new(config: IdempotencyConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: IdempotencyConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            shared: Arc::new(Shared {
                cache: ResultCache::new(config.lifetime, clock),
                in_flight: Arc::new(InFlight::new()),
                critical_headers: config.critical_headers,
            }),
        }
    }

    pub fn lifetime(&self) -> Duration {
        self.shared.cache.lifetime()
    }

    /// Change how long results are kept. Applies from the next lookup or sweep.
    pub fn set_lifetime(&self, lifetime: Duration) {
        info!(
            target: "arw::idempotency",
            lifetime_secs = lifetime.as_secs(),
            "idempotency lifetime updated"
        );
        self.shared.cache.set_lifetime(lifetime);
    }

    pub fn len(&self) -> usize {
        self.shared.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shared.cache.is_empty()
    }

    pub fn purge_expired(&self) -> usize {
        self.shared.cache.purge_expired()
    }

    pub fn stats(&self) -> IdempotencyStats {
        IdempotencyStats {
            entries: self.shared.cache.len(),
            in_flight: self.shared.in_flight.len(),
            lifetime_secs: self.shared.cache.lifetime().as_secs(),
        }
    }

    /// Run `req` through the idempotency rules, calling `handler` at most once
    /// per key.
    ///
    /// Every error except `ResponseBody` is raised before `handler` is invoked.
    /// Once the handler returns, its response is recorded and cached whatever
    /// its status, and the key is released only after the insert.
    pub async fn handle<H, Fut>(
        &self,
        req: Request,
        handler: H,
    ) -> Result<Response, IdempotencyError>
    where
        H: FnOnce(Request) -> Fut,
        Fut: Future<Output = Response>,
    {
        let raw = raw_key(req.headers()).map(|raw| raw.map(str::to_owned));
        let Some(raw) = raw else {
            record("passthrough");
            return Ok(handler(req).await);
        };
        let result = self.handle_keyed(raw, req, handler).await;
        if let Err(err) = &result {
            record(err.outcome());
            match err {
                IdempotencyError::Conflict { .. } => {
                    info!(target: "arw::idempotency", error = %err, "rejected concurrent retry")
                }
                IdempotencyError::ResponseBody(_) => {
                    warn!(target: "arw::idempotency", error = %err, "handler response failed; result not cached")
                }
                _ if err.is_mismatch() => {
                    info!(target: "arw::idempotency", error = %err, "rejected mismatched replay")
                }
                _ => debug!(target: "arw::idempotency", error = %err, "rejected keyed request"),
            }
        }
        result
    }

    async fn handle_keyed<H, Fut>(
        &self,
        raw: Result<String, IdempotencyError>,
        req: Request,
        handler: H,
    ) -> Result<Response, IdempotencyError>
    where
        H: FnOnce(Request) -> Fut,
        Fut: Future<Output = Response>,
    {
        let raw = raw?;
        let key = parse_key(&raw)?.to_owned();

        if let Some(saved) = self.shared.cache.lookup(&key) {
            return replay(&saved, req).await;
        }

        let Some(guard) = self.shared.in_flight.claim(&key) else {
            return Err(IdempotencyError::Conflict { key });
        };
        // The previous holder may have cached its result between our lookup and claim.
        if let Some(saved) = self.shared.cache.lookup(&key) {
            drop(guard);
            return replay(&saved, req).await;
        }

        self.execute(guard, req, handler).await
    }

    async fn execute<H, Fut>(
        &self,
        guard: InFlightGuard,
        req: Request,
        handler: H,
    ) -> Result<Response, IdempotencyError>
    where
        H: FnOnce(Request) -> Fut,
        Fut: Future<Output = Response>,
    {
        let (parts, body) = req.into_parts();
        let method = parts.method.clone();
        let url = parts.uri.to_string();
        let critical_headers = self.capture_headers(&parts.headers);
        let (body, digest) = tap_body(body);

        record("executed");
        let res = handler(Request::from_parts(parts, body)).await;
        let (res, captured) = ResponseTap::capture(res)
            .await
            .map_err(IdempotencyError::ResponseBody)?;

        let key = guard.key().to_string();
        let status = captured.status;
        let stored = self.shared.cache.insert(SavedResult {
            key: key.clone(),
            method,
            url,
            critical_headers,
            body_digest: digest.snapshot(),
            status: captured.status,
            response_headers: captured.headers,
            response_body: captured.body,
            added_at: None,
        });
        drop(guard);
        debug!(
            target: "arw::idempotency",
            key = %key,
            status = status.as_u16(),
            request_bytes = digest.bytes_read(),
            stored,
            "idempotent execution completed"
        );
        Ok(res)
    }

    fn capture_headers(&self, headers: &HeaderMap) -> Vec<(HeaderName, Option<HeaderValue>)> {
        self.shared
            .critical_headers
            .iter()
            .map(|name| (name.clone(), headers.get(name).cloned()))
            .collect()
    }
}

async fn replay(saved: &SavedResult, req: Request) -> Result<Response, IdempotencyError> {
    let (parts, body) = req.into_parts();
    if parts.method != saved.method {
        return Err(IdempotencyError::MethodMismatch {
            method: parts.method.to_string(),
        });
    }
    let url = parts.uri.to_string();
    if url != saved.url {
        return Err(IdempotencyError::UrlMismatch { url });
    }
    for (name, stored) in &saved.critical_headers {
        let current = parts.headers.get(name);
        if current != stored.as_ref() {
            return Err(IdempotencyError::HeaderMismatch {
                header: name.to_string(),
                value: current
                    .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned())
                    .unwrap_or_default(),
            });
        }
    }
    let received = digest_body(body)
        .await
        .map_err(IdempotencyError::BodyRead)?;
    if received != saved.body_digest {
        return Err(IdempotencyError::BodyMismatch {
            received: received.to_hex(),
            stored: saved.body_digest.to_hex(),
        });
    }

    record("replayed");
    debug!(
        target: "arw::idempotency",
        key = %saved.key,
        status = saved.status.as_u16(),
        "replaying cached response"
    );
    Ok(saved.replay())
}

/// Axum middleware entry point, for use with `middleware::from_fn_with_state`.
pub async fn idempotency_mw(
    State(idem): State<Idempotency>,
    req: Request,
    next: Next,
) -> Response {
    match idem.handle(req, |req| next.run(req)).await {
        Ok(res) => res,
        Err(err) => err.into_response(),
    }
}
