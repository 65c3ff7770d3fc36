use arw_idempotency::{idempotency_mw, Idempotency};
use axum::routing::{get, post};
use axum::{middleware, Router};

use crate::api;

pub(crate) mod paths {
    pub const HEALTHZ: &str = "/healthz";
    pub const ADMIN_IDEMPOTENCY: &str = "/admin/idempotency";
    pub const ADMIN_IDEMPOTENCY_LIFETIME: &str = "/admin/idempotency/lifetime";
    pub const ADMIN_IDEMPOTENCY_PURGE: &str = "/admin/idempotency/purge";
}

/// Admin and health routes stay outside the idempotency layer; everything
/// else falls through to the keyed work handler.
pub(crate) fn build(idem: Idempotency) -> Router {
    let work = Router::new()
        .fallback(api::work)
        .layer(middleware::from_fn_with_state(idem.clone(), idempotency_mw));

    Router::new()
        .route(paths::HEALTHZ, get(api::healthz))
        .route(paths::ADMIN_IDEMPOTENCY, get(api::idempotency_stats))
        .route(
            paths::ADMIN_IDEMPOTENCY_LIFETIME,
            post(api::idempotency_lifetime),
        )
        .route(paths::ADMIN_IDEMPOTENCY_PURGE, post(api::idempotency_purge))
        .with_state(idem)
        .merge(work)
}
