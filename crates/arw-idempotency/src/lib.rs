//! `Idempotency-Key` request deduplication for axum services.
//!
//! A request carrying `Idempotency-Key: "<token>"` runs the wrapped handler at
//! most once. Retries with the same key and the same method, URL, critical
//! headers and body get the first response replayed verbatim; retries that
//! differ are rejected with 400, and a retry that arrives while the first
//! attempt is still running is rejected with 409.
//!
//! ```no_run
//! use arw_idempotency::{idempotency_mw, Idempotency, IdempotencyConfig};
//! use axum::{middleware, routing::post, Router};
//!
//! let idem = Idempotency::new(IdempotencyConfig::default());
//! let app: Router = Router::new()
//!     .route("/orders", post(|| async { "created" }))
//!     .layer(middleware::from_fn_with_state(idem, idempotency_mw));
//! ```
//!
//! Results live in process memory only and expire after the configured
//! lifetime (six hours by default).

mod body_tap;
mod cache;
mod clock;
mod config;
mod dispatcher;
mod error;
mod inflight;
mod key;
mod response_tap;

pub use body_tap::{digest_body, tap_body, BodyDigest, BodySha256};
pub use cache::{ResultCache, SavedResult};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{
    ConfigError, IdempotencyConfig, CRITICAL_HEADERS_ENV, DEFAULT_LIFETIME, TTL_ENV,
};
pub use dispatcher::{idempotency_mw, Idempotency, IdempotencyStats};
pub use error::IdempotencyError;
pub use inflight::{InFlight, InFlightGuard};
pub use key::{parse_key, IDEMPOTENCY_KEY};
pub use response_tap::{CapturedResponse, ResponseTap};
