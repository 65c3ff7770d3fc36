use arw_idempotency::{ConfigError, Idempotency, IdempotencyConfig};
use axum::Router;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::trace::TraceLayer;

use crate::{access_log, router};

#[derive(Debug, thiserror::Error)]
pub(crate) enum HttpConfigError {
    #[error("invalid ARW_HTTP_MAX_CONC: {0}")]
    InvalidConcurrency(String),
    #[error("invalid ARW_PORT: {0}")]
    InvalidPort(String),
    #[error("invalid ARW_BIND: {0}")]
    InvalidBind(String),
    #[error(transparent)]
    Idempotency(#[from] ConfigError),
}

#[derive(Debug)]
pub(crate) struct HttpConfig {
    pub addr: std::net::SocketAddr,
    pub concurrency_limit: usize,
}

pub(crate) fn http_config_from_env() -> Result<HttpConfig, HttpConfigError> {
    let concurrency_limit = std::env::var("ARW_HTTP_MAX_CONC")
        .ok()
        .map(|raw| {
            raw.parse::<usize>()
                .ok()
                .filter(|n| *n > 0)
                .ok_or(HttpConfigError::InvalidConcurrency(raw))
        })
        .transpose()?
        .unwrap_or(1024);

    let bind = std::env::var("ARW_BIND").unwrap_or_else(|_| "127.0.0.1".into());
    let port_raw = std::env::var("ARW_PORT").unwrap_or_else(|_| "8091".into());
    let port: u16 = port_raw
        .parse()
        .map_err(|_| HttpConfigError::InvalidPort(port_raw))?;

    let host = if bind.contains(':') && !bind.starts_with('[') {
        format!("[{bind}]")
    } else {
        bind.clone()
    };
    let addr = format!("{host}:{port}")
        .parse()
        .map_err(|_| HttpConfigError::InvalidBind(bind))?;

    Ok(HttpConfig {
        addr,
        concurrency_limit,
    })
}

pub(crate) struct BootstrapOutput {
    pub http: HttpConfig,
    pub idempotency: Idempotency,
    pub router: Router,
}

pub(crate) fn build() -> Result<BootstrapOutput, HttpConfigError> {
    let http = http_config_from_env()?;
    let cfg = IdempotencyConfig::from_env()?;
    tracing::info!(
        lifetime_secs = cfg.lifetime.as_secs(),
        critical_headers = ?cfg.critical_headers,
        "idempotency cache configured"
    );
    let idempotency = Idempotency::new(cfg);
    let router = attach_http_layers(router::build(idempotency.clone()), http.concurrency_limit);
    Ok(BootstrapOutput {
        http,
        idempotency,
        router,
    })
}

pub(crate) fn attach_http_layers(router: Router, concurrency_limit: usize) -> Router {
    router
        .layer(axum::middleware::from_fn(access_log::access_log_mw))
        .layer(TraceLayer::new_for_http())
        .layer(ConcurrencyLimitLayer::new(concurrency_limit))
}
