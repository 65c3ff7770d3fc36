use axum::http::{header, HeaderName};
use serde::Deserialize;
use std::time::Duration;

pub const TTL_ENV: &str = "ARW_IDEMPOTENCY_TTL_SECS";
pub const CRITICAL_HEADERS_ENV: &str = "ARW_IDEMPOTENCY_CRITICAL_HEADERS";

/// Six hours.
pub const DEFAULT_LIFETIME: Duration = Duration::from_secs(6 * 60 * 60);

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid idempotency lifetime {0:?}: expected whole seconds, at least 1")]
    InvalidLifetime(String),
    #[error("invalid critical header name: {0}")]
    InvalidHeader(String),
}

/// Settings for the idempotency middleware.
///
/// Critical headers are compared on replay in the order given here. `Accept`
/// and `Authorization` are always part of the set.
#[derive(Debug, Clone, Deserialize)]
#[serde(try_from = "RawConfig")]
pub struct IdempotencyConfig {
    pub lifetime: Duration,
    pub critical_headers: Vec<HeaderName>,
}

impl Default for IdempotencyConfig {
    fn default() -> Self {
        Self {
            lifetime: DEFAULT_LIFETIME,
            critical_headers: vec![header::ACCEPT, header::AUTHORIZATION],
        }
    }
}

impl IdempotencyConfig {
    /// Keep results for `lifetime`. A zero lifetime is rejected.
    pub fn with_lifetime(mut self, lifetime: Duration) -> Result<Self, ConfigError> {
        if lifetime.is_zero() {
            return Err(ConfigError::InvalidLifetime(format!("{lifetime:?}")));
        }
        self.lifetime = lifetime;
        Ok(self)
    }

    pub fn with_critical_header(mut self, name: HeaderName) -> Self {
        if !self.critical_headers.contains(&name) {
            self.critical_headers.push(name);
        }
        self
    }

    /// Build from `ARW_IDEMPOTENCY_*` environment variables on top of the defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut cfg = Self::default();
        if let Ok(raw) = std::env::var(TTL_ENV) {
            let secs = parse_lifetime_secs(&raw)?;
            cfg = cfg.with_lifetime(Duration::from_secs(secs))?;
        }
        if let Ok(raw) = std::env::var(CRITICAL_HEADERS_ENV) {
            for name in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
                cfg = cfg.with_critical_header(parse_header(name)?);
            }
        }
        Ok(cfg)
    }
}

fn parse_lifetime_secs(raw: &str) -> Result<u64, ConfigError> {
    raw.trim()
        .parse::<u64>()
        .ok()
        .filter(|secs| *secs > 0)
        .ok_or_else(|| ConfigError::InvalidLifetime(raw.to_string()))
}

fn parse_header(name: &str) -> Result<HeaderName, ConfigError> {
    HeaderName::from_bytes(name.as_bytes()).map_err(|_| ConfigError::InvalidHeader(name.to_string()))
}

#[derive(Deserialize)]
struct RawConfig {
    #[serde(default)]
    lifetime_secs: Option<u64>,
    #[serde(default)]
    critical_headers: Vec<String>,
}

impl TryFrom<RawConfig> for IdempotencyConfig {
    type Error = ConfigError;

    fn try_from(raw: RawConfig) -> Result<Self, Self::Error> {
        let mut cfg = Self::default();
        if let Some(secs) = raw.lifetime_secs {
            cfg = cfg.with_lifetime(Duration::from_secs(secs))?;
        }
        for name in &raw.critical_headers {
            cfg = cfg.with_critical_header(parse_header(name.trim())?);
        }
        Ok(cfg)
    }
}
