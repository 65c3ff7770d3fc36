use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

/// Failures of a keyed request. All but `ResponseBody` are raised before the
/// wrapped handler runs.
#[derive(Debug, thiserror::Error)]
pub enum IdempotencyError {
    #[error("{value} (invalid Idempotency-Key)")]
    InvalidKey { value: String },
    #[error("{method} (HTTP method mismatch: idempotency mismatch)")]
    MethodMismatch { method: String },
    #[error("{url} (URL mismatch: idempotency mismatch)")]
    UrlMismatch { url: String },
    #[error("{header}: {value} (header mismatch: idempotency mismatch)")]
    HeaderMismatch { header: String, value: String },
    #[error("{received} vs {stored} (request body mismatch: idempotency mismatch)")]
    BodyMismatch { received: String, stored: String },
    #[error("{key} (conflict)")]
    Conflict { key: String },
    #[error("hash request body failed ({0})")]
    BodyRead(#[source] axum::Error),
    #[error("read handler response body failed ({0})")]
    ResponseBody(#[source] axum::Error),
}

impl IdempotencyError {
    pub fn status(&self) -> StatusCode {
        match self {
            IdempotencyError::Conflict { .. } => StatusCode::CONFLICT,
            IdempotencyError::ResponseBody(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::BAD_REQUEST,
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            IdempotencyError::InvalidKey { .. } => "Invalid Idempotency-Key",
            IdempotencyError::MethodMismatch { .. } => "Idempotency Method Mismatch",
            IdempotencyError::UrlMismatch { .. } => "Idempotency URL Mismatch",
            IdempotencyError::HeaderMismatch { .. } => "Idempotency Header Mismatch",
            IdempotencyError::BodyMismatch { .. } => "Idempotency Body Mismatch",
            IdempotencyError::Conflict { .. } => "Conflict",
            IdempotencyError::BodyRead(_) => "Bad Request",
            IdempotencyError::ResponseBody(_) => "Internal Server Error",
        }
    }

    /// Metrics label for the request outcome this error represents.
    pub fn outcome(&self) -> &'static str {
        match self {
            IdempotencyError::InvalidKey { .. } => "invalid_key",
            IdempotencyError::Conflict { .. } => "conflict",
            IdempotencyError::BodyRead(_) => "body_error",
            IdempotencyError::ResponseBody(_) => "response_error",
            _ => "mismatch",
        }
    }

    /// True for the four fingerprint comparison failures.
    pub fn is_mismatch(&self) -> bool {
        matches!(
            self,
            IdempotencyError::MethodMismatch { .. }
                | IdempotencyError::UrlMismatch { .. }
                | IdempotencyError::HeaderMismatch { .. }
                | IdempotencyError::BodyMismatch { .. }
        )
    }
}

impl IntoResponse for IdempotencyError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = json!({
            "type": "about:blank",
            "title": self.title(),
            "status": status.as_u16(),
            "detail": self.to_string(),
        });
        let mut res = (status, Json(body)).into_response();
        res.headers_mut().insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/problem+json"),
        );
        res
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;
    use serde_json::Value;

    #[test]
    fn conflict_maps_to_409_everything_else_to_400() {
        let conflict = IdempotencyError::Conflict { key: "abc".into() };
        assert_eq!(conflict.status(), StatusCode::CONFLICT);
        let invalid = IdempotencyError::InvalidKey { value: "abc".into() };
        assert_eq!(invalid.status(), StatusCode::BAD_REQUEST);
        assert!(!invalid.is_mismatch());
        let body = IdempotencyError::BodyMismatch {
            received: "aa".into(),
            stored: "bb".into(),
        };
        assert!(body.is_mismatch());
        assert_eq!(body.outcome(), "mismatch");

        let broken =
            IdempotencyError::ResponseBody(axum::Error::new(std::io::Error::other("gone")));
        assert_eq!(broken.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(broken.outcome(), "response_error");
    }

    #[tokio::test]
    async fn renders_problem_json() {
        let res = IdempotencyError::HeaderMismatch {
            header: "authorization".into(),
            value: "Bearer xyz".into(),
        }
        .into_response();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            res.headers()
                .get(header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok()),
            Some("application/problem+json")
        );
        let bytes = res.into_body().collect().await.unwrap().to_bytes();
        let value: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["status"], 400);
        assert_eq!(value["title"], "Idempotency Header Mismatch");
        assert!(value["detail"]
            .as_str()
            .unwrap()
            .starts_with("authorization: Bearer xyz"));
    }
}
