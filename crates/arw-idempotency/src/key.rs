use axum::http::{HeaderMap, HeaderName};

use crate::error::IdempotencyError;

pub const IDEMPOTENCY_KEY: HeaderName = HeaderName::from_static("idempotency-key");

/// Raw `Idempotency-Key` value, or `None` when the header is absent or empty.
pub(crate) fn raw_key(headers: &HeaderMap) -> Option<Result<&str, IdempotencyError>> {
    let value = headers.get(IDEMPOTENCY_KEY)?;
    if value.is_empty() {
        return None;
    }
    Some(value.to_str().map_err(|_| IdempotencyError::InvalidKey {
        value: String::from_utf8_lossy(value.as_bytes()).into_owned(),
    }))
}

/// Strip the surrounding double quotes from a raw key value.
///
/// `""` is accepted and yields the empty key.
pub fn parse_key(raw: &str) -> Result<&str, IdempotencyError> {
    raw.strip_prefix('"')
        .and_then(|rest| rest.strip_suffix('"'))
        .ok_or_else(|| IdempotencyError::InvalidKey {
            value: raw.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn quoted_keys_are_unwrapped() {
        assert_eq!(parse_key(r#""abc""#).unwrap(), "abc");
        assert_eq!(parse_key(r#""""#).unwrap(), "");
        assert_eq!(parse_key(r#""a"b""#).unwrap(), r#"a"b"#);
    }

    #[test]
    fn unquoted_or_short_keys_are_rejected() {
        for raw in ["abc", r#"""#, r#""abc"#, r#"abc""#, "'abc'"] {
            let err = parse_key(raw).unwrap_err();
            assert!(matches!(err, IdempotencyError::InvalidKey { .. }), "{raw}");
        }
    }

    #[test]
    fn empty_header_counts_as_absent() {
        let mut headers = HeaderMap::new();
        assert!(raw_key(&headers).is_none());
        headers.insert(IDEMPOTENCY_KEY, HeaderValue::from_static(""));
        assert!(raw_key(&headers).is_none());
        headers.insert(IDEMPOTENCY_KEY, HeaderValue::from_static("\"k\""));
        assert_eq!(raw_key(&headers).unwrap().unwrap(), "\"k\"");
    }

    #[test]
    fn opaque_bytes_are_invalid() {
        let mut headers = HeaderMap::new();
        headers.insert(
            IDEMPOTENCY_KEY,
            HeaderValue::from_bytes(b"\"\xfa\"").unwrap(),
        );
        assert!(raw_key(&headers).unwrap().is_err());
    }
}
