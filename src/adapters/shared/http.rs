//! Shared REST helpers: body reading, status mapping, query encoding

use reqwest::StatusCode;
use serde::de::DeserializeOwned;

use crate::adapters::errors::{ExchangeError, ExchangeResult};

/// Read status + body text, mapping transport failures to `Network`
pub async fn read_body(response: reqwest::Response) -> ExchangeResult<(StatusCode, String)> {
    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| ExchangeError::Network(format!("Failed to read response: {}", e)))?;
    Ok((status, body))
}

/// Map an HTTP status to the taxonomy when the body carries no usable code
pub fn map_http_status(exchange: &str, status: StatusCode, body: &str) -> ExchangeError {
    let detail = format!("{} HTTP {}: {}", exchange, status.as_u16(), truncate(body, 256));
    match status.as_u16() {
        401 | 403 => ExchangeError::Authentication(detail),
        418 | 429 => ExchangeError::RateLimitExceeded(detail),
        400 | 422 => ExchangeError::InvalidOrder(detail),
        404 => ExchangeError::InvalidResponse(detail),
        _ => ExchangeError::Network(detail),
    }
}

/// Statuses whose meaning does not depend on the body's error code
pub fn status_overrides_body(status: StatusCode) -> bool {
    matches!(status.as_u16(), 401 | 403 | 418 | 429) || status.is_server_error()
}

/// Deserialize a JSON body into `T`
pub fn decode<T: DeserializeOwned>(exchange: &str, body: &str) -> ExchangeResult<T> {
    serde_json::from_str(body).map_err(|e| {
        ExchangeError::InvalidResponse(format!(
            "{}: failed to decode response: {} - body: {}",
            exchange,
            e,
            truncate(body, 256)
        ))
    })
}

/// Join query parameters as `k=v&k=v` (values are generated locally and URL-safe)
pub fn encode_query(params: &[(&str, String)]) -> String {
    params
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&")
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert!(matches!(
            map_http_status("x", StatusCode::UNAUTHORIZED, ""),
            ExchangeError::Authentication(_)
        ));
        assert!(matches!(
            map_http_status("x", StatusCode::TOO_MANY_REQUESTS, ""),
            ExchangeError::RateLimitExceeded(_)
        ));
        assert!(matches!(
            map_http_status("x", StatusCode::from_u16(418).unwrap(), ""),
            ExchangeError::RateLimitExceeded(_)
        ));
        assert!(matches!(
            map_http_status("x", StatusCode::BAD_GATEWAY, ""),
            ExchangeError::Network(_)
        ));
        assert!(matches!(
            map_http_status("x", StatusCode::BAD_REQUEST, "bad"),
            ExchangeError::InvalidOrder(_)
        ));
    }

    #[test]
    fn test_status_overrides_body() {
        assert!(status_overrides_body(StatusCode::FORBIDDEN));
        assert!(status_overrides_body(StatusCode::SERVICE_UNAVAILABLE));
        assert!(!status_overrides_body(StatusCode::BAD_REQUEST));
        assert!(!status_overrides_body(StatusCode::OK));
    }

    #[test]
    fn test_decode_error_is_invalid_response() {
        let res: ExchangeResult<Vec<u32>> = decode("x", "{not json");
        assert!(matches!(res, Err(ExchangeError::InvalidResponse(_))));
    }

    #[test]
    fn test_encode_query() {
        let q = encode_query(&[("symbol", "BTCUSDT".into()), ("limit", "5".into())]);
        assert_eq!(q, "symbol=BTCUSDT&limit=5");
        assert_eq!(encode_query(&[]), "");
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate("héllo", 2), "hé");
        assert_eq!(truncate("hi", 10), "hi");
    }
}
