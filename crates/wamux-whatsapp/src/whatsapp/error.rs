//! Crate-level error types for the WhatsApp integration.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Alias for `Result<T, WhatsAppError>`.
pub type WaResult<T> = Result<T, WhatsAppError>;

/// Graph API error codes that mean the access token is unusable.
const AUTH_CODES: &[i64] = &[190];
const AUTH_SUB_CODES: &[i64] = &[463, 460];
/// Graph API error codes that mean the caller is being throttled.
const RATE_LIMIT_CODES: &[i64] = &[4, 80007];

/// Uniform error type used across the WhatsApp crate.
#[derive(Debug, thiserror::Error)]
pub enum WhatsAppError {
    #[error("WhatsApp account [{0}] not found")]
    AccountNotFound(String),

    /// Token invalid or expired.
    #[error("authentication failed: {0}")]
    Auth(ApiErrorDetail),

    /// Throttled by the platform.
    #[error("rate limited: {0}")]
    RateLimited(ApiErrorDetail),

    #[error("API error: {0}")]
    Api(ApiErrorDetail),

    #[error("HTTP transport error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("configuration error: {0}")]
    Config(String),
}

/// The `error` object of a failed Graph API call.
///
/// `raw` keeps the whole object so nothing is lost even when the
/// classification is coarse.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiErrorDetail {
    pub message: String,
    pub code: i64,
    pub sub_code: Option<i64>,
    pub trace_id: Option<String>,
    pub error_type: Option<String>,
    pub http_status: u16,
    pub raw: Value,
}

impl std::fmt::Display for ApiErrorDetail {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (code={}", self.message, self.code)?;
        if let Some(sub) = self.sub_code {
            write!(f, ", subcode={sub}")?;
        }
        write!(f, ", http={})", self.http_status)
    }
}

impl ApiErrorDetail {
    /// Read the `error` object out of a response body.
    ///
    /// Meta returns `{ "error": { "message", "type", "code", "error_subcode",
    /// "fbtrace_id" } }`. Anything missing falls back to empty / zero.
    pub fn from_body(http_status: u16, body: &Value) -> Self {
        let raw = match body.get("error") {
            Some(err @ Value::Object(_)) => err.clone(),
            _ => Value::Object(Default::default()),
        };

        Self {
            message: raw["message"]
                .as_str()
                .unwrap_or("Unknown WhatsApp API error")
                .to_string(),
            code: raw["code"].as_i64().unwrap_or(0),
            sub_code: raw["error_subcode"].as_i64(),
            trace_id: raw["fbtrace_id"].as_str().map(String::from),
            error_type: raw["type"].as_str().map(String::from),
            http_status,
            raw,
        }
    }
}

impl WhatsAppError {
    /// Classify a non-2xx response into auth / rate-limit / generic.
    pub fn from_api_response(http_status: u16, body: &Value) -> Self {
        let detail = ApiErrorDetail::from_body(http_status, body);

        let is_auth = AUTH_CODES.contains(&detail.code)
            || detail.sub_code.is_some_and(|s| AUTH_SUB_CODES.contains(&s));
        if is_auth {
            return Self::Auth(detail);
        }
        if RATE_LIMIT_CODES.contains(&detail.code) {
            return Self::RateLimited(detail);
        }
        Self::Api(detail)
    }

    pub fn storage(msg: impl std::fmt::Display) -> Self {
        Self::Storage(msg.to_string())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Raw platform error detail, for the three classified variants.
    pub fn api_detail(&self) -> Option<&ApiErrorDetail> {
        match self {
            Self::Auth(d) | Self::RateLimited(d) | Self::Api(d) => Some(d),
            _ => None,
        }
    }

    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Auth(_))
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_code_190_is_auth() {
        let body = json!({"error": {"message": "Invalid OAuth access token", "type": "OAuthException", "code": 190, "fbtrace_id": "abc"}});
        let err = WhatsAppError::from_api_response(401, &body);
        assert!(err.is_auth());
        let d = err.api_detail().unwrap();
        assert_eq!(d.trace_id.as_deref(), Some("abc"));
        assert_eq!(d.error_type.as_deref(), Some("OAuthException"));
        assert_eq!(d.raw["code"], 190);
    }

    #[test]
    fn test_auth_sub_codes() {
        for sub in [463, 460] {
            let body = json!({"error": {"code": 102, "error_subcode": sub}});
            assert!(WhatsAppError::from_api_response(400, &body).is_auth());
        }
    }

    #[test]
    fn test_rate_limit_codes() {
        for code in [4, 80007] {
            let body = json!({"error": {"message": "Rate limit hit", "code": code}});
            assert!(WhatsAppError::from_api_response(429, &body).is_rate_limited());
        }
    }

    #[test]
    fn test_other_codes_are_generic() {
        let body = json!({"error": {"message": "nope", "code": 999}});
        let err = WhatsAppError::from_api_response(400, &body);
        assert!(matches!(err, WhatsAppError::Api(ref d) if d.code == 999));
    }

    #[test]
    fn test_unknown_shape_defaults() {
        let err = WhatsAppError::from_api_response(500, &json!("gateway exploded"));
        let WhatsAppError::Api(d) = err else {
            panic!("expected generic API error");
        };
        assert_eq!(d.code, 0);
        assert_eq!(d.message, "Unknown WhatsApp API error");
        assert_eq!(d.sub_code, None);
        assert_eq!(d.http_status, 500);
    }

    #[test]
    fn test_error_display() {
        let err = WhatsAppError::AccountNotFound("sales".into());
        assert_eq!(err.to_string(), "WhatsApp account [sales] not found");

        let body = json!({"error": {"message": "bad token", "code": 190, "error_subcode": 463}});
        let err = WhatsAppError::from_api_response(401, &body);
        assert!(err.to_string().contains("bad token"));
        assert!(err.to_string().contains("subcode=463"));
    }
}
