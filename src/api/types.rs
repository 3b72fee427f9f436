//! Request/response DTOs and the error envelope.

use actix_web::HttpResponse;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::AppError;
use crate::repository::Link;

#[derive(Debug, Deserialize)]
pub struct CreateUrlBody {
    pub destination_url: String,
    /// 自定义别名（可选）
    pub short_code: Option<String>,
    pub title: String,
    pub notes: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct CreateUrlResponse {
    pub short_code: String,
    pub short_url: String,
}

#[derive(Debug, Serialize)]
pub struct LinkSummary {
    pub short_code: String,
    pub destination_url: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    pub status: String,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    pub total_clicks: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_clicked_at: Option<DateTime<Utc>>,
}

impl From<Link> for LinkSummary {
    fn from(link: Link) -> Self {
        LinkSummary {
            short_code: link.short_code,
            destination_url: link.destination_url,
            title: link.title,
            notes: link.notes,
            status: link.status.as_str().to_string(),
            created_at: link.created_at,
            expires_at: link.expires_at,
            total_clicks: link.total_clicks,
            last_clicked_at: link.last_clicked_at,
        }
    }
}

/// 统一错误响应体
#[derive(Debug, Serialize)]
pub struct ErrorEnvelope {
    pub error: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    pub request_id: String,
}

/// Render an `AppError` as the JSON envelope, tagged with the request ID.
pub fn error_response(err: &AppError, request_id: &str) -> HttpResponse {
    HttpResponse::build(err.status()).json(ErrorEnvelope {
        error: err.code(),
        message: err.message().to_string(),
        details: None,
        request_id: request_id.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_shape() {
        let err = AppError::alias_taken("short code 'abc' is already in use");
        let response = error_response(&err, "req-123");
        assert_eq!(response.status(), actix_web::http::StatusCode::CONFLICT);
    }

    #[test]
    fn test_envelope_serialization() {
        let envelope = ErrorEnvelope {
            error: "NOT_FOUND",
            message: "no such link".into(),
            details: None,
            request_id: "r1".into(),
        };
        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(json["error"], "NOT_FOUND");
        assert_eq!(json["request_id"], "r1");
        assert!(json.get("details").is_none());
    }
}
