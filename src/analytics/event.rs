use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use uuid::Uuid;

/// Click event as published on the stream.
///
/// The producer fills what it knows; geo and device fields are optional and
/// the ingestor enriches whatever is missing. Serialized as one JSON value
/// under the stream entry's `data` field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClickEvent {
    pub event_id: Uuid,
    pub url_id: i64,
    pub short_code: String,
    pub timestamp: DateTime<Utc>,
    pub user_agent: String,
    pub ip_address: IpAddr,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub referrer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub country_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub country_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub browser: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operating_system: Option<String>,
    /// 命中层级：cache | db
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_tier: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

/// Click event after ingest-side enrichment, ready for the analytics store.
#[derive(Debug, Clone)]
pub struct EnrichedClickEvent {
    pub event: ClickEvent,
    /// HMAC-SHA256(secret, ip)，小写十六进制
    pub visitor_hash: String,
    /// desktop | mobile | tablet | bot | unknown
    pub device_type: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_json_shape() {
        let event = ClickEvent {
            event_id: Uuid::new_v4(),
            url_id: 42,
            short_code: "abc".into(),
            timestamp: "2026-08-01T12:00:00Z".parse().unwrap(),
            user_agent: "Mozilla/5.0".into(),
            ip_address: "203.0.113.9".parse().unwrap(),
            referrer: None,
            country_code: None,
            country_name: None,
            city: None,
            latitude: None,
            longitude: None,
            device_type: None,
            browser: None,
            operating_system: None,
            cache_tier: Some("cache".into()),
            latency_ms: Some(1.5),
            request_id: Some("req-1".into()),
        };

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["url_id"], 42);
        assert_eq!(json["ip_address"], "203.0.113.9");
        // 未填充的可选字段不出现在 JSON 中
        assert!(json.get("referrer").is_none());
        assert!(json.get("country_code").is_none());
        // RFC3339 时间戳
        assert!(json["timestamp"].as_str().unwrap().starts_with("2026-08-01T12:00:00"));
    }

    #[test]
    fn test_wire_round_trip() {
        let raw = r#"{
            "event_id": "0190e0a0-0000-7000-8000-000000000001",
            "url_id": 7,
            "short_code": "xyz",
            "timestamp": "2026-08-01T09:30:00Z",
            "user_agent": "curl/8.0",
            "ip_address": "2001:db8::1",
            "referrer": "https://news.example/"
        }"#;

        let event: ClickEvent = serde_json::from_str(raw).unwrap();
        assert_eq!(event.url_id, 7);
        assert_eq!(event.referrer.as_deref(), Some("https://news.example/"));
        assert!(event.device_type.is_none());

        let back = serde_json::to_string(&event).unwrap();
        let again: ClickEvent = serde_json::from_str(&back).unwrap();
        assert_eq!(again.event_id, event.event_id);
    }
}
