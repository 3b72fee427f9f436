//! Ingest-side event enrichment
//!
//! Fills in what the producer did not know: GeoIP fields for public
//! addresses, browser/OS/device classification from the user-agent, and the
//! pseudonymous visitor hash.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::fmt::Write as _;
use std::net::IpAddr;
use woothee::parser::Parser;

use crate::analytics::event::{ClickEvent, EnrichedClickEvent};
use crate::services::geoip::GeoIpProvider;
use crate::utils::ip::is_private_or_local;

type HmacSha256 = Hmac<Sha256>;

pub struct Enricher {
    geoip: Option<GeoIpProvider>,
    hmac_secret: Vec<u8>,
}

impl Enricher {
    pub fn new(geoip: Option<GeoIpProvider>, hmac_secret: &str) -> Self {
        Self {
            geoip,
            hmac_secret: hmac_secret.as_bytes().to_vec(),
        }
    }

    /// Enrich one wire event. Never fails: a GeoIP miss leaves the fields
    /// empty, an unparseable user-agent becomes `device_type = unknown`.
    pub async fn enrich(&self, mut event: ClickEvent) -> EnrichedClickEvent {
        // GeoIP 仅在生产端未填充时兜底；内网/环回/链路本地/未指定地址
        // 不做富化也不告警
        if event.country_code.is_none() && !is_private_or_local(&event.ip_address) {
            if let Some(ref geoip) = self.geoip {
                if let Some(info) = geoip.lookup(&event.ip_address.to_string()).await {
                    event.country_code = info.country_code;
                    event.country_name = info.country_name;
                    event.city = info.city;
                    event.latitude = info.latitude;
                    event.longitude = info.longitude;
                }
            }
        }

        let parsed = parse_user_agent(&event.user_agent);
        if event.browser.is_none() {
            event.browser = parsed.browser;
        }
        if event.operating_system.is_none() {
            event.operating_system = parsed.operating_system;
        }
        let device_type = event
            .device_type
            .clone()
            .filter(|dt| is_known_device_type(dt))
            .unwrap_or(parsed.device_type);

        let visitor_hash = visitor_hash(&self.hmac_secret, &event.ip_address);

        EnrichedClickEvent {
            event,
            visitor_hash,
            device_type,
        }
    }
}

/// HMAC-SHA256 over the textual IP, lowercase hex.
/// Stable per (secret, ip) pair; the process-wide secret makes the hash a
/// pseudonymous per-visitor handle without storing raw identity.
pub fn visitor_hash(secret: &[u8], ip: &IpAddr) -> String {
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC accepts any key length");
    mac.update(ip.to_string().as_bytes());
    let bytes = mac.finalize().into_bytes();

    let mut hex = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        let _ = write!(hex, "{:02x}", byte);
    }
    hex
}

#[derive(Debug, Default)]
struct ParsedUserAgent {
    device_type: String,
    browser: Option<String>,
    operating_system: Option<String>,
}

fn is_known_device_type(dt: &str) -> bool {
    matches!(dt, "desktop" | "mobile" | "tablet" | "bot" | "unknown")
}

/// woothee 解析 + 设备分类
fn parse_user_agent(user_agent: &str) -> ParsedUserAgent {
    let parser = Parser::new();
    let result = match parser.parse(user_agent) {
        Some(r) => r,
        None => {
            return ParsedUserAgent {
                device_type: "unknown".to_string(),
                ..Default::default()
            }
        }
    };

    let browser = if result.name != "UNKNOWN" && !result.name.is_empty() {
        if !result.version.is_empty() && result.version != "UNKNOWN" {
            Some(format!("{} {}", result.name, result.version))
        } else {
            Some(result.name.to_string())
        }
    } else {
        None
    };

    let operating_system = if result.os != "UNKNOWN" && !result.os.is_empty() {
        Some(result.os.to_string())
    } else {
        None
    };

    ParsedUserAgent {
        device_type: classify_device_type(result.category, user_agent),
        browser,
        operating_system,
    }
}

/// Map the woothee category (plus a few UA substring checks woothee has no
/// category for) onto {desktop, mobile, tablet, bot, unknown}.
fn classify_device_type(category: &str, user_agent: &str) -> String {
    if category == "crawler" {
        return "bot".to_string();
    }

    let ua_lower = user_agent.to_lowercase();
    if ua_lower.contains("ipad")
        || ua_lower.contains("tablet")
        || ua_lower.contains("kindle")
        || ua_lower.contains("playbook")
    {
        return "tablet".to_string();
    }

    match category {
        "pc" => "desktop".to_string(),
        "smartphone" | "mobilephone" => "mobile".to_string(),
        _ => "unknown".to_string(),
    }
}
