//! 重定向入口：GET /{short_code}
//!
//! 解析成功返回 307，并在响应之外组装点击事件投递给发布端；
//! 发布失败绝不影响用户的跳转。

use actix_web::{web, HttpRequest, HttpResponse};
use chrono::Utc;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};
use uuid::Uuid;

use crate::analytics::{ClickEvent, ClickPublisher};
use crate::api::middleware::request_id_of;
use crate::errors::AppError;
use crate::services::{RedirectService, Resolved};
use crate::utils::ip::extract_client_ip;

const NOT_FOUND_PAGE: &str = r#"<!DOCTYPE html>
<html lang="en">
<head><meta charset="utf-8"><title>404 Not Found</title></head>
<body style="font-family: sans-serif; text-align: center; padding-top: 4rem;">
<h1>404</h1>
<p>This short link does not exist or has expired.</p>
</body>
</html>"#;

const ERROR_PAGE: &str = r#"<!DOCTYPE html>
<html lang="en">
<head><meta charset="utf-8"><title>Service Unavailable</title></head>
<body style="font-family: sans-serif; text-align: center; padding-top: 4rem;">
<h1>503</h1>
<p>Something went wrong, please try again shortly.</p>
</body>
</html>"#;

pub struct RedirectState {
    pub redirect: Arc<RedirectService>,
    pub publisher: Arc<ClickPublisher>,
}

pub async fn handle_redirect(
    req: HttpRequest,
    path: web::Path<String>,
    state: web::Data<RedirectState>,
) -> HttpResponse {
    let short_code = path.into_inner();
    let start = Instant::now();

    if short_code.is_empty() {
        return not_found_page();
    }

    match state.redirect.resolve(&short_code).await {
        Ok(resolved) => {
            let latency_ms = start.elapsed().as_secs_f64() * 1000.0;
            emit_click(&req, &state, &short_code, &resolved, latency_ms);

            info!(
                short_code = %short_code,
                cache_tier = resolved.cache_tier.as_str(),
                latency_ms,
                "Redirect"
            );
            HttpResponse::TemporaryRedirect()
                .append_header(("Cache-Control", "no-cache, no-store, must-revalidate"))
                .append_header(("Location", resolved.destination_url.as_str()))
                .finish()
        }
        Err(AppError::NotFound(_)) => {
            debug!(short_code = %short_code, "Unknown or inactive short code");
            not_found_page()
        }
        Err(e) => {
            debug!(short_code = %short_code, error = %e, "Redirect failed");
            HttpResponse::ServiceUnavailable()
                .append_header(("Content-Type", "text/html; charset=utf-8"))
                .body(ERROR_PAGE)
        }
    }
}

/// 组装点击事件并异步发布；任何失败只记日志
fn emit_click(
    req: &HttpRequest,
    state: &web::Data<RedirectState>,
    short_code: &str,
    resolved: &Resolved,
    latency_ms: f64,
) {
    let ip_address = extract_client_ip(req)
        .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED));

    let user_agent = req
        .headers()
        .get("user-agent")
        .and_then(|h| h.to_str().ok())
        .unwrap_or_default()
        .to_string();

    let referrer = req
        .headers()
        .get("referer")
        .and_then(|h| h.to_str().ok())
        .map(String::from);

    let event = ClickEvent {
        event_id: Uuid::new_v4(),
        url_id: resolved.url_id,
        short_code: short_code.to_string(),
        timestamp: Utc::now(),
        user_agent,
        ip_address,
        referrer,
        country_code: None,
        country_name: None,
        city: None,
        latitude: None,
        longitude: None,
        device_type: None,
        browser: None,
        operating_system: None,
        cache_tier: Some(resolved.cache_tier.as_str().to_string()),
        latency_ms: Some(latency_ms),
        request_id: Some(request_id_of(req)),
    };

    state.publisher.publish(event);
}

fn not_found_page() -> HttpResponse {
    HttpResponse::NotFound()
        .append_header(("Content-Type", "text/html; charset=utf-8"))
        .append_header(("Cache-Control", "no-cache, no-store, must-revalidate"))
        .body(NOT_FOUND_PAGE)
}
