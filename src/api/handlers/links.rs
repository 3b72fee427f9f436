//! 链接管理接口：POST /api/v1/urls、GET /api/v1/urls

use actix_web::{web, HttpMessage, HttpRequest, HttpResponse};
use std::sync::Arc;
use tracing::debug;

use crate::api::middleware::{request_id_of, AuthUser};
use crate::api::types::{error_response, CreateUrlBody, CreateUrlResponse, LinkSummary};
use crate::errors::AppError;
use crate::services::{CreateLinkRequest, LinkService};

pub struct ApiState {
    pub link_service: Arc<LinkService>,
    /// 用于拼接 short_url 的对外域名
    pub public_base_url: String,
}

pub async fn create_url(
    req: HttpRequest,
    state: web::Data<ApiState>,
    body: web::Json<CreateUrlBody>,
) -> HttpResponse {
    let request_id = request_id_of(&req);

    let Some(user) = req.extensions().get::<AuthUser>().cloned() else {
        // 认证中间件漏配时的兜底
        return error_response(&AppError::unauthorized("Missing bearer token"), &request_id);
    };

    let body = body.into_inner();
    let request = CreateLinkRequest {
        destination_url: body.destination_url,
        custom_alias: body.short_code,
        title: body.title,
        notes: body.notes,
        expires_at: body.expires_at,
    };

    match state.link_service.create(request, &user.user_id).await {
        Ok(link) => {
            debug!(short_code = %link.short_code, "Link created via API");
            HttpResponse::Created().json(CreateUrlResponse {
                short_url: format!(
                    "{}/{}",
                    state.public_base_url.trim_end_matches('/'),
                    link.short_code
                ),
                short_code: link.short_code,
            })
        }
        Err(err) => error_response(&err, &request_id),
    }
}

pub async fn list_urls(req: HttpRequest, state: web::Data<ApiState>) -> HttpResponse {
    let request_id = request_id_of(&req);

    let Some(user) = req.extensions().get::<AuthUser>().cloned() else {
        return error_response(&AppError::unauthorized("Missing bearer token"), &request_id);
    };

    match state.link_service.list(&user.user_id).await {
        Ok(links) => {
            let summaries: Vec<LinkSummary> = links.into_iter().map(LinkSummary::from).collect();
            HttpResponse::Ok().json(summaries)
        }
        Err(err) => error_response(&err, &request_id),
    }
}
