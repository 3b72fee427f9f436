//! Per-user rate-limit middleware
//!
//! 必须排在认证之后（依赖 extensions 里的 [`AuthUser`]）。每个认证
//! 响应都带 X-RateLimit-Limit / -Remaining / -Reset 三个头；超限返回
//! 429 信封。

use actix_service::{Service, Transform};
use actix_web::{
    body::EitherBody,
    dev::{ServiceRequest, ServiceResponse},
    http::header::HeaderValue,
    Error, HttpMessage,
};
use futures_util::future::{ready, LocalBoxFuture, Ready};
use std::rc::Rc;
use std::sync::Arc;
use tracing::debug;

use crate::api::middleware::auth::AuthUser;
use crate::api::middleware::request_id::RequestId;
use crate::api::types::error_response;
use crate::errors::AppError;
use crate::services::rate_limit::{RateLimitDecision, RateLimiter};

#[derive(Clone)]
pub struct RateLimit {
    limiter: Arc<RateLimiter>,
}

impl RateLimit {
    pub fn new(limiter: Arc<RateLimiter>) -> Self {
        Self { limiter }
    }
}

impl<S, B> Transform<S, ServiceRequest> for RateLimit
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type InitError = ();
    type Transform = RateLimitService<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(RateLimitService {
            service: Rc::new(service),
            limiter: Arc::clone(&self.limiter),
        }))
    }
}

pub struct RateLimitService<S> {
    service: Rc<S>,
    limiter: Arc<RateLimiter>,
}

impl<S, B> Service<ServiceRequest> for RateLimitService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(
        &self,
        ctx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        self.service.poll_ready(ctx)
    }

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let srv = self.service.clone();
        let limiter = Arc::clone(&self.limiter);

        Box::pin(async move {
            let user_id = req.extensions().get::<AuthUser>().map(|u| u.user_id.clone());

            // 未认证的请求不在这里处理（认证中间件已经拦下）
            let Some(user_id) = user_id else {
                let response = srv.call(req).await?.map_into_left_body();
                return Ok(response);
            };

            let decision = limiter.check(&user_id).await;

            if !decision.allowed {
                debug!(user_id = %user_id, "Rate limit exceeded");
                let request_id = req
                    .extensions()
                    .get::<RequestId>()
                    .map(|rid| rid.0.clone())
                    .unwrap_or_default();

                let err = AppError::rate_limited(format!(
                    "Rate limit exceeded ({} requests per window)",
                    decision.limit
                ));
                let mut response = error_response(&err, &request_id);
                append_headers(response.headers_mut(), &decision);
                return Ok(req.into_response(response.map_into_right_body()));
            }

            let mut response = srv.call(req).await?.map_into_left_body();
            append_headers(response.headers_mut(), &decision);
            Ok(response)
        })
    }
}

fn append_headers(headers: &mut actix_web::http::header::HeaderMap, decision: &RateLimitDecision) {
    let pairs = [
        ("x-ratelimit-limit", decision.limit.to_string()),
        ("x-ratelimit-remaining", decision.remaining.to_string()),
        ("x-ratelimit-reset", decision.reset_unix.to_string()),
    ];
    for (name, value) in pairs {
        if let Ok(value) = HeaderValue::from_str(&value) {
            headers.insert(actix_web::http::header::HeaderName::from_static(name), value);
        }
    }
}
