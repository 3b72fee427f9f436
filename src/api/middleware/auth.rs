//! Bearer-token authentication middleware
//!
//! 校验 `Authorization: Bearer <jwt>`，通过后把 `sub` 作为
//! [`AuthUser`] 写入 request extensions，失败返回 401 信封。

use actix_service::{Service, Transform};
use actix_web::{
    body::EitherBody,
    dev::{ServiceRequest, ServiceResponse},
    Error, HttpMessage,
};
use futures_util::future::{ready, LocalBoxFuture, Ready};
use std::rc::Rc;
use std::sync::Arc;
use tracing::{trace, warn};

use crate::api::middleware::request_id::RequestId;
use crate::api::oidc::OidcVerifier;
use crate::api::types::error_response;
use crate::errors::AppError;

/// 认证通过的调用方（claim `sub`）
#[derive(Clone, Debug)]
pub struct AuthUser {
    pub user_id: String,
    pub email: Option<String>,
}

#[derive(Clone)]
pub struct BearerAuth {
    verifier: Arc<OidcVerifier>,
}

impl BearerAuth {
    pub fn new(verifier: Arc<OidcVerifier>) -> Self {
        Self { verifier }
    }
}

impl<S, B> Transform<S, ServiceRequest> for BearerAuth
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type InitError = ();
    type Transform = BearerAuthMiddleware<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(BearerAuthMiddleware {
            service: Rc::new(service),
            verifier: Arc::clone(&self.verifier),
        }))
    }
}

pub struct BearerAuthMiddleware<S> {
    service: Rc<S>,
    verifier: Arc<OidcVerifier>,
}

impl<S, B> Service<ServiceRequest> for BearerAuthMiddleware<S>
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
        let verifier = Arc::clone(&self.verifier);

        Box::pin(async move {
            let request_id = req
                .extensions()
                .get::<RequestId>()
                .map(|rid| rid.0.clone())
                .unwrap_or_default();

            let token = extract_bearer(&req);
            let token = match token {
                Some(token) => token,
                None => {
                    let err = AppError::unauthorized("Missing bearer token");
                    let response = error_response(&err, &request_id);
                    return Ok(req.into_response(response.map_into_right_body()));
                }
            };

            match verifier.verify(&token).await {
                Ok(claims) => {
                    trace!(user_id = %claims.subject, "Bearer token verified");
                    req.extensions_mut().insert(AuthUser {
                        user_id: claims.subject,
                        email: claims.email,
                    });
                    let response = srv.call(req).await?.map_into_left_body();
                    Ok(response)
                }
                Err(err) => {
                    warn!(reason = %err.message(), "Bearer token rejected");
                    let response = error_response(&err, &request_id);
                    Ok(req.into_response(response.map_into_right_body()))
                }
            }
        })
    }
}

fn extract_bearer(req: &ServiceRequest) -> Option<String> {
    let header = req.headers().get("authorization")?.to_str().ok()?;
    let token = header.strip_prefix("Bearer ").or_else(|| header.strip_prefix("bearer "))?;
    let token = token.trim();
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}
