//! GET /health：数据库连通 200，否则 503

use actix_web::{web, HttpResponse};
use std::sync::Arc;
use tracing::warn;

use crate::repository::LinkRepository;

pub struct HealthState {
    pub repo: Arc<dyn LinkRepository>,
}

pub async fn health(state: web::Data<HealthState>) -> HttpResponse {
    match state.repo.ping().await {
        Ok(()) => HttpResponse::Ok().json(serde_json::json!({ "status": "ok" })),
        Err(e) => {
            warn!(error = %e, "Health check failed");
            HttpResponse::ServiceUnavailable()
                .json(serde_json::json!({ "status": "unavailable" }))
        }
    }
}
