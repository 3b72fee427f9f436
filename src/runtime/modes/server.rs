//! `serve` mode: management API
//!
//! POST/GET /api/v1/urls behind OIDC auth + per-user rate limiting,
//! /health open. Graceful shutdown drains in-flight requests within a
//! 30 second budget.

use actix_web::{web, App, HttpServer};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::api::handlers::health::{health, HealthState};
use crate::api::handlers::links::{create_url, list_urls, ApiState};
use crate::api::middleware::{BearerAuth, RateLimit, RequestIdMiddleware};
use crate::api::oidc::OidcVerifier;
use crate::config::AppConfig;
use crate::errors::{AppError, Result};
use crate::minter::Minter;
use crate::repository::LinkRepository;
use crate::runtime::lifetime::startup;
use crate::safebrowsing::SafeBrowsing;
use crate::services::link_service::run_expiry_sweep;
use crate::services::{LinkService, RateLimiter};
use crate::system::signal::ShutdownSignal;

/// HTTP 优雅关闭预算（秒）
const HTTP_SHUTDOWN_BUDGET_SECS: u64 = 30;
/// 过期扫描周期
const EXPIRY_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

pub async fn run_server(config: &'static AppConfig, shutdown: ShutdownSignal) -> Result<()> {
    let repo = startup::build_repository(config).await?;
    let cache = startup::build_cache(config).await;

    let minter = Arc::new(Minter::new(config.minter.worker_id)?);
    let safety = Arc::new(SafeBrowsing::new(&config.safe_browsing, Arc::clone(&cache))?);
    let link_service = Arc::new(LinkService::new(
        repo.clone() as Arc<dyn LinkRepository>,
        minter,
        safety,
        Arc::clone(&cache),
    ));

    let verifier = Arc::new(OidcVerifier::new(&config.auth)?);
    let limiter = Arc::new(RateLimiter::new(
        startup::build_rate_limit_redis(config).await,
        &config.rate_limit,
    ));

    // 后台过期扫描
    tokio::spawn(run_expiry_sweep(
        repo.clone() as Arc<dyn LinkRepository>,
        EXPIRY_SWEEP_INTERVAL,
        shutdown.clone(),
    ));

    let api_state = web::Data::new(ApiState {
        link_service,
        public_base_url: config.server.public_base_url.clone(),
    });
    let health_state = web::Data::new(HealthState {
        repo: repo.clone() as Arc<dyn LinkRepository>,
    });

    let bind_addr = (config.server.host.as_str(), config.server.port);
    info!(
        host = %config.server.host,
        port = config.server.port,
        "Management API listening"
    );

    let server = HttpServer::new(move || {
        App::new()
            .app_data(api_state.clone())
            .app_data(health_state.clone())
            .service(
                web::scope("/api/v1")
                    // wrap 逆序执行：BearerAuth 先于 RateLimit
                    .wrap(RateLimit::new(Arc::clone(&limiter)))
                    .wrap(BearerAuth::new(Arc::clone(&verifier)))
                    .route("/urls", web::post().to(create_url))
                    .route("/urls", web::get().to(list_urls)),
            )
            .route("/health", web::get().to(health))
            .wrap(RequestIdMiddleware)
    })
    .disable_signals()
    .shutdown_timeout(HTTP_SHUTDOWN_BUDGET_SECS)
    .bind(bind_addr)
    .map_err(|e| AppError::internal(format!("failed to bind {}: {}", config.server.port, e)))?
    .run();

    // 根关闭信号到达时触发优雅停机
    let server_handle = server.handle();
    let mut shutdown_for_server = shutdown;
    tokio::spawn(async move {
        shutdown_for_server.cancelled().await;
        info!("Stopping HTTP server (graceful)");
        server_handle.stop(true).await;
    });

    server
        .await
        .map_err(|e| AppError::internal(format!("HTTP server error: {}", e)))?;

    info!("Management API stopped");
    Ok(())
}
