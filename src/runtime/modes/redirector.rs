//! `redirect` mode: public redirector
//!
//! GET /{short_code} resolves through the cache tier and publishes a click
//! event for every successful redirect.

use actix_web::{web, App, HttpServer};
use std::sync::Arc;
use tracing::info;

use crate::analytics::ClickPublisher;
use crate::api::handlers::health::{health, HealthState};
use crate::api::handlers::redirect::{handle_redirect, RedirectState};
use crate::api::middleware::RequestIdMiddleware;
use crate::config::AppConfig;
use crate::errors::{AppError, Result};
use crate::repository::LinkRepository;
use crate::runtime::lifetime::startup;
use crate::services::RedirectService;
use crate::stream::ClickStream;
use crate::system::signal::ShutdownSignal;

const HTTP_SHUTDOWN_BUDGET_SECS: u64 = 30;

pub async fn run_redirector(config: &'static AppConfig, shutdown: ShutdownSignal) -> Result<()> {
    let repo = startup::build_repository(config).await?;
    let cache = startup::build_cache(config).await;

    let redirect_service = Arc::new(RedirectService::new(
        repo.clone() as Arc<dyn LinkRepository>,
        cache,
    ));

    let stream = Arc::new(
        ClickStream::connect(&config.cache.redis.url, &config.events.stream_key).await?,
    );
    let publisher = Arc::new(ClickPublisher::new(stream, &config.events));

    // 定时刷出缓冲的点击事件；关闭时做最后一次 flush
    tokio::spawn(Arc::clone(&publisher).run_flush_task(shutdown.clone()));

    let redirect_state = web::Data::new(RedirectState {
        redirect: redirect_service,
        publisher,
    });
    let health_state = web::Data::new(HealthState {
        repo: repo.clone() as Arc<dyn LinkRepository>,
    });

    let bind_addr = (config.server.host.as_str(), config.server.port);
    info!(
        host = %config.server.host,
        port = config.server.port,
        "Redirector listening"
    );

    let server = HttpServer::new(move || {
        App::new()
            .app_data(redirect_state.clone())
            .app_data(health_state.clone())
            .route("/health", web::get().to(health))
            .route("/{short_code}", web::get().to(handle_redirect))
            .wrap(RequestIdMiddleware)
    })
    .disable_signals()
    .shutdown_timeout(HTTP_SHUTDOWN_BUDGET_SECS)
    .bind(bind_addr)
    .map_err(|e| AppError::internal(format!("failed to bind {}: {}", config.server.port, e)))?
    .run();

    let server_handle = server.handle();
    let mut shutdown_for_server = shutdown;
    tokio::spawn(async move {
        shutdown_for_server.cancelled().await;
        info!("Stopping redirector (graceful)");
        server_handle.stop(true).await;
    });

    server
        .await
        .map_err(|e| AppError::internal(format!("HTTP server error: {}", e)))?;

    info!("Redirector stopped");
    Ok(())
}
