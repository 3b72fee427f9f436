//! `ingest` mode: click-stream consumer
//!
//! Runs the ingestor loop until the shutdown signal fires, then gives the
//! final flush a bounded budget before exiting.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{error, info};

use crate::analytics::{ClickIngestor, Enricher, SeaOrmClickSink};
use crate::config::AppConfig;
use crate::errors::Result;
use crate::repository::LinkRepository;
use crate::runtime::lifetime::startup;
use crate::services::geoip::GeoIpProvider;
use crate::stream::{ClickStream, EventStream};
use crate::system::signal::ShutdownSignal;

/// 关闭后等待最终 flush 的预算
const SHUTDOWN_BUDGET: Duration = Duration::from_secs(10);

pub async fn run_ingestor(config: &'static AppConfig, shutdown: ShutdownSignal) -> Result<()> {
    let repo = startup::build_repository(config).await?;
    let sink = Arc::new(SeaOrmClickSink::new(repo.db().clone()));

    let stream = Arc::new(
        ClickStream::connect(&config.cache.redis.url, &config.events.stream_key).await?,
    );

    let geoip = GeoIpProvider::new(&config.analytics);
    let enricher = Arc::new(Enricher::new(Some(geoip), &config.analytics.hmac_secret));

    let ingestor = ClickIngestor::new(
        stream as Arc<dyn EventStream>,
        sink,
        Some(repo.clone() as Arc<dyn LinkRepository>),
        enricher,
        config.ingestor.clone(),
    );

    let mut shutdown_watch = shutdown.clone();
    let loop_task = tokio::spawn(async move { ingestor.run(shutdown).await });

    // 等待关闭信号，然后给最后一轮 flush 一个有限预算
    shutdown_watch.cancelled().await;
    match timeout(SHUTDOWN_BUDGET, loop_task).await {
        Ok(Ok(result)) => result?,
        Ok(Err(join_err)) => {
            error!(error = %join_err, "Ingestor task panicked");
        }
        Err(_) => {
            error!(
                "Ingestor failed to stop within {:?}, aborting",
                SHUTDOWN_BUDGET
            );
        }
    }

    info!("Ingest mode stopped");
    Ok(())
}
