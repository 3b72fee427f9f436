//! linkhop - URL shortener with click analytics
//!
//! One binary, three modes:
//! - `linkhop serve` (default): management API
//! - `linkhop redirect`: public redirector
//! - `linkhop ingest`: click-stream consumer

use dotenv::dotenv;
use tracing::warn;

use linkhop::config;
use linkhop::runtime::modes::{self, Mode};
use linkhop::system::logging::init_logging;
use linkhop::system::signal::{self, ShutdownSignal};

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenv().ok();

    config::init_config();
    let app_config = config::get_config();

    let logging = init_logging(&app_config.logging);
    // guard 必须活到进程结束，否则缓冲日志会丢
    let _log_guard = logging.guard;
    if let Some(warning) = logging.warning {
        warn!("{}", warning);
    }

    let (shutdown_handle, shutdown) = ShutdownSignal::new();
    tokio::spawn(signal::listen_for_shutdown(shutdown_handle));

    let args: Vec<String> = std::env::args().collect();
    let result = match modes::detect_mode(&args) {
        Mode::Serve => modes::run_server(app_config, shutdown).await,
        Mode::Redirect => modes::run_redirector(app_config, shutdown).await,
        Mode::Ingest => modes::run_ingestor(app_config, shutdown).await,
        Mode::Unknown => {
            eprintln!("Usage: linkhop [serve|redirect|ingest]");
            std::process::exit(2);
        }
    };

    if let Err(e) = result {
        eprintln!("fatal: {}", e);
        std::process::exit(1);
    }

    Ok(())
}
