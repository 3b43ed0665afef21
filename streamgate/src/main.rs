use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use selector_engine::SelectionEngine;
use streamgate::api::{AppState, serve};
use streamgate::config::AppConfig;
use streamgate::credentials::CookieProvider;
use streamgate::wbi::WbiSigner;
use streamgate::{http, logging, panic_hook};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let config = AppConfig::load()?;
    let (logging, _guard) = logging::init(&config.log_dir, config.log_retention_days)?;
    panic_hook::install();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        host = %config.host,
        port = config.port,
        mirrors = config.selection.mirrors.len(),
        "streamgate starting"
    );

    let shutdown = CancellationToken::new();
    logging.start_retention_cleanup(shutdown.clone());

    let client = http::default_client();
    let signer = Arc::new(WbiSigner::new(
        client.clone(),
        Duration::from_secs(config.wbi_refresh_interval_secs),
        config.selection.hedge_count,
        config.selection.attempt_timeout(),
    ));
    let cookies = Arc::new(CookieProvider::new(
        client.clone(),
        config.cookie_manager.clone(),
        config.fixed_cookie.clone(),
        config.selection.hedge_count,
        config.selection.attempt_timeout(),
    ));
    let engine = Arc::new(SelectionEngine::new(
        client,
        config.selection.clone(),
        signer,
    )?);

    let state = AppState::new(Arc::new(config), engine, cookies);

    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "failed to listen for shutdown signal");
                return;
            }
            info!("shutdown signal received");
            shutdown.cancel();
        });
    }

    serve(state, shutdown).await?;

    info!("streamgate stopped");
    Ok(())
}
