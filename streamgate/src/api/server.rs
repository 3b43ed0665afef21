//! Server setup: shared state, router assembly, bind and serve.

use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::info;

use selector_engine::SelectionEngine;

use crate::config::AppConfig;
use crate::credentials::CookieProvider;
use crate::error::Result;

use super::routes;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Server start time for uptime reporting.
    pub start_time: Instant,
    pub config: Arc<AppConfig>,
    pub engine: Arc<SelectionEngine>,
    pub cookies: Arc<CookieProvider>,
}

impl AppState {
    pub fn new(
        config: Arc<AppConfig>,
        engine: Arc<SelectionEngine>,
        cookies: Arc<CookieProvider>,
    ) -> Self {
        Self {
            start_time: Instant::now(),
            config,
            engine,
            cookies,
        }
    }
}

/// Builds the service router with request tracing.
pub fn build_router(state: AppState) -> Router {
    routes::router()
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Binds and serves until the cancellation token fires.
pub async fn serve(state: AppState, cancel_token: CancellationToken) -> Result<()> {
    let addr = state.config.bind_address();
    let router = build_router(state);
    let listener = TcpListener::bind(&addr).await?;

    info!("listening on http://{addr}");

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            cancel_token.cancelled().await;
            info!("api server shutting down");
        })
        .await?;

    Ok(())
}
