//! HTTP API server: configuration, shared state, routing, and middleware.

pub mod auth;
pub mod config;
pub mod error;
pub mod extract;
pub mod handlers;
pub mod rate_limit;
pub mod router;
pub mod state;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::Parser;
use tokio::sync::Mutex;

use crate::olog;
use crate::push::{HttpPushGateway, PushDispatcher};
use crate::storage::Storage;

use config::{Cli, Config, DEFAULT_JWT_SECRET, RATE_LIMIT_MAX_REQUESTS, RATE_LIMIT_WINDOW_SECS};
use rate_limit::RateLimiter;
use state::{AppState, SharedState};

/// Parse arguments, open storage, and serve until the process is killed.
pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = Config::from_cli_and_env(cli);
    crate::logging::init();

    olog!("onward-server {} starting", env!("CARGO_PKG_VERSION"));
    olog!("  database: {}", config.db_path.display());
    olog!("  push gateway: {}", config.push_url);
    match &config.ai_base_url {
        Some(url) => olog!("  ai backend: {url}"),
        None => olog!("  ai backend: none (canned replies)"),
    }
    if config.production && config.jwt_secret == DEFAULT_JWT_SECRET {
        olog!("warning: production mode with the default JWT secret");
    }

    let storage = Storage::open(&config.db_path)?;
    let push = Arc::new(PushDispatcher::new(Box::new(HttpPushGateway::new(
        config.push_url.clone(),
    ))));
    let limiter = RateLimiter::new(RATE_LIMIT_WINDOW_SECS, RATE_LIMIT_MAX_REQUESTS);

    let bind_addr = config.bind_addr.clone();
    let state: SharedState = Arc::new(Mutex::new(AppState {
        storage,
        config,
        push,
        limiter,
        started_at: Instant::now(),
    }));

    // Periodically drop expired rate-limit windows.
    let cleanup_state = Arc::clone(&state);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(RATE_LIMIT_WINDOW_SECS));
        loop {
            interval.tick().await;
            cleanup_state.lock().await.limiter.cleanup();
        }
    });

    let app = router::build_router(Arc::clone(&state));
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    olog!("onward-server listening on http://{bind_addr}");
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}
