use std::{net::SocketAddr, time::Duration};

use anyhow::Context;

mod app;
mod auth;
mod config;
mod error;
mod nasa;
mod shutdown;
mod state;
mod users;

#[cfg(test)]
mod test_support;

use crate::shutdown::TokenSweeper;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let env_filter = std::env::var("RUST_LOG")
        .unwrap_or_else(|_| "nasa_backend=debug,axum=info,tower_http=info".to_string());
    let json_logs = std::env::var("LOG_FORMAT")
        .map(|v| v == "json")
        .unwrap_or(false);

    if json_logs {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }

    let app_state = state::AppState::init().await?;
    let config = app_state.config.clone();
    let users = app_state.users.clone();
    tracing::info!(environment = config.environment.as_str(), "starting nasa-backend");

    let sweeper = TokenSweeper::spawn(
        users.clone(),
        Duration::from_secs(config.token_sweep_interval_secs.max(1)),
    );

    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .context("invalid listen address")?;

    let result = app::serve(app::build_app(app_state), addr, async {
        if let Err(e) = shutdown::wait_for_shutdown().await {
            tracing::error!(error = %e, "signal handler failed; shutting down");
        }
    })
    .await;

    if let Err(e) = &result {
        tracing::error!(error = %e, "server stopped with error");
    }
    sweeper.stop().await;
    shutdown::cleanup(users.as_ref()).await;
    tracing::info!("shutdown complete");
    result
}
