use std::{sync::Arc, time::Duration};

use anyhow::Context;
use sqlx::postgres::PgPoolOptions;
use tracing::{info, warn};

use crate::auth::jwt::JwtKeys;
use crate::config::AppConfig;
use crate::nasa::NasaClient;
use crate::users::{PgUserStore, UserStore};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub jwt: Arc<JwtKeys>,
    pub users: Arc<dyn UserStore>,
    pub nasa: NasaClient,
}

impl AppState {
    pub async fn init() -> anyhow::Result<Self> {
        let config = AppConfig::from_env()?;

        let pool = PgPoolOptions::new()
            .max_connections(config.database.max_connections)
            .acquire_timeout(Duration::from_secs(config.database.acquire_timeout_secs))
            .connect(&config.database.url)
            .await
            .context("failed to connect to database")?;
        info!(max_connections = config.database.max_connections, "database connected");

        // Run migrations if present
        if let Err(e) = sqlx::migrate!("./migrations").run(&pool).await {
            warn!(error = %e, "migration failed; continuing");
        }

        let users = Arc::new(PgUserStore::new(pool)) as Arc<dyn UserStore>;
        Self::from_parts(config, users)
    }

    pub fn from_parts(config: AppConfig, users: Arc<dyn UserStore>) -> anyhow::Result<Self> {
        let nasa = NasaClient::new(&config.nasa)?;
        info!(
            base_url = %config.nasa.base_url,
            key_prefix = %config.nasa.api_key.chars().take(8).collect::<String>(),
            "nasa client ready"
        );
        Ok(Self {
            jwt: Arc::new(JwtKeys::from(&config.jwt)),
            config: Arc::new(config),
            users,
            nasa,
        })
    }

    /// In-memory store and the given upstream; no database needed.
    #[cfg(test)]
    pub fn fake(nasa_base_url: &str) -> Self {
        let users = Arc::new(crate::users::MemoryUserStore::new()) as Arc<dyn UserStore>;
        Self::from_parts(AppConfig::for_tests(nasa_base_url), users).expect("fake state")
    }
}
