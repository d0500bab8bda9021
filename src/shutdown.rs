use std::{sync::Arc, time::Duration};

use time::OffsetDateTime;
use tokio::{sync::watch, task::JoinHandle};
use tracing::{info, warn};

use crate::{auth::services::sweep_expired_tokens, users::UserStore};

/// Resolves on SIGTERM or SIGINT (Ctrl+C elsewhere).
pub async fn wait_for_shutdown() -> anyhow::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;
        tokio::select! {
            _ = sigterm.recv() => info!("SIGTERM received"),
            _ = sigint.recv() => info!("SIGINT received"),
        }
        Ok(())
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        info!("Ctrl+C received");
        Ok(())
    }
}

/// Background job removing expired token records every `interval`.
pub struct TokenSweeper {
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl TokenSweeper {
    pub fn spawn(users: Arc<dyn UserStore>, interval: Duration) -> Self {
        let (stop, mut stopped) = watch::channel(false);
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = sweep_expired_tokens(users.as_ref(), OffsetDateTime::now_utc()).await {
                            warn!(error = %e, "token sweep failed");
                        }
                    }
                    _ = stopped.changed() => break,
                }
            }
            info!("token sweeper stopped");
        });
        Self { stop, task }
    }

    pub async fn stop(self) {
        let _ = self.stop.send(true);
        if let Err(e) = self.task.await {
            warn!(error = %e, "token sweeper task ended abnormally");
        }
    }
}

/// Last sweep, then release the store.
pub async fn cleanup(users: &dyn UserStore) {
    match sweep_expired_tokens(users, OffsetDateTime::now_utc()).await {
        Ok(removed) => info!(removed, "final token sweep done"),
        Err(e) => warn!(error = %e, "final token sweep failed"),
    }
    users.close().await;
    info!("storage closed");
}
