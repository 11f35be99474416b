use std::{sync::Arc, time::Duration};

use futures::{FutureExt, StreamExt};
use realtime::{
    models::connection_state::ConnectionState,
    services::{
        config::{ConfigError, RealtimeConfig},
        live::LiveNotifications,
        notification_store::StoreChange,
        transport::CredentialLookup,
    },
};
use thiserror::Error;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Bearer token for the push endpoint, re-read on every connect.
const ACCESS_TOKEN_ENV: &str = "PUSH_ACCESS_TOKEN";

/// How often a dropped connection is restarted.
const RESTART_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum ListenerError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("failed to install rustls crypto provider")]
    CryptoProvider,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

fn env_credentials() -> CredentialLookup {
    Arc::new(|| {
        async {
            std::env::var(ACCESS_TOKEN_ENV)
                .ok()
                .map(|token| token.trim().to_string())
                .filter(|token| !token.is_empty())
        }
        .boxed()
    })
}

#[tokio::main]
async fn main() -> Result<(), ListenerError> {
    // The WebSocket transport negotiates TLS through rustls.
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| ListenerError::CryptoProvider)?;

    utils::logging::init_tracing()
        .map_err(|e| anyhow::anyhow!("Failed to create tracing filter: {e}"))?;

    let config = RealtimeConfig::from_env()?;
    info!(endpoint = %config.endpoint()?, "Starting push listener");

    let live = LiveNotifications::builder(config, env_credentials()).build()?;

    let changes = live.store().change_stream();
    tokio::spawn(async move {
        let mut changes = std::pin::pin!(changes);
        while let Some(change) = changes.next().await {
            log_change(&change);
        }
    });

    let mut status = live.connection().subscribe_status();
    tokio::spawn(async move {
        while status.changed().await.is_ok() {
            let state = *status.borrow_and_update();
            info!(%state, "Connection state changed");
        }
    });

    live.start().await;
    if live.connection().status() != ConnectionState::Connected {
        warn!(
            "Not connected yet (is {} set?), retrying every {:?}",
            ACCESS_TOKEN_ENV, RESTART_INTERVAL
        );
    }

    let mut restart = tokio::time::interval(RESTART_INTERVAL);
    restart.set_missed_tick_behavior(MissedTickBehavior::Delay);
    restart.tick().await;

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            _ = restart.tick() => {
                if live.connection().status() == ConnectionState::Disconnected {
                    debug!("Connection is down, restarting");
                    live.start().await;
                }
            }
        }
    }

    info!("Shutting down");
    live.shutdown().await;
    Ok(())
}

fn log_change(change: &StoreChange) {
    match change {
        StoreChange::Appended(notification) => info!(
            id = %notification.id,
            notification_type = %notification.notification_type,
            priority = notification.priority,
            title = %notification.title,
            "{}",
            notification.message
        ),
        StoreChange::Read { id } => debug!(%id, "Notification read"),
        StoreChange::AllRead { ids } => debug!(count = ids.len(), "All notifications read"),
        StoreChange::Removed { id } => debug!(%id, "Notification removed"),
    }
}

/// Waits for Ctrl+C, or SIGTERM on Unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {e}");
        }
    };

    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let terminate = async {
            if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                sigterm.recv().await;
            } else {
                tracing::error!("Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        };

        tokio::select! {
            _ = ctrl_c => {},
            _ = terminate => {},
        }
    }

    #[cfg(not(unix))]
    ctrl_c.await;
}
