use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use super::{desktop_alert::AlertPermission, transport::ReconnectPolicy};

/// Environment variable holding the base URL the push endpoint is served from.
pub const PUSH_BASE_URL_ENV: &str = "PUSH_BASE_URL";

pub const DEFAULT_HUB_PATH: &str = "/hubs/notifications";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("environment variable {0} must be set")]
    MissingVar(&'static str),
    #[error("invalid push base URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("unsupported URL scheme `{0}` (expected http, https, ws or wss)")]
    UnsupportedScheme(String),
}

/// Tunables for the live-notification layer. Every field except the base URL has a default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RealtimeConfig {
    pub push_base_url: String,
    pub hub_path: String,
    /// Minimum spacing between two connection attempts.
    pub throttle_ms: u64,
    /// How long group joins wait after a link is (re-)established.
    pub group_join_delay_ms: u64,
    pub handshake_timeout_ms: u64,
    pub invoke_timeout_ms: u64,
    /// Delays between transport reconnect attempts; the last entry repeats.
    pub reconnect_schedule_ms: Vec<u64>,
    pub toast_capacity: usize,
    pub toast_display_ms: u64,
    pub alert_permission: AlertPermission,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            push_base_url: "http://localhost:5000".to_string(),
            hub_path: DEFAULT_HUB_PATH.to_string(),
            throttle_ms: 5_000,
            group_join_delay_ms: 500,
            handshake_timeout_ms: 15_000,
            invoke_timeout_ms: 10_000,
            reconnect_schedule_ms: vec![0, 2_000, 10_000, 30_000],
            toast_capacity: 5,
            toast_display_ms: 8_000,
            alert_permission: AlertPermission::default(),
        }
    }
}

impl RealtimeConfig {
    pub fn with_base_url(push_base_url: impl Into<String>) -> Self {
        Self {
            push_base_url: push_base_url.into(),
            ..Self::default()
        }
    }

    /// Reads `PUSH_BASE_URL` from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let base = lookup(PUSH_BASE_URL_ENV)
            .filter(|value| !value.trim().is_empty())
            .ok_or(ConfigError::MissingVar(PUSH_BASE_URL_ENV))?;
        let config = Self::with_base_url(base.trim());
        // Fail at startup rather than on the first connect.
        config.endpoint()?;
        Ok(config)
    }

    /// WebSocket URL of the push endpoint, derived from the base URL and hub path.
    pub fn endpoint(&self) -> Result<Url, ConfigError> {
        let mut url = Url::parse(&self.push_base_url)?;
        let scheme = match url.scheme() {
            "http" | "ws" => "ws",
            "https" | "wss" => "wss",
            other => return Err(ConfigError::UnsupportedScheme(other.to_string())),
        };
        if url.set_scheme(scheme).is_err() {
            return Err(ConfigError::UnsupportedScheme(url.scheme().to_string()));
        }
        let path = format!(
            "{}/{}",
            url.path().trim_end_matches('/'),
            self.hub_path.trim_start_matches('/')
        );
        url.set_path(&path);
        Ok(url)
    }

    pub fn throttle(&self) -> Duration {
        Duration::from_millis(self.throttle_ms)
    }

    pub fn group_join_delay(&self) -> Duration {
        Duration::from_millis(self.group_join_delay_ms)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    pub fn invoke_timeout(&self) -> Duration {
        Duration::from_millis(self.invoke_timeout_ms)
    }

    pub fn toast_display_for(&self) -> Duration {
        Duration::from_millis(self.toast_display_ms)
    }

    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy::new(
            self.reconnect_schedule_ms
                .iter()
                .copied()
                .map(Duration::from_millis)
                .collect(),
        )
    }
}
