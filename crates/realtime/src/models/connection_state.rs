use serde::{Deserialize, Serialize};
use strum_macros::Display;
use ts_rs::TS;

/// Lifecycle state of the push-channel connection.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, TS, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

impl ConnectionState {
    /// True while a transport link exists, even if it is currently re-establishing itself.
    pub fn has_link(self) -> bool {
        matches!(self, Self::Connected | Self::Reconnecting)
    }
}
