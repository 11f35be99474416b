//! Versioned wire contract for the push endpoint.
//!
//! The client offers every version it speaks in `hello`; the server answers with the one
//! it picked in `welcome`. Group method names are then fixed for the life of that link
//! instead of being guessed per call.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use thiserror::Error;

use crate::models::subscription::Subscription;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("server selected unsupported protocol version {0}")]
    UnsupportedVersion(u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ProtocolVersion {
    /// Legacy hub: entity groups are named after events.
    V1,
    V2,
}

impl ProtocolVersion {
    /// Offered in preference order.
    pub const SUPPORTED: [ProtocolVersion; 2] = [ProtocolVersion::V2, ProtocolVersion::V1];

    pub fn as_wire(self) -> u32 {
        match self {
            Self::V1 => 1,
            Self::V2 => 2,
        }
    }

    pub fn negotiate(selected: u32) -> Result<Self, ProtocolError> {
        Self::SUPPORTED
            .into_iter()
            .find(|version| version.as_wire() == selected)
            .ok_or(ProtocolError::UnsupportedVersion(selected))
    }

    /// Server method implementing `command` under this version.
    pub fn method_name(self, command: GroupCommand) -> &'static str {
        match (self, command) {
            (_, GroupCommand::JoinUserGroup) => "JoinUserGroup",
            (Self::V1, GroupCommand::JoinEntityGroup(_)) => "JoinEventGroup",
            (Self::V1, GroupCommand::LeaveEntityGroup(_)) => "LeaveEventGroup",
            (Self::V2, GroupCommand::JoinEntityGroup(_)) => "JoinEntityGroup",
            (Self::V2, GroupCommand::LeaveEntityGroup(_)) => "LeaveEntityGroup",
        }
    }
}

/// Group membership operations the server exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GroupCommand {
    JoinUserGroup,
    JoinEntityGroup(i64),
    LeaveEntityGroup(i64),
}

impl GroupCommand {
    pub fn is_join(self) -> bool {
        !matches!(self, Self::LeaveEntityGroup(_))
    }

    pub fn subscription(self) -> Subscription {
        match self {
            Self::JoinUserGroup => Subscription::user(),
            Self::JoinEntityGroup(id) | Self::LeaveEntityGroup(id) => Subscription::entity(id),
        }
    }

    pub fn arguments(self) -> Vec<Value> {
        match self {
            Self::JoinUserGroup => Vec::new(),
            Self::JoinEntityGroup(id) | Self::LeaveEntityGroup(id) => vec![json!(id)],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ClientFrame {
    Hello {
        versions: Vec<u32>,
    },
    Invoke {
        invocation_id: String,
        target: String,
        arguments: Vec<Value>,
    },
    Ping,
}

impl ClientFrame {
    pub fn hello() -> Self {
        Self::Hello {
            versions: ProtocolVersion::SUPPORTED
                .into_iter()
                .map(ProtocolVersion::as_wire)
                .collect(),
        }
    }

    pub fn invoke(invocation_id: String, version: ProtocolVersion, command: GroupCommand) -> Self {
        Self::Invoke {
            invocation_id,
            target: version.method_name(command).to_string(),
            arguments: command.arguments(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ServerFrame {
    Welcome {
        version: u32,
    },
    Completion {
        invocation_id: String,
        #[serde(default)]
        error: Option<String>,
    },
    Notification {
        #[serde(default)]
        target: Option<String>,
        #[serde(default)]
        payload: Value,
    },
    Ping,
    Close {
        #[serde(default)]
        error: Option<String>,
        #[serde(default)]
        allow_reconnect: bool,
    },
}

pub fn encode(frame: &ClientFrame) -> Result<String, ProtocolError> {
    Ok(serde_json::to_string(frame)?)
}

pub fn decode(text: &str) -> Result<ServerFrame, ProtocolError> {
    Ok(serde_json::from_str(text)?)
}
