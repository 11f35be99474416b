use std::{cmp::Ordering, collections::HashMap};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum_macros::{AsRefStr, Display, EnumString};
use ts_rs::TS;

/// Key under which the normalizer stores the referenced entity id in `Notification::data`.
pub const ENTITY_ID_KEY: &str = "entityId";

/// Priority assigned to notification types missing from the priority table.
pub const DEFAULT_PRIORITY: i32 = 1;

/// Canonical notification types understood by the priority, invalidation and routing tables.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    TS,
    EnumString,
    Display,
    AsRefStr,
)]
#[strum(ascii_case_insensitive)]
pub enum NotificationKind {
    EventCreated,
    EventUpdated,
    EventCancelled,
    RegistrationConfirmed,
    RegistrationCancelled,
    EventReminder,
    EventCapacityReached,
    #[serde(rename = "success")]
    #[strum(serialize = "success")]
    Success,
    #[serde(rename = "warning")]
    #[strum(serialize = "warning")]
    Warning,
    #[serde(rename = "error")]
    #[strum(serialize = "error")]
    Error,
    #[serde(rename = "info")]
    #[strum(serialize = "info")]
    Info,
}

impl NotificationKind {
    /// Parses a type name case-insensitively; unknown names yield `None`.
    pub fn parse(name: &str) -> Option<Self> {
        name.trim().parse().ok()
    }

    /// Static priority table, higher is more urgent.
    pub fn priority(self) -> i32 {
        match self {
            Self::EventCancelled | Self::Error => 4,
            Self::EventReminder | Self::EventCapacityReached | Self::RegistrationCancelled => 3,
            Self::Warning | Self::EventUpdated | Self::RegistrationConfirmed => 2,
            Self::EventCreated | Self::Success | Self::Info => DEFAULT_PRIORITY,
        }
    }

    /// Membership in the fixed set surfaced by the `important` filter.
    pub fn is_important(self) -> bool {
        matches!(
            self,
            Self::EventCancelled
                | Self::EventReminder
                | Self::EventCapacityReached
                | Self::RegistrationCancelled
                | Self::Error
        )
    }
}

/// Priority for an arbitrary type string, falling back to [`DEFAULT_PRIORITY`].
pub fn priority_for(notification_type: &str) -> i32 {
    NotificationKind::parse(notification_type)
        .map(NotificationKind::priority)
        .unwrap_or(DEFAULT_PRIORITY)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: String,
    #[serde(rename = "type")]
    pub notification_type: String,
    pub title: String,
    pub message: String,
    /// Epoch milliseconds.
    pub timestamp: i64,
    pub read: bool,
    pub data: HashMap<String, Value>,
    pub action_url: Option<String>,
    pub priority: i32,
    pub show_toast: bool,
}

impl Notification {
    pub fn kind(&self) -> Option<NotificationKind> {
        NotificationKind::parse(&self.notification_type)
    }

    pub fn is_important(&self) -> bool {
        self.kind().is_some_and(NotificationKind::is_important)
    }

    /// The entity this notification refers to, if the payload carried one.
    pub fn entity_id(&self) -> Option<i64> {
        match self.data.get(ENTITY_ID_KEY)? {
            Value::Number(n) => n.as_i64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }
}

/// Display order: priority descending, then newest first.
pub fn display_order(a: &Notification, b: &Notification) -> Ordering {
    b.priority
        .cmp(&a.priority)
        .then_with(|| b.timestamp.cmp(&a.timestamp))
}

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, TS, EnumString, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum NotificationFilter {
    #[default]
    All,
    Unread,
    Important,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
pub struct NotificationStats {
    pub total: usize,
    pub unread: usize,
}
