use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::models::notification::{Notification, NotificationKind};

/// Where the rendering layer should go after the user activated a notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
pub struct NavigationIntent {
    pub path: String,
}

impl NavigationIntent {
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }
}

/// Explicit `action_url`, then the referenced entity, then a per-kind default route.
pub fn resolve(notification: &Notification) -> Option<NavigationIntent> {
    if let Some(url) = notification
        .action_url
        .as_deref()
        .map(str::trim)
        .filter(|url| !url.is_empty())
    {
        return Some(NavigationIntent::new(url));
    }
    if let Some(entity_id) = notification.entity_id() {
        return Some(NavigationIntent::new(format!("/events/{entity_id}")));
    }
    notification
        .kind()
        .and_then(default_route)
        .map(NavigationIntent::new)
}

fn default_route(kind: NotificationKind) -> Option<&'static str> {
    match kind {
        NotificationKind::EventCreated
        | NotificationKind::EventUpdated
        | NotificationKind::EventCancelled
        | NotificationKind::EventReminder
        | NotificationKind::EventCapacityReached => Some("/events"),
        NotificationKind::RegistrationConfirmed | NotificationKind::RegistrationCancelled => {
            Some("/my-registrations")
        }
        NotificationKind::Success
        | NotificationKind::Warning
        | NotificationKind::Error
        | NotificationKind::Info => None,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use serde_json::json;

    use super::*;
    use crate::models::notification::ENTITY_ID_KEY;

    fn notification(kind: &str) -> Notification {
        Notification {
            id: "n".to_string(),
            notification_type: kind.to_string(),
            title: String::new(),
            message: String::new(),
            timestamp: 0,
            read: false,
            data: HashMap::new(),
            action_url: None,
            priority: 1,
            show_toast: true,
        }
    }

    #[test]
    fn action_url_takes_precedence() {
        let mut n = notification("EventUpdated");
        n.action_url = Some("/custom/place".to_string());
        n.data.insert(ENTITY_ID_KEY.to_string(), json!(3));
        assert_eq!(resolve(&n), Some(NavigationIntent::new("/custom/place")));
    }

    #[test]
    fn entity_id_routes_to_entity_page() {
        let mut n = notification("RegistrationConfirmed");
        n.action_url = Some("  ".to_string());
        n.data.insert(ENTITY_ID_KEY.to_string(), json!("12"));
        assert_eq!(resolve(&n), Some(NavigationIntent::new("/events/12")));
    }

    #[test]
    fn kind_defaults_apply_last() {
        assert_eq!(
            resolve(&notification("EventReminder")),
            Some(NavigationIntent::new("/events"))
        );
        assert_eq!(
            resolve(&notification("RegistrationCancelled")),
            Some(NavigationIntent::new("/my-registrations"))
        );
        assert_eq!(resolve(&notification("info")), None);
        assert_eq!(resolve(&notification("VenueChanged")), None);
    }
}
