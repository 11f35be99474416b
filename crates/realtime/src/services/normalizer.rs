//! Turns whatever the server pushed into a canonical [`Notification`].
//!
//! Payload field casing and naming drift between server versions, so every field is
//! looked up by its canonical name first, then by known alternates, all matched
//! ASCII-case-insensitively. Normalization never fails: anything missing falls back to a
//! static default, and payloads that are not objects become plain `info` notifications.

use std::collections::HashMap;

use serde_json::{Map, Value};
use utils::time::{epoch_to_ms, now_ms, parse_rfc3339_ms};
use uuid::Uuid;

use super::transport::RawMessage;
use crate::models::notification::{ENTITY_ID_KEY, Notification, NotificationKind, priority_for};

const ID_FIELDS: &[&str] = &["id", "notificationId"];
const TYPE_FIELDS: &[&str] = &["type", "notificationType", "kind"];
const TITLE_FIELDS: &[&str] = &["title", "subject", "heading"];
const MESSAGE_FIELDS: &[&str] = &["message", "body", "content", "text"];
const TIMESTAMP_FIELDS: &[&str] = &["timestamp", "createdAt", "sentAt", "time"];
const READ_FIELDS: &[&str] = &["read", "isRead"];
const DATA_FIELDS: &[&str] = &["data", "payload", "metadata"];
const ENTITY_ID_FIELDS: &[&str] = &[ENTITY_ID_KEY, "eventId"];
const ACTION_URL_FIELDS: &[&str] = &["actionUrl", "url", "link"];
const SHOW_TOAST_FIELDS: &[&str] = &["showToast", "toast"];

pub const FALLBACK_TYPE: &str = "info";
pub const FALLBACK_TITLE: &str = "Notification";
pub const FALLBACK_MESSAGE: &str = "You have a new notification";

pub fn normalize(raw: &RawMessage) -> Notification {
    normalize_at(raw, now_ms())
}

/// Like [`normalize`], with `now_ms` used for missing or unparseable timestamps.
pub fn normalize_at(raw: &RawMessage, now_ms: i64) -> Notification {
    let empty = Map::new();
    let (fields, bare_text) = match &raw.payload {
        Value::Object(fields) => (fields, None),
        Value::String(text) => (&empty, non_empty(text)),
        _ => (&empty, None),
    };

    let notification_type = resolve(fields, TYPE_FIELDS, text_of)
        .or_else(|| {
            raw.target
                .as_deref()
                .and_then(NotificationKind::parse)
                .map(|kind| kind.to_string())
        })
        .map(|name| canonical_type(&name))
        .unwrap_or_else(|| FALLBACK_TYPE.to_string());
    let kind = NotificationKind::parse(&notification_type);
    let (default_title, default_message) = kind
        .and_then(default_copy)
        .unwrap_or((FALLBACK_TITLE, FALLBACK_MESSAGE));

    let title =
        resolve(fields, TITLE_FIELDS, text_of).unwrap_or_else(|| default_title.to_string());
    let message = resolve(fields, MESSAGE_FIELDS, text_of)
        .or(bare_text)
        .unwrap_or_else(|| default_message.to_string());

    Notification {
        id: resolve(fields, ID_FIELDS, text_of).unwrap_or_else(|| Uuid::new_v4().to_string()),
        priority: priority_for(&notification_type),
        notification_type,
        title,
        message,
        timestamp: resolve(fields, TIMESTAMP_FIELDS, timestamp_of).unwrap_or(now_ms),
        read: resolve(fields, READ_FIELDS, flag_of).unwrap_or(false),
        data: data_of(fields),
        action_url: resolve(fields, ACTION_URL_FIELDS, text_of),
        show_toast: resolve(fields, SHOW_TOAST_FIELDS, flag_of).unwrap_or(true),
    }
}

/// Known kinds are rewritten to their canonical spelling; anything else is kept verbatim.
fn canonical_type(name: &str) -> String {
    match NotificationKind::parse(name) {
        Some(kind) => kind.to_string(),
        None => name.to_string(),
    }
}

fn default_copy(kind: NotificationKind) -> Option<(&'static str, &'static str)> {
    let copy = match kind {
        NotificationKind::EventCreated => ("New event", "A new event has been published"),
        NotificationKind::EventUpdated => ("Event updated", "An event you follow has changed"),
        NotificationKind::EventCancelled => {
            ("Event cancelled", "An event you follow has been cancelled")
        }
        NotificationKind::RegistrationConfirmed => (
            "Registration confirmed",
            "Your registration has been confirmed",
        ),
        NotificationKind::RegistrationCancelled => (
            "Registration cancelled",
            "Your registration has been cancelled",
        ),
        NotificationKind::EventReminder => (
            "Event reminder",
            "An event you registered for starts soon",
        ),
        NotificationKind::EventCapacityReached => {
            ("Event full", "An event has reached its capacity")
        }
        NotificationKind::Success
        | NotificationKind::Warning
        | NotificationKind::Error
        | NotificationKind::Info => return None,
    };
    Some(copy)
}

/// First value among `names` that `convert` accepts. For each name the exact key is tried
/// before case-insensitive matches.
fn resolve<'a, T>(
    fields: &'a Map<String, Value>,
    names: &[&str],
    convert: impl Fn(&'a Value) -> Option<T>,
) -> Option<T> {
    names.iter().find_map(|name| {
        fields.get(*name).and_then(&convert).or_else(|| {
            fields
                .iter()
                .filter(|(key, _)| key.eq_ignore_ascii_case(name))
                .find_map(|(_, value)| convert(value))
        })
    })
}

fn non_empty(text: &str) -> Option<String> {
    let trimmed = text.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

fn text_of(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => non_empty(text),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

fn flag_of(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(flag) => Some(*flag),
        Value::String(text) => text.trim().to_ascii_lowercase().parse().ok(),
        _ => None,
    }
}

fn timestamp_of(value: &Value) -> Option<i64> {
    match value {
        Value::Number(number) => number
            .as_i64()
            .or_else(|| number.as_f64().map(|float| float as i64))
            .map(epoch_to_ms),
        Value::String(text) => {
            let text = text.trim();
            text.parse::<i64>()
                .ok()
                .map(epoch_to_ms)
                .or_else(|| parse_rfc3339_ms(text))
        }
        _ => None,
    }
}

fn data_of(fields: &Map<String, Value>) -> HashMap<String, Value> {
    let nested = resolve(fields, DATA_FIELDS, Value::as_object);
    let mut data: HashMap<String, Value> = nested
        .map(|object| {
            object
                .iter()
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect()
        })
        .unwrap_or_default();

    if !data.contains_key(ENTITY_ID_KEY) {
        let entity_id = nested
            .and_then(|object| resolve(object, ENTITY_ID_FIELDS, entity_id_of))
            .or_else(|| resolve(fields, ENTITY_ID_FIELDS, entity_id_of));
        if let Some(entity_id) = entity_id {
            data.insert(ENTITY_ID_KEY.to_string(), entity_id);
        }
    }
    data
}

fn entity_id_of(value: &Value) -> Option<Value> {
    match value {
        Value::Number(_) => Some(value.clone()),
        Value::String(text) => non_empty(text).map(Value::String),
        _ => None,
    }
}
