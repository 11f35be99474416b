//! Maps notification kinds to cache tags of the reactive data cache.

use std::{fmt, sync::Arc, time::Duration};

use anyhow::Context;
use async_trait::async_trait;
use moka::future::Cache;
use serde_json::Value;
use tracing::debug;

use crate::models::notification::{Notification, NotificationKind};

const EVENT_TAG: &str = "Event";
const REGISTRATION_TAG: &str = "Registration";
const LIST_ID: &str = "LIST";

/// Tag understood by the data cache: a resource kind plus an optional id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheTag {
    pub kind: &'static str,
    pub id: Option<String>,
}

impl CacheTag {
    pub fn entity_list() -> Self {
        Self {
            kind: EVENT_TAG,
            id: Some(LIST_ID.to_string()),
        }
    }

    pub fn entity(id: impl Into<String>) -> Self {
        Self {
            kind: EVENT_TAG,
            id: Some(id.into()),
        }
    }

    pub fn registration_list() -> Self {
        Self {
            kind: REGISTRATION_TAG,
            id: Some(LIST_ID.to_string()),
        }
    }
}

impl fmt::Display for CacheTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.id {
            Some(id) => write!(f, "{}:{}", self.kind, id),
            None => f.write_str(self.kind),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheTagRule {
    EntityList,
    /// Needs an entity id in the notification; skipped when there is none.
    Entity,
    RegistrationList,
}

pub fn rules_for(kind: NotificationKind) -> &'static [CacheTagRule] {
    use CacheTagRule::*;
    match kind {
        NotificationKind::EventCreated => &[EntityList],
        NotificationKind::EventUpdated => &[EntityList, Entity],
        NotificationKind::EventCancelled => &[EntityList, Entity, RegistrationList],
        NotificationKind::EventCapacityReached => &[EntityList, Entity],
        NotificationKind::RegistrationConfirmed => &[RegistrationList, Entity],
        NotificationKind::RegistrationCancelled => &[RegistrationList, Entity],
        NotificationKind::EventReminder
        | NotificationKind::Success
        | NotificationKind::Warning
        | NotificationKind::Error
        | NotificationKind::Info => &[],
    }
}

/// Concrete tags to invalidate for `notification`, in rule order.
pub fn tags_for(notification: &Notification) -> Vec<CacheTag> {
    let Some(kind) = notification.kind() else {
        return Vec::new();
    };
    let entity_id = notification.entity_id();
    rules_for(kind)
        .iter()
        .filter_map(|rule| match rule {
            CacheTagRule::EntityList => Some(CacheTag::entity_list()),
            CacheTagRule::Entity => entity_id.map(|id| CacheTag::entity(id.to_string())),
            CacheTagRule::RegistrationList => Some(CacheTag::registration_list()),
        })
        .collect()
}

/// The reactive data cache, seen from this subsystem.
#[async_trait]
pub trait CacheInvalidator: Send + Sync {
    async fn invalidate(&self, tags: &[CacheTag]) -> anyhow::Result<()>;
}

/// Issues the invalidations a notification implies.
#[derive(Clone)]
pub struct CacheInvalidationBridge {
    invalidator: Arc<dyn CacheInvalidator>,
}

impl CacheInvalidationBridge {
    pub fn new(invalidator: Arc<dyn CacheInvalidator>) -> Self {
        Self { invalidator }
    }

    /// Returns the tags that were invalidated.
    pub async fn apply(&self, notification: &Notification) -> anyhow::Result<Vec<CacheTag>> {
        let tags = tags_for(notification);
        if tags.is_empty() {
            return Ok(tags);
        }
        debug!(
            notification_type = %notification.notification_type,
            tags = ?tags.iter().map(ToString::to_string).collect::<Vec<_>>(),
            "Invalidating cache tags"
        );
        self.invalidator.invalidate(&tags).await.with_context(|| {
            format!(
                "Failed to invalidate cache for {} notification",
                notification.notification_type
            )
        })?;
        Ok(tags)
    }
}

const DEFAULT_TTL_SECS: u64 = 300;

/// Tag-keyed response cache backed by moka, usable as the bridge's invalidation target.
#[derive(Clone)]
pub struct MokaTagCache {
    cache: Cache<CacheTag, Value>,
}

impl MokaTagCache {
    pub fn new() -> Self {
        Self::with_ttl(Duration::from_secs(DEFAULT_TTL_SECS))
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        let cache = Cache::builder()
            .max_capacity(1_000)
            .time_to_live(ttl)
            .build();
        Self { cache }
    }

    pub async fn get(&self, tag: &CacheTag) -> Option<Value> {
        self.cache.get(tag).await
    }

    pub async fn insert(&self, tag: CacheTag, value: Value) {
        self.cache.insert(tag, value).await;
    }

    pub fn contains(&self, tag: &CacheTag) -> bool {
        self.cache.contains_key(tag)
    }
}

impl Default for MokaTagCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CacheInvalidator for MokaTagCache {
    async fn invalidate(&self, tags: &[CacheTag]) -> anyhow::Result<()> {
        for tag in tags {
            self.cache.invalidate(tag).await;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use serde_json::json;

    use super::*;
    use crate::models::notification::ENTITY_ID_KEY;

    fn notification(kind: &str, entity_id: Option<i64>) -> Notification {
        let mut data = HashMap::new();
        if let Some(id) = entity_id {
            data.insert(ENTITY_ID_KEY.to_string(), json!(id));
        }
        Notification {
            id: "n".to_string(),
            notification_type: kind.to_string(),
            title: String::new(),
            message: String::new(),
            timestamp: 0,
            read: false,
            data,
            action_url: None,
            priority: 1,
            show_toast: true,
        }
    }

    #[test]
    fn registration_cancelled_invalidates_registrations_and_entity() {
        assert_eq!(
            tags_for(&notification("RegistrationCancelled", Some(42))),
            vec![CacheTag::registration_list(), CacheTag::entity("42")]
        );
    }

    #[test]
    fn event_cancelled_touches_all_three() {
        assert_eq!(
            tags_for(&notification("EventCancelled", Some(7))),
            vec![
                CacheTag::entity_list(),
                CacheTag::entity("7"),
                CacheTag::registration_list()
            ]
        );
    }

    #[test]
    fn entity_tag_is_skipped_without_id() {
        assert_eq!(
            tags_for(&notification("EventUpdated", None)),
            vec![CacheTag::entity_list()]
        );
    }

    #[test]
    fn other_kinds_invalidate_nothing() {
        assert!(tags_for(&notification("EventReminder", Some(1))).is_empty());
        assert!(tags_for(&notification("info", Some(1))).is_empty());
        assert!(tags_for(&notification("VenueChanged", Some(1))).is_empty());
    }

    #[test]
    fn tags_render_as_kind_and_id() {
        assert_eq!(CacheTag::entity_list().to_string(), "Event:LIST");
        assert_eq!(CacheTag::entity("5").to_string(), "Event:5");
    }

    #[tokio::test]
    async fn moka_cache_drops_invalidated_tags_only() {
        let cache = MokaTagCache::new();
        cache.insert(CacheTag::entity_list(), json!([1, 2])).await;
        cache.insert(CacheTag::entity("1"), json!({"id": 1})).await;
        cache.insert(CacheTag::registration_list(), json!([])).await;

        let bridge = CacheInvalidationBridge::new(Arc::new(cache.clone()));
        let applied = bridge
            .apply(&notification("EventUpdated", Some(1)))
            .await
            .unwrap();

        assert_eq!(applied.len(), 2);
        assert!(cache.get(&CacheTag::entity_list()).await.is_none());
        assert!(cache.get(&CacheTag::entity("1")).await.is_none());
        assert_eq!(cache.get(&CacheTag::registration_list()).await, Some(json!([])));
    }
}
