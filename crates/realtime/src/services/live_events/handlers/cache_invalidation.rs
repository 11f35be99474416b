use async_trait::async_trait;

use crate::services::live_events::{
    EventHandler, ExecutionMode, HandlerContext, HandlerError, LiveEvent,
};

/// Invalidates the cache tags a notification implies.
pub struct CacheInvalidationHandler;

#[async_trait]
impl EventHandler for CacheInvalidationHandler {
    fn name(&self) -> &'static str {
        "cache_invalidation"
    }

    fn execution_mode(&self) -> ExecutionMode {
        ExecutionMode::Inline
    }

    fn handles(&self, event: &LiveEvent) -> bool {
        matches!(event, LiveEvent::NotificationReceived { .. })
    }

    async fn handle(&self, event: LiveEvent, ctx: &HandlerContext) -> Result<(), HandlerError> {
        if let Some(notification) = event.notification() {
            ctx.cache.apply(notification).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use serde_json::json;

    use super::*;
    use crate::services::{
        cache_bridge::CacheTag, desktop_alert::AlertPermission,
        live_events::testing::test_context, normalizer, transport::RawMessage,
    };

    #[tokio::test]
    async fn event_cancellation_invalidates_lists_and_entity() {
        let test = test_context(AlertPermission::Denied);
        let notification = normalizer::normalize_at(
            &RawMessage::new(json!({"type": "EventCancelled", "eventId": 12})),
            0,
        );

        CacheInvalidationHandler
            .handle(LiveEvent::NotificationReceived { notification }, &test.ctx)
            .await
            .unwrap();

        assert_eq!(
            *test.invalidator.tags.lock(),
            vec![
                CacheTag::entity_list(),
                CacheTag::entity("12"),
                CacheTag::registration_list()
            ]
        );
    }

    #[tokio::test]
    async fn invalidation_failure_is_reported() {
        let test = test_context(AlertPermission::Denied);
        test.invalidator.fail.store(true, Ordering::SeqCst);
        let notification = normalizer::normalize_at(
            &RawMessage::new(json!({"type": "EventUpdated", "eventId": 3})),
            0,
        );

        let result = CacheInvalidationHandler
            .handle(LiveEvent::NotificationReceived { notification }, &test.ctx)
            .await;

        match result {
            Err(HandlerError::Other(error)) => {
                assert!(error.to_string().contains("EventUpdated"), "{error}");
            }
            other => panic!("unexpected result: {other:?}"),
        }
        assert!(test.invalidator.tags.lock().is_empty());
    }
}
