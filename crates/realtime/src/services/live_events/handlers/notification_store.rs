use async_trait::async_trait;
use tracing::debug;

use crate::services::live_events::{
    EventHandler, ExecutionMode, HandlerContext, HandlerError, LiveEvent,
};

/// Appends received notifications to the store. Inline, so the store sees
/// notifications in the order they were normalized.
pub struct NotificationStoreHandler;

#[async_trait]
impl EventHandler for NotificationStoreHandler {
    fn name(&self) -> &'static str {
        "notification_store"
    }

    fn execution_mode(&self) -> ExecutionMode {
        ExecutionMode::Inline
    }

    fn handles(&self, event: &LiveEvent) -> bool {
        matches!(event, LiveEvent::NotificationReceived { .. })
    }

    async fn handle(&self, event: LiveEvent, ctx: &HandlerContext) -> Result<(), HandlerError> {
        let LiveEvent::NotificationReceived { notification } = event else {
            return Ok(());
        };
        let id = notification.id.clone();
        if ctx.store.append(notification) {
            debug!(notification_id = %id, "Stored notification");
        } else {
            debug!(notification_id = %id, "Duplicate notification ignored");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::services::{
        desktop_alert::AlertPermission, live_events::testing::test_context, normalizer,
        transport::RawMessage,
    };

    #[tokio::test]
    async fn appends_once_per_id() {
        let test = test_context(AlertPermission::Denied);
        let notification = normalizer::normalize_at(&RawMessage::new(json!({"id": "a"})), 0);

        for _ in 0..2 {
            NotificationStoreHandler
                .handle(
                    LiveEvent::NotificationReceived {
                        notification: notification.clone(),
                    },
                    &test.ctx,
                )
                .await
                .unwrap();
        }

        assert_eq!(test.ctx.store.len(), 1);
        assert!(!NotificationStoreHandler.handles(&LiveEvent::Reconnected));
    }
}
