use async_trait::async_trait;
use thiserror::Error;

use super::LiveEvent;
use crate::services::{
    cache_bridge::CacheInvalidationBridge, desktop_alert::DesktopAlerts,
    groups::GroupSubscriptionManager, notification_store::NotificationStore,
};

/// Determines how an event handler should be executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    /// The dispatcher awaits the handler before moving on to the next event.
    Inline,
    /// The handler runs on its own task; the dispatcher does not wait.
    Spawned,
}

#[derive(Debug, Error)]
pub enum HandlerError {
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Services shared by all handlers.
#[derive(Clone)]
pub struct HandlerContext {
    pub store: NotificationStore,
    pub groups: GroupSubscriptionManager,
    pub cache: CacheInvalidationBridge,
    pub alerts: DesktopAlerts,
}

impl HandlerContext {
    pub fn new(
        store: NotificationStore,
        groups: GroupSubscriptionManager,
        cache: CacheInvalidationBridge,
        alerts: DesktopAlerts,
    ) -> Self {
        Self {
            store,
            groups,
            cache,
            alerts,
        }
    }
}

/// Something that reacts to [`LiveEvent`]s.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Name used in logs and for deterministic ordering.
    fn name(&self) -> &'static str;

    fn execution_mode(&self) -> ExecutionMode;

    fn handles(&self, event: &LiveEvent) -> bool;

    /// Called only if `handles` returned true.
    async fn handle(&self, event: LiveEvent, ctx: &HandlerContext) -> Result<(), HandlerError>;
}
