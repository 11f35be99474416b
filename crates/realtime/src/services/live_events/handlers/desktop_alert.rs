use std::collections::HashSet;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::services::live_events::{
    EventHandler, ExecutionMode, HandlerContext, HandlerError, LiveEvent,
};

/// Raises an OS notification for each new notification id, when permitted.
#[derive(Default)]
pub struct DesktopAlertHandler {
    alerted: Mutex<HashSet<String>>,
}

impl DesktopAlertHandler {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EventHandler for DesktopAlertHandler {
    fn name(&self) -> &'static str {
        "desktop_alert"
    }

    fn execution_mode(&self) -> ExecutionMode {
        ExecutionMode::Spawned
    }

    fn handles(&self, event: &LiveEvent) -> bool {
        matches!(event, LiveEvent::NotificationReceived { .. })
    }

    async fn handle(&self, event: LiveEvent, ctx: &HandlerContext) -> Result<(), HandlerError> {
        let Some(notification) = event.notification() else {
            return Ok(());
        };
        if !self.alerted.lock().insert(notification.id.clone()) {
            return Ok(());
        }
        ctx.alerts.notify(notification);
        Ok(())
    }
}
