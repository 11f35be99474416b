use async_trait::async_trait;
use tracing::debug;

use crate::services::live_events::{
    EventHandler, ExecutionMode, HandlerContext, HandlerError, LiveEvent,
};

/// Re-joins tracked entity groups after the transport re-established its link.
/// Spawned, since joins wait out the settle delay.
pub struct GroupRejoinHandler;

#[async_trait]
impl EventHandler for GroupRejoinHandler {
    fn name(&self) -> &'static str {
        "group_rejoin"
    }

    fn execution_mode(&self) -> ExecutionMode {
        ExecutionMode::Spawned
    }

    fn handles(&self, event: &LiveEvent) -> bool {
        matches!(event, LiveEvent::Reconnected)
    }

    async fn handle(&self, _event: LiveEvent, ctx: &HandlerContext) -> Result<(), HandlerError> {
        debug!("Rejoining groups after reconnect");
        ctx.groups.rejoin_all().await;
        Ok(())
    }
}
