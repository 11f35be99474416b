//! Routes live events to registered handlers.

use std::sync::Arc;

use tracing::{debug, warn};

use super::{EventHandler, ExecutionMode, HandlerContext, LiveEvent};

/// Dispatches live events to registered handlers.
///
/// Inline handlers run sequentially in name order and are awaited, so their effects
/// are applied in event order. Spawned handlers run on their own tasks.
pub struct LiveEventDispatcher {
    inline_handlers: Vec<Arc<dyn EventHandler>>,
    spawned_handlers: Vec<Arc<dyn EventHandler>>,
    ctx: Arc<HandlerContext>,
}

impl LiveEventDispatcher {
    /// Handler errors are logged, never propagated.
    pub async fn dispatch(&self, event: LiveEvent) {
        for handler in &self.inline_handlers {
            if handler.handles(&event) {
                debug!(
                    handler = handler.name(),
                    event = ?std::mem::discriminant(&event),
                    "Dispatching event to inline handler"
                );
                if let Err(e) = handler.handle(event.clone(), &self.ctx).await {
                    warn!(handler = handler.name(), error = %e, "Inline handler failed");
                }
            }
        }

        for handler in &self.spawned_handlers {
            if handler.handles(&event) {
                let handler = Arc::clone(handler);
                let event = event.clone();
                let ctx = Arc::clone(&self.ctx);
                debug!(handler = handler.name(), "Spawning handler");

                tokio::spawn(async move {
                    if let Err(e) = handler.handle(event, &ctx).await {
                        warn!(handler = handler.name(), error = %e, "Spawned handler failed");
                    }
                });
            }
        }
    }

    pub fn context(&self) -> &HandlerContext {
        &self.ctx
    }
}

pub struct DispatcherBuilder {
    handlers: Vec<Arc<dyn EventHandler>>,
    ctx: HandlerContext,
}

impl DispatcherBuilder {
    pub fn new(ctx: HandlerContext) -> Self {
        Self {
            handlers: Vec::new(),
            ctx,
        }
    }

    pub fn with_handler<H: EventHandler + 'static>(mut self, handler: H) -> Self {
        self.handlers.push(Arc::new(handler));
        self
    }

    pub fn build(mut self) -> LiveEventDispatcher {
        self.handlers.sort_by_key(|h| h.name());

        let (inline, spawned): (Vec<_>, Vec<_>) = self
            .handlers
            .into_iter()
            .partition(|h| h.execution_mode() == ExecutionMode::Inline);

        LiveEventDispatcher {
            inline_handlers: inline,
            spawned_handlers: spawned,
            ctx: Arc::new(self.ctx),
        }
    }
}
