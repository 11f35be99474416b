//! In-process bus between the connection layer and the notification consumers.
//!
//! The pipeline worker turns [`ConnectionEvent`]s into [`LiveEvent`]s (normalizing raw
//! messages on the way) and hands them to the [`LiveEventDispatcher`], which fans them
//! out to the registered handlers.

mod dispatcher;
mod handler;
pub mod handlers;
mod pipeline;
#[cfg(test)]
pub(crate) mod testing;

pub use dispatcher::{DispatcherBuilder, LiveEventDispatcher};
pub use handler::{EventHandler, ExecutionMode, HandlerContext, HandlerError};
pub use handlers::{
    CacheInvalidationHandler, DesktopAlertHandler, GroupRejoinHandler, NotificationStoreHandler,
};
pub use pipeline::spawn_pipeline;

use crate::models::notification::Notification;

#[derive(Debug, Clone, PartialEq)]
pub enum LiveEvent {
    /// A normalized notification arrived over the push channel.
    NotificationReceived { notification: Notification },

    /// The transport re-established a dropped link.
    Reconnected,
}

impl LiveEvent {
    pub fn notification(&self) -> Option<&Notification> {
        match self {
            Self::NotificationReceived { notification } => Some(notification),
            Self::Reconnected => None,
        }
    }
}
