//! Live event handlers.

mod cache_invalidation;
mod desktop_alert;
mod group_rejoin;
mod notification_store;

pub use cache_invalidation::CacheInvalidationHandler;
pub use desktop_alert::DesktopAlertHandler;
pub use group_rejoin::GroupRejoinHandler;
pub use notification_store::NotificationStoreHandler;
