pub mod cache_bridge;
pub mod config;
pub mod connection;
pub mod desktop_alert;
pub mod groups;
pub mod live;
pub mod live_events;
pub mod navigation;
pub mod normalizer;
pub mod notification_store;
pub mod toast;
pub mod transport;
pub mod worker;
