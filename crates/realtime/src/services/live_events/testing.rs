use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use parking_lot::Mutex;
use url::Url;

use super::HandlerContext;
use crate::services::{
    cache_bridge::{CacheInvalidationBridge, CacheInvalidator, CacheTag},
    connection::{ConnectionManager, ConnectionSettings},
    desktop_alert::{AlertPermission, AlertPresenter, DesktopAlert, DesktopAlerts},
    groups::GroupSubscriptionManager,
    notification_store::NotificationStore,
    transport::{
        ConnectRequest, PushLink, PushTransport, ReconnectPolicy, TransportError,
        static_credentials,
    },
};

/// Transport that never connects.
pub(crate) struct OfflineTransport;

#[async_trait]
impl PushTransport for OfflineTransport {
    async fn connect(&self, _request: ConnectRequest) -> Result<PushLink, TransportError> {
        Err(TransportError::Closed)
    }
}

#[derive(Default)]
pub(crate) struct RecordingInvalidator {
    pub(crate) tags: Mutex<Vec<CacheTag>>,
    /// Rejects every invalidation while set.
    pub(crate) fail: AtomicBool,
}

#[async_trait]
impl CacheInvalidator for RecordingInvalidator {
    async fn invalidate(&self, tags: &[CacheTag]) -> anyhow::Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            anyhow::bail!("cache unavailable");
        }
        self.tags.lock().extend_from_slice(tags);
        Ok(())
    }
}

#[derive(Default)]
pub(crate) struct RecordingPresenter {
    pub(crate) shown: Mutex<Vec<DesktopAlert>>,
}

impl AlertPresenter for RecordingPresenter {
    fn present(&self, alert: DesktopAlert) {
        self.shown.lock().push(alert);
    }
}

pub(crate) struct TestContext {
    pub(crate) ctx: HandlerContext,
    pub(crate) invalidator: Arc<RecordingInvalidator>,
    pub(crate) presenter: Arc<RecordingPresenter>,
}

pub(crate) fn offline_connection() -> ConnectionManager {
    let settings = ConnectionSettings {
        endpoint: Url::parse("ws://localhost/hubs/notifications").unwrap(),
        throttle: Duration::from_secs(5),
        group_join_delay: Duration::from_millis(500),
        reconnect: ReconnectPolicy::disabled(),
    };
    ConnectionManager::new(Arc::new(OfflineTransport), static_credentials(None), settings)
}

pub(crate) fn test_context(permission: AlertPermission) -> TestContext {
    let invalidator = Arc::new(RecordingInvalidator::default());
    let presenter = Arc::new(RecordingPresenter::default());
    let ctx = HandlerContext::new(
        NotificationStore::new(),
        GroupSubscriptionManager::new(offline_connection()),
        CacheInvalidationBridge::new(invalidator.clone()),
        DesktopAlerts::new(permission, presenter.clone()),
    );
    TestContext {
        ctx,
        invalidator,
        presenter,
    }
}
