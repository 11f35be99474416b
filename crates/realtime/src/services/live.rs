//! Composition root of the live-notification layer.
//!
//! One [`LiveNotifications`] is built per session and passed by reference to whatever
//! needs it; nothing in this crate is global.

use std::sync::Arc;

use parking_lot::Mutex;

use super::{
    cache_bridge::{CacheInvalidationBridge, CacheInvalidator, MokaTagCache},
    config::{ConfigError, RealtimeConfig},
    connection::{ConnectionManager, ConnectionSettings},
    desktop_alert::{AlertPresenter, DesktopAlerts, SystemAlertPresenter},
    groups::GroupSubscriptionManager,
    live_events::{
        CacheInvalidationHandler, DesktopAlertHandler, DispatcherBuilder, GroupRejoinHandler,
        HandlerContext, NotificationStoreHandler, spawn_pipeline,
    },
    notification_store::NotificationStore,
    toast::ToastService,
    transport::{CredentialLookup, PushTransport, WebSocketTransport},
    worker::WorkerHandle,
};

pub struct LiveNotificationsBuilder {
    config: RealtimeConfig,
    credentials: CredentialLookup,
    transport: Option<Arc<dyn PushTransport>>,
    invalidator: Option<Arc<dyn CacheInvalidator>>,
    presenter: Option<Arc<dyn AlertPresenter>>,
}

impl LiveNotificationsBuilder {
    /// Defaults to the WebSocket transport.
    pub fn transport(mut self, transport: Arc<dyn PushTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Defaults to a private [`MokaTagCache`].
    pub fn cache_invalidator(mut self, invalidator: Arc<dyn CacheInvalidator>) -> Self {
        self.invalidator = Some(invalidator);
        self
    }

    /// Defaults to OS notifications via `notify-rust`.
    pub fn alert_presenter(mut self, presenter: Arc<dyn AlertPresenter>) -> Self {
        self.presenter = Some(presenter);
        self
    }

    /// Wires every component and spawns the background workers. Must be called from
    /// within a Tokio runtime.
    pub fn build(self) -> Result<LiveNotifications, ConfigError> {
        let settings = ConnectionSettings::from_config(&self.config)?;
        let transport = self
            .transport
            .unwrap_or_else(|| Arc::new(WebSocketTransport::from_config(&self.config)));
        let invalidator = self
            .invalidator
            .unwrap_or_else(|| Arc::new(MokaTagCache::new()));
        let presenter = self
            .presenter
            .unwrap_or_else(|| Arc::new(SystemAlertPresenter));

        let connection = ConnectionManager::new(transport, self.credentials, settings);
        let groups = GroupSubscriptionManager::new(connection.clone());
        let store = NotificationStore::new();
        let alerts = DesktopAlerts::new(self.config.alert_permission, presenter);

        // Subscribe the toast worker before the pipeline can append anything.
        let (toasts, toast_worker) = ToastService::spawn(
            store.clone(),
            self.config.toast_capacity,
            self.config.toast_display_for(),
        );

        let ctx = HandlerContext::new(
            store.clone(),
            groups.clone(),
            CacheInvalidationBridge::new(invalidator),
            alerts.clone(),
        );
        let dispatcher = DispatcherBuilder::new(ctx)
            .with_handler(NotificationStoreHandler)
            .with_handler(CacheInvalidationHandler)
            .with_handler(DesktopAlertHandler::new())
            .with_handler(GroupRejoinHandler)
            .build();
        let pipeline = spawn_pipeline(&connection, Arc::new(dispatcher));

        Ok(LiveNotifications {
            config: self.config,
            connection,
            groups,
            store,
            toasts,
            alerts,
            workers: Mutex::new(vec![pipeline, toast_worker]),
        })
    }
}

pub struct LiveNotifications {
    config: RealtimeConfig,
    connection: ConnectionManager,
    groups: GroupSubscriptionManager,
    store: NotificationStore,
    toasts: ToastService,
    alerts: DesktopAlerts,
    workers: Mutex<Vec<WorkerHandle>>,
}

impl LiveNotifications {
    pub fn builder(
        config: RealtimeConfig,
        credentials: CredentialLookup,
    ) -> LiveNotificationsBuilder {
        LiveNotificationsBuilder {
            config,
            credentials,
            transport: None,
            invalidator: None,
            presenter: None,
        }
    }

    pub fn config(&self) -> &RealtimeConfig {
        &self.config
    }

    pub fn connection(&self) -> &ConnectionManager {
        &self.connection
    }

    pub fn groups(&self) -> &GroupSubscriptionManager {
        &self.groups
    }

    pub fn store(&self) -> &NotificationStore {
        &self.store
    }

    pub fn toasts(&self) -> &ToastService {
        &self.toasts
    }

    pub fn alerts(&self) -> &DesktopAlerts {
        &self.alerts
    }

    pub async fn start(&self) {
        self.connection.start().await;
    }

    pub async fn stop(&self) {
        self.connection.stop().await;
    }

    /// Stops the connection and waits for the background workers to finish.
    pub async fn shutdown(&self) {
        self.connection.stop().await;
        let workers = std::mem::take(&mut *self.workers.lock());
        for worker in workers {
            worker.shutdown().await;
        }
        tracing::info!("Live notifications shut down");
    }
}
