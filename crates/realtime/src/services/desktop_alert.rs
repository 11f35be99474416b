use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use strum_macros::Display;
use ts_rs::TS;

use crate::models::notification::Notification;

/// Whether the user allowed OS-level notifications.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, TS, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AlertPermission {
    Granted,
    Denied,
    #[default]
    NotRequested,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DesktopAlert {
    pub title: String,
    pub body: String,
}

impl From<&Notification> for DesktopAlert {
    fn from(notification: &Notification) -> Self {
        Self {
            title: notification.title.clone(),
            body: notification.message.clone(),
        }
    }
}

/// Shows an alert without blocking the caller.
pub trait AlertPresenter: Send + Sync {
    fn present(&self, alert: DesktopAlert);
}

/// Presents alerts through the platform notification daemon via `notify-rust`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemAlertPresenter;

const ALERT_TIMEOUT_MS: i32 = 10_000;

impl AlertPresenter for SystemAlertPresenter {
    fn present(&self, alert: DesktopAlert) {
        let _handle = tokio::task::spawn_blocking(move || {
            if let Err(e) = notify_rust::Notification::new()
                .summary(&alert.title)
                .body(&alert.body)
                .timeout(ALERT_TIMEOUT_MS)
                .show()
            {
                tracing::error!("Failed to show desktop alert: {}", e);
            }
        });
    }
}

/// Permission-gated desktop alerting. The permission can change at runtime.
#[derive(Clone)]
pub struct DesktopAlerts {
    permission: Arc<RwLock<AlertPermission>>,
    presenter: Arc<dyn AlertPresenter>,
}

impl DesktopAlerts {
    pub fn new(permission: AlertPermission, presenter: Arc<dyn AlertPresenter>) -> Self {
        Self {
            permission: Arc::new(RwLock::new(permission)),
            presenter,
        }
    }

    pub fn system(permission: AlertPermission) -> Self {
        Self::new(permission, Arc::new(SystemAlertPresenter))
    }

    pub fn permission(&self) -> AlertPermission {
        *self.permission.read()
    }

    pub fn set_permission(&self, permission: AlertPermission) {
        *self.permission.write() = permission;
    }

    /// Returns true if an alert was handed to the presenter.
    pub fn notify(&self, notification: &Notification) -> bool {
        if self.permission() != AlertPermission::Granted || notification.read {
            return false;
        }
        self.presenter.present(DesktopAlert::from(notification));
        true
    }
}
