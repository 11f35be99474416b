use std::{collections::HashMap, sync::Arc};

use futures::{Stream, StreamExt};
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use ts_rs::TS;

use crate::models::notification::{
    Notification, NotificationFilter, NotificationStats, display_order,
};

const CHANGE_CHANNEL_CAPACITY: usize = 256;

/// Mutation emitted by [`NotificationStore`], in the order the mutations were applied.
#[derive(Debug, Clone, PartialEq, Serialize, TS)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StoreChange {
    Appended(Notification),
    Read { id: String },
    AllRead { ids: Vec<String> },
    Removed { id: String },
}

struct Stored {
    /// Insertion sequence; newer entries win ties in display order.
    seq: u64,
    notification: Notification,
}

#[derive(Default)]
struct StoreInner {
    notifications: HashMap<String, Stored>,
    next_seq: u64,
    unread: usize,
}

/// Session-lifetime notification list.
///
/// Ids are unique and `read` only ever flips from false to true. Changes are broadcast
/// while the write lock is held so subscribers observe them in mutation order.
#[derive(Clone)]
pub struct NotificationStore {
    inner: Arc<RwLock<StoreInner>>,
    changes: broadcast::Sender<StoreChange>,
}

impl Default for NotificationStore {
    fn default() -> Self {
        Self::new()
    }
}

impl NotificationStore {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(RwLock::new(StoreInner::default())),
            changes,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreChange> {
        self.changes.subscribe()
    }

    /// Live changes as a stream. Changes missed by a lagging consumer are skipped.
    pub fn change_stream(&self) -> impl Stream<Item = StoreChange> + Send + 'static {
        BroadcastStream::new(self.changes.subscribe())
            .filter_map(|change| async move { change.ok() })
    }

    /// Inserts `notification` unless its id is already present.
    pub fn append(&self, notification: Notification) -> bool {
        let mut inner = self.inner.write();
        if inner.notifications.contains_key(&notification.id) {
            return false;
        }
        if !notification.read {
            inner.unread += 1;
        }
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.notifications.insert(
            notification.id.clone(),
            Stored {
                seq,
                notification: notification.clone(),
            },
        );
        let _ = self.changes.send(StoreChange::Appended(notification));
        true
    }

    /// Returns true if the notification existed and was unread.
    pub fn mark_read(&self, id: &str) -> bool {
        let mut inner = self.inner.write();
        let Some(Stored { notification, .. }) = inner.notifications.get_mut(id) else {
            return false;
        };
        if notification.read {
            return false;
        }
        notification.read = true;
        inner.unread -= 1;
        let _ = self.changes.send(StoreChange::Read { id: id.to_string() });
        true
    }

    /// Marks everything read; returns how many notifications changed.
    pub fn mark_all_read(&self) -> usize {
        let mut inner = self.inner.write();
        let ids: Vec<String> = inner
            .notifications
            .values_mut()
            .map(|stored| &mut stored.notification)
            .filter(|notification| !notification.read)
            .map(|notification| {
                notification.read = true;
                notification.id.clone()
            })
            .collect();
        inner.unread = 0;
        if !ids.is_empty() {
            let count = ids.len();
            let _ = self.changes.send(StoreChange::AllRead { ids });
            return count;
        }
        0
    }

    pub fn remove(&self, id: &str) -> Option<Notification> {
        let mut inner = self.inner.write();
        let removed = inner.notifications.remove(id)?.notification;
        if !removed.read {
            inner.unread -= 1;
        }
        let _ = self.changes.send(StoreChange::Removed { id: id.to_string() });
        Some(removed)
    }

    pub fn get(&self, id: &str) -> Option<Notification> {
        self.inner
            .read()
            .notifications
            .get(id)
            .map(|stored| stored.notification.clone())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.inner.read().notifications.contains_key(id)
    }

    /// Snapshot matching `filter`, highest priority first, newest first within a priority.
    /// Equal timestamps fall back to arrival order, latest first.
    pub fn filter(&self, filter: NotificationFilter) -> Vec<Notification> {
        let inner = self.inner.read();
        let mut items: Vec<&Stored> = inner
            .notifications
            .values()
            .filter(|stored| {
                let notification = &stored.notification;
                match filter {
                    NotificationFilter::All => true,
                    NotificationFilter::Unread => !notification.read,
                    NotificationFilter::Important => {
                        !notification.read && notification.is_important()
                    }
                }
            })
            .collect();
        items.sort_by(|a, b| {
            display_order(&a.notification, &b.notification).then_with(|| b.seq.cmp(&a.seq))
        });
        items
            .into_iter()
            .map(|stored| stored.notification.clone())
            .collect()
    }

    pub fn unread_count(&self) -> usize {
        self.inner.read().unread
    }

    pub fn stats(&self) -> NotificationStats {
        let inner = self.inner.read();
        NotificationStats {
            total: inner.notifications.len(),
            unread: inner.unread,
        }
    }

    pub fn len(&self) -> usize {
        self.inner.read().notifications.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().notifications.is_empty()
    }
}
