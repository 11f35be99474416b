//! Ephemeral toast presentation for incoming notifications.
//!
//! Toast membership is independent of read state: dismissing or expiring a toast never
//! marks its notification read, and marking a notification read never hides its toast.
//! An id gets at most one toast for the lifetime of the queue.

use std::{
    collections::{HashSet, VecDeque},
    sync::Arc,
    time::Duration,
};

use parking_lot::Mutex;
use serde::Serialize;
use tokio::{
    sync::{Notify, broadcast, oneshot, watch},
    time::Instant,
};
use tracing::{debug, warn};
use ts_rs::TS;

use super::{
    navigation::{self, NavigationIntent},
    notification_store::{NotificationStore, StoreChange},
    worker::WorkerHandle,
};

pub const DEFAULT_CAPACITY: usize = 5;
pub const DEFAULT_DISPLAY_FOR: Duration = Duration::from_secs(8);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, TS)]
#[serde(rename_all = "camelCase")]
pub struct ToastEntry {
    pub notification_id: String,
    /// Epoch milliseconds at which the toast became visible.
    pub shown_at: i64,
    pub dismissed: bool,
}

#[derive(Debug, Clone)]
struct VisibleToast {
    entry: ToastEntry,
    expires_at: Instant,
}

/// Time-explicit queue logic; [`ToastService`] supplies the clock.
#[derive(Debug)]
pub struct ToastQueue {
    capacity: usize,
    display_for: Duration,
    pending: VecDeque<String>,
    visible: Vec<VisibleToast>,
    seen: HashSet<String>,
}

impl Default for ToastQueue {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY, DEFAULT_DISPLAY_FOR)
    }
}

impl ToastQueue {
    pub fn new(capacity: usize, display_for: Duration) -> Self {
        Self {
            capacity: capacity.max(1),
            display_for,
            pending: VecDeque::new(),
            visible: Vec::new(),
            seen: HashSet::new(),
        }
    }

    /// Queues a toast for `id`. Returns false if this id already had one.
    pub fn offer(&mut self, id: &str, now: Instant, now_ms: i64) -> bool {
        if !self.seen.insert(id.to_string()) {
            return false;
        }
        self.pending.push_back(id.to_string());
        self.promote(now, now_ms);
        true
    }

    /// Removes the toast for `id`, visible or pending. Returns the visible entry, marked
    /// dismissed, if there was one.
    pub fn dismiss(&mut self, id: &str, now: Instant, now_ms: i64) -> Option<ToastEntry> {
        self.pending.retain(|pending| pending != id);
        let position = self
            .visible
            .iter()
            .position(|toast| toast.entry.notification_id == id)?;
        let mut entry = self.visible.remove(position).entry;
        entry.dismissed = true;
        self.promote(now, now_ms);
        Some(entry)
    }

    /// Drops every visible toast whose display time has elapsed and promotes pending ones.
    pub fn expire(&mut self, now: Instant, now_ms: i64) -> Vec<ToastEntry> {
        let mut expired = Vec::new();
        self.visible.retain(|toast| {
            if toast.expires_at <= now {
                let mut entry = toast.entry.clone();
                entry.dismissed = true;
                expired.push(entry);
                false
            } else {
                true
            }
        });
        if !expired.is_empty() {
            self.promote(now, now_ms);
        }
        expired
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.visible.iter().map(|toast| toast.expires_at).min()
    }

    pub fn visible(&self) -> Vec<ToastEntry> {
        self.visible.iter().map(|toast| toast.entry.clone()).collect()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    fn promote(&mut self, now: Instant, now_ms: i64) {
        while self.visible.len() < self.capacity {
            let Some(id) = self.pending.pop_front() else {
                break;
            };
            self.visible.push(VisibleToast {
                entry: ToastEntry {
                    notification_id: id,
                    shown_at: now_ms,
                    dismissed: false,
                },
                expires_at: now + self.display_for,
            });
        }
    }
}

struct ToastInner {
    store: NotificationStore,
    queue: Mutex<ToastQueue>,
    visible_tx: watch::Sender<Vec<ToastEntry>>,
    rescheduled: Notify,
}

impl ToastInner {
    fn publish(&self) {
        let visible = self.visible_snapshot();
        self.visible_tx.send_if_modified(|current| {
            if *current == visible {
                return false;
            }
            *current = visible;
            true
        });
    }

    fn visible_snapshot(&self) -> Vec<ToastEntry> {
        let visible = self.queue.lock().visible();
        visible
            .into_iter()
            .filter(|toast| self.store.contains(&toast.notification_id))
            .collect()
    }

    fn offer(&self, id: &str) {
        let offered = self
            .queue
            .lock()
            .offer(id, Instant::now(), utils::time::now_ms());
        if offered {
            debug!(notification_id = id, "Queued toast");
            self.publish();
        }
    }

    fn dismiss(&self, id: &str) -> bool {
        let dismissed = self
            .queue
            .lock()
            .dismiss(id, Instant::now(), utils::time::now_ms());
        self.publish();
        self.rescheduled.notify_one();
        dismissed.is_some()
    }

    fn expire(&self) {
        let expired = self
            .queue
            .lock()
            .expire(Instant::now(), utils::time::now_ms());
        if !expired.is_empty() {
            debug!(count = expired.len(), "Toasts expired");
            self.publish();
        }
    }
}

/// Keeps the toast queue in sync with the notification store.
#[derive(Clone)]
pub struct ToastService {
    inner: Arc<ToastInner>,
}

impl ToastService {
    /// Builds the service and its worker. The worker subscribes to `store` before this
    /// returns, so no append made afterwards is missed.
    pub fn spawn(
        store: NotificationStore,
        capacity: usize,
        display_for: Duration,
    ) -> (Self, WorkerHandle) {
        let (visible_tx, _) = watch::channel(Vec::new());
        let inner = Arc::new(ToastInner {
            queue: Mutex::new(ToastQueue::new(capacity, display_for)),
            store,
            visible_tx,
            rescheduled: Notify::new(),
        });
        let changes = inner.store.subscribe();
        let worker_inner = inner.clone();
        let worker = WorkerHandle::spawn("toast", move |shutdown| {
            run_worker(worker_inner, changes, shutdown)
        });
        (Self { inner }, worker)
    }

    pub fn visible(&self) -> Vec<ToastEntry> {
        self.inner.visible_snapshot()
    }

    pub fn subscribe(&self) -> watch::Receiver<Vec<ToastEntry>> {
        self.inner.visible_tx.subscribe()
    }

    /// Hides the toast. The notification's read state is left alone.
    pub fn dismiss(&self, id: &str) -> bool {
        self.inner.dismiss(id)
    }

    /// Marks the notification read, hides its toast and resolves where to navigate.
    pub fn click(&self, id: &str) -> Option<NavigationIntent> {
        self.inner.store.mark_read(id);
        self.inner.dismiss(id);
        let notification = self.inner.store.get(id)?;
        navigation::resolve(&notification)
    }
}

async fn run_worker(
    inner: Arc<ToastInner>,
    mut changes: broadcast::Receiver<StoreChange>,
    mut shutdown: oneshot::Receiver<()>,
) {
    loop {
        let deadline = inner.queue.lock().next_deadline();
        let expiry = async move {
            match deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            _ = &mut shutdown => break,
            _ = inner.rescheduled.notified() => {}
            _ = expiry => inner.expire(),
            change = changes.recv() => match change {
                Ok(StoreChange::Appended(notification)) if notification.show_toast => {
                    inner.offer(&notification.id);
                }
                Ok(StoreChange::Removed { id }) => {
                    inner.dismiss(&id);
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Toast worker fell behind store changes");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SHOWN_AT: i64 = 1_000;

    fn queue(capacity: usize) -> ToastQueue {
        ToastQueue::new(capacity, Duration::from_secs(8))
    }

    fn ids(entries: &[ToastEntry]) -> Vec<&str> {
        entries
            .iter()
            .map(|entry| entry.notification_id.as_str())
            .collect()
    }

    #[test]
    fn at_most_capacity_visible_and_pending_promoted_oldest_first() {
        let now = Instant::now();
        let mut queue = queue(2);
        for id in ["a", "b", "c", "d"] {
            assert!(queue.offer(id, now, SHOWN_AT));
        }
        assert_eq!(ids(&queue.visible()), vec!["a", "b"]);
        assert_eq!(queue.pending_len(), 2);

        let dismissed = queue.dismiss("a", now, SHOWN_AT).unwrap();
        assert!(dismissed.dismissed);
        assert_eq!(ids(&queue.visible()), vec!["b", "c"]);
    }

    #[test]
    fn expiry_counts_from_when_toast_became_visible() {
        let start = Instant::now();
        let mut queue = queue(1);
        queue.offer("a", start, SHOWN_AT);
        queue.offer("b", start, SHOWN_AT);

        let later = start + Duration::from_secs(8);
        let expired = queue.expire(later, SHOWN_AT + 8_000);
        assert_eq!(ids(&expired), vec!["a"]);
        assert_eq!(ids(&queue.visible()), vec!["b"]);
        assert_eq!(queue.visible()[0].shown_at, SHOWN_AT + 8_000);
        assert_eq!(queue.next_deadline(), Some(later + Duration::from_secs(8)));

        assert!(queue.expire(later + Duration::from_secs(7), 0).is_empty());
    }

    #[test]
    fn an_id_never_gets_a_second_toast() {
        let now = Instant::now();
        let mut queue = queue(5);
        assert!(queue.offer("a", now, SHOWN_AT));
        queue.dismiss("a", now, SHOWN_AT);
        assert!(!queue.offer("a", now, SHOWN_AT));
        assert!(queue.visible().is_empty());
    }

    #[test]
    fn dismissing_pending_toast_removes_it_silently() {
        let now = Instant::now();
        let mut queue = queue(1);
        queue.offer("a", now, SHOWN_AT);
        queue.offer("b", now, SHOWN_AT);

        assert_eq!(queue.dismiss("b", now, SHOWN_AT), None);
        assert_eq!(queue.pending_len(), 0);
        queue.dismiss("a", now, SHOWN_AT);
        assert!(queue.visible().is_empty());
    }

    #[test]
    fn empty_queue_has_no_deadline() {
        assert_eq!(ToastQueue::default().next_deadline(), None);
    }
}
