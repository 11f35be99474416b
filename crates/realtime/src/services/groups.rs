use std::{collections::HashSet, sync::Arc};

use parking_lot::Mutex;
use tracing::{debug, warn};

use super::{connection::ConnectionManager, transport::GroupCommand};
use crate::models::subscription::{GroupScope, Subscription};

/// Caller-driven group membership on top of the current push link.
///
/// Server round-trips are skipped while the connection is not ready. A leave always drops
/// the local entry, so [`rejoin_all`](Self::rejoin_all) never resurrects it. Failures are
/// logged and swallowed. There is no reference counting: one leave undoes any number of
/// joins.
#[derive(Clone)]
pub struct GroupSubscriptionManager {
    connection: ConnectionManager,
    active: Arc<Mutex<HashSet<Subscription>>>,
}

impl GroupSubscriptionManager {
    pub fn new(connection: ConnectionManager) -> Self {
        Self {
            connection,
            active: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub async fn join_user_group(&self) {
        self.apply(GroupCommand::JoinUserGroup).await;
    }

    pub async fn join_entity_group(&self, entity_id: i64) {
        self.apply(GroupCommand::JoinEntityGroup(entity_id)).await;
    }

    pub async fn leave_entity_group(&self, entity_id: i64) {
        self.apply(GroupCommand::LeaveEntityGroup(entity_id)).await;
    }

    pub fn active_subscriptions(&self) -> Vec<Subscription> {
        let mut subscriptions: Vec<_> = self.active.lock().iter().copied().collect();
        subscriptions.sort_by_key(|subscription| (subscription.scope, subscription.entity_id));
        subscriptions
    }

    /// Re-issues joins for tracked entity groups after the transport re-established
    /// its link. The connection manager re-joins the user group itself.
    pub async fn rejoin_all(&self) {
        let entity_ids: Vec<i64> = self
            .active_subscriptions()
            .into_iter()
            .filter(|subscription| subscription.scope == GroupScope::Entity)
            .filter_map(|subscription| subscription.entity_id)
            .collect();
        if entity_ids.is_empty() {
            return;
        }
        debug!(count = entity_ids.len(), "Rejoining entity groups");
        for entity_id in entity_ids {
            self.apply(GroupCommand::JoinEntityGroup(entity_id)).await;
        }
    }

    async fn apply(&self, command: GroupCommand) {
        let subscription = command.subscription();
        if !command.is_join() {
            self.active.lock().remove(&subscription);
        }

        if !self.connection.is_ready() {
            debug!(?command, "Connection not ready, skipping group command");
            return;
        }

        if let Err(error) = self.connection.invoke(command).await {
            warn!(?command, error = %error, "Group command failed");
            return;
        }

        if command.is_join() {
            self.active.lock().insert(subscription);
        }
    }
}
