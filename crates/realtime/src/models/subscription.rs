use serde::{Deserialize, Serialize};
use strum_macros::Display;
use ts_rs::TS;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum GroupScope {
    User,
    Entity,
}

/// A logical broadcast group the client is a member of.
///
/// Keyed by `(scope, entity_id)`; the user group never carries an id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
pub struct Subscription {
    pub scope: GroupScope,
    pub entity_id: Option<i64>,
}

impl Subscription {
    pub fn user() -> Self {
        Self {
            scope: GroupScope::User,
            entity_id: None,
        }
    }

    pub fn entity(entity_id: i64) -> Self {
        Self {
            scope: GroupScope::Entity,
            entity_id: Some(entity_id),
        }
    }
}
