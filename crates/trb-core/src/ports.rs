//! Collaborator ports consumed by the transfer pipeline.
//!
//! Implementations live in adapters (`prefs::JsonFileStore`, `probe`, `ops`,
//! the Telegram crate). Optional capabilities are passed as `Option<Arc<dyn _>>`
//! so their absence is a typed branch.

use std::{collections::HashSet, path::Path, path::PathBuf};

use async_trait::async_trait;

use crate::{
    domain::{ChatId, UserId},
    messaging::types::VideoMeta,
    ops::OpsEvent,
    Result,
};

/// Raw persistent key-value storage for per-user settings and protected channels.
///
/// Implementations may fail; `prefs::PreferenceCache` turns failures into
/// defaults so nothing here ever aborts a transfer.
#[async_trait]
pub trait PreferenceStore: Send + Sync {
    async fn get(&self, user: UserId, key: &str) -> Result<Option<serde_json::Value>>;
    async fn set(&self, user: UserId, key: &str, value: serde_json::Value) -> Result<()>;
    async fn unset_many(&self, user: UserId, keys: &[&str]) -> Result<()>;
    async fn list_protected_channels(&self) -> Result<HashSet<i64>>;
    async fn add_protected_channel(&self, channel_id: i64) -> Result<()>;
}

/// Best-effort media introspection.
#[async_trait]
pub trait MediaProber: Send + Sync {
    async fn probe(&self, path: &Path) -> Option<VideoMeta>;
}

/// Best-effort thumbnail generation for videos without a user thumbnail.
#[async_trait]
pub trait Thumbnailer: Send + Sync {
    async fn thumbnail(&self, video: &Path, duration: u32, out: &Path) -> Option<PathBuf>;
}

#[async_trait]
pub trait EntitlementCheck: Send + Sync {
    async fn is_privileged(&self, chat_id: ChatId, user_id: UserId) -> bool;
}

/// Operational log destination. Fire-and-forget: callers never wait on it.
pub trait OpsLog: Send + Sync {
    fn record(&self, event: OpsEvent);
}

/// Entitlement backed by a fixed list of privileged user ids.
#[derive(Clone, Debug, Default)]
pub struct StaticEntitlement {
    privileged: HashSet<i64>,
}

impl StaticEntitlement {
    pub fn new(users: impl IntoIterator<Item = i64>) -> Self {
        Self {
            privileged: users.into_iter().collect(),
        }
    }
}

#[async_trait]
impl EntitlementCheck for StaticEntitlement {
    async fn is_privileged(&self, _chat_id: ChatId, user_id: UserId) -> bool {
        self.privileged.contains(&user_id.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn static_entitlement_checks_user_only() {
        let e = StaticEntitlement::new([7]);
        assert!(e.is_privileged(ChatId(1), UserId(7)).await);
        assert!(!e.is_privileged(ChatId(7), UserId(1)).await);
    }
}
