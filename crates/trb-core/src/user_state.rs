//! Process-lifetime per-user state (target override, running batch).
//!
//! Passed explicitly to whoever needs it; nothing here is persisted.

use std::{collections::HashMap, sync::RwLock};

use crate::domain::{ChatId, TransferTarget, UserId};

#[derive(Clone, Debug, Default)]
struct UserState {
    /// Raw `chat_id[/topic_id]` as the user typed it.
    target: Option<String>,
    batch_running: bool,
}

#[derive(Debug, Default)]
pub struct UserStateStore {
    inner: RwLock<HashMap<UserId, UserState>>,
}

impl UserStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn update<T>(&self, user: UserId, f: impl FnOnce(&mut UserState) -> T) -> Option<T> {
        let mut map = self.inner.write().ok()?;
        Some(f(map.entry(user).or_default()))
    }

    /// Store a target override; rejected (`false`) when it does not parse.
    pub fn set_target(&self, user: UserId, raw: &str) -> bool {
        if TransferTarget::parse(raw).is_none() {
            return false;
        }
        self.update(user, |s| s.target = Some(raw.trim().to_string()))
            .is_some()
    }

    /// Where `user`'s deliveries go: the override, else the requesting chat.
    pub fn target_for(&self, user: UserId, fallback: ChatId) -> TransferTarget {
        let raw = self
            .inner
            .read()
            .ok()
            .and_then(|m| m.get(&user).and_then(|s| s.target.clone()));
        TransferTarget::parse_or(raw.as_deref(), fallback)
    }

    /// Marks a batch as running; `false` if one already is.
    pub fn begin_batch(&self, user: UserId) -> bool {
        self.update(user, |s| !std::mem::replace(&mut s.batch_running, true))
            .unwrap_or(false)
    }

    pub fn end_batch(&self, user: UserId) {
        self.update(user, |s| s.batch_running = false);
    }

    /// Forget everything about `user`.
    pub fn clear(&self, user: UserId) {
        if let Ok(mut map) = self.inner.write() {
            map.remove(&user);
        }
    }
}
