//! Per-user preferences: typed view, read-through cache, JSON file store and
//! the protected channel set.

use std::{
    collections::{BTreeMap, BTreeSet, HashMap, HashSet},
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, RwLock,
    },
    time::Duration,
};

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;

use crate::{domain::UserId, errors::Error, ports::PreferenceStore, Result};

pub mod keys {
    pub const DELETE_WORDS: &str = "delete_words";
    pub const REPLACEMENT_WORDS: &str = "replacement_words";
    pub const RENAME_TAG: &str = "rename_tag";
    pub const CUSTOM_CAPTION: &str = "custom_caption";
    pub const UPLOAD_METHOD: &str = "upload_method";

    pub const ALL: &[&str] = &[
        DELETE_WORDS,
        REPLACEMENT_WORDS,
        RENAME_TAG,
        CUSTOM_CAPTION,
        UPLOAD_METHOD,
    ];
}

/// Which standard backend a user's direct uploads go through.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendChoice {
    #[default]
    Primary,
    Alternate,
}

impl BackendChoice {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "primary" => Some(Self::Primary),
            "alternate" => Some(Self::Alternate),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::Alternate => "alternate",
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UserPreferences {
    pub delete_words: BTreeSet<String>,
    pub replacements: BTreeMap<String, String>,
    pub rename_tag: Option<String>,
    pub custom_caption: Option<String>,
    /// Present when the user's thumbnail file exists.
    pub thumbnail: Option<PathBuf>,
    pub backend: BackendChoice,
}

#[derive(Clone, Debug)]
pub struct CacheSettings {
    pub attempts: u32,
    pub retry_delay: Duration,
    pub default_rename_tag: Option<String>,
    pub thumb_dir: PathBuf,
}

/// Read-through cache over a [`PreferenceStore`].
///
/// Reads retry a bounded number of times and then degrade to defaults; a
/// degraded read is not cached. Writes go straight to the store and drop the
/// user's cached entry. Locks are never held across store calls.
///
/// Every invalidation bumps a generation counter; a load that overlapped one
/// is returned to its caller but not cached.
pub struct PreferenceCache {
    store: Arc<dyn PreferenceStore>,
    settings: CacheSettings,
    cache: RwLock<HashMap<UserId, UserPreferences>>,
    generation: AtomicU64,
}

impl PreferenceCache {
    pub fn new(store: Arc<dyn PreferenceStore>, settings: CacheSettings) -> Self {
        Self {
            store,
            settings,
            cache: RwLock::new(HashMap::new()),
            generation: AtomicU64::new(0),
        }
    }

    pub fn thumbnail_path(&self, user: UserId) -> PathBuf {
        self.settings.thumb_dir.join(format!("{}.jpg", user.0))
    }

    pub async fn get(&self, user: UserId) -> UserPreferences {
        if let Some(hit) = self.cached(user) {
            return hit;
        }

        let generation = self.generation.load(Ordering::Acquire);
        let (prefs, complete) = self.load(user).await;
        if complete {
            if let Ok(mut map) = self.cache.write() {
                // Checked under the lock that invalidation bumps it under.
                if self.generation.load(Ordering::Acquire) == generation {
                    map.insert(user, prefs.clone());
                } else {
                    tracing::debug!(user_id = user.0, "preferences changed during load; not caching");
                }
            }
        }
        prefs
    }

    fn cached(&self, user: UserId) -> Option<UserPreferences> {
        self.cache.read().ok()?.get(&user).cloned()
    }

    async fn load(&self, user: UserId) -> (UserPreferences, bool) {
        let mut complete = true;
        let mut read = |v: Option<Option<Value>>| match v {
            Some(v) => v,
            None => {
                complete = false;
                None
            }
        };

        let delete_words = read(self.get_with_retry(user, keys::DELETE_WORDS).await);
        let replacements = read(self.get_with_retry(user, keys::REPLACEMENT_WORDS).await);
        let rename_tag = read(self.get_with_retry(user, keys::RENAME_TAG).await);
        let custom_caption = read(self.get_with_retry(user, keys::CUSTOM_CAPTION).await);
        let backend = read(self.get_with_retry(user, keys::UPLOAD_METHOD).await);

        let thumb = self.thumbnail_path(user);
        let thumbnail = match tokio::fs::try_exists(&thumb).await {
            Ok(true) => Some(thumb),
            _ => None,
        };

        let prefs = UserPreferences {
            delete_words: decode(delete_words).unwrap_or_default(),
            replacements: decode(replacements).unwrap_or_default(),
            rename_tag: decode::<String>(rename_tag)
                .filter(|s| !s.trim().is_empty())
                .or_else(|| self.settings.default_rename_tag.clone()),
            custom_caption: decode::<String>(custom_caption).filter(|s| !s.trim().is_empty()),
            thumbnail,
            backend: decode(backend).unwrap_or_default(),
        };
        (prefs, complete)
    }

    /// `None` when every attempt failed.
    async fn get_with_retry(&self, user: UserId, key: &str) -> Option<Option<Value>> {
        let attempts = self.settings.attempts.max(1);
        for attempt in 1..=attempts {
            match self.store.get(user, key).await {
                Ok(v) => return Some(v),
                Err(e) if attempt < attempts => {
                    tracing::debug!(user_id = user.0, key, attempt, error = %e, "preference read failed; retrying");
                    tokio::time::sleep(self.settings.retry_delay * attempt).await;
                }
                Err(e) => {
                    tracing::warn!(user_id = user.0, key, error = %e, "preference read failed; using default");
                }
            }
        }
        None
    }

    pub fn invalidate(&self, user: UserId) {
        if let Ok(mut map) = self.cache.write() {
            self.generation.fetch_add(1, Ordering::AcqRel);
            map.remove(&user);
        }
    }

    pub fn invalidate_all(&self) {
        if let Ok(mut map) = self.cache.write() {
            self.generation.fetch_add(1, Ordering::AcqRel);
            map.clear();
        }
    }

    async fn set(&self, user: UserId, key: &str, value: Value) -> Result<()> {
        let res = self.store.set(user, key, value).await;
        self.invalidate(user);
        res
    }

    pub async fn add_delete_words(&self, user: UserId, words: &[String]) -> Result<()> {
        let mut current = self.get(user).await.delete_words;
        current.extend(words.iter().filter(|w| !w.is_empty()).cloned());
        self.set(user, keys::DELETE_WORDS, serde_json::to_value(current)?)
            .await
    }

    /// Adds `old -> new`. Refused (`Ok(false)`) when `old` is already a delete word.
    pub async fn add_replacement(&self, user: UserId, old: &str, new: &str) -> Result<bool> {
        let prefs = self.get(user).await;
        if prefs.delete_words.contains(old) {
            return Ok(false);
        }
        let mut map = prefs.replacements;
        map.insert(old.to_string(), new.to_string());
        self.set(user, keys::REPLACEMENT_WORDS, serde_json::to_value(map)?)
            .await?;
        Ok(true)
    }

    pub async fn set_rename_tag(&self, user: UserId, tag: &str) -> Result<()> {
        self.set(user, keys::RENAME_TAG, Value::String(tag.to_string()))
            .await
    }

    pub async fn set_custom_caption(&self, user: UserId, caption: &str) -> Result<()> {
        self.set(user, keys::CUSTOM_CAPTION, Value::String(caption.to_string()))
            .await
    }

    pub async fn set_backend(&self, user: UserId, choice: BackendChoice) -> Result<()> {
        self.set(user, keys::UPLOAD_METHOD, serde_json::to_value(choice)?)
            .await
    }

    /// Store a thumbnail image for the user (bytes already fetched by the caller).
    pub async fn set_thumbnail(&self, user: UserId, image: &[u8]) -> Result<PathBuf> {
        let path = self.thumbnail_path(user);
        tokio::fs::write(&path, image).await?;
        self.invalidate(user);
        Ok(path)
    }

    /// Returns whether a thumbnail existed.
    pub async fn remove_thumbnail(&self, user: UserId) -> Result<bool> {
        let removed = remove_if_exists(&self.thumbnail_path(user)).await?;
        self.invalidate(user);
        Ok(removed)
    }

    /// Clear every stored setting and the thumbnail for `user`.
    pub async fn reset(&self, user: UserId) -> Result<()> {
        let res = self.store.unset_many(user, keys::ALL).await;
        let thumb = remove_if_exists(&self.thumbnail_path(user)).await;
        self.invalidate_all();
        res?;
        thumb.map(|_| ())
    }
}

fn decode<T: DeserializeOwned>(v: Option<Value>) -> Option<T> {
    v.and_then(|v| serde_json::from_value(v).ok())
}

async fn remove_if_exists(path: &Path) -> Result<bool> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreDocument {
    #[serde(default)]
    users: BTreeMap<String, BTreeMap<String, Value>>,
    #[serde(default)]
    protected_channels: BTreeSet<i64>,
}

/// [`PreferenceStore`] persisted as one JSON document on disk.
pub struct JsonFileStore {
    path: PathBuf,
    doc: Mutex<StoreDocument>,
    write_lock: tokio::sync::Mutex<()>,
}

impl JsonFileStore {
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let doc = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => StoreDocument::default(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self {
            path,
            doc: Mutex::new(doc),
            write_lock: tokio::sync::Mutex::new(()),
        })
    }

    fn with_doc<T>(&self, f: impl FnOnce(&mut StoreDocument) -> T) -> Result<T> {
        let mut doc = self
            .doc
            .lock()
            .map_err(|_| Error::External("preference store lock poisoned".to_string()))?;
        Ok(f(&mut doc))
    }

    /// Apply `f` and persist the document (temp file + rename).
    async fn mutate(&self, f: impl FnOnce(&mut StoreDocument)) -> Result<()> {
        let _writer = self.write_lock.lock().await;
        let bytes = self.with_doc(|doc| {
            f(doc);
            serde_json::to_vec_pretty(&*doc)
        })??;

        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl PreferenceStore for JsonFileStore {
    async fn get(&self, user: UserId, key: &str) -> Result<Option<Value>> {
        self.with_doc(|doc| {
            doc.users
                .get(&user.0.to_string())
                .and_then(|m| m.get(key))
                .cloned()
        })
    }

    async fn set(&self, user: UserId, key: &str, value: Value) -> Result<()> {
        self.mutate(|doc| {
            doc.users
                .entry(user.0.to_string())
                .or_default()
                .insert(key.to_string(), value);
        })
        .await
    }

    async fn unset_many(&self, user: UserId, keys: &[&str]) -> Result<()> {
        self.mutate(|doc| {
            if let Some(m) = doc.users.get_mut(&user.0.to_string()) {
                for k in keys {
                    m.remove(*k);
                }
            }
        })
        .await
    }

    async fn list_protected_channels(&self) -> Result<HashSet<i64>> {
        self.with_doc(|doc| doc.protected_channels.iter().copied().collect())
    }

    async fn add_protected_channel(&self, channel_id: i64) -> Result<()> {
        self.mutate(|doc| {
            doc.protected_channels.insert(channel_id);
        })
        .await
    }
}

/// Channels an owner has marked off-limits. Read-mostly; writes persist first.
pub struct ProtectedChannels {
    store: Arc<dyn PreferenceStore>,
    ids: RwLock<HashSet<i64>>,
}

impl ProtectedChannels {
    pub async fn load(store: Arc<dyn PreferenceStore>) -> Self {
        let ids = store.list_protected_channels().await.unwrap_or_else(|e| {
            tracing::warn!(error = %e, "failed to load protected channels; starting empty");
            HashSet::new()
        });
        Self {
            store,
            ids: RwLock::new(ids),
        }
    }

    pub fn contains(&self, channel_id: i64) -> bool {
        self.ids
            .read()
            .map(|s| s.contains(&channel_id))
            .unwrap_or(false)
    }

    /// Returns whether the channel was newly added.
    pub async fn lock(&self, channel_id: i64) -> Result<bool> {
        if self.contains(channel_id) {
            return Ok(false);
        }
        self.store.add_protected_channel(channel_id).await?;
        let mut ids = self
            .ids
            .write()
            .map_err(|_| Error::External("protected set lock poisoned".to_string()))?;
        Ok(ids.insert(channel_id))
    }
}
