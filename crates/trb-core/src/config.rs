use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{domain::ChatId, errors::Error, Result};

pub const GIB: u64 = 1024 * 1024 * 1024;
pub const DEFAULT_SIZE_LIMIT: u64 = 2 * GIB;
/// 1.9 GiB: strictly below the hard limit to leave protocol-header headroom.
pub const DEFAULT_PART_SIZE: u64 = GIB * 19 / 10;

/// Connection settings for an additional bot session (secondary or elevated).
#[derive(Clone, Debug)]
pub struct SessionConfig {
    pub token: String,
    /// Custom Bot API server (e.g. a local server lifting the upload limit).
    pub api_url: Option<String>,
}

/// Typed configuration loaded from the environment (and an optional `.env`).
#[derive(Clone, Debug)]
pub struct Config {
    // Core
    pub bot_token: String,
    pub owner_ids: Vec<i64>,
    pub premium_users: Vec<i64>,

    // Destinations
    pub log_group: ChatId,
    pub ops_log_chat: ChatId,

    // Optional sessions
    pub secondary: Option<SessionConfig>,
    pub elevated: Option<SessionConfig>,

    // Storage
    pub temp_dir: PathBuf,
    pub prefs_file: PathBuf,
    pub thumb_dir: PathBuf,
    pub audit_log_path: PathBuf,
    pub audit_log_json: bool,

    // Size policy
    pub size_limit: u64,
    pub part_size: u64,

    // Behavior
    pub default_rename_tag: Option<String>,
    pub upsell_url: String,
    pub progress_edit_interval: Duration,
    pub pref_retry_attempts: u32,
    pub batch_limit: u32,

    // External tools
    pub ffprobe_path: PathBuf,
    pub ffmpeg_path: PathBuf,
}

impl Config {
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));

        let bot_token = env_str("BOT_TOKEN").and_then(non_empty).ok_or_else(|| {
            Error::Config("BOT_TOKEN environment variable is required".to_string())
        })?;
        let log_group = env_str("LOG_GROUP")
            .and_then(|s| s.trim().parse::<i64>().ok())
            .map(ChatId)
            .ok_or_else(|| {
                Error::Config("LOG_GROUP environment variable is required".to_string())
            })?;
        let ops_log_chat = env_i64("OPS_LOG_CHAT").map(ChatId).unwrap_or(log_group);

        let owner_ids = parse_csv_i64(env_str("OWNER_IDS"));
        let premium_users = parse_csv_i64(env_str("PREMIUM_USERS"));

        let secondary = session_from_env("SECONDARY_BOT_TOKEN", "SECONDARY_API_URL");
        let elevated = session_from_env("ELEVATED_BOT_TOKEN", "ELEVATED_API_URL");

        let temp_dir = env_path("TEMP_DIR").unwrap_or_else(|| PathBuf::from("/tmp/trb"));
        let prefs_file =
            env_path("PREFS_FILE").unwrap_or_else(|| PathBuf::from("/tmp/trb-prefs.json"));
        let thumb_dir = env_path("THUMB_DIR").unwrap_or_else(|| temp_dir.join("thumbs"));
        let audit_log_path =
            env_path("AUDIT_LOG_PATH").unwrap_or_else(|| PathBuf::from("/tmp/trb-ops.log"));
        let audit_log_json = env_bool("AUDIT_LOG_JSON").unwrap_or(true);

        fs::create_dir_all(&temp_dir)?;
        fs::create_dir_all(&thumb_dir)?;

        let size_limit = env_u64("SIZE_LIMIT_BYTES")
            .filter(|v| *v > 0)
            .unwrap_or(DEFAULT_SIZE_LIMIT);
        let part_size = clamp_part_size(env_u64("PART_SIZE_BYTES"), size_limit);

        let default_rename_tag = env_str("DEFAULT_RENAME_TAG").and_then(non_empty);
        let upsell_url =
            env_str("UPSELL_URL").unwrap_or_else(|| "https://t.me/premium".to_string());
        let progress_edit_interval =
            Duration::from_millis(env_u64("PROGRESS_EDIT_INTERVAL_MS").unwrap_or(5_000));
        let pref_retry_attempts = env_u32("PREF_RETRY_ATTEMPTS").unwrap_or(2).max(1);
        let batch_limit = env_u32("BATCH_LIMIT").unwrap_or(100).max(1);

        let ffprobe_path = env_path("FFPROBE_PATH").unwrap_or_else(|| PathBuf::from("ffprobe"));
        let ffmpeg_path = env_path("FFMPEG_PATH").unwrap_or_else(|| PathBuf::from("ffmpeg"));

        Ok(Self {
            bot_token,
            owner_ids,
            premium_users,
            log_group,
            ops_log_chat,
            secondary,
            elevated,
            temp_dir,
            prefs_file,
            thumb_dir,
            audit_log_path,
            audit_log_json,
            size_limit,
            part_size,
            default_rename_tag,
            upsell_url,
            progress_edit_interval,
            pref_retry_attempts,
            batch_limit,
            ffprobe_path,
            ffmpeg_path,
        })
    }

    pub fn is_owner(&self, user_id: i64) -> bool {
        self.owner_ids.contains(&user_id)
    }

    /// Conventional location of a user's custom thumbnail.
    pub fn thumbnail_path(&self, user_id: i64) -> PathBuf {
        self.thumb_dir.join(format!("{user_id}.jpg"))
    }
}

fn clamp_part_size(requested: Option<u64>, size_limit: u64) -> u64 {
    let max = size_limit.saturating_sub(1).max(1);
    match requested {
        Some(v) if v > 0 => v.min(max),
        _ => DEFAULT_PART_SIZE.min(max),
    }
}

fn session_from_env(token_key: &str, url_key: &str) -> Option<SessionConfig> {
    let token = env_str(token_key).and_then(non_empty)?;
    Some(SessionConfig {
        token,
        api_url: env_str(url_key).and_then(non_empty),
    })
}

fn env_str(key: &str) -> Option<String> {
    env::var(key).ok()
}

fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };

    for raw in contents.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((k, v)) = line.split_once('=') else {
            continue;
        };

        let key = k.trim();
        if key.is_empty() {
            continue;
        }
        if env::var_os(key).is_some() {
            continue; // do not override existing env
        }

        let mut val = v.trim().to_string();
        // Strip optional surrounding quotes.
        if val.len() >= 2
            && ((val.starts_with('"') && val.ends_with('"'))
                || (val.starts_with('\'') && val.ends_with('\'')))
        {
            val = val[1..val.len() - 1].to_string();
        }

        env::set_var(key, val);
    }
}

fn env_bool(key: &str) -> Option<bool> {
    env_str(key).map(|s| {
        matches!(
            s.trim().to_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        )
    })
}

fn env_u64(key: &str) -> Option<u64> {
    env_str(key).and_then(|s| s.trim().parse::<u64>().ok())
}

fn env_u32(key: &str) -> Option<u32> {
    env_str(key).and_then(|s| s.trim().parse::<u32>().ok())
}

fn env_i64(key: &str) -> Option<i64> {
    env_str(key).and_then(|s| s.trim().parse::<i64>().ok())
}

fn env_path(key: &str) -> Option<PathBuf> {
    env::var_os(key).map(PathBuf::from)
}

fn parse_csv_i64(v: Option<String>) -> Vec<i64> {
    v.unwrap_or_default()
        .split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .filter_map(|s| s.parse::<i64>().ok())
        .collect()
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn part_size_stays_below_limit() {
        assert_eq!(clamp_part_size(None, DEFAULT_SIZE_LIMIT), DEFAULT_PART_SIZE);
        assert!(DEFAULT_PART_SIZE < DEFAULT_SIZE_LIMIT);
        assert_eq!(clamp_part_size(Some(5_000), 1_000), 999);
        assert_eq!(clamp_part_size(Some(0), 1_000), 999);
        assert_eq!(clamp_part_size(Some(10), 1_000), 10);
    }

    #[test]
    fn csv_parsing_skips_garbage() {
        assert_eq!(
            parse_csv_i64(Some(" 1, x ,-5,,".to_string())),
            vec![1, -5]
        );
        assert!(parse_csv_i64(None).is_empty());
    }
}
