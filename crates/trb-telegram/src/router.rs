use std::sync::Arc;

use teloxide::{dispatching::Dispatcher, dptree, prelude::*};

use trb_core::{
    backends::{
        AlternateBackend, BackendContext, ElevatedBackend, PrimaryBackend, UploadBackend,
    },
    config::{Config, SessionConfig},
    messaging::{
        port::MessagingClient,
        throttled::{ThrottleConfig, ThrottledClient},
        types::UrlButton,
    },
    ops::{AuditLogger, ChatOpsLog, FanoutOpsLog},
    orchestrator::{Backends, Orchestrator, TransferSettings},
    ports::{EntitlementCheck, MediaProber, OpsLog, StaticEntitlement, Thumbnailer},
    prefs::{CacheSettings, JsonFileStore, PreferenceCache, ProtectedChannels},
    probe::{FfmpegThumbnailer, FfprobeProber},
    resolver::Resolver,
    user_state::UserStateStore,
};

use crate::handlers;
use crate::{make_bot, TelegramClient, CLOUD_UPLOAD_LIMIT, LOCAL_UPLOAD_LIMIT};

/// Extra attempts after a rate-limit response during uploads.
const RATE_LIMIT_RETRIES: u32 = 2;

#[derive(Clone)]
pub struct AppState {
    pub cfg: Arc<Config>,
    pub orchestrator: Arc<Orchestrator>,
    pub protected: Arc<ProtectedChannels>,
    /// Primary client, throttled. Used for command replies.
    pub client: Arc<dyn MessagingClient>,
}

/// A client for an optional extra session. Sessions behind a self-hosted Bot
/// API server get the larger upload ceiling.
fn session_client(
    cfg: &Config,
    session: &SessionConfig,
) -> anyhow::Result<Arc<dyn MessagingClient>> {
    let bot = make_bot(&session.token, session.api_url.as_deref())?;
    let limit = if session.api_url.is_some() {
        LOCAL_UPLOAD_LIMIT
    } else {
        CLOUD_UPLOAD_LIMIT
    };
    Ok(Arc::new(TelegramClient::new(bot, cfg.log_group, limit)))
}

pub async fn run_polling(cfg: Arc<Config>) -> anyhow::Result<()> {
    let bot = Bot::new(cfg.bot_token.clone());

    match bot.get_me().await {
        Ok(me) => tracing::info!(username = %me.username(), "trb started"),
        Err(e) => tracing::warn!(error = %e, "getMe failed; continuing"),
    }

    // Throttle the primary to stay under Bot API flood limits. The adapter
    // itself still retries once on RetryAfter.
    let raw_primary: Arc<dyn MessagingClient> = Arc::new(TelegramClient::new(
        bot.clone(),
        cfg.log_group,
        CLOUD_UPLOAD_LIMIT,
    ));
    let primary: Arc<dyn MessagingClient> = Arc::new(ThrottledClient::new(
        raw_primary,
        ThrottleConfig::default(),
    ));

    let secondary: Option<Arc<dyn MessagingClient>> = match &cfg.secondary {
        Some(s) => Some(session_client(&cfg, s)?),
        None => None,
    };
    let elevated_client: Option<Arc<dyn MessagingClient>> = match &cfg.elevated {
        Some(s) => Some(session_client(&cfg, s)?),
        None => None,
    };
    tracing::info!(
        secondary = secondary.is_some(),
        elevated = elevated_client.is_some(),
        "sessions configured"
    );

    let store = Arc::new(JsonFileStore::open(cfg.prefs_file.clone()).await?);
    let protected = Arc::new(ProtectedChannels::load(store.clone()).await);
    let prefs = Arc::new(PreferenceCache::new(
        store,
        CacheSettings {
            attempts: cfg.pref_retry_attempts,
            retry_delay: std::time::Duration::from_millis(200),
            default_rename_tag: cfg.default_rename_tag.clone(),
            thumb_dir: cfg.thumb_dir.clone(),
        },
    ));

    let ops: Arc<dyn OpsLog> = Arc::new(FanoutOpsLog::new(vec![
        Arc::new(AuditLogger::new(
            cfg.audit_log_path.clone(),
            cfg.audit_log_json,
        )),
        Arc::new(ChatOpsLog::new(primary.clone(), cfg.ops_log_chat)),
    ]));

    let prober: Arc<dyn MediaProber> = Arc::new(FfprobeProber::new(cfg.ffprobe_path.clone()));
    let thumbnailer: Arc<dyn Thumbnailer> =
        Arc::new(FfmpegThumbnailer::new(cfg.ffmpeg_path.clone()));
    let context = Arc::new(BackendContext {
        archive: cfg.log_group,
        ops: ops.clone(),
        prober: Some(prober),
        thumbnailer: Some(thumbnailer),
        rate_limit_retries: RATE_LIMIT_RETRIES,
    });

    let entitlement: Arc<dyn EntitlementCheck> = Arc::new(StaticEntitlement::new(
        cfg.premium_users
            .iter()
            .chain(cfg.owner_ids.iter())
            .copied(),
    ));

    let backends = Backends {
        primary: Arc::new(PrimaryBackend::new(primary.clone(), context.clone())),
        alternate: Arc::new(AlternateBackend::new(primary.clone(), context.clone())),
        elevated: elevated_client.map(|client| {
            Arc::new(ElevatedBackend::new(
                client,
                primary.clone(),
                entitlement.clone(),
                UrlButton {
                    label: "Unlock large files".to_string(),
                    url: cfg.upsell_url.clone(),
                },
                context.clone(),
            )) as Arc<dyn UploadBackend>
        }),
        context,
    };

    let resolver = Arc::new(Resolver::new(primary.clone(), secondary, protected.clone()));
    let orchestrator = Arc::new(Orchestrator::new(
        resolver,
        prefs,
        Arc::new(UserStateStore::new()),
        backends,
        entitlement,
        ops,
        TransferSettings::from_config(&cfg),
    ));

    let state = Arc::new(AppState {
        cfg,
        orchestrator,
        protected,
        client: primary,
    });

    let handler =
        dptree::entry().branch(Update::filter_message().endpoint(handlers::handle_message));

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![state])
        .build()
        .dispatch()
        .await;

    Ok(())
}
