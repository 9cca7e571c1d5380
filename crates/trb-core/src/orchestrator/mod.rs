//! One end-to-end transfer: resolve, download, transform, deliver, clean up.
//!
//! Each call to [`Orchestrator::transfer`] owns a [`TransferSession`]: the
//! status message, a private working directory and the downloaded file. The
//! session is torn down on every exit path. Local files live in scratch
//! guards, so even a cancelled transfer leaves nothing on disk.

use std::{
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use crate::{
    backends::{BackendContext, PartDelivery, UploadBackend, UploadRequest},
    config::Config,
    domain::{ChatId, MessageRef, TransferTarget, UserId},
    errors::{ClientError, Error, ResolutionError, TransferError},
    formatting::{escape_html, markdown_to_rich_text},
    messaging::{
        port::{no_progress, MessagingClient, ProgressFn},
        types::{MediaKind, MediaSource, RemoteMessage, SendRequest, TextFormat},
    },
    naming::{self, media_kind_for_path, rewrite_caption},
    ops::OpsEvent,
    ports::{EntitlementCheck, OpsLog},
    prefs::{BackendChoice, PreferenceCache, UserPreferences},
    progress::StatusReporter,
    resolver::{ClientTier, ResolvedMedia, Resolver},
    scratch::{ScratchDir, ScratchFile},
    splitter::split_and_upload,
    strategy::{self, DeliveryStrategy},
    user_state::UserStateStore,
    Result,
};


/// Distinguishes working directories of concurrent transfers of the same message.
static NEXT_SESSION: AtomicU64 = AtomicU64::new(1);

/// Where a transfer is in its lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransferState {
    Received,
    Resolving,
    ShortCircuitSent,
    Downloading,
    Transforming,
    StrategySelected,
    Delivering,
    Completed,
    Failed,
}

impl TransferState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Received => "received",
            Self::Resolving => "resolving",
            Self::ShortCircuitSent => "short_circuit_sent",
            Self::Downloading => "downloading",
            Self::Transforming => "transforming",
            Self::StrategySelected => "strategy_selected",
            Self::Delivering => "delivering",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// One inbound request: a raw link typed by `requester` in `origin_chat`.
#[derive(Clone, Debug)]
pub struct TransferRequest {
    pub requester: UserId,
    pub origin_chat: ChatId,
    /// Editable status message in the origin chat, if one was posted.
    pub status: Option<MessageRef>,
    pub raw_link: String,
    /// Added to the linked message id (batch ranges).
    pub offset: i32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransferOutcome {
    /// Sent by reference; nothing was downloaded.
    Relayed,
    Delivered {
        strategy: DeliveryStrategy,
        parts: usize,
    },
}

/// The upload paths available to the orchestrator.
pub struct Backends {
    pub primary: Arc<dyn UploadBackend>,
    pub alternate: Arc<dyn UploadBackend>,
    pub elevated: Option<Arc<dyn UploadBackend>>,
    /// Send and mirror plumbing shared with the backends, used for by-reference relays.
    pub context: Arc<BackendContext>,
}

impl Backends {
    fn standard(&self, choice: BackendChoice) -> &dyn UploadBackend {
        match choice {
            BackendChoice::Primary => self.primary.as_ref(),
            BackendChoice::Alternate => self.alternate.as_ref(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct TransferSettings {
    pub temp_dir: PathBuf,
    pub size_limit: u64,
    pub part_size: u64,
    pub progress_interval: Duration,
}

impl TransferSettings {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            temp_dir: cfg.temp_dir.clone(),
            size_limit: cfg.size_limit,
            part_size: cfg.part_size,
            progress_interval: cfg.progress_edit_interval,
        }
    }
}

/// Ephemeral state of one transfer. Never shared between transfers.
struct TransferSession {
    state: TransferState,
    status: Option<MessageRef>,
    workdir: Option<ScratchDir>,
    file: Option<ScratchFile>,
    started: Instant,
}

impl TransferSession {
    fn new(status: Option<MessageRef>) -> Self {
        Self {
            state: TransferState::Received,
            status,
            workdir: None,
            file: None,
            started: Instant::now(),
        }
    }

    fn enter(&mut self, next: TransferState) {
        tracing::debug!(from = self.state.as_str(), to = next.as_str(), "transfer state");
        self.state = next;
    }

    fn track_move(&mut self, path: &Path) {
        if let Some(f) = self.file.as_mut() {
            f.moved_to(path.to_path_buf());
        }
    }

    /// Remove every local file this session created.
    async fn discard_files(&mut self) {
        if let Some(f) = self.file.take() {
            f.remove().await;
        }
        if let Some(d) = self.workdir.take() {
            d.remove().await;
        }
    }
}

pub struct Orchestrator {
    resolver: Arc<Resolver>,
    prefs: Arc<PreferenceCache>,
    users: Arc<UserStateStore>,
    backends: Backends,
    entitlement: Arc<dyn EntitlementCheck>,
    ops: Arc<dyn OpsLog>,
    settings: TransferSettings,
}

impl Orchestrator {
    pub fn new(
        resolver: Arc<Resolver>,
        prefs: Arc<PreferenceCache>,
        users: Arc<UserStateStore>,
        backends: Backends,
        entitlement: Arc<dyn EntitlementCheck>,
        ops: Arc<dyn OpsLog>,
        settings: TransferSettings,
    ) -> Self {
        Self {
            resolver,
            prefs,
            users,
            backends,
            entitlement,
            ops,
            settings,
        }
    }

    pub fn prefs(&self) -> &Arc<PreferenceCache> {
        &self.prefs
    }

    pub fn users(&self) -> &Arc<UserStateStore> {
        &self.users
    }

    /// The primary client owns the invoking context's status messages.
    fn status_client(&self) -> &Arc<dyn MessagingClient> {
        self.resolver.client(ClientTier::Primary)
    }

    /// Run one transfer to a terminal state.
    ///
    /// Failures are already reported (user message, ops log) when this
    /// returns; the `Err` is for callers that want to count or stop.
    pub async fn transfer(&self, req: &TransferRequest) -> Result<TransferOutcome> {
        let mut session = TransferSession::new(req.status);
        let res = self.drive(req, &mut session).await;

        match &res {
            Ok(outcome) => {
                session.enter(TransferState::Completed);
                self.clear_status(&mut session).await;
                session.discard_files().await;
                tracing::info!(
                    user_id = req.requester.0,
                    link = %req.raw_link,
                    ?outcome,
                    elapsed_ms = session.started.elapsed().as_millis() as u64,
                    "transfer completed"
                );
            }
            Err(e) => self.fail(req, &mut session, e).await,
        }
        res
    }

    async fn drive(
        &self,
        req: &TransferRequest,
        session: &mut TransferSession,
    ) -> Result<TransferOutcome> {
        session.enter(TransferState::Resolving);
        let media = self
            .resolver
            .resolve(&req.raw_link, req.offset, session.status)
            .await?;
        let target = self.users.target_for(req.requester, req.origin_chat);

        if media.is_text() || media.relays_by_reference() {
            self.relay(req.requester, &media, target).await?;
            session.enter(TransferState::ShortCircuitSent);
            return Ok(TransferOutcome::Relayed);
        }

        session.enter(TransferState::Downloading);
        let downloaded = self.download(req, session, &media).await?;

        session.enter(TransferState::Transforming);
        let prefs = self.prefs.get(req.requester).await;
        let caption = delivery_caption(&media.message, &prefs);
        let path = naming::rename_downloaded(&downloaded, &prefs)
            .await
            .map_err(|e| disk("rename", &downloaded, e))?;
        session.track_move(&path);

        session.enter(TransferState::StrategySelected);
        let size = tokio::fs::metadata(&path)
            .await
            .map_err(|e| disk("stat", &path, Error::Io(e)))?
            .len();
        let is_photo = media.kind == MediaKind::Photo;
        let elevated_available = self.backends.elevated.is_some();
        // Entitlement is only worth asking about when it can change the outcome.
        let entitled = !is_photo
            && size > self.settings.size_limit
            && elevated_available
            && self
                .entitlement
                .is_privileged(req.origin_chat, req.requester)
                .await;
        let chosen = strategy::select(
            size,
            is_photo,
            entitled,
            elevated_available,
            self.settings.size_limit,
        );
        tracing::info!(
            user_id = req.requester.0,
            kind = media.kind.label(),
            size,
            strategy = chosen.as_str(),
            "delivery strategy selected"
        );

        session.enter(TransferState::Delivering);
        let delivery = Delivery {
            path: &path,
            target,
            caption,
            caption_format: media.message.format,
            kind: upload_kind(media.kind, &path),
            prefs: &prefs,
            requester: req.requester,
            origin_chat: req.origin_chat,
        };
        let parts = match chosen {
            DeliveryStrategy::Direct => {
                let backend = self.backends.standard(prefs.backend);
                self.upload_one(session, backend, "📤 Uploading...", delivery)
                    .await?;
                1
            }
            DeliveryStrategy::Split => self.split(session, size, delivery).await?,
            DeliveryStrategy::Elevated => {
                let Some(backend) = self.backends.elevated.clone() else {
                    return Err(TransferError::SizeExceeded {
                        size,
                        limit: self.settings.size_limit,
                    }
                    .into());
                };
                self.set_status(session, "✅ Large upload starting...").await;
                self.upload_one(session, backend.as_ref(), "📤 Uploading (large)...", delivery)
                    .await?;
                1
            }
        };

        Ok(TransferOutcome::Delivered {
            strategy: chosen,
            parts,
        })
    }

    /// Short-circuit: forward text or a file handle without local bytes.
    async fn relay(
        &self,
        requester: UserId,
        media: &ResolvedMedia,
        target: TransferTarget,
    ) -> Result<()> {
        let msg = &media.message;
        let (client, send) = if media.is_text() {
            let text = msg
                .text
                .clone()
                .or_else(|| msg.caption.clone())
                .filter(|t| !t.trim().is_empty())
                .ok_or(ResolutionError::NotFound)?;
            (
                self.status_client(),
                SendRequest::text(text).with_format(msg.format),
            )
        } else {
            let remote = msg.media.as_ref().ok_or(ResolutionError::NotFound)?;
            // Stickers, voice notes and video notes travel without captions.
            let caption = if remote.kind == MediaKind::Photo {
                let prefs = self.prefs.get(requester).await;
                delivery_caption(msg, &prefs)
            } else {
                None
            };
            let send = SendRequest::media(remote.kind, MediaSource::Remote(remote.file_id.clone()))
                .with_caption(caption)
                .with_format(msg.format);
            // A file handle is only valid for the client that fetched it.
            (self.resolver.client(media.tier), send)
        };

        tracing::info!(
            user_id = requester.0,
            kind = media.kind.label(),
            target = %target,
            "relaying without download"
        );
        self.backends
            .context
            .relay(client.as_ref(), target, send)
            .await?;
        Ok(())
    }

    async fn download(
        &self,
        req: &TransferRequest,
        session: &mut TransferSession,
        media: &ResolvedMedia,
    ) -> Result<PathBuf> {
        self.set_status(session, "📥 Downloading...").await;

        let workdir = self.settings.temp_dir.join(format!(
            "u{}_c{}_m{}_{}",
            req.requester.0,
            media.message.chat_id.0,
            media.message.id.0,
            NEXT_SESSION.fetch_add(1, Ordering::Relaxed)
        ));
        let workdir = ScratchDir::create(&workdir)
            .await
            .map_err(|e| disk("create", &workdir, Error::Io(e)))?;
        let dest = workdir.path().join(safe_file_name(&media.filename));
        session.workdir = Some(workdir);
        session.file = Some(ScratchFile::new(&dest));

        let reporter = self.reporter(session, "📥 Downloading...");
        let callback = reporter.as_ref().map(|r| r.callback());
        let progress: ProgressFn<'_> = match &callback {
            Some(f) => f,
            None => &no_progress,
        };

        let written = self
            .resolver
            .client(media.tier)
            .download(&media.message, &dest, progress)
            .await
            .map_err(download_error)?;
        drop(callback);
        drop(reporter);

        if written != dest {
            session.track_move(&written);
        }
        tracing::debug!(path = %written.display(), "download finished");
        Ok(written)
    }

    async fn upload_one(
        &self,
        session: &TransferSession,
        backend: &dyn UploadBackend,
        title: &str,
        d: Delivery<'_>,
    ) -> Result<()> {
        let reporter = self.reporter(session, title);
        let callback = reporter.as_ref().map(|r| r.callback());
        let progress: ProgressFn<'_> = match &callback {
            Some(f) => f,
            None => &no_progress,
        };

        let receipt = backend
            .upload(UploadRequest {
                path: d.path,
                target: d.target,
                caption: d.caption,
                caption_format: d.caption_format,
                kind: d.kind,
                thumbnail: d.prefs.thumbnail.clone(),
                requester: d.requester,
                origin_chat: d.origin_chat,
                progress,
            })
            .await?;
        tracing::info!(
            backend = backend.name(),
            chat_id = receipt.chat_id.0,
            message_id = receipt.message_id.0,
            "upload delivered"
        );
        Ok(())
    }

    async fn split(
        &self,
        session: &mut TransferSession,
        size: u64,
        d: Delivery<'_>,
    ) -> Result<usize> {
        let part_size = self.settings.part_size;
        if part_size == 0 || part_size >= self.settings.size_limit {
            return Err(TransferError::SizeExceeded {
                size,
                limit: self.settings.size_limit,
            }
            .into());
        }

        // Parts are posted one by one; the status message would only sit above them.
        self.clear_status(session).await;
        // The splitter removes the source itself, on every path.
        if let Some(f) = session.file.take() {
            f.release();
        }

        let uploader = PartDelivery {
            backend: self.backends.standard(d.prefs.backend),
            target: d.target,
            caption_format: d.caption_format,
            thumbnail: d.prefs.thumbnail.clone(),
            requester: d.requester,
            origin_chat: d.origin_chat,
        };
        split_and_upload(d.path, part_size, d.caption.as_deref(), &uploader).await
    }

    async fn fail(&self, req: &TransferRequest, session: &mut TransferSession, e: &Error) {
        let stage = session.state;
        session.enter(TransferState::Failed);
        self.clear_status(session).await;
        session.discard_files().await;

        if e.is_operational() {
            self.ops.record(OpsEvent::transfer_failed(
                req.requester,
                &req.raw_link,
                stage.as_str(),
                &e.to_string(),
            ));
        } else {
            tracing::info!(
                user_id = req.requester.0,
                link = %req.raw_link,
                error = %e,
                "transfer rejected"
            );
        }

        if let Err(send_err) = self
            .status_client()
            .send_html(req.origin_chat, &escape_html(e.user_message()))
            .await
        {
            tracing::warn!(error = %send_err, "failed to tell requester about failed transfer");
        }
    }

    fn reporter(&self, session: &TransferSession, title: &str) -> Option<StatusReporter> {
        session.status.map(|status| {
            StatusReporter::start(
                self.status_client().clone(),
                status,
                title,
                self.settings.progress_interval,
            )
        })
    }

    async fn set_status(&self, session: &TransferSession, text: &str) {
        let Some(status) = session.status else {
            return;
        };
        if let Err(e) = self.status_client().edit_html(status, text).await {
            tracing::debug!(error = %e, "status edit failed");
        }
    }

    async fn clear_status(&self, session: &mut TransferSession) {
        let Some(status) = session.status.take() else {
            return;
        };
        if let Err(e) = self.status_client().delete_message(status).await {
            tracing::debug!(error = %e, "status delete failed");
        }
    }
}

/// Everything one upload needs besides the backend.
struct Delivery<'a> {
    path: &'a Path,
    target: TransferTarget,
    caption: Option<String>,
    caption_format: TextFormat,
    kind: MediaKind,
    prefs: &'a UserPreferences,
    requester: UserId,
    origin_chat: ChatId,
}

/// Caption rewritten per user rules, in the markup of the source message.
/// Custom captions are written in markdown, so HTML sources get theirs rendered.
fn delivery_caption(msg: &RemoteMessage, prefs: &UserPreferences) -> Option<String> {
    match msg.format {
        TextFormat::Markdown => rewrite_caption(msg.caption.as_deref(), prefs),
        TextFormat::Html => {
            let mut prefs = prefs.clone();
            prefs.custom_caption = prefs.custom_caption.as_deref().map(markdown_to_rich_text);
            rewrite_caption(msg.caption.as_deref(), &prefs)
        }
    }
}

/// Upload as what the source was; generic files go by extension.
fn upload_kind(kind: MediaKind, path: &Path) -> MediaKind {
    match kind {
        MediaKind::Video | MediaKind::Photo | MediaKind::Audio => kind,
        _ => media_kind_for_path(path),
    }
}

fn safe_file_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | '\0' => '_',
            c => c,
        })
        .collect();
    let cleaned = cleaned.trim().trim_start_matches('.');
    if cleaned.is_empty() {
        MediaKind::Document.default_file_name().to_string()
    } else {
        cleaned.to_string()
    }
}

fn download_error(e: ClientError) -> Error {
    TransferError::from(e).into()
}

fn disk(context: &str, path: &Path, e: Error) -> Error {
    TransferError::DiskFailure(format!("{context} {}: {e}", path.display())).into()
}
