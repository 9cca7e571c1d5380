//! Upload backends behind one contract.
//!
//! Every successful upload also lands in the archive chat; failures are
//! reported to the ops log before they propagate.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use async_trait::async_trait;

use crate::{
    domain::{ChatId, TransferTarget, UserId},
    errors::{ClientError, Error, TransferError},
    formatting::markdown_to_rich_text,
    messaging::{
        port::{no_progress, ClientResult, MessagingClient, ProgressFn},
        types::{
            CopyOptions, DeliveryReceipt, MediaKind, MediaSource, SendRequest, TextFormat,
            UrlButton, VideoMeta,
        },
    },
    ops::OpsEvent,
    ports::{EntitlementCheck, MediaProber, OpsLog, Thumbnailer},
    scratch::ScratchFile,
    splitter::PartUploader,
    Result,
};

const MIN_RETRY_WAIT: Duration = Duration::from_secs(1);

pub struct UploadRequest<'a> {
    pub path: &'a Path,
    pub target: TransferTarget,
    pub caption: Option<String>,
    pub caption_format: TextFormat,
    pub kind: MediaKind,
    /// User thumbnail, if any.
    pub thumbnail: Option<PathBuf>,
    pub requester: UserId,
    pub origin_chat: ChatId,
    pub progress: ProgressFn<'a>,
}

#[async_trait]
pub trait UploadBackend: Send + Sync {
    fn name(&self) -> &'static str;

    async fn upload(&self, req: UploadRequest<'_>) -> Result<DeliveryReceipt>;
}

/// Collaborators shared by all backends.
pub struct BackendContext {
    pub archive: ChatId,
    pub ops: Arc<dyn OpsLog>,
    pub prober: Option<Arc<dyn MediaProber>>,
    pub thumbnailer: Option<Arc<dyn Thumbnailer>>,
    /// Extra attempts after a rate-limit response.
    pub rate_limit_retries: u32,
}

impl BackendContext {
    fn report<T>(&self, backend: &str, requester: UserId, res: Result<T>) -> Result<T> {
        if let Err(e) = &res {
            self.ops.record(OpsEvent::upload_failed(
                requester,
                backend,
                &format!("{backend} upload failed: {e}"),
            ));
        }
        res
    }

    /// Probe the video and generate a thumbnail when the user has none.
    /// A generated thumbnail is returned as a scratch file owned by the caller.
    async fn enrich_video(
        &self,
        path: &Path,
        thumbnail: Option<PathBuf>,
    ) -> (Option<VideoMeta>, Option<PathBuf>, Option<ScratchFile>) {
        let meta = match &self.prober {
            Some(p) => p.probe(path).await,
            None => None,
        };
        if thumbnail.is_some() {
            return (meta, thumbnail, None);
        }
        let Some(generator) = &self.thumbnailer else {
            return (meta, None, None);
        };
        let out = thumbnail_path_for(path);
        let duration = meta.map(|m| m.duration).unwrap_or(0);
        match generator.thumbnail(path, duration, &out).await {
            Some(p) => (meta, Some(p.clone()), Some(ScratchFile::new(p))),
            None => (meta, None, None),
        }
    }

    async fn send(
        &self,
        client: &dyn MessagingClient,
        target: TransferTarget,
        req: SendRequest,
        progress: ProgressFn<'_>,
    ) -> ClientResult<DeliveryReceipt> {
        let mut attempt = 0;
        loop {
            match client.send(target, req.clone(), progress).await {
                Err(ClientError::RateLimited { retry_after }) if attempt < self.rate_limit_retries => {
                    attempt += 1;
                    let wait = retry_after.max(MIN_RETRY_WAIT);
                    tracing::warn!(attempt, ?wait, "rate limited on send; backing off");
                    tokio::time::sleep(wait).await;
                }
                res => return res,
            }
        }
    }

    async fn copy(
        &self,
        client: &dyn MessagingClient,
        receipt: &DeliveryReceipt,
        to: TransferTarget,
        opts: CopyOptions,
    ) -> ClientResult<DeliveryReceipt> {
        let mut attempt = 0;
        loop {
            match client.copy(receipt, to, opts.clone()).await {
                Err(ClientError::RateLimited { retry_after }) if attempt < self.rate_limit_retries => {
                    attempt += 1;
                    let wait = retry_after.max(MIN_RETRY_WAIT);
                    tracing::warn!(attempt, ?wait, "rate limited on copy; backing off");
                    tokio::time::sleep(wait).await;
                }
                res => return res,
            }
        }
    }

    async fn mirror(&self, client: &dyn MessagingClient, receipt: &DeliveryReceipt) -> Result<()> {
        self.copy(
            client,
            receipt,
            TransferTarget::chat(self.archive),
            CopyOptions::default(),
        )
        .await
        .map_err(transfer)?;
        Ok(())
    }

    /// Send something that needs no local bytes, then mirror it.
    pub(crate) async fn relay(
        &self,
        client: &dyn MessagingClient,
        target: TransferTarget,
        req: SendRequest,
    ) -> Result<DeliveryReceipt> {
        let receipt = self
            .send(client, target, req, &no_progress)
            .await
            .map_err(transfer)?;
        self.mirror(client, &receipt).await?;
        Ok(receipt)
    }
}

fn transfer(e: ClientError) -> Error {
    TransferError::from(e).into()
}

fn thumbnail_path_for(video: &Path) -> PathBuf {
    let stem = video
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    video.with_file_name(format!("{stem}.thumb.jpg"))
}

/// Only these kinds are uploaded as-is; everything else goes as a document.
fn upload_kind(kind: MediaKind) -> MediaKind {
    match kind {
        MediaKind::Video | MediaKind::Photo | MediaKind::Audio => kind,
        _ => MediaKind::Document,
    }
}

/// Standard upload through the bot: markdown caption, measured video metadata,
/// user or generated thumbnail, archive copy.
pub struct PrimaryBackend {
    client: Arc<dyn MessagingClient>,
    ctx: Arc<BackendContext>,
}

impl PrimaryBackend {
    pub fn new(client: Arc<dyn MessagingClient>, ctx: Arc<BackendContext>) -> Self {
        Self { client, ctx }
    }

    async fn deliver(&self, req: UploadRequest<'_>) -> Result<DeliveryReceipt> {
        let kind = upload_kind(req.kind);
        let mut send = SendRequest::media(kind, MediaSource::Local(req.path.to_path_buf()))
            .with_caption(req.caption)
            .with_format(req.caption_format);

        let mut generated = None;
        match kind {
            MediaKind::Video => {
                let (meta, thumb, scratch) = self.ctx.enrich_video(req.path, req.thumbnail).await;
                generated = scratch;
                send = send.with_video(meta).with_thumbnail(thumb);
            }
            MediaKind::Document => send = send.with_thumbnail(req.thumbnail),
            _ => {}
        }

        let receipt = self
            .ctx
            .send(self.client.as_ref(), req.target, send, req.progress)
            .await
            .map_err(transfer)?;
        drop(generated);

        self.ctx.mirror(self.client.as_ref(), &receipt).await?;
        Ok(receipt)
    }
}

#[async_trait]
impl UploadBackend for PrimaryBackend {
    fn name(&self) -> &'static str {
        "primary"
    }

    async fn upload(&self, req: UploadRequest<'_>) -> Result<DeliveryReceipt> {
        let requester = req.requester;
        let res = self.deliver(req).await;
        self.ctx.report(self.name(), requester, res)
    }
}

/// Alternate upload path: HTML captions, user thumbnail only, no probing.
pub struct AlternateBackend {
    client: Arc<dyn MessagingClient>,
    ctx: Arc<BackendContext>,
}

impl AlternateBackend {
    pub fn new(client: Arc<dyn MessagingClient>, ctx: Arc<BackendContext>) -> Self {
        Self { client, ctx }
    }

    async fn deliver(&self, req: UploadRequest<'_>) -> Result<DeliveryReceipt> {
        let kind = upload_kind(req.kind);
        let caption = match req.caption_format {
            TextFormat::Markdown => req.caption.as_deref().map(markdown_to_rich_text),
            TextFormat::Html => req.caption,
        }
        .filter(|c| !c.is_empty());
        let thumb = match kind {
            MediaKind::Video | MediaKind::Document => req.thumbnail,
            _ => None,
        };
        let send = SendRequest::media(kind, MediaSource::Local(req.path.to_path_buf()))
            .with_caption(caption)
            .with_format(TextFormat::Html)
            .with_thumbnail(thumb);

        let receipt = self
            .ctx
            .send(self.client.as_ref(), req.target, send, req.progress)
            .await
            .map_err(transfer)?;
        self.ctx.mirror(self.client.as_ref(), &receipt).await?;
        Ok(receipt)
    }
}

#[async_trait]
impl UploadBackend for AlternateBackend {
    fn name(&self) -> &'static str {
        "alternate"
    }

    async fn upload(&self, req: UploadRequest<'_>) -> Result<DeliveryReceipt> {
        let requester = req.requester;
        let res = self.deliver(req).await;
        self.ctx.report(self.name(), requester, res)
    }
}

/// Large-capacity upload: the file goes to the archive chat first, then the
/// primary copies it to the target. Non-entitled requesters get a protected
/// copy with an upsell button.
pub struct ElevatedBackend {
    client: Arc<dyn MessagingClient>,
    primary: Arc<dyn MessagingClient>,
    entitlement: Arc<dyn EntitlementCheck>,
    upsell: UrlButton,
    ctx: Arc<BackendContext>,
}

impl ElevatedBackend {
    pub fn new(
        client: Arc<dyn MessagingClient>,
        primary: Arc<dyn MessagingClient>,
        entitlement: Arc<dyn EntitlementCheck>,
        upsell: UrlButton,
        ctx: Arc<BackendContext>,
    ) -> Self {
        Self {
            client,
            primary,
            entitlement,
            upsell,
            ctx,
        }
    }

    async fn deliver(&self, req: UploadRequest<'_>) -> Result<DeliveryReceipt> {
        let kind = match req.kind {
            MediaKind::Video => MediaKind::Video,
            _ => MediaKind::Document,
        };
        let mut send = SendRequest::media(kind, MediaSource::Local(req.path.to_path_buf()))
            .with_caption(req.caption)
            .with_format(req.caption_format);

        let mut generated = None;
        if kind == MediaKind::Video {
            let (meta, thumb, scratch) = self.ctx.enrich_video(req.path, req.thumbnail).await;
            generated = scratch;
            send = send.with_video(meta).with_thumbnail(thumb);
        } else {
            send = send.with_thumbnail(req.thumbnail);
        }

        let archived = self
            .ctx
            .send(
                self.client.as_ref(),
                TransferTarget::chat(self.ctx.archive),
                send,
                req.progress,
            )
            .await
            .map_err(transfer)?;
        drop(generated);

        let opts = if self
            .entitlement
            .is_privileged(req.origin_chat, req.requester)
            .await
        {
            CopyOptions::default()
        } else {
            CopyOptions::restricted(self.upsell.clone())
        };
        self.ctx
            .copy(self.primary.as_ref(), &archived, req.target, opts)
            .await
            .map_err(transfer)
    }
}

#[async_trait]
impl UploadBackend for ElevatedBackend {
    fn name(&self) -> &'static str {
        "elevated"
    }

    async fn upload(&self, req: UploadRequest<'_>) -> Result<DeliveryReceipt> {
        let requester = req.requester;
        let res = self.deliver(req).await;
        self.ctx.report(self.name(), requester, res)
    }
}

/// Feeds split parts to a backend as documents.
pub struct PartDelivery<'a> {
    pub backend: &'a dyn UploadBackend,
    pub target: TransferTarget,
    pub caption_format: TextFormat,
    pub thumbnail: Option<PathBuf>,
    pub requester: UserId,
    pub origin_chat: ChatId,
}

#[async_trait]
impl PartUploader for PartDelivery<'_> {
    async fn upload_part(&self, path: &Path, caption: &str, index: usize) -> Result<()> {
        tracing::info!(index, path = %path.display(), "uploading part");
        self.backend
            .upload(UploadRequest {
                path,
                target: self.target,
                caption: Some(caption.to_string()),
                caption_format: self.caption_format,
                kind: MediaKind::Document,
                thumbnail: self.thumbnail.clone(),
                requester: self.requester,
                origin_chat: self.origin_chat,
                progress: &no_progress,
            })
            .await
            .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        domain::MessageId,
        messaging::types::Payload,
        ports::StaticEntitlement,
    };
    use crate::test_support::{self as fakes, FakeClient, RecordingOps};

    fn ctx(ops: Arc<RecordingOps>) -> Arc<BackendContext> {
        Arc::new(BackendContext {
            archive: ChatId(-999),
            ops,
            prober: Some(Arc::new(fakes::FixedProber)),
            thumbnailer: None,
            rate_limit_retries: 2,
        })
    }

    fn req<'a>(path: &'a Path, kind: MediaKind) -> UploadRequest<'a> {
        UploadRequest {
            path,
            target: TransferTarget {
                chat_id: ChatId(10),
                topic_id: Some(3),
            },
            caption: Some("**hi**".into()),
            caption_format: TextFormat::Markdown,
            kind,
            thumbnail: None,
            requester: UserId(1),
            origin_chat: ChatId(1),
            progress: &no_progress,
        }
    }

    #[tokio::test]
    async fn primary_sends_enriched_video_and_mirrors() {
        let client = Arc::new(FakeClient::default());
        let ops = Arc::new(RecordingOps::default());
        let b = PrimaryBackend::new(client.clone(), ctx(ops.clone()));

        let receipt = b.upload(req(Path::new("/t/v.mp4"), MediaKind::Video)).await.unwrap();
        assert_eq!(receipt.chat_id, ChatId(10));

        let sends = client.sends();
        assert_eq!(sends.len(), 1);
        assert_eq!(sends[0].1.video, Some(fakes::FIXED_META));
        assert_eq!(sends[0].1.format, TextFormat::Markdown);
        assert_eq!(client.copies(), vec![(receipt.message_id, ChatId(-999), CopyOptions::default())]);
        assert!(ops.events().is_empty());
    }

    #[tokio::test]
    async fn alternate_converts_caption_without_video_metadata() {
        let client = Arc::new(FakeClient::default());
        let b = AlternateBackend::new(client.clone(), ctx(Arc::new(RecordingOps::default())));
        b.upload(req(Path::new("/t/v.mp4"), MediaKind::Video)).await.unwrap();

        let sends = client.sends();
        assert_eq!(sends[0].1.caption.as_deref(), Some("<b>hi</b>"));
        assert_eq!(sends[0].1.format, TextFormat::Html);
        assert_eq!(sends[0].1.video, None);
        assert_eq!(client.copies().len(), 1, "archive mirror");
    }

    #[tokio::test]
    async fn html_captions_pass_through_untouched() {
        let client = Arc::new(FakeClient::default());
        let ctx = ctx(Arc::new(RecordingOps::default()));
        let primary = PrimaryBackend::new(client.clone(), ctx.clone());
        let alternate = AlternateBackend::new(client.clone(), ctx);

        for backend in [&primary as &dyn UploadBackend, &alternate] {
            let mut r = req(Path::new("/t/a.pdf"), MediaKind::Document);
            r.caption = Some("<i>*kept*</i> &amp;".into());
            r.caption_format = TextFormat::Html;
            backend.upload(r).await.unwrap();
        }

        for fakes::SentItem(_, send, _) in client.sends() {
            assert_eq!(send.caption.as_deref(), Some("<i>*kept*</i> &amp;"));
            assert_eq!(send.format, TextFormat::Html);
        }
    }

    #[tokio::test]
    async fn failure_is_reported_then_propagated() {
        let client = Arc::new(FakeClient::default());
        client.fail_sends(ClientError::Transient("socket closed".into()));
        let ops = Arc::new(RecordingOps::default());
        let b = PrimaryBackend::new(client.clone(), ctx(ops.clone()));

        let err = b
            .upload(req(Path::new("/t/d.pdf"), MediaKind::Document))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Transfer(TransferError::BackendFailure(_))));
        let events = ops.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].backend.as_deref(), Some("primary"));
        assert!(events[0].error.starts_with("primary upload failed"));
        assert!(client.copies().is_empty());
    }

    #[tokio::test]
    async fn rate_limit_is_retried_with_backoff() {
        let client = Arc::new(FakeClient::default());
        client.rate_limit_once(Duration::from_millis(1));
        let b = PrimaryBackend::new(client.clone(), ctx(Arc::new(RecordingOps::default())));
        b.upload(req(Path::new("/t/a.mp3"), MediaKind::Audio)).await.unwrap();
        assert_eq!(client.sends().len(), 2);
    }

    #[tokio::test]
    async fn elevated_copy_depends_on_entitlement() {
        let upsell = UrlButton {
            label: "Get premium".into(),
            url: "https://t.me/x".into(),
        };
        for (entitled, expected) in [
            (true, CopyOptions::default()),
            (false, CopyOptions::restricted(upsell.clone())),
        ] {
            let elevated = Arc::new(FakeClient::default());
            let primary = Arc::new(FakeClient::default());
            let users = if entitled { vec![1] } else { vec![] };
            let b = ElevatedBackend::new(
                elevated.clone(),
                primary.clone(),
                Arc::new(StaticEntitlement::new(users)),
                upsell.clone(),
                ctx(Arc::new(RecordingOps::default())),
            );
            b.upload(req(Path::new("/t/big.mkv"), MediaKind::Video)).await.unwrap();

            let sends = elevated.sends();
            assert_eq!(sends.len(), 1);
            assert_eq!(sends[0].0, TransferTarget::chat(ChatId(-999)), "uploads to archive");
            assert!(matches!(sends[0].1.payload, Payload::Media { kind: MediaKind::Video, .. }));
            let copies = primary.copies();
            assert_eq!(copies, vec![(MessageId(1), ChatId(10), expected)]);
        }
    }

    #[tokio::test]
    async fn parts_go_as_documents() {
        let client = Arc::new(FakeClient::default());
        let b = PrimaryBackend::new(client.clone(), ctx(Arc::new(RecordingOps::default())));
        let parts = PartDelivery {
            backend: &b,
            target: TransferTarget::chat(ChatId(10)),
            caption_format: TextFormat::Markdown,
            thumbnail: None,
            requester: UserId(1),
            origin_chat: ChatId(1),
        };
        parts
            .upload_part(Path::new("/t/x.part000.mkv"), "Part: 1", 0)
            .await
            .unwrap();
        let sends = client.sends();
        assert!(matches!(sends[0].1.payload, Payload::Media { kind: MediaKind::Document, .. }));
        assert_eq!(sends[0].1.caption.as_deref(), Some("Part: 1"));
    }
}
