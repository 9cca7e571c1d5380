//! Mapping between teloxide types and the core messaging model.

use std::{
    pin::Pin,
    task::{Context, Poll},
};

use teloxide::{types::Message, ApiError, DownloadError, RequestError};
use tokio::io::AsyncWrite;

use trb_core::{
    domain::{ChatId, MessageId},
    errors::ClientError,
    messaging::{
        port::ProgressFn,
        types::{MediaKind, RemoteMedia, RemoteMessage, TextFormat},
    },
};

/// Fold a Bot API failure into the closed client error set.
pub fn client_error(e: RequestError) -> ClientError {
    match e {
        RequestError::RetryAfter(retry_after) => ClientError::RateLimited { retry_after },
        RequestError::Api(api) => api_error(api),
        migrated @ RequestError::MigrateToChatId(_) => ClientError::NotFound(migrated.to_string()),
        other => ClientError::Transient(other.to_string()),
    }
}

fn api_error(e: ApiError) -> ClientError {
    let text = e.to_string();
    match e {
        ApiError::ChatNotFound
        | ApiError::MessageIdInvalid
        | ApiError::MessageToForwardNotFound
        | ApiError::MessageToDeleteNotFound
        | ApiError::MessageToEditNotFound => ClientError::NotFound(text),
        ApiError::BotBlocked
        | ApiError::BotKicked
        | ApiError::BotKickedFromSupergroup
        | ApiError::CantInitiateConversation
        | ApiError::CantTalkWithBots
        | ApiError::UserDeactivated => ClientError::AccessDenied(text),
        _ => classify_description(&text),
    }
}

/// Errors the Bot API only reports as free text.
fn classify_description(text: &str) -> ClientError {
    let lower = text.to_ascii_lowercase();
    let denied = [
        "forbidden",
        "not enough rights",
        "chat_admin_required",
        "protected content",
        "can't be forwarded",
        "have no rights",
        "not a member",
    ];
    if denied.iter().any(|d| lower.contains(d)) {
        return ClientError::AccessDenied(text.to_string());
    }
    if lower.contains("not found") || (lower.contains("invalid") && lower.contains("id")) {
        return ClientError::NotFound(text.to_string());
    }
    ClientError::Transient(text.to_string())
}

pub fn download_error(e: DownloadError) -> ClientError {
    ClientError::Transient(e.to_string())
}

pub fn io_error(e: std::io::Error) -> ClientError {
    ClientError::Transient(format!("local file: {e}"))
}

/// Describe a message the bot can see. `origin` is where it originally lives
/// (the message itself may be a forwarded copy). Text keeps its formatting
/// entities, rendered as HTML.
pub fn remote_message(msg: &Message, origin_chat: ChatId, origin_id: MessageId) -> RemoteMessage {
    RemoteMessage {
        chat_id: origin_chat,
        id: origin_id,
        is_service: false,
        text: msg.html_text(),
        caption: msg.html_caption(),
        format: TextFormat::Html,
        media: remote_media(msg),
        has_link_preview: false,
    }
}

fn remote_media(msg: &Message) -> Option<RemoteMedia> {
    let media = |kind, meta: &teloxide::types::FileMeta, name: Option<&String>| RemoteMedia {
        kind,
        file_id: meta.id.clone(),
        file_name: name.cloned(),
        file_size: Some(u64::from(meta.size)),
    };

    if let Some(v) = msg.video() {
        return Some(media(MediaKind::Video, &v.file, v.file_name.as_ref()));
    }
    if let Some(a) = msg.animation() {
        return Some(media(MediaKind::Video, &a.file, a.file_name.as_ref()));
    }
    if let Some(sizes) = msg.photo() {
        return sizes
            .last()
            .map(|p| media(MediaKind::Photo, &p.file, None));
    }
    if let Some(a) = msg.audio() {
        return Some(media(MediaKind::Audio, &a.file, a.file_name.as_ref()));
    }
    if let Some(v) = msg.voice() {
        return Some(media(MediaKind::Voice, &v.file, None));
    }
    if let Some(v) = msg.video_note() {
        return Some(media(MediaKind::VideoNote, &v.file, None));
    }
    if let Some(s) = msg.sticker() {
        return Some(media(MediaKind::Sticker, &s.file, None));
    }
    if let Some(d) = msg.document() {
        return Some(media(MediaKind::Document, &d.file, d.file_name.as_ref()));
    }
    None
}

/// Async writer that reports bytes written so far.
pub struct CountingWriter<'a, W> {
    inner: W,
    written: u64,
    total: u64,
    progress: ProgressFn<'a>,
}

impl<'a, W> CountingWriter<'a, W> {
    pub fn new(inner: W, total: u64, progress: ProgressFn<'a>) -> Self {
        Self {
            inner,
            written: 0,
            total,
            progress,
        }
    }

    pub fn written(&self) -> u64 {
        self.written
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: AsyncWrite + Unpin> AsyncWrite for CountingWriter<'_, W> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        let this = &mut *self;
        let res = Pin::new(&mut this.inner).poll_write(cx, buf);
        if let Poll::Ready(Ok(n)) = &res {
            this.written += *n as u64;
            (this.progress)(this.written, this.total.max(this.written));
        }
        res
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{sync::Mutex, time::Duration};
    use tokio::io::AsyncWriteExt;

    #[test]
    fn maps_request_errors() {
        assert_eq!(
            client_error(RequestError::RetryAfter(Duration::from_secs(3))),
            ClientError::RateLimited {
                retry_after: Duration::from_secs(3)
            }
        );
        assert!(matches!(
            client_error(RequestError::Api(ApiError::ChatNotFound)),
            ClientError::NotFound(_)
        ));
        assert!(matches!(
            client_error(RequestError::Api(ApiError::BotKicked)),
            ClientError::AccessDenied(_)
        ));
    }

    #[test]
    fn classifies_free_text_descriptions() {
        assert!(matches!(
            classify_description("Bad Request: message has protected content and can't be forwarded"),
            ClientError::AccessDenied(_)
        ));
        assert!(matches!(
            classify_description("Bad Request: message to copy not found"),
            ClientError::NotFound(_)
        ));
        assert!(matches!(
            classify_description("Internal Server Error"),
            ClientError::Transient(_)
        ));
    }

    #[test]
    fn message_text_keeps_entities_as_html() {
        let msg: Message = serde_json::from_value(serde_json::json!({
            "message_id": 5,
            "date": 1_700_000_000,
            "chat": { "id": -100123, "type": "channel", "title": "News" },
            "text": "bold <x> & y",
            "entities": [{ "type": "bold", "offset": 0, "length": 4 }]
        }))
        .unwrap();

        let remote = remote_message(&msg, ChatId(-100123), MessageId(5));
        assert_eq!(remote.format, TextFormat::Html);
        assert_eq!(remote.text.as_deref(), Some("<b>bold</b> &lt;x&gt; &amp; y"));
        assert_eq!(remote.caption, None);
        assert!(remote.media.is_none());
    }

    #[tokio::test]
    async fn counting_writer_reports_progress() {
        let seen = Mutex::new(Vec::new());
        let progress = |done: u64, total: u64| seen.lock().unwrap().push((done, total));

        let mut w = CountingWriter::new(Vec::new(), 10, &progress);
        w.write_all(b"hello").await.unwrap();
        w.write_all(b"world!").await.unwrap();
        assert_eq!(w.written(), 11);
        assert_eq!(w.into_inner(), b"helloworld!".to_vec());

        let seen = seen.into_inner().unwrap();
        assert_eq!(seen.first(), Some(&(5, 10)));
        // Sources that under-report their size never go past 100%.
        assert_eq!(seen.last(), Some(&(11, 11)));
    }
}
