//! Telegram adapter (teloxide).
//!
//! This crate implements the `trb-core` MessagingClient port over the Telegram
//! Bot API, plus the thin update router that feeds links into the pipeline.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use teloxide::{
    net::Download,
    prelude::*,
    types::{InlineKeyboardButton, InlineKeyboardMarkup, InputFile, ParseMode, Recipient},
};

use tokio::{io::AsyncWriteExt, time::sleep};

pub mod convert;
pub mod handlers;
pub mod router;

use trb_core::{
    domain::{ChatId, ChatRef, MessageId, MessageRef, TransferTarget},
    errors::ClientError,
    formatting::markdown_to_rich_text,
    messaging::{
        port::{ClientResult, MessagingClient, ProgressFn},
        types::{
            ClientCapabilities, CopyOptions, DeliveryReceipt, MediaKind, MediaSource, Payload,
            RemoteMessage, SendRequest, TextFormat, UrlButton,
        },
    },
};

use crate::convert::{client_error, download_error, io_error, remote_message, CountingWriter};

/// Upload ceiling of the public Bot API server.
pub const CLOUD_UPLOAD_LIMIT: u64 = 50 * 1024 * 1024;
/// Upload ceiling of a self-hosted Bot API server.
pub const LOCAL_UPLOAD_LIMIT: u64 = 2000 * 1024 * 1024;

/// Build a bot, optionally pointed at a custom Bot API server.
pub fn make_bot(token: &str, api_url: Option<&str>) -> anyhow::Result<Bot> {
    let bot = Bot::new(token);
    match api_url {
        Some(url) => Ok(bot.set_api_url(reqwest::Url::parse(url)?)),
        None => Ok(bot),
    }
}

#[derive(Clone)]
pub struct TelegramClient {
    bot: Bot,
    /// Chat used to read messages (the Bot API has no direct "get message").
    lookup_chat: ChatId,
    max_upload_bytes: u64,
}

impl TelegramClient {
    pub fn new(bot: Bot, lookup_chat: ChatId, max_upload_bytes: u64) -> Self {
        Self {
            bot,
            lookup_chat,
            max_upload_bytes,
        }
    }

    pub fn bot(&self) -> Bot {
        self.bot.clone()
    }

    fn tg_chat(chat_id: ChatId) -> teloxide::types::ChatId {
        teloxide::types::ChatId(chat_id.0)
    }

    fn tg_msg_id(message_id: MessageId) -> teloxide::types::MessageId {
        teloxide::types::MessageId(message_id.0)
    }

    fn recipient(chat: &ChatRef) -> Recipient {
        match chat {
            ChatRef::Id(id) => Recipient::Id(Self::tg_chat(*id)),
            ChatRef::Handle(h) => Recipient::ChannelUsername(format!("@{h}")),
        }
    }

    async fn with_retry<T, Fut>(&self, mut op: impl FnMut() -> Fut) -> ClientResult<T>
    where
        Fut: std::future::IntoFuture<Output = std::result::Result<T, teloxide::RequestError>>,
        Fut::IntoFuture: Send,
    {
        const MAX_RETRIES: usize = 1;
        let mut attempts = 0usize;
        loop {
            match op().await {
                Ok(v) => return Ok(v),
                Err(e) => match e {
                    teloxide::RequestError::RetryAfter(d) if attempts < MAX_RETRIES => {
                        attempts += 1;
                        tracing::debug!(wait = ?d, "telegram asked to retry later");
                        sleep(d).await;
                        continue;
                    }
                    other => return Err(client_error(other)),
                },
            }
        }
    }

    /// Markdown captions are rendered to HTML here; HTML passes through.
    fn rich(text: &str, format: TextFormat) -> String {
        match format {
            TextFormat::Markdown => markdown_to_rich_text(text),
            TextFormat::Html => text.to_string(),
        }
    }

    async fn send_once(
        &self,
        target: TransferTarget,
        req: &SendRequest,
    ) -> std::result::Result<Message, teloxide::RequestError> {
        let chat = Self::tg_chat(target.chat_id);
        let caption = req
            .caption
            .as_deref()
            .map(|c| Self::rich(c, req.format))
            .filter(|c| !c.is_empty());
        let thumb = req.thumbnail.as_ref().map(|p| InputFile::file(p.clone()));

        let (kind, source) = match &req.payload {
            Payload::Text(text) => {
                let mut r = self
                    .bot
                    .send_message(chat, Self::rich(text, req.format))
                    .parse_mode(ParseMode::Html);
                if let Some(t) = target.topic_id {
                    r = r.message_thread_id(t);
                }
                return r.await;
            }
            Payload::Media { kind, source } => (*kind, source),
        };
        let file = match source {
            MediaSource::Local(p) => InputFile::file(p.clone()),
            MediaSource::Remote(id) => InputFile::file_id(id.clone()),
        };

        // Each request type has its own builder; the setters are the same.
        macro_rules! finish {
            ($r:expr, caption) => {{
                let mut r = $r;
                if let Some(c) = caption {
                    r = r.caption(c).parse_mode(ParseMode::Html);
                }
                if let Some(t) = target.topic_id {
                    r = r.message_thread_id(t);
                }
                r.await
            }};
            ($r:expr) => {{
                let mut r = $r;
                if let Some(t) = target.topic_id {
                    r = r.message_thread_id(t);
                }
                r.await
            }};
        }

        match kind {
            MediaKind::Video | MediaKind::Story => {
                let mut r = self.bot.send_video(chat, file).supports_streaming(true);
                if let Some(v) = req.video {
                    r = r.duration(v.duration).width(v.width).height(v.height);
                }
                if let Some(t) = thumb {
                    r = r.thumb(t);
                }
                finish!(r, caption)
            }
            MediaKind::Photo => finish!(self.bot.send_photo(chat, file), caption),
            MediaKind::Audio => {
                let mut r = self.bot.send_audio(chat, file);
                if let Some(t) = thumb {
                    r = r.thumb(t);
                }
                finish!(r, caption)
            }
            MediaKind::Voice => finish!(self.bot.send_voice(chat, file), caption),
            MediaKind::VideoNote => finish!(self.bot.send_video_note(chat, file)),
            MediaKind::Sticker => finish!(self.bot.send_sticker(chat, file)),
            MediaKind::Document | MediaKind::Text | MediaKind::None => {
                let mut r = self.bot.send_document(chat, file);
                if let Some(t) = thumb {
                    r = r.thumb(t);
                }
                finish!(r, caption)
            }
        }
    }

    fn url_keyboard(button: &UrlButton) -> Option<InlineKeyboardMarkup> {
        match reqwest::Url::parse(&button.url) {
            Ok(url) => Some(InlineKeyboardMarkup::new([[InlineKeyboardButton::url(
                button.label.clone(),
                url,
            )]])),
            Err(e) => {
                tracing::warn!(url = %button.url, error = %e, "invalid button url; sending without it");
                None
            }
        }
    }

    async fn download_to(
        &self,
        file_id: &str,
        dest: &Path,
        progress: ProgressFn<'_>,
    ) -> ClientResult<u64> {
        let file = self
            .with_retry(|| self.bot.get_file(file_id.to_string()))
            .await?;
        let total = u64::from(file.meta.size);

        let out = tokio::fs::File::create(dest).await.map_err(io_error)?;
        let mut writer = CountingWriter::new(out, total, progress);
        self.bot
            .download_file(&file.path, &mut writer)
            .await
            .map_err(download_error)?;
        writer.flush().await.map_err(io_error)?;
        Ok(writer.written())
    }
}

#[async_trait]
impl MessagingClient for TelegramClient {
    fn capabilities(&self) -> ClientCapabilities {
        ClientCapabilities {
            max_upload_bytes: self.max_upload_bytes,
            supports_join: false,
            supports_stories: false,
        }
    }

    /// Forward the message into the lookup chat, read it, then drop the forward.
    async fn get_message(
        &self,
        chat: &ChatRef,
        id: MessageId,
    ) -> ClientResult<Option<RemoteMessage>> {
        let from = Self::recipient(chat);
        let res = self
            .with_retry(|| {
                self.bot.forward_message(
                    Self::tg_chat(self.lookup_chat),
                    from.clone(),
                    Self::tg_msg_id(id),
                )
            })
            .await;

        let forwarded = match res {
            Ok(m) => m,
            Err(ClientError::NotFound(_)) => return Ok(None),
            Err(e) => return Err(e),
        };

        let origin_chat = match chat {
            ChatRef::Id(c) => *c,
            ChatRef::Handle(_) => forwarded
                .forward_from_chat()
                .map(|c| ChatId(c.id.0))
                .unwrap_or(self.lookup_chat),
        };
        let remote = remote_message(&forwarded, origin_chat, id);

        let copy = MessageRef {
            chat_id: self.lookup_chat,
            message_id: MessageId(forwarded.id.0),
        };
        if let Err(e) = self.delete_message(copy).await {
            tracing::debug!(error = %e, "failed to remove lookup forward");
        }
        Ok(Some(remote))
    }

    async fn get_story(&self, _chat: &ChatRef, _id: i32) -> ClientResult<Option<RemoteMessage>> {
        // Stories are invisible to bot accounts.
        Ok(None)
    }

    async fn download(
        &self,
        msg: &RemoteMessage,
        dest: &Path,
        progress: ProgressFn<'_>,
    ) -> ClientResult<PathBuf> {
        let media = msg
            .media
            .as_ref()
            .ok_or_else(|| ClientError::NotFound("message has no media".to_string()))?;
        let written = self.download_to(&media.file_id, dest, progress).await?;
        tracing::debug!(file_id = %media.file_id, written, "downloaded");
        Ok(dest.to_path_buf())
    }

    async fn send(
        &self,
        target: TransferTarget,
        req: SendRequest,
        progress: ProgressFn<'_>,
    ) -> ClientResult<DeliveryReceipt> {
        // Multipart uploads expose no byte-level progress; report start and end.
        let total = match &req.payload {
            Payload::Media {
                source: MediaSource::Local(p),
                ..
            } => tokio::fs::metadata(p).await.map(|m| m.len()).unwrap_or(0),
            _ => 0,
        };
        progress(0, total);

        let msg = self.with_retry(|| self.send_once(target, &req)).await?;
        progress(total, total);

        Ok(DeliveryReceipt {
            chat_id: ChatId(msg.chat.id.0),
            message_id: MessageId(msg.id.0),
        })
    }

    async fn copy(
        &self,
        receipt: &DeliveryReceipt,
        to: TransferTarget,
        opts: CopyOptions,
    ) -> ClientResult<DeliveryReceipt> {
        let keyboard = opts.button.as_ref().and_then(Self::url_keyboard);
        let id = self
            .with_retry(|| {
                let mut r = self
                    .bot
                    .copy_message(
                        Self::tg_chat(to.chat_id),
                        Self::tg_chat(receipt.chat_id),
                        Self::tg_msg_id(receipt.message_id),
                    )
                    .protect_content(opts.protect_content);
                if let Some(k) = &keyboard {
                    r = r.reply_markup(k.clone());
                }
                if let Some(t) = to.topic_id {
                    r = r.message_thread_id(t);
                }
                r
            })
            .await?;

        Ok(DeliveryReceipt {
            chat_id: to.chat_id,
            message_id: MessageId(id.0),
        })
    }

    async fn join(&self, _chat: &ChatRef) -> ClientResult<()> {
        Err(ClientError::AccessDenied(
            "bot accounts cannot join chats by themselves".to_string(),
        ))
    }

    async fn get_chat(&self, handle: &str) -> ClientResult<ChatId> {
        let recipient = Recipient::ChannelUsername(format!("@{}", handle.trim_start_matches('@')));
        let chat = self
            .with_retry(|| self.bot.get_chat(recipient.clone()))
            .await?;
        Ok(ChatId(chat.id.0))
    }

    async fn send_html(&self, chat_id: ChatId, html: &str) -> ClientResult<MessageRef> {
        let msg = self
            .with_retry(|| {
                self.bot
                    .send_message(Self::tg_chat(chat_id), html.to_string())
                    .parse_mode(ParseMode::Html)
            })
            .await?;

        Ok(MessageRef {
            chat_id,
            message_id: MessageId(msg.id.0),
        })
    }

    async fn edit_html(&self, msg: MessageRef, html: &str) -> ClientResult<()> {
        self.with_retry(|| {
            self.bot
                .edit_message_text(
                    Self::tg_chat(msg.chat_id),
                    Self::tg_msg_id(msg.message_id),
                    html.to_string(),
                )
                .parse_mode(ParseMode::Html)
        })
        .await?;
        Ok(())
    }

    async fn delete_message(&self, msg: MessageRef) -> ClientResult<()> {
        self.with_retry(|| {
            self.bot
                .delete_message(Self::tg_chat(msg.chat_id), Self::tg_msg_id(msg.message_id))
        })
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handles_become_channel_usernames() {
        assert_eq!(
            TelegramClient::recipient(&ChatRef::Handle("news".into())),
            Recipient::ChannelUsername("@news".into())
        );
        assert_eq!(
            TelegramClient::recipient(&ChatRef::Id(ChatId(-100123))),
            Recipient::Id(teloxide::types::ChatId(-100123))
        );
    }

    #[test]
    fn markdown_captions_render_to_html() {
        assert_eq!(
            TelegramClient::rich("**hi**", TextFormat::Markdown),
            "<b>hi</b>"
        );
        assert_eq!(TelegramClient::rich("<b>hi</b>", TextFormat::Html), "<b>hi</b>");
    }

    #[test]
    fn bad_button_urls_are_dropped() {
        let ok = UrlButton {
            label: "Upgrade".into(),
            url: "https://example.com/upgrade".into(),
        };
        assert!(TelegramClient::url_keyboard(&ok).is_some());
        let bad = UrlButton {
            label: "Upgrade".into(),
            url: "not a url".into(),
        };
        assert!(TelegramClient::url_keyboard(&bad).is_none());
    }

    #[test]
    fn custom_api_url_must_parse() {
        assert!(make_bot("123:abc", Some("http://localhost:8081")).is_ok());
        assert!(make_bot("123:abc", Some("::nope")).is_err());
        assert!(make_bot("123:abc", None).is_ok());
    }
}
