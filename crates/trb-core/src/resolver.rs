//! Content references: parsing message links and fetching what they point to.

use std::sync::Arc;

use crate::{
    domain::{ChatId, ChatRef, MessageId, MessageRef},
    errors::{ClientError, Error, ResolutionError},
    messaging::{
        port::MessagingClient,
        types::{MediaKind, RemoteMessage},
    },
    prefs::ProtectedChannels,
    Result,
};

/// Parsed locator for remote content. Message ids already include the offset.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ContentReference {
    /// `t.me/c/<id>/[<topic>/]<msg>`
    Private { chat: ChatId, message: MessageId },
    /// `t.me/b/<bot>/<msg>`
    Bot { chat: ChatRef, message: MessageId },
    /// `t.me/<chat>/s/<story>`
    Story { chat: ChatRef, story_id: i32 },
    /// `t.me/<handle>/<msg>`
    Public { handle: String, message: MessageId },
}

/// Strip a trailing `?single` and anything after it.
pub fn normalize_link(raw: &str) -> &str {
    raw.trim().split("?single").next().unwrap_or("").trim()
}

fn chat_ref_from(segment: &str, channel_prefix: bool) -> ChatRef {
    match segment.parse::<i64>() {
        Ok(n) if channel_prefix => format!("-100{n}")
            .parse::<i64>()
            .map(|id| ChatRef::Id(ChatId(id)))
            .unwrap_or_else(|_| ChatRef::Handle(segment.to_string())),
        Ok(n) => ChatRef::Id(ChatId(n)),
        Err(_) => ChatRef::Handle(segment.trim_start_matches('@').to_string()),
    }
}

fn message_id(segment: &str, offset: i32) -> std::result::Result<MessageId, ResolutionError> {
    let base = segment
        .parse::<i32>()
        .map_err(|_| ResolutionError::InvalidLink)?;
    match base.checked_add(offset) {
        Some(id) if id > 0 => Ok(MessageId(id)),
        _ => Err(ResolutionError::InvalidLink),
    }
}

fn is_handle(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Classify a message link. `offset` is added to message ids (batch ranges);
/// story ids are taken as-is.
pub fn parse_reference(
    raw: &str,
    offset: i32,
) -> std::result::Result<ContentReference, ResolutionError> {
    let link = normalize_link(raw);
    let Some((_, path)) = link.split_once("t.me/") else {
        return Err(ResolutionError::InvalidLink);
    };
    let path = path.split(['?', '#']).next().unwrap_or("");
    let segs: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

    match segs.as_slice() {
        ["c", chat, .., last] if segs.len() >= 3 => {
            let ChatRef::Id(chat) = chat_ref_from(chat, true) else {
                return Err(ResolutionError::InvalidLink);
            };
            Ok(ContentReference::Private {
                chat,
                message: message_id(last, offset)?,
            })
        }
        ["b", bot, last] if is_handle(bot) => Ok(ContentReference::Bot {
            chat: chat_ref_from(bot, false),
            message: message_id(last, offset)?,
        }),
        [chat, "s", story] if is_handle(chat) => Ok(ContentReference::Story {
            chat: chat_ref_from(chat, true),
            story_id: story
                .parse::<i32>()
                .map_err(|_| ResolutionError::InvalidLink)?,
        }),
        [handle, .., last] if is_handle(handle) && segs.len() <= 3 => {
            Ok(ContentReference::Public {
                handle: handle.to_string(),
                message: message_id(last, offset)?,
            })
        }
        _ => Err(ResolutionError::InvalidLink),
    }
}

/// Which client fetched a message (and therefore can download it).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClientTier {
    Primary,
    Secondary,
}

#[derive(Clone, Debug)]
pub struct ResolvedMedia {
    pub kind: MediaKind,
    pub filename: String,
    /// `1` when the source does not report a size.
    pub byte_size: u64,
    pub tier: ClientTier,
    pub message: RemoteMessage,
    /// Public link fetched through the secondary after the primary failed.
    pub fallback_used: bool,
    /// Fetched directly by the primary from a public link.
    pub public_direct: bool,
}

impl ResolvedMedia {
    fn new(message: RemoteMessage, tier: ClientTier, story: bool) -> Self {
        let kind = match (&message.media, story) {
            (_, true) => MediaKind::Story,
            (Some(m), false) => m.kind,
            (None, false) if message.text.is_some() => MediaKind::Text,
            (None, false) => MediaKind::None,
        };
        let filename = message
            .media
            .as_ref()
            .and_then(|m| m.file_name.clone())
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| {
                message
                    .media
                    .as_ref()
                    .map_or(kind, |m| m.kind)
                    .default_file_name()
                    .to_string()
            });
        let byte_size = message
            .media
            .as_ref()
            .and_then(|m| m.file_size)
            .filter(|s| *s > 0)
            .unwrap_or(1);
        Self {
            kind,
            filename,
            byte_size,
            tier,
            message,
            fallback_used: false,
            public_direct: false,
        }
    }

    /// Whether this can be sent on without downloading the bytes.
    pub fn is_text(&self) -> bool {
        self.kind == MediaKind::Text || self.message.has_link_preview
    }

    pub fn relays_by_reference(&self) -> bool {
        self.kind.is_relayed_by_reference() || (self.public_direct && self.kind == MediaKind::Photo)
    }
}

/// Turns content references into fetched messages.
pub struct Resolver {
    primary: Arc<dyn MessagingClient>,
    secondary: Option<Arc<dyn MessagingClient>>,
    protected: Arc<ProtectedChannels>,
}

impl Resolver {
    pub fn new(
        primary: Arc<dyn MessagingClient>,
        secondary: Option<Arc<dyn MessagingClient>>,
        protected: Arc<ProtectedChannels>,
    ) -> Self {
        Self {
            primary,
            secondary,
            protected,
        }
    }

    pub fn client(&self, tier: ClientTier) -> &Arc<dyn MessagingClient> {
        match (tier, &self.secondary) {
            (ClientTier::Secondary, Some(s)) => s,
            _ => &self.primary,
        }
    }

    /// Client with member access to private chats: the secondary when present.
    fn member_client(&self) -> (ClientTier, &Arc<dyn MessagingClient>) {
        match &self.secondary {
            Some(s) => (ClientTier::Secondary, s),
            None => (ClientTier::Primary, &self.primary),
        }
    }

    async fn status(&self, status: Option<MessageRef>, text: &str) {
        if let Some(msg) = status {
            if let Err(e) = self.primary.edit_html(msg, text).await {
                tracing::debug!(error = %e, "status edit failed");
            }
        }
    }

    pub async fn resolve(
        &self,
        raw_link: &str,
        offset: i32,
        status: Option<MessageRef>,
    ) -> Result<ResolvedMedia> {
        match parse_reference(raw_link, offset)? {
            ContentReference::Private { chat, message } => {
                self.check_protected(&ChatRef::Id(chat))?;
                let (tier, client) = self.member_client();
                let msg = fetch(client.as_ref(), &ChatRef::Id(chat), message).await?;
                Ok(ResolvedMedia::new(msg, tier, false))
            }
            ContentReference::Bot { chat, message } => {
                self.check_protected(&chat)?;
                let (tier, client) = self.member_client();
                let msg = fetch(client.as_ref(), &chat, message).await?;
                Ok(ResolvedMedia::new(msg, tier, false))
            }
            ContentReference::Story { chat, story_id } => {
                self.status(status, "📖 Story link detected...").await;
                let Some(sec) = self
                    .secondary
                    .as_ref()
                    .filter(|s| s.capabilities().supports_stories)
                else {
                    return Err(ResolutionError::LoginRequired.into());
                };
                self.check_protected(&chat)?;
                let story = sec
                    .get_story(&chat, story_id)
                    .await
                    .map_err(fetch_error)?
                    .filter(|m| m.media.is_some())
                    .ok_or(ResolutionError::NotFound)?;
                Ok(ResolvedMedia::new(story, ClientTier::Secondary, true))
            }
            ContentReference::Public { handle, message } => {
                self.status(status, "🔗 Public link detected...").await;
                self.resolve_public(&handle, message, status).await
            }
        }
    }

    fn check_protected(&self, chat: &ChatRef) -> Result<()> {
        match chat {
            ChatRef::Id(id) if self.protected.contains(id.0) => {
                Err(ResolutionError::Protected.into())
            }
            _ => Ok(()),
        }
    }

    /// Primary first; on any failure, join and fetch through the secondary.
    async fn resolve_public(
        &self,
        handle: &str,
        message: MessageId,
        status: Option<MessageRef>,
    ) -> Result<ResolvedMedia> {
        let chat = ChatRef::Handle(handle.to_string());
        let primary_err = match fetch(self.primary.as_ref(), &chat, message).await {
            Ok(msg) => {
                let mut resolved = ResolvedMedia::new(msg, ClientTier::Primary, false);
                resolved.public_direct = true;
                return Ok(resolved);
            }
            Err(e) => e,
        };
        tracing::debug!(handle, error = %primary_err, "primary could not fetch public message");

        let Some(sec) = &self.secondary else {
            return Err(primary_err);
        };

        self.status(status, "🔄 Trying alternative method...").await;
        if sec.capabilities().supports_join {
            if let Err(e) = sec.join(&chat).await {
                tracing::debug!(handle, error = %e, "join failed; fetching anyway");
            }
        }
        let chat_id = sec.get_chat(handle).await.map_err(fetch_error)?;
        let msg = fetch(sec.as_ref(), &ChatRef::Id(chat_id), message).await?;

        let mut resolved = ResolvedMedia::new(msg, ClientTier::Secondary, false);
        resolved.fallback_used = true;
        tracing::info!(handle, message = message.0, "public message resolved via secondary");
        Ok(resolved)
    }
}

fn fetch_error(e: ClientError) -> Error {
    match e {
        ClientError::NotFound(_) => ResolutionError::NotFound.into(),
        other => other.into(),
    }
}

async fn fetch(
    client: &dyn MessagingClient,
    chat: &ChatRef,
    id: MessageId,
) -> Result<RemoteMessage> {
    let msg = client.get_message(chat, id).await.map_err(fetch_error)?;
    match msg {
        Some(m) if !m.is_service && !m.is_empty() => Ok(m),
        _ => Err(ResolutionError::NotFound.into()),
    }
}
