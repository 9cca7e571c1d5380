use std::path::PathBuf;

use crate::domain::{ChatId, MessageId, MessageRef};

/// What a source message carries.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MediaKind {
    Text,
    Photo,
    Video,
    Audio,
    Voice,
    VideoNote,
    Sticker,
    Document,
    Story,
    None,
}

impl MediaKind {
    /// Kinds relayed by reference (file id) without materializing local bytes.
    pub fn is_relayed_by_reference(self) -> bool {
        matches!(self, MediaKind::Sticker | MediaKind::Voice | MediaKind::VideoNote)
    }

    pub fn default_file_name(self) -> &'static str {
        match self {
            MediaKind::Video => "video.mp4",
            MediaKind::Photo => "photo.jpg",
            MediaKind::Audio => "audio.mp3",
            MediaKind::Voice => "voice.ogg",
            MediaKind::VideoNote => "video_note.mp4",
            MediaKind::Sticker => "sticker.webp",
            MediaKind::Story => "story",
            MediaKind::Document | MediaKind::Text | MediaKind::None => "document",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            MediaKind::Text => "text",
            MediaKind::Photo => "photo",
            MediaKind::Video => "video",
            MediaKind::Audio => "audio",
            MediaKind::Voice => "voice",
            MediaKind::VideoNote => "video_note",
            MediaKind::Sticker => "sticker",
            MediaKind::Document => "document",
            MediaKind::Story => "story",
            MediaKind::None => "none",
        }
    }
}

/// Media attached to a fetched message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RemoteMedia {
    pub kind: MediaKind,
    /// Transport handle usable by the client that fetched the message.
    pub file_id: String,
    pub file_name: Option<String>,
    pub file_size: Option<u64>,
}

/// A message as returned by `MessagingClient::get_message`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RemoteMessage {
    pub chat_id: ChatId,
    pub id: MessageId,
    pub is_service: bool,
    /// Message text for plain text posts.
    pub text: Option<String>,
    /// Caption for media posts.
    pub caption: Option<String>,
    /// Markup of `text` and `caption`.
    pub format: TextFormat,
    pub media: Option<RemoteMedia>,
    pub has_link_preview: bool,
}

impl RemoteMessage {
    pub fn is_empty(&self) -> bool {
        self.media.is_none() && self.text.as_deref().map_or(true, |t| t.trim().is_empty())
    }
}

/// Where the bytes of an outgoing media message come from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MediaSource {
    Local(PathBuf),
    /// A file id already known to the sending client.
    Remote(String),
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TextFormat {
    #[default]
    Markdown,
    Html,
}

/// Probed video attributes used to enrich uploads.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct VideoMeta {
    pub duration: u32,
    pub width: u32,
    pub height: u32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Payload {
    Text(String),
    Media { kind: MediaKind, source: MediaSource },
}

/// A single outgoing message (covers the `send_text` .. `send_video_note` family).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SendRequest {
    pub payload: Payload,
    pub caption: Option<String>,
    pub format: TextFormat,
    pub thumbnail: Option<PathBuf>,
    pub video: Option<VideoMeta>,
}

impl SendRequest {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            payload: Payload::Text(text.into()),
            caption: None,
            format: TextFormat::Markdown,
            thumbnail: None,
            video: None,
        }
    }

    pub fn media(kind: MediaKind, source: MediaSource) -> Self {
        Self {
            payload: Payload::Media { kind, source },
            caption: None,
            format: TextFormat::Markdown,
            thumbnail: None,
            video: None,
        }
    }

    pub fn with_caption(mut self, caption: Option<String>) -> Self {
        self.caption = caption;
        self
    }

    pub fn with_format(mut self, format: TextFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_thumbnail(mut self, thumbnail: Option<PathBuf>) -> Self {
        self.thumbnail = thumbnail;
        self
    }

    pub fn with_video(mut self, video: Option<VideoMeta>) -> Self {
        self.video = video;
        self
    }

    pub fn kind(&self) -> MediaKind {
        match &self.payload {
            Payload::Text(_) => MediaKind::Text,
            Payload::Media { kind, .. } => *kind,
        }
    }
}

/// Proof of a delivered message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DeliveryReceipt {
    pub chat_id: ChatId,
    pub message_id: MessageId,
}

impl From<DeliveryReceipt> for MessageRef {
    fn from(r: DeliveryReceipt) -> Self {
        Self {
            chat_id: r.chat_id,
            message_id: r.message_id,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UrlButton {
    pub label: String,
    pub url: String,
}

/// Options for the final copy step of a delivery.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CopyOptions {
    /// Restrict forwarding/saving of the copy.
    pub protect_content: bool,
    pub button: Option<UrlButton>,
}

impl CopyOptions {
    pub fn restricted(button: UrlButton) -> Self {
        Self {
            protect_content: true,
            button: Some(button),
        }
    }
}

/// Capabilities / feature flags of a client implementation.
#[derive(Clone, Copy, Debug)]
pub struct ClientCapabilities {
    pub max_upload_bytes: u64,
    pub supports_join: bool,
    pub supports_stories: bool,
}
