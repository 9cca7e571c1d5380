use std::fmt;

/// Telegram user id (numeric).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UserId(pub i64);

/// Telegram chat id (numeric).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChatId(pub i64);

/// Telegram message id (numeric).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct MessageId(pub i32);

/// A stable reference to a Telegram message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MessageRef {
    pub chat_id: ChatId,
    pub message_id: MessageId,
}

/// A chat as a source link names it: either a numeric id or a public handle.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ChatRef {
    Id(ChatId),
    Handle(String),
}

impl fmt::Display for ChatRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChatRef::Id(id) => write!(f, "{}", id.0),
            ChatRef::Handle(h) => write!(f, "@{h}"),
        }
    }
}

/// Where a transfer delivers: a chat plus an optional forum topic.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TransferTarget {
    pub chat_id: ChatId,
    pub topic_id: Option<i32>,
}

impl TransferTarget {
    pub fn chat(chat_id: ChatId) -> Self {
        Self {
            chat_id,
            topic_id: None,
        }
    }

    /// Parse a stored `chat_id[/topic_id]` string.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        let (chat, topic) = match raw.split_once('/') {
            Some((c, t)) => (c.trim(), Some(t.trim())),
            None => (raw, None),
        };
        let chat_id = chat.parse::<i64>().ok()?;
        let topic_id = match topic {
            Some(t) => Some(t.parse::<i32>().ok()?),
            None => None,
        };
        Some(Self {
            chat_id: ChatId(chat_id),
            topic_id,
        })
    }

    /// Parse a stored target, falling back to the requesting chat itself.
    pub fn parse_or(raw: Option<&str>, fallback: ChatId) -> Self {
        raw.and_then(Self::parse)
            .unwrap_or_else(|| Self::chat(fallback))
    }
}

impl fmt::Display for TransferTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.topic_id {
            Some(t) => write!(f, "{}/{t}", self.chat_id.0),
            None => write!(f, "{}", self.chat_id.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_target_with_and_without_topic() {
        assert_eq!(
            TransferTarget::parse("-1001234"),
            Some(TransferTarget::chat(ChatId(-1001234)))
        );
        assert_eq!(
            TransferTarget::parse(" -1001234/7 "),
            Some(TransferTarget {
                chat_id: ChatId(-1001234),
                topic_id: Some(7)
            })
        );
        assert_eq!(TransferTarget::parse("abc"), None);
        assert_eq!(TransferTarget::parse("1/x"), None);
    }

    #[test]
    fn falls_back_to_requesting_chat() {
        let t = TransferTarget::parse_or(Some("garbage"), ChatId(42));
        assert_eq!(t, TransferTarget::chat(ChatId(42)));
        let t = TransferTarget::parse_or(None, ChatId(42));
        assert_eq!(t.to_string(), "42");
    }
}
