//! Telegram update handlers.
//!
//! Each handler is a small adapter that:
//! - reads the command or link out of the update
//! - updates per-user settings, or
//! - hands a transfer request to the `trb-core` orchestrator on its own task

use std::sync::Arc;

use teloxide::prelude::*;

use trb_core::domain::ChatId;

use crate::router::AppState;

mod commands;
mod links;
mod thumbnail;

pub async fn handle_message(bot: Bot, msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    if msg.from().is_none() {
        return Ok(());
    }

    // A photo captioned `/thumb` sets the user's thumbnail.
    if msg.photo().is_some() {
        if msg.caption().is_some_and(is_thumb_caption) {
            return thumbnail::handle_thumbnail(bot, msg, state).await;
        }
        return Ok(());
    }

    let Some(text) = msg.text() else {
        return Ok(());
    };

    if text.starts_with('/') {
        return commands::handle_command(bot, msg, state).await;
    }

    if links::looks_like_link(text) {
        return links::handle_link(bot, msg, state).await;
    }

    reply(
        &state,
        ChatId(msg.chat.id.0),
        "Send me a t.me message link, or /start for help.",
    )
    .await;
    Ok(())
}

/// Best-effort HTML reply through the throttled primary client.
pub(crate) async fn reply(state: &AppState, chat: ChatId, html: &str) {
    if let Err(e) = state.client.send_html(chat, html).await {
        tracing::warn!(chat = chat.0, error = %e, "reply failed");
    }
}

fn is_thumb_caption(caption: &str) -> bool {
    let first = caption.split_whitespace().next().unwrap_or("");
    first.split('@').next() == Some("/thumb")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thumb_caption_detection() {
        assert!(is_thumb_caption("/thumb"));
        assert!(is_thumb_caption("/thumb@relay_bot please"));
        assert!(!is_thumb_caption("/thumbnail"));
        assert!(!is_thumb_caption("nice pic"));
    }
}
