use std::sync::Arc;

use teloxide::{net::Download, prelude::*};

use trb_core::domain::{ChatId, UserId};

use crate::router::AppState;

use super::reply;

/// Store the largest size of a `/thumb` photo as the user's thumbnail.
pub async fn handle_thumbnail(bot: Bot, msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    let Some(user) = msg.from() else {
        return Ok(());
    };
    let Some(photo) = msg.photo().and_then(|sizes| sizes.last()) else {
        return Ok(());
    };
    let user = UserId(user.id.0 as i64);
    let chat = ChatId(msg.chat.id.0);

    let file = bot.get_file(&photo.file.id).await?;
    let mut image = Vec::with_capacity(file.meta.size as usize);
    if let Err(e) = bot.download_file(&file.path, &mut image).await {
        tracing::warn!(user = user.0, error = %e, "thumbnail download failed");
        reply(&state, chat, "❌ Could not download the photo.").await;
        return Ok(());
    }

    match state.orchestrator.prefs().set_thumbnail(user, &image).await {
        Ok(path) => {
            tracing::info!(user = user.0, path = %path.display(), "thumbnail saved");
            reply(&state, chat, "✅ Thumbnail saved.").await;
        }
        Err(e) => {
            tracing::warn!(user = user.0, error = %e, "failed to save thumbnail");
            reply(&state, chat, "❌ Could not save the thumbnail.").await;
        }
    }
    Ok(())
}
