use std::sync::Arc;

use teloxide::prelude::*;

use trb_core::{
    domain::{ChatId, UserId},
    orchestrator::{TransferOutcome, TransferRequest},
};

use crate::router::AppState;

pub(super) const PROCESSING: &str = "⏳ Processing...";

pub(super) fn looks_like_link(text: &str) -> bool {
    text.contains("t.me/")
}

/// Post a status message, then run one transfer to completion. The
/// orchestrator reports failures to the user itself.
pub(super) async fn run_transfer(
    state: &AppState,
    user: UserId,
    chat: ChatId,
    link: &str,
    offset: i32,
) -> trb_core::Result<TransferOutcome> {
    let status = match state.client.send_html(chat, PROCESSING).await {
        Ok(m) => Some(m),
        Err(e) => {
            tracing::debug!(error = %e, "status message failed; continuing without one");
            None
        }
    };

    let req = TransferRequest {
        requester: user,
        origin_chat: chat,
        status,
        raw_link: link.to_string(),
        offset,
    };
    let res = state.orchestrator.transfer(&req).await;
    match &res {
        Ok(outcome) => tracing::info!(user = user.0, link, ?outcome, "transfer done"),
        Err(e) => tracing::debug!(user = user.0, link, error = %e, "transfer failed"),
    }
    res
}

pub async fn handle_link(_bot: Bot, msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    let (Some(user), Some(text)) = (msg.from(), msg.text()) else {
        return Ok(());
    };
    let user = UserId(user.id.0 as i64);
    let chat = ChatId(msg.chat.id.0);
    let link = text.trim().to_string();

    // Transfers can run for minutes; keep the dispatcher free for other updates.
    tokio::spawn(async move {
        let _ = run_transfer(&state, user, chat, &link, 0).await;
    });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_message_links() {
        assert!(looks_like_link("https://t.me/c/123/45"));
        assert!(looks_like_link("t.me/somechannel/9?single"));
        assert!(!looks_like_link("hello there"));
    }
}
