use std::sync::Arc;

use teloxide::prelude::*;

use trb_core::{
    domain::{ChatId, UserId},
    formatting::escape_html,
    prefs::BackendChoice,
};

use crate::router::AppState;

use super::{links::run_transfer, reply};

const HELP: &str = "🤖 <b>Media Relay Bot</b>\n\n\
Send a <code>t.me</code> message link and I will fetch and re-upload it.\n\n\
<b>📋 Commands:</b>\n\
/setchat <code>chat_id[/topic_id]</code> - Deliver to another chat\n\
/rename <code>tag</code> - Append a tag to file names\n\
/caption <code>text</code> - Append text to captions\n\
/delete <code>words...</code> - Remove words from names and captions\n\
/replace <code>'OLD' 'NEW'</code> - Replace words in names and captions\n\
/method <code>primary|alternate</code> - Choose the upload path\n\
/batch <code>link count</code> - Fetch consecutive messages\n\
/remthumb - Remove your thumbnail\n\
/reset - Clear all your settings\n\n\
<b>💡 Tips:</b>\n\
• Send a photo with caption /thumb to set a thumbnail";

fn parse_command(text: &str) -> (String, String) {
    // Telegram may send `/cmd@botname arg1 ...`
    let mut parts = text.trim().splitn(2, char::is_whitespace);
    let first = parts.next().unwrap_or("").trim();
    let rest = parts.next().unwrap_or("").trim().to_string();

    let cmd = first
        .trim_start_matches('/')
        .split('@')
        .next()
        .unwrap_or("")
        .to_lowercase();

    (cmd, rest)
}

/// `'OLD' 'NEW'`, or two bare words. `NEW` may be empty when quoted.
fn parse_replace(arg: &str) -> Option<(String, String)> {
    let quoted: Vec<&str> = arg.split('\'').skip(1).step_by(2).collect();
    let (old, new) = match quoted.as_slice() {
        [old, new] if arg.matches('\'').count() == 4 => (*old, *new),
        _ if !arg.contains('\'') => {
            let mut words = arg.split_whitespace();
            match (words.next(), words.next(), words.next()) {
                (Some(old), Some(new), None) => (old, new),
                _ => return None,
            }
        }
        _ => return None,
    };
    if old.is_empty() {
        return None;
    }
    Some((old.to_string(), new.to_string()))
}

/// `<link> <count>` with `1 <= count <= limit`.
fn parse_batch(arg: &str, limit: u32) -> Option<(String, u32)> {
    let mut parts = arg.split_whitespace();
    let link = parts.next()?;
    let count = parts.next()?.parse::<u32>().ok()?;
    if parts.next().is_some() || count == 0 || count > limit {
        return None;
    }
    Some((link.to_string(), count))
}

async fn saved(state: &AppState, chat: ChatId, res: trb_core::Result<()>, ok: &str) {
    match res {
        Ok(()) => reply(state, chat, ok).await,
        Err(e) => {
            tracing::warn!(error = %e, "failed to save preference");
            reply(state, chat, "❌ Could not save the setting. Try again later.").await;
        }
    }
}

pub async fn handle_command(_bot: Bot, msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    let Some(from) = msg.from() else {
        return Ok(());
    };
    let Some(text) = msg.text() else {
        return Ok(());
    };

    let user = UserId(from.id.0 as i64);
    let chat = ChatId(msg.chat.id.0);
    let prefs = state.orchestrator.prefs();
    let users = state.orchestrator.users();

    let (cmd, arg) = parse_command(text);
    tracing::debug!(user = user.0, cmd = %cmd, "command");

    match cmd.as_str() {
        "start" | "help" => reply(&state, chat, HELP).await,

        "setchat" => {
            if users.set_target(user, &arg) {
                let msg = format!(
                    "✅ Deliveries now go to <code>{}</code>.",
                    escape_html(arg.trim())
                );
                reply(&state, chat, &msg).await;
            } else {
                reply(&state, chat, "Usage: /setchat <code>chat_id[/topic_id]</code>").await;
            }
        }

        "rename" => {
            if arg.is_empty() {
                reply(&state, chat, "Usage: /rename <code>tag</code>").await;
            } else {
                let res = prefs.set_rename_tag(user, &arg).await;
                saved(&state, chat, res, "✅ Rename tag set.").await;
            }
        }

        "caption" => {
            if arg.is_empty() {
                reply(&state, chat, "Usage: /caption <code>text</code>").await;
            } else {
                let res = prefs.set_custom_caption(user, &arg).await;
                saved(&state, chat, res, "✅ Custom caption set.").await;
            }
        }

        "delete" => {
            let words: Vec<String> = arg.split_whitespace().map(str::to_string).collect();
            if words.is_empty() {
                reply(&state, chat, "Usage: /delete <code>word ...</code>").await;
            } else {
                let res = prefs.add_delete_words(user, &words).await;
                let ok = format!("✅ {} word(s) added to the delete list.", words.len());
                saved(&state, chat, res, &ok).await;
            }
        }

        "replace" => {
            let Some((old, new)) = parse_replace(&arg) else {
                reply(&state, chat, "Usage: /replace <code>'OLD' 'NEW'</code>").await;
                return Ok(());
            };
            match prefs.add_replacement(user, &old, &new).await {
                Ok(true) => {
                    let msg = format!(
                        "✅ <code>{}</code> will be replaced with <code>{}</code>.",
                        escape_html(&old),
                        escape_html(&new)
                    );
                    reply(&state, chat, &msg).await;
                }
                Ok(false) => {
                    let msg = format!(
                        "❌ <code>{}</code> is in your delete list; it cannot be replaced.",
                        escape_html(&old)
                    );
                    reply(&state, chat, &msg).await;
                }
                Err(e) => saved(&state, chat, Err(e), "").await,
            }
        }

        "method" => match BackendChoice::parse(&arg) {
            Some(choice) => {
                let res = prefs.set_backend(user, choice).await;
                let ok = format!("✅ Upload method: <b>{}</b>.", choice.as_str());
                saved(&state, chat, res, &ok).await;
            }
            None => reply(&state, chat, "Usage: /method <code>primary|alternate</code>").await,
        },

        "reset" => {
            users.clear(user);
            let res = prefs.reset(user).await;
            saved(&state, chat, res, "✅ All settings cleared.").await;
        }

        "remthumb" => match prefs.remove_thumbnail(user).await {
            Ok(true) => reply(&state, chat, "✅ Thumbnail removed.").await,
            Ok(false) => reply(&state, chat, "No thumbnail set.").await,
            Err(e) => saved(&state, chat, Err(e), "").await,
        },

        "lock" => {
            if !state.cfg.is_owner(user.0) {
                reply(&state, chat, "❌ Only the owner can lock channels.").await;
                return Ok(());
            }
            let Ok(channel) = arg.parse::<i64>() else {
                reply(&state, chat, "Usage: /lock <code>channel_id</code>").await;
                return Ok(());
            };
            match state.protected.lock(channel).await {
                Ok(true) => {
                    tracing::info!(user = user.0, channel, "channel locked");
                    let msg = format!("🔒 Channel <code>{channel}</code> is now protected.");
                    reply(&state, chat, &msg).await;
                }
                Ok(false) => reply(&state, chat, "Channel is already protected.").await,
                Err(e) => saved(&state, chat, Err(e), "").await,
            }
        }

        "batch" => {
            let limit = state.cfg.batch_limit;
            let Some((link, count)) = parse_batch(&arg, limit) else {
                let msg = format!("Usage: /batch <code>link count</code> (count 1-{limit})");
                reply(&state, chat, &msg).await;
                return Ok(());
            };
            if !users.begin_batch(user) {
                reply(&state, chat, "⏳ A batch is already running.").await;
                return Ok(());
            }

            let state = state.clone();
            tokio::spawn(async move {
                let mut failed = 0u32;
                for offset in 0..count {
                    // count is bounded by the batch limit, far below i32::MAX.
                    let offset = i32::try_from(offset).unwrap_or(i32::MAX);
                    if run_transfer(&state, user, chat, &link, offset).await.is_err() {
                        failed += 1;
                    }
                }
                state.orchestrator.users().end_batch(user);
                tracing::info!(user = user.0, count, failed, "batch finished");
                let msg = format!("✅ Batch finished: {}/{count} delivered.", count - failed);
                reply(&state, chat, &msg).await;
            });
        }

        _ => {
            let msg = format!("Unknown command: /{}", escape_html(&cmd));
            reply(&state, chat, &msg).await;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_command_and_rest() {
        assert_eq!(
            parse_command("/setchat@relay_bot -1001/7"),
            ("setchat".to_string(), "-1001/7".to_string())
        );
        assert_eq!(
            parse_command("  /RESET  "),
            ("reset".to_string(), String::new())
        );
        assert_eq!(
            parse_command("/caption via   relay"),
            ("caption".to_string(), "via   relay".to_string())
        );
    }

    #[test]
    fn parses_replace_arguments() {
        assert_eq!(
            parse_replace("'old word' 'new word'"),
            Some(("old word".to_string(), "new word".to_string()))
        );
        assert_eq!(
            parse_replace("'spam' ''"),
            Some(("spam".to_string(), String::new()))
        );
        assert_eq!(
            parse_replace("foo bar"),
            Some(("foo".to_string(), "bar".to_string()))
        );
        assert_eq!(parse_replace("'' 'x'"), None);
        assert_eq!(parse_replace("'only one'"), None);
        assert_eq!(parse_replace("a b c"), None);
        assert_eq!(parse_replace(""), None);
    }

    #[test]
    fn batch_count_is_bounded() {
        assert_eq!(
            parse_batch("https://t.me/c/1/10 5", 100),
            Some(("https://t.me/c/1/10".to_string(), 5))
        );
        assert_eq!(parse_batch("https://t.me/c/1/10 0", 100), None);
        assert_eq!(parse_batch("https://t.me/c/1/10 101", 100), None);
        assert_eq!(parse_batch("https://t.me/c/1/10", 100), None);
        assert_eq!(parse_batch("https://t.me/c/1/10 x", 100), None);
    }
}
