//! Telegram update handlers.
//!
//! Checks access, turns a message into a [`CommandContext`] and hands the
//! text to the core command adapter. Replies go out through the messaging
//! port, split to the configured size.

use std::sync::Arc;

use teloxide::{prelude::*, types::Message};

use chm_core::{
    commands::{is_command, CommandContext},
    domain::{ChatId, ConversationRef, UserId},
    formatting::split_message,
};

use crate::router::AppState;

const UNAUTHORIZED_REPLY: &str = "Unauthorized. Contact the bot owner for access.";

/// An empty allow-list leaves the bot open to everyone.
pub fn is_authorized(user_id: Option<UserId>, allowed_users: &[i64]) -> bool {
    let Some(user_id) = user_id else {
        return false;
    };
    allowed_users.is_empty() || allowed_users.contains(&user_id.0)
}

pub async fn handle_message(bot: Bot, msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    let Some(text) = msg.text() else {
        return Ok(());
    };
    if !is_command(text) {
        return Ok(());
    }

    let user_id = msg.from().map(|u| UserId(u.id.0 as i64));
    if !is_authorized(user_id, &state.cfg.telegram_allowed_users) {
        tracing::warn!(user = ?user_id, chat = msg.chat.id.0, "unauthorized command");
        if let Err(e) = bot.send_message(msg.chat.id, UNAUTHORIZED_REPLY).await {
            tracing::warn!(chat = msg.chat.id.0, error = %e, "unauthorized reply not delivered");
        }
        return Ok(());
    }

    let chat_id = ChatId(msg.chat.id.0);
    let ctx = CommandContext {
        conversation: ConversationRef::from(chat_id),
    };
    let reply = state.commands.handle(&ctx, text).await;
    send_html_split(&state, chat_id, &reply).await;
    Ok(())
}

async fn send_html_split(state: &AppState, chat_id: ChatId, html: &str) {
    let limit = reply_limit(
        state.cfg.telegram_safe_limit,
        state.messenger.capabilities().max_message_len,
    );
    for chunk in split_message(html, limit) {
        if let Err(e) = state.messenger.send_html(chat_id, &chunk).await {
            tracing::warn!(chat = chat_id.0, error = %e, "reply not delivered");
            return;
        }
    }
}

fn reply_limit(safe_limit: usize, max_len: usize) -> usize {
    safe_limit.clamp(200, max_len.max(200))
}
