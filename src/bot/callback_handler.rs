//! Callback Handler module for processing inline keyboard callback queries

use anyhow::Result;
use std::sync::Arc;
use teloxide::prelude::*;
use tracing::debug;

use crate::conversation::Conversation;
use crate::events::{Event, EventKind};

use super::ui_builder::render_actions;

/// Handle callback queries from inline keyboards
pub async fn callback_handler(
    bot: Bot,
    q: teloxide::types::CallbackQuery,
    conversation: Arc<Conversation>,
) -> Result<()> {
    debug!(user_id = %q.from.id, data = ?q.data, "Received callback query from user");

    // Answer right away to remove the loading state, bordering may take a moment
    bot.answer_callback_query(q.id.clone()).await?;

    let Some(msg) = &q.message else {
        debug!(user_id = %q.from.id, "Callback query without message, ignoring");
        return Ok(());
    };

    let event = Event {
        user_id: q.from.id.0,
        chat_id: msg.chat().id.0,
        language_code: q.from.language_code.clone(),
        kind: EventKind::Button {
            data: q.data.clone().unwrap_or_default(),
            message_id: Some(msg.id().0),
        },
    };

    let actions = conversation.handle(event).await;
    render_actions(&bot, actions).await
}
