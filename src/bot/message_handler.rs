//! Message Handler module for processing incoming Telegram messages

use anyhow::Result;
use std::sync::Arc;
use teloxide::prelude::*;
use teloxide::types::FileId;
use tracing::{debug, error};

use crate::conversation::Conversation;
use crate::events::{parse_command, Event, EventKind};
use crate::localization::t_lang;

use super::ui_builder::render_actions;

/// Fetch a Telegram file into memory
pub async fn download_file(bot: &Bot, file_id: FileId) -> Result<Vec<u8>> {
    let file = bot.get_file(file_id).await?;
    let url = format!(
        "https://api.telegram.org/file/bot{}/{}",
        bot.token(),
        file.path
    );

    let response = reqwest::get(&url).await?.error_for_status()?;
    let bytes = response.bytes().await?;

    Ok(bytes.to_vec())
}

/// Text message to conversation event, commands split into name and arguments
pub fn text_event_kind(text: &str) -> EventKind {
    match parse_command(text) {
        Some((name, args)) => EventKind::Command { name, args },
        None => EventKind::Text {
            text: text.to_string(),
        },
    }
}

pub async fn message_handler(
    bot: Bot,
    msg: Message,
    conversation: Arc<Conversation>,
) -> Result<()> {
    let Some(user) = msg.from.as_ref() else {
        debug!(chat_id = %msg.chat.id, "Ignoring message without sender");
        return Ok(());
    };
    let language_code = user.language_code.clone();

    let kind = if let Some(text) = msg.text() {
        debug!(user_id = %user.id, message_length = text.len(), "Received text message from user");
        text_event_kind(text)
    } else if let Some(doc) = msg.document() {
        debug!(user_id = %user.id, file_name = ?doc.file_name, "Received document from user");
        match download_file(&bot, doc.file.id.clone()).await {
            Ok(bytes) => EventKind::Document {
                bytes,
                file_name: doc.file_name.clone(),
            },
            Err(e) => {
                error!(user_id = %user.id, error = %e, "Failed to download document for user");
                bot.send_message(msg.chat.id, t_lang("processing-failed", language_code.as_deref()))
                    .await?;
                return Ok(());
            }
        }
    } else if msg.photo().is_some() {
        // Photos arrive recompressed, only documents keep the original pixels
        bot.send_message(msg.chat.id, t_lang("photo-as-file", language_code.as_deref()))
            .await?;
        return Ok(());
    } else {
        debug!(user_id = %user.id, "Received unsupported message type from user");
        bot.send_message(msg.chat.id, t_lang("send-picture-hint", language_code.as_deref()))
            .await?;
        return Ok(());
    };

    let event = Event {
        user_id: user.id.0,
        chat_id: msg.chat.id.0,
        language_code,
        kind,
    };
    let actions = conversation.handle(event).await;
    render_actions(&bot, actions).await
}
