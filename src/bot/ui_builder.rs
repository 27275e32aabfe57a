//! UI Builder module: turns conversation actions into Telegram requests

use anyhow::Result;
use teloxide::prelude::*;
use teloxide::types::{InlineKeyboardButton, InlineKeyboardMarkup, InputFile, MessageId};
use tracing::{debug, error};

use crate::events::{Action, Keyboard};

/// Create an inline keyboard from a conversation keyboard
pub fn build_inline_keyboard(keyboard: &Keyboard) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(keyboard.rows.iter().map(|row| {
        row.iter()
            .map(|button| InlineKeyboardButton::callback(button.label.clone(), button.choice.to_data()))
            .collect::<Vec<_>>()
    }))
}

/// Send every action to Telegram, in order
///
/// A failed message edit is only logged, the remaining actions still go out.
pub async fn render_actions(bot: &Bot, actions: Vec<Action>) -> Result<()> {
    for action in actions {
        match action {
            Action::SendText {
                chat_id,
                text,
                keyboard,
            } => {
                let mut request = bot.send_message(ChatId(chat_id), text);
                if let Some(keyboard) = keyboard {
                    request = request.reply_markup(build_inline_keyboard(&keyboard));
                }
                request.await?;
            }
            Action::SendDocument {
                chat_id,
                bytes,
                filename,
            } => {
                debug!(chat_id, size = bytes.len(), filename = %filename, "Sending document");
                bot.send_document(ChatId(chat_id), InputFile::memory(bytes).file_name(filename))
                    .await?;
            }
            Action::EditMessage {
                chat_id,
                message_id,
                text,
            } => {
                if let Err(e) = bot
                    .edit_message_text(ChatId(chat_id), MessageId(message_id), text)
                    .await
                {
                    error!(chat_id, message_id, error = %e, "Failed to edit message");
                }
            }
        }
    }
    Ok(())
}
