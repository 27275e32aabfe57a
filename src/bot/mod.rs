//! Bot module for handling Telegram interactions
//!
//! This module only translates between Telegram and the conversation:
//! - `message_handler`: turns text, commands and documents into conversation events
//! - `callback_handler`: turns inline keyboard presses into conversation events
//! - `ui_builder`: renders conversation actions as Telegram requests

pub mod callback_handler;
pub mod message_handler;
pub mod ui_builder;

use std::sync::Arc;
use std::time::Duration;

use teloxide::prelude::*;
use tokio::task::JoinHandle;
use tracing::warn;

use crate::conversation::Conversation;

// Re-export main handler functions for use in main.rs
pub use callback_handler::callback_handler;
pub use message_handler::message_handler;

pub use ui_builder::{build_inline_keyboard, render_actions};

/// How often abandoned sessions are looked for
pub fn reap_interval(ttl: Duration) -> Duration {
    (ttl / 4).clamp(Duration::from_secs(1), Duration::from_secs(300))
}

/// Periodically drop sessions older than `ttl` and tell their users
pub fn spawn_session_reaper(
    bot: Bot,
    conversation: Arc<Conversation>,
    ttl: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(reap_interval(ttl));
        loop {
            ticker.tick().await;
            let notices = conversation.reap_expired(ttl).await;
            if let Err(e) = render_actions(&bot, notices).await {
                warn!(error = %e, "Failed to notify users about expired sessions");
            }
        }
    })
}
